//! Session setup and settings requests

use serde::{Deserialize, Serialize};

use crate::crash_point::CrashPoint;

use super::state::{CoordinatorRole, ParticipantRole, Role};

/// Creates a session. Exactly one of `is_coordinator` / `is_subordinate`
/// must be set.
///
/// The engine keeps a copy in the session's log so the session can be
/// rebuilt after a process restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    #[serde(default)]
    pub is_coordinator: bool,
    #[serde(default)]
    pub is_subordinate: bool,
    #[serde(default)]
    pub coordinator: Option<String>,
    #[serde(default)]
    pub subordinates: Vec<String>,
    /// Overrides the node's configured identifier for this session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

impl SessionSetup {
    pub fn coordinator<I, S>(subordinates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            is_coordinator: true,
            subordinates: subordinates.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn participant(coordinator: impl Into<String>) -> Self {
        Self {
            is_subordinate: true,
            coordinator: Some(coordinator.into()),
            ..Default::default()
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Validates the request and builds the role it describes.
    ///
    /// Duplicate subordinates are collapsed, keeping first-seen order.
    pub fn role(&self) -> Result<Role, String> {
        match (self.is_coordinator, self.is_subordinate) {
            (true, false) => {
                let mut subordinates: Vec<String> = Vec::with_capacity(self.subordinates.len());
                for sub in &self.subordinates {
                    if sub.is_empty() {
                        return Err("subordinate identifiers must not be empty".to_string());
                    }
                    if !subordinates.contains(sub) {
                        subordinates.push(sub.clone());
                    }
                }
                Ok(Role::Coordinator(CoordinatorRole::new(subordinates)))
            }
            (false, true) => match self.coordinator.as_deref() {
                Some(coordinator) if !coordinator.is_empty() => {
                    Ok(Role::Participant(ParticipantRole {
                        coordinator: coordinator.to_string(),
                    }))
                }
                _ => Err("a subordinate needs a coordinator".to_string()),
            },
            (true, true) => Err("a node cannot be coordinator and subordinate at once".to_string()),
            (false, false) => Err("a node must be either coordinator or subordinate".to_string()),
        }
    }
}

/// Reconfigures a session. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub die_after: Option<CrashPoint>,
    #[serde(default)]
    pub vote: Option<bool>,
}

impl SessionSettings {
    pub fn die_after(point: CrashPoint) -> Self {
        Self {
            die_after: Some(point),
            ..Default::default()
        }
    }

    pub fn vote(vote: bool) -> Self {
        Self {
            vote: Some(vote),
            ..Default::default()
        }
    }

    pub fn active(active: bool) -> Self {
        Self {
            active: Some(active),
            ..Default::default()
        }
    }
}
