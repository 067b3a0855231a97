//! Protocol messages exchanged between nodes

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decision_log::Decision;

/// Identifier of one transaction run, minted by the coordinator on start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of message kinds. Compared by value, never by string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    Prepare,
    Yes,
    No,
    Commit,
    Abort,
    Ack,
    Inquiry,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Prepare => "PREPARE",
            MessageKind::Yes => "YES",
            MessageKind::No => "NO",
            MessageKind::Commit => "COMMIT",
            MessageKind::Abort => "ABORT",
            MessageKind::Ack => "ACK",
            MessageKind::Inquiry => "INQUIRY",
        }
    }

    /// The message announcing a decision outcome
    pub fn for_outcome(decision: Decision) -> Option<Self> {
        match decision {
            Decision::Commit => Some(MessageKind::Commit),
            Decision::Abort => Some(MessageKind::Abort),
            Decision::Prepare | Decision::End => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Envelope exchanged between nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub kind: MessageKind,
    pub sender: String,
    pub transaction_id: TransactionId,
    pub session: String,
    /// The sender's view of the run: its coordinator and, when the sender
    /// coordinates, its subordinates. Informational only.
    pub coordinator: Option<String>,
    pub subordinates: Vec<String>,
}

impl ProtocolMessage {
    pub fn new(
        kind: MessageKind,
        sender: impl Into<String>,
        transaction_id: TransactionId,
        session: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            sender: sender.into(),
            transaction_id,
            session: session.into(),
            coordinator: None,
            subordinates: Vec::new(),
        }
    }

    pub fn with_topology(mut self, coordinator: Option<String>, subordinates: Vec<String>) -> Self {
        self.coordinator = coordinator;
        self.subordinates = subordinates;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&MessageKind::Inquiry).unwrap();
        assert_eq!(json, "\"INQUIRY\"");

        let kind: MessageKind = serde_json::from_str("\"YES\"").unwrap();
        assert_eq!(kind, MessageKind::Yes);

        // Canonical constants only
        assert!(serde_json::from_str::<MessageKind>("\"yes\"").is_err());
    }

    #[test]
    fn test_outcome_messages() {
        assert_eq!(MessageKind::for_outcome(Decision::Commit), Some(MessageKind::Commit));
        assert_eq!(MessageKind::for_outcome(Decision::Abort), Some(MessageKind::Abort));
        assert_eq!(MessageKind::for_outcome(Decision::End), None);
    }

    #[test]
    fn test_transaction_ids_are_unique() {
        assert_ne!(TransactionId::new(), TransactionId::new());
    }
}
