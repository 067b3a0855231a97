//! Decision log entries
//!
//! Two kinds of entries share one ordered sequence per session:
//!
//! - trace entries (`durable == false`): diagnostic records of sends,
//!   receives and lifecycle events. The protocol never reads them back.
//!   The setup record is the one exception: it is read back once, when a
//!   restarted node rebuilds its sessions.
//! - decision records (`durable == true`): `PREPARE`, `COMMIT`, `ABORT`,
//!   `END`. The latest one is the only input to recovery.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::TransactionId;
use crate::session::SessionSetup;

/// A durable decision record kind.
///
/// Within a session decisions only move forward through
/// `PREPARE -> {COMMIT | ABORT} -> END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Prepare,
    Commit,
    Abort,
    End,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Prepare => "PREPARE",
            Decision::Commit => "COMMIT",
            Decision::Abort => "ABORT",
            Decision::End => "END",
        }
    }

    /// `COMMIT` or `ABORT`
    pub fn is_outcome(&self) -> bool {
        matches!(self, Decision::Commit | Decision::Abort)
    }

    /// Whether appending `self` after `previous` keeps the decision
    /// sequence a subsequence of `PREPARE, {COMMIT|ABORT}, END`.
    ///
    /// Repeating the previous decision is not a valid step either; callers
    /// treat that case as an idempotent no-op before asking.
    pub fn may_follow(&self, previous: Option<Decision>) -> bool {
        match (previous, self) {
            (None, Decision::End) => false,
            (None, _) => true,
            (Some(Decision::Prepare), Decision::Commit | Decision::Abort) => true,
            (Some(Decision::Commit | Decision::Abort), Decision::End) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a traced event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceDirection {
    Sent,
    Received,
    Lifecycle,
}

/// The payload of a log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LogRecord {
    Trace {
        direction: TraceDirection,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
    },
    Decision {
        decision: Decision,
    },
    /// Role and peers the session was set up with, node id resolved
    Setup {
        setup: SessionSetup,
    },
}

impl LogRecord {
    pub fn decision(decision: Decision) -> Self {
        LogRecord::Decision { decision }
    }

    pub fn sent(message: impl Into<String>, peer: impl Into<String>) -> Self {
        LogRecord::Trace {
            direction: TraceDirection::Sent,
            message: message.into(),
            peer: Some(peer.into()),
        }
    }

    pub fn received(message: impl Into<String>, peer: impl Into<String>) -> Self {
        LogRecord::Trace {
            direction: TraceDirection::Received,
            message: message.into(),
            peer: Some(peer.into()),
        }
    }

    pub fn setup(setup: SessionSetup) -> Self {
        LogRecord::Setup { setup }
    }

    pub fn lifecycle(message: impl Into<String>) -> Self {
        LogRecord::Trace {
            direction: TraceDirection::Lifecycle,
            message: message.into(),
            peer: None,
        }
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, LogRecord::Decision { .. })
    }
}

/// One entry of a session's decision log, as stored and as reported by
/// `/info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Insertion order within the session, starting at 1
    pub sequence: u64,
    /// `true` for decision records
    pub durable: bool,
    #[serde(flatten)]
    pub record: LogRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    pub recorded_at: DateTime<Utc>,
}

impl LogEntry {
    /// Builds an entry stamped with the current time
    pub fn new(sequence: u64, record: LogRecord, transaction_id: Option<TransactionId>) -> Self {
        Self {
            sequence,
            durable: record.is_durable(),
            record,
            transaction_id,
            recorded_at: Utc::now(),
        }
    }

    /// The decision carried by this entry, if it is a decision record
    pub fn decision(&self) -> Option<Decision> {
        match self.record {
            LogRecord::Decision { decision } => Some(decision),
            LogRecord::Trace { .. } | LogRecord::Setup { .. } => None,
        }
    }

    /// The setup carried by this entry, if it is a setup record
    pub fn setup(&self) -> Option<&SessionSetup> {
        match &self.record {
            LogRecord::Setup { setup } => Some(setup),
            LogRecord::Trace { .. } | LogRecord::Decision { .. } => None,
        }
    }
}
