//! # Protocol Errors
//!
//! Errors surfaced by the transaction engine to its callers.

use thiserror::Error;

use crate::decision_log::LogError;
use crate::session::ProtocolPhase;

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Protocol errors
///
/// Transport failures never show up here: sends are best-effort and their
/// failures are logged and discarded at the send site.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// No session registered under this id
    #[error("Session not found: {0}")]
    UnknownSession(String),

    /// Setup request does not describe a valid role
    #[error("Invalid setup: {0}")]
    InvalidSetup(String),

    /// Operation reserved for the coordinator role
    #[error("Session {0} is not a coordinator")]
    NotCoordinator(String),

    /// Operation not valid in the current phase
    #[error("Invalid phase: expected {expected}, found {actual}")]
    InvalidPhase {
        expected: ProtocolPhase,
        actual: ProtocolPhase,
    },

    /// Decision log failure; fatal to the operation in progress
    #[error(transparent)]
    Log(#[from] LogError),
}

impl ProtocolError {
    /// Errors caused by the request rather than by the node
    pub fn is_rejection(&self) -> bool {
        !matches!(self, ProtocolError::Log(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ProtocolError::InvalidPhase {
            expected: ProtocolPhase::Idle,
            actual: ProtocolPhase::WaitVotes,
        };
        assert_eq!(err.to_string(), "Invalid phase: expected IDLE, found WAIT_VOTES");
        assert!(err.is_rejection());
    }

    #[test]
    fn test_log_error_wraps() {
        let err: ProtocolError = LogError::append_failed(
            "s1",
            std::io::Error::new(std::io::ErrorKind::Other, "disk gone"),
        )
        .into();
        assert!(!err.is_rejection());
        assert!(err.to_string().contains("TPC_LOG_APPEND_FAILED"));
    }
}
