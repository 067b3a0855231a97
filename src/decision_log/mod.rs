//! Decision log subsystem
//!
//! An append-only, session-scoped record store. It is the recovery anchor
//! of the protocol: after a simulated crash the most recent decision
//! record tells a node which phase to resume.
//!
//! # Contract
//!
//! - `append` never rewrites or removes entries; it fails only when the
//!   storage is unavailable, and that failure is surfaced to the caller
//! - sequence numbers are assigned in insertion order, per session
//! - callers serialize writes per session (the transaction engine holds the
//!   session lock across every append)
//!
//! Two backends are provided: [`MemoryDecisionLog`] and the fsynced,
//! checksummed [`FileDecisionLog`].

mod checksum;
mod entry;
mod errors;
mod file;
mod memory;

pub use checksum::{compute_checksum, verify_checksum};
pub use entry::{Decision, LogEntry, LogRecord, TraceDirection};
pub use errors::{LogError, LogErrorCode, LogResult, Severity};
pub use file::FileDecisionLog;
pub use memory::MemoryDecisionLog;

use crate::protocol::TransactionId;

/// Append-only per-session log of trace entries and decision records.
pub trait DecisionLog: Send + Sync {
    /// Appends a record and returns the stored entry with its sequence
    /// number.
    fn append(
        &self,
        session: &str,
        record: LogRecord,
        transaction_id: Option<TransactionId>,
    ) -> LogResult<LogEntry>;

    /// All entries of a session in insertion order. Unknown sessions have
    /// no entries.
    fn entries(&self, session: &str) -> LogResult<Vec<LogEntry>>;

    /// Removes every entry of a session.
    fn purge(&self, session: &str) -> LogResult<()>;

    /// Ids of every session with at least one entry, sorted.
    fn sessions(&self) -> LogResult<Vec<String>>;

    /// The most recent decision record, or `None` for a session that never
    /// reached `PREPARE`.
    fn latest_decision(&self, session: &str) -> LogResult<Option<LogEntry>> {
        Ok(self
            .entries(session)?
            .into_iter()
            .rev()
            .find(|entry| entry.durable))
    }

    /// The most recent `COMMIT` or `ABORT`, looking past a trailing `END`.
    fn latest_outcome(&self, session: &str) -> LogResult<Option<Decision>> {
        Ok(self
            .entries(session)?
            .iter()
            .rev()
            .filter_map(LogEntry::decision)
            .find(Decision::is_outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_decision_skips_traces() {
        let log = MemoryDecisionLog::new();
        assert!(log.latest_decision("s").unwrap().is_none());

        log.append("s", LogRecord::decision(Decision::Prepare), None).unwrap();
        log.append("s", LogRecord::sent("YES", "http://c"), None).unwrap();

        let latest = log.latest_decision("s").unwrap().unwrap();
        assert_eq!(latest.decision(), Some(Decision::Prepare));
        assert_eq!(latest.sequence, 1);
    }

    #[test]
    fn test_latest_outcome_looks_past_end() {
        let log = MemoryDecisionLog::new();
        assert_eq!(log.latest_outcome("s").unwrap(), None);

        log.append("s", LogRecord::decision(Decision::Commit), None).unwrap();
        log.append("s", LogRecord::decision(Decision::End), None).unwrap();

        assert_eq!(log.latest_outcome("s").unwrap(), Some(Decision::Commit));
        assert_eq!(
            log.latest_decision("s").unwrap().and_then(|e| e.decision()),
            Some(Decision::End)
        );
    }
}
