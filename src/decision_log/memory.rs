//! In-memory decision log
//!
//! Used when no data directory is configured and by the test harness.
//! Entries live as long as the process.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::entry::{LogEntry, LogRecord};
use super::errors::LogResult;
use super::DecisionLog;
use crate::protocol::TransactionId;

/// Decision log held in a map of per-session vectors
#[derive(Debug, Default)]
pub struct MemoryDecisionLog {
    sessions: RwLock<HashMap<String, Vec<LogEntry>>>,
}

impl MemoryDecisionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DecisionLog for MemoryDecisionLog {
    fn append(
        &self,
        session: &str,
        record: LogRecord,
        transaction_id: Option<TransactionId>,
    ) -> LogResult<LogEntry> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let entries = sessions.entry(session.to_string()).or_default();
        let sequence = entries.last().map(|e| e.sequence + 1).unwrap_or(1);
        let entry = LogEntry::new(sequence, record, transaction_id);
        entries.push(entry.clone());
        Ok(entry)
    }

    fn entries(&self, session: &str) -> LogResult<Vec<LogEntry>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.get(session).cloned().unwrap_or_default())
    }

    fn purge(&self, session: &str) -> LogResult<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(session);
        Ok(())
    }

    fn sessions(&self) -> LogResult<Vec<String>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn latest_decision(&self, session: &str) -> LogResult<Option<LogEntry>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions
            .get(session)
            .and_then(|entries| entries.iter().rev().find(|e| e.durable).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision_log::Decision;

    #[test]
    fn test_sequences_are_per_session() {
        let log = MemoryDecisionLog::new();
        let a1 = log.append("a", LogRecord::lifecycle("setup"), None).unwrap();
        let b1 = log.append("b", LogRecord::lifecycle("setup"), None).unwrap();
        let a2 = log.append("a", LogRecord::decision(Decision::Prepare), None).unwrap();

        assert_eq!(a1.sequence, 1);
        assert_eq!(b1.sequence, 1);
        assert_eq!(a2.sequence, 2);
    }

    #[test]
    fn test_purge_drops_only_that_session() {
        let log = MemoryDecisionLog::new();
        log.append("a", LogRecord::decision(Decision::Commit), None).unwrap();
        log.append("b", LogRecord::decision(Decision::Abort), None).unwrap();

        log.purge("a").unwrap();

        assert!(log.entries("a").unwrap().is_empty());
        assert!(log.latest_decision("a").unwrap().is_none());
        assert_eq!(log.entries("b").unwrap().len(), 1);
        assert_eq!(log.sessions().unwrap(), vec!["b"]);

        let fresh = log.append("a", LogRecord::lifecycle("setup"), None).unwrap();
        assert_eq!(fresh.sequence, 1);
    }

    #[test]
    fn test_entries_preserve_insertion_order() {
        let log = MemoryDecisionLog::new();
        for peer in ["s1", "s2", "s3"] {
            log.append("a", LogRecord::sent("PREPARE", peer), None).unwrap();
        }
        let sequences: Vec<u64> = log.entries("a").unwrap().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }
}
