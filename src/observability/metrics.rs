//! Metrics registry for a twopc node
//!
//! - Counters only, monotonic
//! - Reset only on process start
//! - Shared by every session on the node

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::decision_log::Decision;

/// Operational counters for one node
///
/// All counters use Relaxed ordering; they are read for reporting only.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    sessions_created: AtomicU64,
    transactions_started: AtomicU64,
    prepares_written: AtomicU64,
    commits_written: AtomicU64,
    aborts_written: AtomicU64,
    ends_written: AtomicU64,
    decisions_rejected: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_dropped: AtomicU64,
    send_failures: AtomicU64,
    inquiries_answered: AtomicU64,
    timeouts_fired: AtomicU64,
    crashes_injected: AtomicU64,
    recovery_runs: AtomicU64,
    presumed_aborts: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_sessions(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_transactions(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a durable decision by kind
    pub fn record_decision(&self, decision: Decision) {
        let counter = match decision {
            Decision::Prepare => &self.prepares_written,
            Decision::Commit => &self.commits_written,
            Decision::Abort => &self.aborts_written,
            Decision::End => &self.ends_written,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_decisions_rejected(&self) {
        self.decisions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_messages_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_messages_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_messages_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_send_failures(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_inquiries_answered(&self) {
        self.inquiries_answered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_timeouts(&self) {
        self.timeouts_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_crashes(&self) {
        self.crashes_injected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_recovery_runs(&self) {
        self.recovery_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_presumed_aborts(&self) {
        self.presumed_aborts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            prepares_written: self.prepares_written.load(Ordering::Relaxed),
            commits_written: self.commits_written.load(Ordering::Relaxed),
            aborts_written: self.aborts_written.load(Ordering::Relaxed),
            ends_written: self.ends_written.load(Ordering::Relaxed),
            decisions_rejected: self.decisions_rejected.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            inquiries_answered: self.inquiries_answered.load(Ordering::Relaxed),
            timeouts_fired: self.timeouts_fired.load(Ordering::Relaxed),
            crashes_injected: self.crashes_injected.load(Ordering::Relaxed),
            recovery_runs: self.recovery_runs.load(Ordering::Relaxed),
            presumed_aborts: self.presumed_aborts.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub sessions_created: u64,
    pub transactions_started: u64,
    pub prepares_written: u64,
    pub commits_written: u64,
    pub aborts_written: u64,
    pub ends_written: u64,
    pub decisions_rejected: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub send_failures: u64,
    pub inquiries_answered: u64,
    pub timeouts_fired: u64,
    pub crashes_injected: u64,
    pub recovery_runs: u64,
    pub presumed_aborts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.commits_written, 0);
        assert_eq!(snapshot.messages_sent, 0);
        assert_eq!(snapshot.recovery_runs, 0);
    }

    #[test]
    fn test_decisions_counted_by_kind() {
        let registry = MetricsRegistry::new();
        registry.record_decision(Decision::Prepare);
        registry.record_decision(Decision::Commit);
        registry.record_decision(Decision::Commit);
        registry.record_decision(Decision::End);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.prepares_written, 1);
        assert_eq!(snapshot.commits_written, 2);
        assert_eq!(snapshot.aborts_written, 0);
        assert_eq!(snapshot.ends_written, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let registry = MetricsRegistry::new();
        registry.increment_send_failures();

        let json = serde_json::to_value(registry.snapshot()).unwrap();
        assert_eq!(json["send_failures"], 1);
        assert_eq!(json["crashes_injected"], 0);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let reg = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    reg.increment_messages_sent();
                    reg.increment_timeouts();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.messages_sent, 1000);
        assert_eq!(snapshot.timeouts_fired, 1000);
    }
}
