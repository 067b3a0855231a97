//! Shared harness for the protocol integration tests
//!
//! Runs a coordinator and two subordinates in one process over a shared
//! [`MemoryTransport`]. Nothing moves on its own: [`Cluster::pump`]
//! delivers queued messages and runs each target's sweep until the network
//! is quiet, and [`Cluster::settle`] interleaves that with paused-clock
//! time so timers fire.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use twopc::decision_log::{
    Decision, DecisionLog, LogEntry, LogRecord, MemoryDecisionLog, TraceDirection,
};
use twopc::observability::MetricsRegistry;
use twopc::protocol::{MessageKind, TransactionEngine};
use twopc::session::{SessionSetup, SessionStatus};
use twopc::timeout::TimeoutConfig;
use twopc::transport::MemoryTransport;

pub const SESSION: &str = "s1";
pub const COORDINATOR: &str = "http://c";
pub const SUB1: &str = "http://s1";
pub const SUB2: &str = "http://s2";

/// Short timers so paused-clock tests stay readable
pub fn fast_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        vote_timeout_ms: 100,
        response_timeout_ms: 200,
        ack_timeout_ms: 150,
        respawn_delay_ms: 300,
        grace_period_ms: 50,
        sweep_interval_ms: 10,
        send_timeout_ms: 50,
    }
}

pub struct Cluster {
    pub transport: MemoryTransport,
    nodes: BTreeMap<String, Arc<TransactionEngine>>,
}

impl Cluster {
    pub fn new(timeouts: TimeoutConfig) -> Self {
        Self::with_logs(timeouts, |_| -> Arc<dyn DecisionLog> {
            Arc::new(MemoryDecisionLog::new())
        })
    }

    /// Builds each node over the log `open_log` returns for its id
    pub fn with_logs<F>(timeouts: TimeoutConfig, open_log: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn DecisionLog>,
    {
        let transport = MemoryTransport::new();
        let nodes = [COORDINATOR, SUB1, SUB2]
            .iter()
            .map(|id| {
                let engine = TransactionEngine::new(
                    *id,
                    open_log(id),
                    Arc::new(transport.clone()),
                    timeouts.clone(),
                    Arc::new(MetricsRegistry::new()),
                );
                (id.to_string(), engine)
            })
            .collect();
        Self { transport, nodes }
    }

    /// Coordinator over SUB1 and SUB2, both pointing back at it
    pub fn with_session(timeouts: TimeoutConfig) -> Self {
        let cluster = Self::new(timeouts);
        cluster.setup_session();
        cluster
    }

    pub fn setup_session(&self) {
        self.node(COORDINATOR)
            .setup(SESSION, SessionSetup::coordinator([SUB1, SUB2]))
            .unwrap();
        for sub in [SUB1, SUB2] {
            self.node(sub)
                .setup(SESSION, SessionSetup::participant(COORDINATOR))
                .unwrap();
        }
    }

    pub fn node(&self, id: &str) -> &Arc<TransactionEngine> {
        &self.nodes[id]
    }

    /// Delivers the oldest queued message and runs its target's sweep.
    /// Returns `false` once the queue is empty.
    pub fn step(&self) -> bool {
        let Some(envelope) = self.transport.pop() else {
            return false;
        };
        if let Some(engine) = self.nodes.get(&envelope.target) {
            engine.deliver(envelope.message);
            engine.run_sweep();
        }
        true
    }

    /// Delivers until the network is quiet; returns how many were delivered
    pub fn pump(&self) -> usize {
        let mut delivered = 0;
        while self.step() {
            delivered += 1;
            assert!(delivered < 1000, "messages never stopped flowing");
        }
        delivered
    }

    /// Pumps and advances the paused clock in small steps until `done`
    /// holds or two seconds of virtual time have passed
    pub async fn settle<F>(&self, done: F) -> bool
    where
        F: Fn(&Cluster) -> bool,
    {
        for _ in 0..200 {
            self.pump();
            if done(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.pump();
        done(self)
    }

    pub fn status(&self, id: &str) -> SessionStatus {
        self.node(id).status(SESSION).unwrap()
    }

    pub fn entries(&self, id: &str) -> Vec<LogEntry> {
        self.node(id).entries(SESSION).unwrap()
    }

    /// Decision records of `id`, oldest first
    pub fn decisions(&self, id: &str) -> Vec<Decision> {
        self.entries(id)
            .iter()
            .filter_map(LogEntry::decision)
            .collect()
    }

    /// Peers `id` sent `kind` to, in send order
    pub fn sent(&self, id: &str, kind: MessageKind) -> Vec<String> {
        self.entries(id)
            .into_iter()
            .filter_map(|entry| match entry.record {
                LogRecord::Trace {
                    direction: TraceDirection::Sent,
                    message,
                    peer: Some(peer),
                } if message == kind.as_str() => Some(peer),
                _ => None,
            })
            .collect()
    }
}

/// Every decision is a valid step after the one before it
pub fn assert_monotonic(decisions: &[Decision]) {
    let mut previous = None;
    for decision in decisions {
        assert!(
            decision.may_follow(previous),
            "{:?} may not follow {:?} in {:?}",
            decision,
            previous,
            decisions
        );
        previous = Some(*decision);
    }
}
