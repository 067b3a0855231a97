//! Periodic sweeps
//!
//! Three passes over every active session, run back to back by one
//! background task:
//!
//! - dispatch: drains each inbox through the state machine
//! - vote: evaluates coordinators whose votes are all in
//! - ack: ends coordinators whose acknowledgements are all in
//!
//! Each session is handled under its own lock; the passes never hold two
//! session locks at once.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::observability::{log_event, Event};
use crate::session::{lock_session, ProtocolPhase, SessionState};

use super::engine::TransactionEngine;
use super::errors::ProtocolResult;

impl TransactionEngine {
    /// Runs the dispatch, vote and ack passes once
    pub fn run_sweep(&self) {
        self.dispatch_sweep();
        self.vote_sweep();
        self.ack_sweep();
    }

    /// Handles every queued message; returns how many were handled
    pub fn dispatch_sweep(&self) -> usize {
        let mut handled = 0;
        self.for_each_active("dispatch", |engine, st| {
            while st.active {
                let Some(message) = st.inbox.pop_front() else {
                    break;
                };
                handled += 1;
                engine.handle_message(st, message)?;
            }
            Ok(())
        });
        handled
    }

    pub fn vote_sweep(&self) {
        self.for_each_active("vote", |engine, st| {
            let ready = st.phase == ProtocolPhase::WaitVotes
                && st
                    .coordinator()
                    .is_some_and(|c| !c.subordinates.is_empty() && c.all_votes_in());
            if ready {
                engine.evaluate_votes(st)?;
            }
            Ok(())
        });
    }

    pub fn ack_sweep(&self) {
        self.for_each_active("ack", |engine, st| {
            let ready = st.phase == ProtocolPhase::WaitAcks
                && st.coordinator().is_some_and(|c| c.acks.is_complete());
            if ready {
                engine.complete_acks(st)?;
            }
            Ok(())
        });
    }

    fn for_each_active<F>(&self, pass: &str, mut f: F)
    where
        F: FnMut(&Self, &mut SessionState) -> ProtocolResult<()>,
    {
        for id in self.sessions().ids() {
            let Some(handle) = self.sessions().get(&id) else {
                continue;
            };
            let mut st = lock_session(&handle);
            if !st.active {
                continue;
            }
            if let Err(err) = f(self, &mut st) {
                log_event(
                    Event::BackgroundFailure,
                    &[("session", &id), ("sweep", pass), ("error", &err.to_string())],
                );
            }
        }
    }

    /// Spawns the background task running [`run_sweep`](Self::run_sweep)
    /// every sweep interval. The task stops once the engine is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::downgrade(self);
        let period = self.timeouts().sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.run_sweep();
            }
        })
    }
}
