//! Termination and recovery
//!
//! A node comes back (after a respawn timer, a guarding timeout, or an
//! external reactivation) and resumes from its latest decision record:
//!
//! | latest record   | coordinator                    | participant              |
//! |-----------------|--------------------------------|--------------------------|
//! | none            | write ABORT, grace, END        | write ABORT              |
//! | PREPARE         | (never written)                | INQUIRY, wait            |
//! | COMMIT / ABORT  | resend to unacked, wait        | nothing                  |
//! | END             | nothing                        | (never written)          |
//!
//! The no-record case is presumed abort and never contacts a peer.

use crate::crash_point::CrashPoint;
use crate::decision_log::Decision;
use crate::observability::{log_event, Event};
use crate::session::{lock_session, ProtocolPhase, SessionState};
use crate::timeout::{TimeoutScheduler, TimerKind};

use super::engine::{RecoveryCause, TransactionEngine};
use super::errors::ProtocolResult;
use super::message::MessageKind;

impl TransactionEngine {
    /// Reactivates a session and resumes the phase its log records
    pub(super) fn recover(&self, st: &mut SessionState, cause: RecoveryCause) -> ProtocolResult<()> {
        self.counters().increment_recovery_runs();
        log_event(
            Event::RecoveryStart,
            &[
                ("session", &st.id),
                ("cause", cause.as_str()),
                ("role", &st.role.name().to_string()),
            ],
        );

        st.active = true;
        st.crash_point = CrashPoint::None;
        TimeoutScheduler::cancel(&mut st.timer);

        let latest = self.log().latest_decision(&st.id)?;
        if st.transaction_id.is_none() {
            st.transaction_id = latest.as_ref().and_then(|entry| entry.transaction_id);
        }
        let latest = latest.and_then(|entry| entry.decision());

        match (latest, st.participant().map(|p| p.coordinator.clone())) {
            (None, _) | (Some(Decision::Prepare), None) => self.presume_abort(st)?,
            (Some(Decision::Prepare), Some(coordinator)) => {
                self.send(st, MessageKind::Inquiry, &coordinator)?;
                st.phase = ProtocolPhase::Uncertain;
                self.arm_timer(st, TimerKind::Response);
            }
            (Some(outcome @ (Decision::Commit | Decision::Abort)), None) => {
                self.resend_outcome(st, outcome)?;
            }
            (Some(Decision::Commit | Decision::Abort), Some(_)) => {
                st.phase = ProtocolPhase::Decided;
            }
            (Some(Decision::End), _) => {
                st.phase = ProtocolPhase::End;
            }
        }

        log_event(
            Event::RecoveryComplete,
            &[("session", &st.id), ("phase", &st.phase.to_string())],
        );
        Ok(())
    }

    /// No decision was ever recorded: abort without asking anyone. A
    /// coordinator has nobody to wait for and ends after the grace period.
    fn presume_abort(&self, st: &mut SessionState) -> ProtocolResult<()> {
        self.counters().increment_presumed_aborts();
        log_event(Event::PresumedAbort, &[("session", &st.id)]);

        self.record_decision(st, Decision::Abort)?;
        st.phase = ProtocolPhase::Decided;
        if let Some(coordinator) = st.coordinator_mut() {
            coordinator.acks.clear();
        }
        if st.is_coordinator() {
            self.arm_timer(st, TimerKind::Grace);
        }
        Ok(())
    }

    /// Resends the outcome to every subordinate that has not acknowledged.
    ///
    /// The expected set survives a crash; when it was never filled (crash
    /// right after the decision write) every subordinate is expected.
    fn resend_outcome(&self, st: &mut SessionState, outcome: Decision) -> ProtocolResult<()> {
        let pending = match st.coordinator_mut() {
            Some(coordinator) => {
                if coordinator.acks.is_empty() {
                    coordinator.acks.expect(coordinator.subordinates.clone());
                }
                coordinator.acks.pending()
            }
            None => Vec::new(),
        };

        st.phase = ProtocolPhase::Decided;
        if pending.is_empty() {
            self.arm_timer(st, TimerKind::Grace);
            return Ok(());
        }

        if let Some(kind) = MessageKind::for_outcome(outcome) {
            for peer in &pending {
                self.send(st, kind, peer)?;
            }
        }
        st.phase = ProtocolPhase::WaitAcks;
        self.arm_timer(st, TimerKind::Ack);
        Ok(())
    }

    /// Timer callback. Acts only if the timer is still the one in the
    /// session's slot, so a timeout racing with normal completion of the
    /// same phase loses.
    pub(crate) fn on_timer(&self, session: &str, id: u64, kind: TimerKind) {
        let Some(handle) = self.sessions().get(session) else {
            return;
        };
        let mut st = lock_session(&handle);
        if !TimeoutScheduler::is_current(&st.timer, id) {
            log_event(
                Event::TimerStale,
                &[("session", session), ("timer", kind.as_str()), ("id", &id.to_string())],
            );
            return;
        }
        // Fired: the handle only needs to leave the slot
        st.timer = None;

        self.counters().increment_timeouts();
        log_event(
            Event::TimerFired,
            &[("session", session), ("timer", kind.as_str()), ("phase", &st.phase.to_string())],
        );

        let result = match kind {
            TimerKind::Grace => self.finish_grace(&mut st),
            TimerKind::Vote if st.active && st.phase == ProtocolPhase::WaitVotes => {
                self.terminate_vote(&mut st)
            }
            _ => self.recover(&mut st, RecoveryCause::Timeout(kind)),
        };
        if let Err(err) = result {
            log_event(
                Event::BackgroundFailure,
                &[("session", session), ("timer", kind.as_str()), ("error", &err.to_string())],
            );
        }
    }

    /// Votes still missing count as unknown, which aborts
    fn terminate_vote(&self, st: &mut SessionState) -> ProtocolResult<()> {
        if let Some(coordinator) = st.coordinator_mut() {
            let missing: Vec<String> = coordinator
                .subordinates
                .iter()
                .filter(|s| !coordinator.votes.contains(s))
                .cloned()
                .collect();
            for subordinate in &missing {
                coordinator.votes.record(subordinate, None);
            }
        }
        self.evaluate_votes(st)
    }

    fn finish_grace(&self, st: &mut SessionState) -> ProtocolResult<()> {
        let latest = self
            .log()
            .latest_decision(&st.id)?
            .and_then(|entry| entry.decision());
        if latest.is_some_and(|d| d.is_outcome()) {
            self.record_decision(st, Decision::End)?;
        }
        if let Some(coordinator) = st.coordinator_mut() {
            coordinator.acks.clear();
        }
        st.phase = ProtocolPhase::End;
        Ok(())
    }
}
