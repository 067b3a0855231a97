//! Transaction state machine
//!
//! Phase transitions per role:
//!
//! ```text
//! coordinator: IDLE -> WAIT_VOTES -> DECIDED -> WAIT_ACKS -> END
//! participant: IDLE -> UNCERTAIN -> DECIDED        (voted YES)
//!              IDLE -> DECIDED                     (voted NO)
//! either:      any  -> CRASHED -> (recovery)
//! ```

use crate::crash_point::CrashPoint;
use crate::decision_log::{Decision, LogRecord};
use crate::observability::{log_event, Event};
use crate::session::{lock_session, ProtocolPhase, SessionState, Vote};
use crate::timeout::{TimeoutScheduler, TimerKind};

use super::engine::TransactionEngine;
use super::errors::{ProtocolError, ProtocolResult};
use super::message::{MessageKind, ProtocolMessage, TransactionId};

impl TransactionEngine {
    /// Starts a transaction: marks the session active, broadcasts PREPARE
    /// and waits for votes.
    ///
    /// Only a coordinator in IDLE may start. A deactivated coordinator that
    /// never began a transaction rejoins IDLE here; one holding an earlier
    /// run goes through recovery instead. With no subordinates the vote is
    /// vacuously unanimous and the transaction commits and ends at once.
    pub fn start_transaction(&self, session: &str) -> ProtocolResult<TransactionId> {
        let handle = self
            .sessions()
            .get(session)
            .ok_or_else(|| ProtocolError::UnknownSession(session.to_string()))?;
        let mut st = lock_session(&handle);

        let subordinates = match st.coordinator() {
            Some(coordinator) => coordinator.subordinates.clone(),
            None => return Err(ProtocolError::NotCoordinator(session.to_string())),
        };
        let untouched =
            st.transaction_id.is_none() && self.log().latest_decision(&st.id)?.is_none();
        if !st.active && untouched {
            TimeoutScheduler::cancel(&mut st.timer);
            st.active = true;
            st.phase = ProtocolPhase::Idle;
        }
        if st.phase != ProtocolPhase::Idle {
            return Err(ProtocolError::InvalidPhase {
                expected: ProtocolPhase::Idle,
                actual: st.phase,
            });
        }
        if let Some(coordinator) = st.coordinator_mut() {
            coordinator.votes.clear();
            coordinator.acks.clear();
        }

        let transaction_id = TransactionId::new();
        st.transaction_id = Some(transaction_id);
        st.phase = ProtocolPhase::WaitVotes;
        self.counters().increment_transactions();
        self.log().append(
            &st.id,
            LogRecord::lifecycle("transaction started"),
            Some(transaction_id),
        )?;
        log_event(
            Event::TransactionStarted,
            &[
                ("session", &st.id),
                ("transaction", &transaction_id.to_string()),
                ("subordinates", &subordinates.len().to_string()),
            ],
        );

        for subordinate in &subordinates {
            self.send(&mut st, MessageKind::Prepare, subordinate)?;
        }
        if self.crash_if(&mut st, CrashPoint::AfterPrepareWrite)? {
            return Ok(transaction_id);
        }

        if subordinates.is_empty() {
            self.evaluate_votes(&mut st)?;
        } else {
            self.arm_timer(&mut st, TimerKind::Vote);
        }
        Ok(transaction_id)
    }

    /// Handles one inbound message on an active session
    pub(super) fn handle_message(
        &self,
        st: &mut SessionState,
        message: ProtocolMessage,
    ) -> ProtocolResult<()> {
        self.counters().increment_messages_received();
        log_event(
            Event::MessageReceived,
            &[
                ("session", &st.id),
                ("message", message.kind.as_str()),
                ("sender", &message.sender),
            ],
        );
        self.log().append(
            &st.id,
            LogRecord::received(message.kind.as_str(), message.sender.as_str()),
            Some(message.transaction_id),
        )?;

        if !self.belongs_to_transaction(st, &message) {
            return self.ignore(st, &message, "transaction mismatch");
        }

        match (message.kind, st.is_coordinator()) {
            (MessageKind::Prepare, false) => self.on_prepare(st, &message),
            (MessageKind::Yes, true) => self.on_vote(st, &message, Vote::Yes),
            (MessageKind::No, true) => self.on_vote(st, &message, Vote::No),
            (MessageKind::Commit, false) => self.on_outcome(st, &message, Decision::Commit),
            (MessageKind::Abort, false) => self.on_outcome(st, &message, Decision::Abort),
            (MessageKind::Ack, true) => self.on_ack(st, &message),
            (MessageKind::Inquiry, true) => self.on_inquiry(st, &message),
            _ => self.ignore(st, &message, "not handled by this role"),
        }
    }

    /// A session with no transaction yet accepts any; afterwards only
    /// messages of its own transaction count. A fresh PREPARE to an idle
    /// participant starts a new one.
    fn belongs_to_transaction(&self, st: &SessionState, message: &ProtocolMessage) -> bool {
        match st.transaction_id {
            None => true,
            Some(_) if message.kind == MessageKind::Prepare && st.phase == ProtocolPhase::Idle => {
                true
            }
            Some(current) => current == message.transaction_id,
        }
    }

    fn ignore(
        &self,
        st: &SessionState,
        message: &ProtocolMessage,
        reason: &str,
    ) -> ProtocolResult<()> {
        log_event(
            Event::MessageIgnored,
            &[
                ("session", &st.id),
                ("message", message.kind.as_str()),
                ("sender", &message.sender),
                ("phase", &st.phase.to_string()),
                ("reason", reason),
            ],
        );
        Ok(())
    }

    fn coordinator_of(st: &SessionState) -> Option<String> {
        st.participant().map(|p| p.coordinator.clone())
    }

    // ==================
    // Participant
    // ==================

    fn on_prepare(&self, st: &mut SessionState, message: &ProtocolMessage) -> ProtocolResult<()> {
        let Some(coordinator) = Self::coordinator_of(st) else {
            return self.ignore(st, message, "not a participant");
        };

        if st.phase != ProtocolPhase::Idle {
            return self.resend_vote(st, message, &coordinator);
        }

        st.transaction_id = Some(message.transaction_id);

        if st.vote_preference {
            if !self.record_decision(st, Decision::Prepare)? {
                return Ok(());
            }
            if self.crash_if(st, CrashPoint::AfterPrepareWrite)? {
                return Ok(());
            }
            self.send(st, MessageKind::Yes, &coordinator)?;
            st.phase = ProtocolPhase::Uncertain;
            self.arm_timer(st, TimerKind::Response);
        } else {
            // A NO vote decides on the spot: no uncertainty period
            if !self.record_decision(st, Decision::Abort)? {
                return Ok(());
            }
            if self.crash_if(st, CrashPoint::AfterPrepareWrite)? {
                return Ok(());
            }
            self.send(st, MessageKind::No, &coordinator)?;
            st.phase = ProtocolPhase::Decided;
        }

        self.crash_if(st, CrashPoint::AfterVoteSend)?;
        Ok(())
    }

    /// A repeated PREPARE gets the vote already cast, read back from the log
    fn resend_vote(
        &self,
        st: &mut SessionState,
        message: &ProtocolMessage,
        coordinator: &str,
    ) -> ProtocolResult<()> {
        let latest = self
            .log()
            .latest_decision(&st.id)?
            .and_then(|entry| entry.decision());
        let vote = match latest {
            Some(Decision::Prepare) | Some(Decision::Commit) => MessageKind::Yes,
            Some(Decision::Abort) => MessageKind::No,
            _ => return self.ignore(st, message, "no vote cast"),
        };
        self.send(st, vote, coordinator)
    }

    fn on_outcome(
        &self,
        st: &mut SessionState,
        message: &ProtocolMessage,
        decision: Decision,
    ) -> ProtocolResult<()> {
        let Some(coordinator) = Self::coordinator_of(st) else {
            return self.ignore(st, message, "not a participant");
        };
        st.transaction_id.get_or_insert(message.transaction_id);

        let latest = self
            .log()
            .latest_decision(&st.id)?
            .and_then(|entry| entry.decision());
        if latest == Some(decision) {
            // Coordinator is resending; it still needs our ACK
            TimeoutScheduler::cancel(&mut st.timer);
            st.phase = ProtocolPhase::Decided;
            return self.send(st, MessageKind::Ack, &coordinator);
        }
        if !self.record_decision(st, decision)? {
            return Ok(());
        }

        TimeoutScheduler::cancel(&mut st.timer);
        st.phase = ProtocolPhase::Decided;
        if self.crash_if(st, CrashPoint::AfterCommitAbortWrite)? {
            return Ok(());
        }

        self.send(st, MessageKind::Ack, &coordinator)?;
        self.crash_if(st, CrashPoint::AfterResult)?;
        Ok(())
    }

    // ==================
    // Coordinator
    // ==================

    fn on_vote(
        &self,
        st: &mut SessionState,
        message: &ProtocolMessage,
        vote: Vote,
    ) -> ProtocolResult<()> {
        if st.phase != ProtocolPhase::WaitVotes {
            return self.ignore(st, message, "not waiting for votes");
        }
        let known = st
            .coordinator()
            .is_some_and(|c| c.is_subordinate(&message.sender));
        if !known {
            return self.ignore(st, message, "sender is not a subordinate");
        }
        let all_in = st.coordinator_mut().is_some_and(|c| {
            c.votes.record(&message.sender, Some(vote));
            c.all_votes_in()
        });

        if all_in {
            self.evaluate_votes(st)?;
        }
        Ok(())
    }

    /// Decides from the collected votes and broadcasts the outcome.
    ///
    /// COMMIT needs a YES from every subordinate. Otherwise ABORT goes to
    /// the YES voters and to those that never answered; a NO voter has
    /// already aborted on its own and is not asked to acknowledge.
    pub(super) fn evaluate_votes(&self, st: &mut SessionState) -> ProtocolResult<()> {
        let Some(coordinator) = st.coordinator_mut() else {
            return Ok(());
        };

        let commit = coordinator
            .subordinates
            .iter()
            .all(|s| coordinator.votes.get(s) == Some(Some(Vote::Yes)));
        let targets: Vec<String> = coordinator
            .subordinates
            .iter()
            .filter(|s| commit || coordinator.votes.get(s) != Some(Some(Vote::No)))
            .cloned()
            .collect();
        coordinator.votes.clear();

        let decision = if commit {
            Decision::Commit
        } else {
            Decision::Abort
        };
        log_event(
            Event::VotesEvaluated,
            &[
                ("session", &st.id),
                ("decision", decision.as_str()),
                ("targets", &targets.len().to_string()),
            ],
        );

        TimeoutScheduler::cancel(&mut st.timer);
        if !self.record_decision(st, decision)? {
            return Ok(());
        }
        st.phase = ProtocolPhase::Decided;
        if self.crash_if(st, CrashPoint::AfterCommitAbortWrite)? {
            return Ok(());
        }

        if let Some(coordinator) = st.coordinator_mut() {
            coordinator.acks.expect(targets.iter().cloned());
        }
        let kind = if commit {
            MessageKind::Commit
        } else {
            MessageKind::Abort
        };
        for target in &targets {
            self.send(st, kind, target)?;
        }

        if targets.is_empty() {
            self.record_decision(st, Decision::End)?;
            st.phase = ProtocolPhase::End;
        } else {
            st.phase = ProtocolPhase::WaitAcks;
            self.arm_timer(st, TimerKind::Ack);
        }

        self.crash_if(st, CrashPoint::AfterResult)?;
        Ok(())
    }

    fn on_ack(&self, st: &mut SessionState, message: &ProtocolMessage) -> ProtocolResult<()> {
        if st.phase != ProtocolPhase::WaitAcks {
            return self.ignore(st, message, "not waiting for acks");
        }
        let recorded = st
            .coordinator_mut()
            .is_some_and(|c| c.acks.record(&message.sender));
        if !recorded {
            return self.ignore(st, message, "duplicate or unexpected ack");
        }
        let complete = st.coordinator().is_some_and(|c| c.acks.is_complete());

        if complete {
            self.complete_acks(st)?;
        }
        Ok(())
    }

    /// Every expected ACK is in: END, and nothing left to wait for
    pub(super) fn complete_acks(&self, st: &mut SessionState) -> ProtocolResult<()> {
        TimeoutScheduler::cancel(&mut st.timer);
        if let Some(coordinator) = st.coordinator_mut() {
            coordinator.acks.clear();
        }
        st.phase = ProtocolPhase::End;
        log_event(Event::AcksComplete, &[("session", &st.id)]);
        self.record_decision(st, Decision::End)?;
        Ok(())
    }

    /// Answers with the outcome this coordinator reached, even after END.
    /// Without one there is no answer and the inquirer stays blocked.
    fn on_inquiry(&self, st: &mut SessionState, message: &ProtocolMessage) -> ProtocolResult<()> {
        let outcome = self
            .log()
            .latest_outcome(&st.id)?
            .and_then(MessageKind::for_outcome);

        match outcome {
            Some(kind) => {
                self.counters().increment_inquiries_answered();
                log_event(
                    Event::InquiryAnswered,
                    &[
                        ("session", &st.id),
                        ("sender", &message.sender),
                        ("outcome", kind.as_str()),
                    ],
                );
                self.send(st, kind, &message.sender)
            }
            None => {
                log_event(
                    Event::InquiryUnanswered,
                    &[
                        ("session", &st.id),
                        ("sender", &message.sender),
                        ("phase", &st.phase.to_string()),
                    ],
                );
                Ok(())
            }
        }
    }
}
