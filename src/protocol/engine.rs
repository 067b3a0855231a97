//! Transaction engine
//!
//! Owns every session on a node and drives them through the protocol. All
//! work on a session happens under that session's lock: decision log
//! appends, vote and ack accumulation, timer arm/cancel and phase changes
//! form one critical section. Sessions never lock each other.

use std::sync::{Arc, Weak};

use crate::crash_point::CrashPoint;
use crate::decision_log::{Decision, DecisionLog, LogEntry, LogRecord};
use crate::observability::{log_event, Event, MetricsRegistry, MetricsSnapshot};
use crate::session::{
    lock_session, ProtocolPhase, Role, SessionHandle, SessionRegistry, SessionSettings,
    SessionSetup, SessionState, SessionStatus,
};
use crate::timeout::{TimeoutConfig, TimeoutScheduler, TimerKind};
use crate::transport::Transport;

use super::errors::{ProtocolError, ProtocolResult};
use super::message::{MessageKind, ProtocolMessage, TransactionId};

pub struct TransactionEngine {
    /// Default node id for sessions that do not override it
    node_id: String,
    sessions: SessionRegistry,
    log: Arc<dyn DecisionLog>,
    transport: Arc<dyn Transport>,
    scheduler: TimeoutScheduler,
    metrics: Arc<MetricsRegistry>,
    /// Handed to timer callbacks so a pending timer never keeps the engine
    /// alive
    this: Weak<TransactionEngine>,
}

impl TransactionEngine {
    pub fn new(
        node_id: impl Into<String>,
        log: Arc<dyn DecisionLog>,
        transport: Arc<dyn Transport>,
        timeouts: TimeoutConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Arc<Self> {
        let node_id = node_id.into();
        Arc::new_cyclic(|this| Self {
            node_id,
            sessions: SessionRegistry::new(),
            log,
            transport,
            scheduler: TimeoutScheduler::new(timeouts),
            metrics,
            this: this.clone(),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        self.scheduler.config()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.ids()
    }

    pub(super) fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub(super) fn log(&self) -> &dyn DecisionLog {
        self.log.as_ref()
    }

    pub(super) fn counters(&self) -> &MetricsRegistry {
        &self.metrics
    }

    fn handle(&self, session: &str) -> ProtocolResult<SessionHandle> {
        self.sessions
            .get(session)
            .ok_or_else(|| ProtocolError::UnknownSession(session.to_string()))
    }

    // ==================
    // Session lifecycle
    // ==================

    /// Creates (or recreates) a session. Any previous session under the same
    /// id is stopped and its log purged before the new one is installed.
    pub fn setup(&self, session: &str, setup: SessionSetup) -> ProtocolResult<SessionStatus> {
        if session.is_empty() {
            return Err(ProtocolError::InvalidSetup(
                "session id must not be empty".to_string(),
            ));
        }
        let role = setup.role().map_err(ProtocolError::InvalidSetup)?;
        let node = setup.node.clone().unwrap_or_else(|| self.node_id.clone());

        // Holding the old session's lock keeps its in-flight work from
        // appending to the log after the purge
        let previous = self.sessions.get(session);
        let mut previous_guard = previous.as_ref().map(lock_session);
        if let Some(old) = previous_guard.as_deref_mut() {
            retire(old);
        }
        self.log.purge(session)?;

        let state = SessionState::new(session, node.clone(), role);
        let role_name = state.role.name().to_string();
        let recorded = SessionSetup {
            node: Some(node),
            ..setup
        };
        self.log.append(session, LogRecord::setup(recorded), None)?;
        let status = state.status();
        self.sessions.insert(state);
        drop(previous_guard);

        self.metrics.increment_sessions();
        log_event(
            Event::SessionSetup,
            &[
                ("session", session),
                ("role", &role_name),
                ("node", &status.node),
                ("subordinates", &status.subordinates.len().to_string()),
            ],
        );
        Ok(status)
    }

    /// Rebuilds the sessions whose logs outlived the previous process.
    ///
    /// Each comes back inactive, as after a crash: role and peers come from
    /// its setup record, the transaction from the latest entry naming one.
    /// Reactivating it through settings runs recovery. Sessions already
    /// registered are left alone. Returns the restored ids.
    pub fn restore(&self) -> ProtocolResult<Vec<String>> {
        let mut restored = Vec::new();
        for session in self.log.sessions()? {
            if self.sessions.get(&session).is_some() {
                continue;
            }
            let entries = self.log.entries(&session)?;
            let found = match entries.iter().rev().find_map(LogEntry::setup) {
                Some(setup) => {
                    let node = setup.node.clone().unwrap_or_else(|| self.node_id.clone());
                    setup.role().map(|role| (role, node))
                }
                None => Err("no setup record".to_string()),
            };
            let (role, node) = match found {
                Ok(found) => found,
                Err(reason) => {
                    log_event(
                        Event::RestoreSkipped,
                        &[("session", &session), ("reason", &reason)],
                    );
                    continue;
                }
            };

            let mut state = SessionState::new(session.clone(), node, role);
            state.active = false;
            state.phase = ProtocolPhase::Crashed;
            state.transaction_id = entries.iter().rev().find_map(|entry| entry.transaction_id);
            let latest = entries.iter().rev().find_map(LogEntry::decision);

            log_event(
                Event::SessionRestored,
                &[
                    ("session", &session),
                    ("role", &state.role.name().to_string()),
                    ("latest", latest.map_or("none", |d| d.as_str())),
                ],
            );
            self.sessions.insert(state);
            restored.push(session);
        }
        Ok(restored)
    }

    /// Removes a session: stops its timer, drops its accumulators and inbox
    /// and purges its log. Returns whether a session was registered.
    pub fn teardown(&self, session: &str) -> ProtocolResult<bool> {
        let existing = self.sessions.get(session);
        let mut guard = existing.as_ref().map(lock_session);
        if let Some(state) = guard.as_deref_mut() {
            retire(state);
        }
        self.sessions.remove(session);
        self.log.purge(session)?;
        drop(guard);

        log_event(
            Event::SessionTeardown,
            &[("session", session), ("existed", &existing.is_some().to_string())],
        );
        Ok(existing.is_some())
    }

    /// Applies settings. Reactivating a crashed node runs recovery first;
    /// a crash point given in the same request applies after recovery has
    /// cleared the old one.
    pub fn configure(
        &self,
        session: &str,
        settings: SessionSettings,
    ) -> ProtocolResult<SessionStatus> {
        let handle = self.handle(session)?;
        let mut st = lock_session(&handle);

        if let Some(vote) = settings.vote {
            st.vote_preference = vote;
        }
        match settings.active {
            Some(true) if !st.active => self.recover(&mut st, RecoveryCause::External)?,
            Some(false) if st.active => self.deactivate(&mut st)?,
            _ => {}
        }
        if let Some(point) = settings.die_after {
            st.crash_point = point;
        }

        self.log.append(
            &st.id,
            LogRecord::lifecycle(format!(
                "settings active={} dieAfter={} vote={}",
                st.active, st.crash_point, st.vote_preference
            )),
            st.transaction_id,
        )?;
        log_event(
            Event::SettingsChanged,
            &[
                ("session", &st.id),
                ("active", &st.active.to_string()),
                ("die_after", st.crash_point.as_str()),
                ("vote", &st.vote_preference.to_string()),
            ],
        );
        Ok(st.status())
    }

    pub fn status(&self, session: &str) -> ProtocolResult<SessionStatus> {
        let handle = self.handle(session)?;
        let st = lock_session(&handle);
        Ok(st.status())
    }

    /// The full ordered log of a registered session
    pub fn entries(&self, session: &str) -> ProtocolResult<Vec<LogEntry>> {
        let handle = self.handle(session)?;
        let _st = lock_session(&handle);
        Ok(self.log.entries(session)?)
    }

    // ==================
    // Inbound messages
    // ==================

    /// Queues a message for the dispatch sweep. Messages for unknown or
    /// inactive sessions are dropped; returns whether it was queued.
    pub fn deliver(&self, message: ProtocolMessage) -> bool {
        let Some(handle) = self.sessions.get(&message.session) else {
            self.dropped(&message, "unknown session");
            return false;
        };
        let mut st = lock_session(&handle);
        if !st.active {
            self.dropped(&message, "inactive");
            return false;
        }
        st.inbox.push_back(message);
        true
    }

    /// Handles a message right away instead of queueing it
    pub fn handle_inbound(&self, message: ProtocolMessage) -> ProtocolResult<()> {
        let Some(handle) = self.sessions.get(&message.session) else {
            self.dropped(&message, "unknown session");
            return Ok(());
        };
        let mut st = lock_session(&handle);
        if !st.active {
            self.dropped(&message, "inactive");
            return Ok(());
        }
        self.handle_message(&mut st, message)
    }

    fn dropped(&self, message: &ProtocolMessage, reason: &str) {
        self.metrics.increment_messages_dropped();
        log_event(
            Event::MessageDropped,
            &[
                ("session", &message.session),
                ("message", message.kind.as_str()),
                ("sender", &message.sender),
                ("reason", reason),
            ],
        );
    }

    // ==================
    // Shared steps
    // ==================

    /// Appends a decision record if it moves the session forward through
    /// `PREPARE -> {COMMIT | ABORT} -> END`.
    ///
    /// Returns `false` without writing when `decision` repeats the latest
    /// record or would break that order.
    pub(super) fn record_decision(
        &self,
        st: &SessionState,
        decision: Decision,
    ) -> ProtocolResult<bool> {
        let latest = self
            .log
            .latest_decision(&st.id)?
            .and_then(|entry| entry.decision());
        if latest == Some(decision) {
            return Ok(false);
        }
        if !decision.may_follow(latest) {
            self.metrics.increment_decisions_rejected();
            log_event(
                Event::DecisionRejected,
                &[
                    ("session", &st.id),
                    ("decision", decision.as_str()),
                    ("latest", latest.map_or("none", |d| d.as_str())),
                ],
            );
            return Ok(false);
        }

        let entry = self
            .log
            .append(&st.id, LogRecord::decision(decision), st.transaction_id)?;
        self.metrics.record_decision(decision);
        log_event(
            Event::DecisionWritten,
            &[
                ("session", &st.id),
                ("decision", decision.as_str()),
                ("sequence", &entry.sequence.to_string()),
            ],
        );
        Ok(true)
    }

    /// Traces and sends a message. Transport failures are logged and
    /// discarded here.
    pub(super) fn send(
        &self,
        st: &mut SessionState,
        kind: MessageKind,
        target: &str,
    ) -> ProtocolResult<()> {
        let transaction_id = *st.transaction_id.get_or_insert_with(TransactionId::new);
        let (coordinator, subordinates) = match &st.role {
            Role::Coordinator(c) => (Some(st.self_id.clone()), c.subordinates.clone()),
            Role::Participant(p) => (Some(p.coordinator.clone()), Vec::new()),
        };
        let message = ProtocolMessage::new(kind, st.self_id.clone(), transaction_id, st.id.clone())
            .with_topology(coordinator, subordinates);

        self.log.append(
            &st.id,
            LogRecord::sent(kind.as_str(), target),
            Some(transaction_id),
        )?;
        self.metrics.increment_messages_sent();
        log_event(
            Event::MessageSent,
            &[("session", &st.id), ("message", kind.as_str()), ("peer", target)],
        );

        if let Err(err) = self.transport.send(target, &message) {
            self.metrics.increment_send_failures();
            log_event(
                Event::SendFailed,
                &[
                    ("session", &st.id),
                    ("message", kind.as_str()),
                    ("peer", target),
                    ("error", &err.to_string()),
                ],
            );
        }
        Ok(())
    }

    pub(super) fn arm_timer(&self, st: &mut SessionState, kind: TimerKind) {
        let engine = self.this.clone();
        let session = st.id.clone();
        let id = self.scheduler.arm(&mut st.timer, kind, move |id| {
            if let Some(engine) = engine.upgrade() {
                engine.on_timer(&session, id, kind);
            }
        });
        log_event(
            Event::TimerArmed,
            &[("session", &st.id), ("timer", kind.as_str()), ("id", &id.to_string())],
        );
    }

    /// Simulates a crash when the session's crash point is `point`.
    /// Returns whether it crashed; callers stop at once when it did.
    pub(super) fn crash_if(&self, st: &mut SessionState, point: CrashPoint) -> ProtocolResult<bool> {
        if !st.crash_point.triggers(point) {
            return Ok(false);
        }

        st.active = false;
        st.phase = ProtocolPhase::Crashed;
        st.drop_volatile();
        self.arm_timer(st, TimerKind::Respawn);

        self.metrics.increment_crashes();
        log_event(
            Event::NodeCrashed,
            &[("session", &st.id), ("crash_point", point.as_str())],
        );
        self.log.append(
            &st.id,
            LogRecord::lifecycle(format!("crashed {}", point)),
            st.transaction_id,
        )?;
        Ok(true)
    }

    /// External deactivation: like a crash, but nothing revives the node
    /// except an explicit reactivation.
    fn deactivate(&self, st: &mut SessionState) -> ProtocolResult<()> {
        TimeoutScheduler::cancel(&mut st.timer);
        st.active = false;
        st.phase = ProtocolPhase::Crashed;
        st.drop_volatile();

        log_event(Event::NodeDeactivated, &[("session", &st.id)]);
        self.log.append(
            &st.id,
            LogRecord::lifecycle("deactivated"),
            st.transaction_id,
        )?;
        Ok(())
    }
}

/// What brought a node into recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryCause {
    /// A timer expired
    Timeout(TimerKind),
    /// Settings reactivated the node
    External,
}

impl RecoveryCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryCause::Timeout(kind) => kind.as_str(),
            RecoveryCause::External => "external",
        }
    }
}

/// Stops a session that is being replaced or removed
fn retire(state: &mut SessionState) {
    TimeoutScheduler::cancel(&mut state.timer);
    state.active = false;
    state.drop_volatile();
    if let Some(coordinator) = state.coordinator_mut() {
        coordinator.acks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision_log::MemoryDecisionLog;
    use crate::transport::MemoryTransport;

    fn engine() -> (Arc<TransactionEngine>, MemoryTransport) {
        let transport = MemoryTransport::new();
        let engine = TransactionEngine::new(
            "http://c",
            Arc::new(MemoryDecisionLog::new()),
            Arc::new(transport.clone()),
            TimeoutConfig::default(),
            Arc::new(MetricsRegistry::new()),
        );
        (engine, transport)
    }

    #[test]
    fn test_setup_rejects_invalid_role() {
        let (engine, _) = engine();
        let err = engine.setup("s", SessionSetup::default()).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSetup(_)));

        let err = engine
            .setup("", SessionSetup::coordinator(["http://a"]))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSetup(_)));
    }

    #[test]
    fn test_setup_replaces_and_purges() {
        let (engine, _) = engine();
        engine
            .setup("s", SessionSetup::coordinator(["http://a"]))
            .unwrap();
        engine.start_transaction("s").unwrap();
        assert!(engine.entries("s").unwrap().len() > 1);

        let status = engine
            .setup("s", SessionSetup::participant("http://c").with_node("http://p"))
            .unwrap();
        assert_eq!(status.node, "http://p");
        assert_eq!(status.phase, ProtocolPhase::Idle);

        // Only the new setup trace is left
        assert_eq!(engine.entries("s").unwrap().len(), 1);
        assert_eq!(engine.session_ids(), vec!["s"]);
    }

    #[test]
    fn test_teardown() {
        let (engine, _) = engine();
        engine
            .setup("s", SessionSetup::participant("http://c"))
            .unwrap();

        assert!(engine.teardown("s").unwrap());
        assert!(!engine.teardown("s").unwrap());
        assert!(matches!(
            engine.status("s").unwrap_err(),
            ProtocolError::UnknownSession(_)
        ));
    }

    #[test]
    fn test_deliver_drops_unknown_and_inactive() {
        let (engine, _) = engine();
        let message = ProtocolMessage::new(MessageKind::Prepare, "http://c", TransactionId::new(), "s");
        assert!(!engine.deliver(message.clone()));

        engine
            .setup("s", SessionSetup::participant("http://c"))
            .unwrap();
        engine.configure("s", SessionSettings::active(false)).unwrap();
        assert!(!engine.deliver(message.clone()));

        assert_eq!(engine.metrics().messages_dropped, 2);
    }

    #[test]
    fn test_deactivate_then_reactivate_presumes_abort() {
        let (engine, transport) = engine();
        engine
            .setup("s", SessionSetup::participant("http://c"))
            .unwrap();

        let status = engine.configure("s", SessionSettings::active(false)).unwrap();
        assert!(!status.active);
        assert_eq!(status.phase, ProtocolPhase::Crashed);
        assert!(status.timer.is_none());

        let status = engine.configure("s", SessionSettings::active(true)).unwrap();
        assert!(status.active);
        assert_eq!(status.phase, ProtocolPhase::Decided);

        let latest = engine.log.latest_decision("s").unwrap().unwrap();
        assert_eq!(latest.decision(), Some(Decision::Abort));
        // Presumed abort talks to nobody
        assert!(transport.is_empty());
    }

    #[test]
    fn test_crash_point_applies_after_reactivation() {
        let (engine, _) = engine();
        engine
            .setup("s", SessionSetup::participant("http://c"))
            .unwrap();
        engine.configure("s", SessionSettings::active(false)).unwrap();

        let settings = SessionSettings {
            active: Some(true),
            die_after: Some(CrashPoint::AfterVoteSend),
            vote: Some(false),
        };
        let status = engine.configure("s", settings).unwrap();
        assert!(status.active);
        assert_eq!(status.die_after, CrashPoint::AfterVoteSend);
        assert!(!status.vote);
    }

    #[test]
    fn test_start_rejections() {
        let (engine, _) = engine();
        assert!(matches!(
            engine.start_transaction("nope").unwrap_err(),
            ProtocolError::UnknownSession(_)
        ));

        engine
            .setup("p", SessionSetup::participant("http://c"))
            .unwrap();
        assert!(matches!(
            engine.start_transaction("p").unwrap_err(),
            ProtocolError::NotCoordinator(_)
        ));

        engine
            .setup("c", SessionSetup::coordinator(["http://a"]))
            .unwrap();
        engine.start_transaction("c").unwrap();
        assert!(matches!(
            engine.start_transaction("c").unwrap_err(),
            ProtocolError::InvalidPhase { .. }
        ));
        // The rejected start left the running transaction alone
        assert_eq!(engine.status("c").unwrap().phase, ProtocolPhase::WaitVotes);
    }

    #[test]
    fn test_deactivated_coordinator_starts() {
        let (engine, transport) = engine();
        engine
            .setup("d", SessionSetup::coordinator(["http://a", "http://b"]))
            .unwrap();
        engine.configure("d", SessionSettings::active(false)).unwrap();

        let transaction_id = engine.start_transaction("d").unwrap();

        let status = engine.status("d").unwrap();
        assert!(status.active);
        assert_eq!(status.phase, ProtocolPhase::WaitVotes);
        assert_eq!(status.timer, Some(TimerKind::Vote));

        let sent = transport.drain();
        assert_eq!(sent.len(), 2);
        for envelope in &sent {
            assert_eq!(envelope.message.kind, MessageKind::Prepare);
            assert_eq!(envelope.message.transaction_id, transaction_id);
            assert_eq!(envelope.message.coordinator.as_deref(), Some("http://c"));
            assert_eq!(envelope.message.subordinates, vec!["http://a", "http://b"]);
        }
    }

    #[test]
    fn test_crashed_coordinator_cannot_restart_run() {
        let (engine, _) = engine();
        engine
            .setup("e", SessionSetup::coordinator(["http://a"]))
            .unwrap();
        engine
            .configure("e", SessionSettings::die_after(CrashPoint::AfterPrepareWrite))
            .unwrap();
        engine.start_transaction("e").unwrap();

        // The earlier run is only resolved by recovery
        let err = engine.start_transaction("e").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidPhase {
                actual: ProtocolPhase::Crashed,
                ..
            }
        ));
        assert!(!engine.status("e").unwrap().active);
    }

    #[test]
    fn test_restore_rebuilds_inactive_sessions() {
        let log = Arc::new(MemoryDecisionLog::new());
        let transport = MemoryTransport::new();
        let build = || {
            TransactionEngine::new(
                "http://c",
                log.clone(),
                Arc::new(transport.clone()),
                TimeoutConfig::default(),
                Arc::new(MetricsRegistry::new()),
            )
        };

        let before = build();
        before
            .setup("p", SessionSetup::participant("http://c").with_node("http://p"))
            .unwrap();
        before.configure("p", SessionSettings::active(false)).unwrap();
        before.configure("p", SessionSettings::active(true)).unwrap();
        log.append("stray", LogRecord::lifecycle("no setup"), None).unwrap();

        let after = build();
        assert_eq!(after.restore().unwrap(), vec!["p"]);
        assert!(after.restore().unwrap().is_empty());

        let status = after.status("p").unwrap();
        assert!(!status.active);
        assert_eq!(status.phase, ProtocolPhase::Crashed);
        assert_eq!(status.node, "http://p");
        assert_eq!(status.coordinator.as_deref(), Some("http://c"));
        assert!(matches!(
            after.status("stray").unwrap_err(),
            ProtocolError::UnknownSession(_)
        ));

        // Already decided: reactivation settles without writing again
        let status = after.configure("p", SessionSettings::active(true)).unwrap();
        assert_eq!(status.phase, ProtocolPhase::Decided);
        let decisions: Vec<Decision> = after
            .entries("p")
            .unwrap()
            .iter()
            .filter_map(LogEntry::decision)
            .collect();
        assert_eq!(decisions, vec![Decision::Abort]);
    }

    #[test]
    fn test_empty_subordinates_commit_and_end() {
        let (engine, transport) = engine();
        engine
            .setup("s", SessionSetup::coordinator(Vec::<String>::new()))
            .unwrap();
        engine.start_transaction("s").unwrap();

        let decisions: Vec<Decision> = engine
            .entries("s")
            .unwrap()
            .iter()
            .filter_map(LogEntry::decision)
            .collect();
        assert_eq!(decisions, vec![Decision::Commit, Decision::End]);
        assert_eq!(engine.status("s").unwrap().phase, ProtocolPhase::End);
        assert!(transport.is_empty());
    }
}
