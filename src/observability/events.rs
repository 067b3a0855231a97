//! Observable events of a twopc node
//!
//! Events are explicit and typed. Each carries its own severity so call
//! sites only decide which fields to attach.

use std::fmt;

use super::logger::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Boot & lifecycle
    /// Startup begins
    BootStart,
    /// Configuration loaded and validated
    ConfigLoaded,
    /// Sessions rebuilt from the decision log
    BootRestored,
    /// HTTP listener bound, serving requests
    Serving,

    // Session lifecycle
    SessionSetup,
    SessionTeardown,
    SettingsChanged,
    /// Session rebuilt from its log after a restart
    SessionRestored,
    /// Log without a usable setup record; left on disk untouched
    RestoreSkipped,

    // Protocol progress
    TransactionStarted,
    DecisionWritten,
    /// A decision that would break the PREPARE -> outcome -> END order
    DecisionRejected,
    VotesEvaluated,
    AcksComplete,

    // Messaging
    MessageSent,
    MessageReceived,
    /// Message for an unknown or inactive session
    MessageDropped,
    /// Message not valid for this role or phase
    MessageIgnored,
    /// Transport could not deliver; left to timeouts and resends
    SendFailed,
    InquiryAnswered,
    /// Coordinator has no outcome yet; the inquirer stays blocked
    InquiryUnanswered,

    // Timers
    TimerArmed,
    TimerFired,
    /// Timer superseded between firing and taking the session lock
    TimerStale,

    // Fault injection & recovery
    NodeCrashed,
    NodeDeactivated,
    RecoveryStart,
    PresumedAbort,
    RecoveryComplete,
    /// A timer-driven step failed; nobody is waiting on the result
    BackgroundFailure,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::BootStart => "TWOPC_STARTUP_BEGIN",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::BootRestored => "TWOPC_SESSIONS_RESTORED",
            Event::Serving => "TWOPC_SERVING",

            Event::SessionSetup => "SESSION_SETUP",
            Event::SessionTeardown => "SESSION_TEARDOWN",
            Event::SettingsChanged => "SESSION_SETTINGS_CHANGED",
            Event::SessionRestored => "SESSION_RESTORED",
            Event::RestoreSkipped => "SESSION_RESTORE_SKIPPED",

            Event::TransactionStarted => "TRANSACTION_STARTED",
            Event::DecisionWritten => "DECISION_WRITTEN",
            Event::DecisionRejected => "DECISION_REJECTED",
            Event::VotesEvaluated => "VOTES_EVALUATED",
            Event::AcksComplete => "ACKS_COMPLETE",

            Event::MessageSent => "MESSAGE_SENT",
            Event::MessageReceived => "MESSAGE_RECEIVED",
            Event::MessageDropped => "MESSAGE_DROPPED",
            Event::MessageIgnored => "MESSAGE_IGNORED",
            Event::SendFailed => "SEND_FAILED",
            Event::InquiryAnswered => "INQUIRY_ANSWERED",
            Event::InquiryUnanswered => "INQUIRY_UNANSWERED",

            Event::TimerArmed => "TIMER_ARMED",
            Event::TimerFired => "TIMER_FIRED",
            Event::TimerStale => "TIMER_STALE",

            Event::NodeCrashed => "NODE_CRASHED",
            Event::NodeDeactivated => "NODE_DEACTIVATED",
            Event::RecoveryStart => "RECOVERY_BEGIN",
            Event::PresumedAbort => "PRESUMED_ABORT",
            Event::RecoveryComplete => "RECOVERY_COMPLETE",
            Event::BackgroundFailure => "BACKGROUND_FAILURE",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Event::MessageSent
            | Event::MessageReceived
            | Event::MessageDropped
            | Event::TimerArmed
            | Event::TimerStale => Severity::Trace,
            Event::DecisionRejected
            | Event::MessageIgnored
            | Event::SendFailed
            | Event::InquiryUnanswered
            | Event::NodeCrashed
            | Event::NodeDeactivated
            | Event::RestoreSkipped
            | Event::PresumedAbort => Severity::Warn,
            Event::BackgroundFailure => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
