//! One cancellable timer per session
//!
//! The timer slot lives inside the session state and is only touched under
//! the session lock. Arming replaces (and cancels) whatever the slot held.
//!
//! A fired timer reports its id back to the engine, which compares it with
//! the id currently in the slot before acting. A timer that was cancelled
//! or replaced after its sleep elapsed, while it waited for the lock, sees
//! a different id and does nothing. This is what keeps a timeout and the
//! normal completion of the same phase from both taking effect.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use super::config::TimeoutConfig;

/// What a timer guards against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerKind {
    /// Coordinator: not all votes arrived
    Vote,
    /// Participant: no decision or inquiry answer arrived
    Response,
    /// Coordinator: not all acknowledgements arrived
    Ack,
    /// Crashed node revives itself
    Respawn,
    /// Recovered coordinator with nothing to wait for writes END
    Grace,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerKind::Vote => "vote",
            TimerKind::Response => "response",
            TimerKind::Ack => "ack",
            TimerKind::Respawn => "respawn",
            TimerKind::Grace => "grace",
        }
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An armed timer.
///
/// Outside a tokio runtime the handle is inert: it occupies the slot and
/// can be cancelled, but never fires.
#[derive(Debug)]
pub struct TimerHandle {
    id: u64,
    kind: TimerKind,
    task: Option<AbortHandle>,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    pub fn is_inert(&self) -> bool {
        self.task.is_none()
    }

    fn cancel(self) {
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

/// Arms and cancels per-session timers
#[derive(Debug)]
pub struct TimeoutScheduler {
    config: TimeoutConfig,
    next_id: AtomicU64,
}

impl TimeoutScheduler {
    pub fn new(config: TimeoutConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Arms a timer of `kind` in `slot`, cancelling the previous one.
    ///
    /// `on_fire` runs on the runtime once the delay elapses and receives the
    /// id returned here.
    pub fn arm<F>(&self, slot: &mut Option<TimerHandle>, kind: TimerKind, on_fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        Self::cancel(slot);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let delay = self.config.duration(kind);

        let task = Handle::try_current().ok().map(|runtime| {
            runtime
                .spawn(async move {
                    tokio::time::sleep(delay).await;
                    on_fire(id);
                })
                .abort_handle()
        });

        *slot = Some(TimerHandle { id, kind, task });
        id
    }

    /// Cancels the timer in `slot`, returning its kind if one was armed.
    pub fn cancel(slot: &mut Option<TimerHandle>) -> Option<TimerKind> {
        slot.take().map(|handle| {
            let kind = handle.kind();
            handle.cancel();
            kind
        })
    }

    /// Whether `id` is still the timer held by `slot`
    pub fn is_current(slot: &Option<TimerHandle>, id: u64) -> bool {
        slot.as_ref().is_some_and(|handle| handle.id() == id)
    }
}
