//! Session registry
//!
//! An arena of session states keyed by session id. Each state sits behind
//! its own mutex; the registry lock is only held to look a handle up or to
//! swap one in or out, never while a session is being worked on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use super::state::SessionState;

pub type SessionHandle = Arc<Mutex<SessionState>>;

/// Locks a session.
///
/// A poisoned lock is recovered: every critical section leaves the state
/// consistent before calling anything fallible.
pub fn lock_session(handle: &SessionHandle) -> MutexGuard<'_, SessionState> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a session, returning the one it replaced.
    pub fn insert(&self, state: SessionState) -> Option<SessionHandle> {
        let id = state.id.clone();
        let handle = Arc::new(Mutex::new(state));
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle)
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn remove(&self, id: &str) -> Option<SessionHandle> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Snapshot of the registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
