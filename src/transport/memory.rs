//! In-process transport
//!
//! Queues every send instead of delivering it, so a harness decides when
//! (and whether) each message reaches its target. Peers can be marked
//! unreachable to model a partition.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::protocol::ProtocolMessage;

use super::errors::{TransportError, TransportResult};
use super::Transport;

/// A queued message and the node it is addressed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub target: String,
    pub message: ProtocolMessage,
}

#[derive(Debug, Default)]
struct Outbox {
    queue: VecDeque<Envelope>,
    unreachable: HashSet<String>,
}

/// Cloning shares the queue
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    outbox: Arc<Mutex<Outbox>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Oldest queued message
    pub fn pop(&self) -> Option<Envelope> {
        self.outbox().queue.pop_front()
    }

    pub fn drain(&self) -> Vec<Envelope> {
        self.outbox().queue.drain(..).collect()
    }

    /// Queued messages addressed to `target`, left in the queue
    pub fn pending_for(&self, target: &str) -> Vec<ProtocolMessage> {
        self.outbox()
            .queue
            .iter()
            .filter(|e| e.target == target)
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.outbox().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends to an unreachable peer fail instead of queueing
    pub fn set_reachable(&self, peer: &str, reachable: bool) {
        let mut outbox = self.outbox();
        if reachable {
            outbox.unreachable.remove(peer);
        } else {
            outbox.unreachable.insert(peer.to_string());
        }
    }
}

impl Transport for MemoryTransport {
    fn send(&self, target: &str, message: &ProtocolMessage) -> TransportResult<()> {
        let mut outbox = self.outbox();
        if outbox.unreachable.contains(target) {
            return Err(TransportError::Unreachable(target.to_string()));
        }
        outbox.queue.push_back(Envelope {
            target: target.to_string(),
            message: message.clone(),
        });
        Ok(())
    }
}
