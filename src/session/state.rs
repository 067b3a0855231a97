//! Per-session protocol state
//!
//! Everything here is mutated only under the session's own lock: the role
//! specific accumulators, the timer slot, the inbox and the phase move
//! together as one critical section.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use serde::Serialize;

use crate::crash_point::CrashPoint;
use crate::protocol::{ProtocolMessage, TransactionId};
use crate::timeout::{TimerHandle, TimerKind};

/// Phase of a session from this node's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolPhase {
    /// No decision record yet
    Idle,
    /// Participant voted YES and waits for the outcome
    Uncertain,
    /// Coordinator waits for every vote
    WaitVotes,
    /// Outcome recorded, not yet fully acknowledged
    Decided,
    /// Coordinator waits for acknowledgements
    WaitAcks,
    /// END written
    End,
    /// Node is simulating a crash
    Crashed,
}

impl fmt::Display for ProtocolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolPhase::Idle => "IDLE",
            ProtocolPhase::Uncertain => "UNCERTAIN",
            ProtocolPhase::WaitVotes => "WAIT_VOTES",
            ProtocolPhase::Decided => "DECIDED",
            ProtocolPhase::WaitAcks => "WAIT_ACKS",
            ProtocolPhase::End => "END",
            ProtocolPhase::Crashed => "CRASHED",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Yes,
    No,
}

/// Votes collected by a coordinator. `None` marks a subordinate that did
/// not answer before the vote timeout.
#[derive(Debug, Default)]
pub struct VoteSet {
    votes: BTreeMap<String, Option<Vote>>,
}

impl VoteSet {
    /// Records a vote; a repeated vote from the same sender overwrites.
    pub fn record(&mut self, sender: &str, vote: Option<Vote>) {
        self.votes.insert(sender.to_string(), vote);
    }

    pub fn get(&self, sender: &str) -> Option<Option<Vote>> {
        self.votes.get(sender).copied()
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    pub fn contains(&self, sender: &str) -> bool {
        self.votes.contains_key(sender)
    }

    pub fn any_no(&self) -> bool {
        self.votes.values().any(|v| *v == Some(Vote::No))
    }

    pub fn clear(&mut self) {
        self.votes.clear();
    }
}

/// Acknowledgements a coordinator is waiting for.
///
/// `received` only ever holds members of `needed`.
#[derive(Debug, Default, Clone)]
pub struct AckSet {
    needed: BTreeSet<String>,
    received: BTreeSet<String>,
}

impl AckSet {
    /// Replaces the expected set, keeping acknowledgements already received
    /// from peers that are still expected.
    pub fn expect<I, S>(&mut self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.needed = peers.into_iter().map(Into::into).collect();
        let needed = &self.needed;
        self.received.retain(|peer| needed.contains(peer));
    }

    /// Records an acknowledgement. Returns `false` for duplicates and for
    /// senders that were never expected.
    pub fn record(&mut self, sender: &str) -> bool {
        if !self.needed.contains(sender) {
            return false;
        }
        self.received.insert(sender.to_string())
    }

    /// Every expected acknowledgement has arrived
    pub fn is_complete(&self) -> bool {
        !self.needed.is_empty() && self.received.len() == self.needed.len()
    }

    /// Expected peers that have not acknowledged yet
    pub fn pending(&self) -> Vec<String> {
        self.needed.difference(&self.received).cloned().collect()
    }

    pub fn needed(&self) -> &BTreeSet<String> {
        &self.needed
    }

    pub fn received(&self) -> &BTreeSet<String> {
        &self.received
    }

    pub fn is_empty(&self) -> bool {
        self.needed.is_empty()
    }

    pub fn clear(&mut self) {
        self.needed.clear();
        self.received.clear();
    }
}

/// Coordinator capabilities: vote and acknowledgement aggregation
#[derive(Debug, Default)]
pub struct CoordinatorRole {
    /// Ordered, duplicate free
    pub subordinates: Vec<String>,
    pub votes: VoteSet,
    pub acks: AckSet,
}

impl CoordinatorRole {
    pub fn new(subordinates: Vec<String>) -> Self {
        Self {
            subordinates,
            ..Default::default()
        }
    }

    pub fn is_subordinate(&self, peer: &str) -> bool {
        self.subordinates.iter().any(|s| s == peer)
    }

    pub fn all_votes_in(&self) -> bool {
        self.votes.len() == self.subordinates.len()
    }
}

/// Participant capabilities: casting a vote for its coordinator
#[derive(Debug, Clone)]
pub struct ParticipantRole {
    pub coordinator: String,
}

#[derive(Debug)]
pub enum Role {
    Coordinator(CoordinatorRole),
    Participant(ParticipantRole),
}

impl Role {
    pub fn name(&self) -> RoleName {
        match self {
            Role::Coordinator(_) => RoleName::Coordinator,
            Role::Participant(_) => RoleName::Participant,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleName {
    Coordinator,
    Participant,
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleName::Coordinator => write!(f, "coordinator"),
            RoleName::Participant => write!(f, "participant"),
        }
    }
}

/// State of one 2PC run on this node
#[derive(Debug)]
pub struct SessionState {
    pub id: String,
    /// This node's identifier, as peers address it
    pub self_id: String,
    pub role: Role,
    /// The vote a participant casts on PREPARE
    pub vote_preference: bool,
    /// `false` while the node simulates a crash
    pub active: bool,
    pub crash_point: CrashPoint,
    pub phase: ProtocolPhase,
    pub transaction_id: Option<TransactionId>,
    /// The single timer slot
    pub timer: Option<TimerHandle>,
    /// Messages waiting for the dispatch sweep
    pub inbox: VecDeque<ProtocolMessage>,
}

impl SessionState {
    pub fn new(id: impl Into<String>, self_id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            self_id: self_id.into(),
            role,
            vote_preference: true,
            active: true,
            crash_point: CrashPoint::None,
            phase: ProtocolPhase::Idle,
            transaction_id: None,
            timer: None,
            inbox: VecDeque::new(),
        }
    }

    pub fn is_coordinator(&self) -> bool {
        matches!(self.role, Role::Coordinator(_))
    }

    pub fn coordinator(&self) -> Option<&CoordinatorRole> {
        match &self.role {
            Role::Coordinator(c) => Some(c),
            Role::Participant(_) => None,
        }
    }

    pub fn coordinator_mut(&mut self) -> Option<&mut CoordinatorRole> {
        match &mut self.role {
            Role::Coordinator(c) => Some(c),
            Role::Participant(_) => None,
        }
    }

    pub fn participant(&self) -> Option<&ParticipantRole> {
        match &self.role {
            Role::Participant(p) => Some(p),
            Role::Coordinator(_) => None,
        }
    }

    /// Drops volatile state lost in a crash or at teardown. The ack set is
    /// kept: recovery consults it.
    pub fn drop_volatile(&mut self) {
        self.inbox.clear();
        if let Some(coordinator) = self.coordinator_mut() {
            coordinator.votes.clear();
        }
    }

    pub fn status(&self) -> SessionStatus {
        let (coordinator, subordinates, pending_acks) = match &self.role {
            Role::Coordinator(c) => (None, c.subordinates.clone(), c.acks.pending()),
            Role::Participant(p) => (Some(p.coordinator.clone()), Vec::new(), Vec::new()),
        };

        SessionStatus {
            session: self.id.clone(),
            node: self.self_id.clone(),
            role: self.role.name(),
            coordinator,
            subordinates,
            active: self.active,
            die_after: self.crash_point,
            vote: self.vote_preference,
            phase: self.phase,
            transaction_id: self.transaction_id,
            timer: self.timer.as_ref().map(TimerHandle::kind),
            pending_acks,
        }
    }
}

/// Snapshot reported by `/status`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session: String,
    pub node: String,
    pub role: RoleName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<String>,
    pub subordinates: Vec<String>,
    pub active: bool,
    pub die_after: CrashPoint,
    pub vote: bool,
    pub phase: ProtocolPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerKind>,
    pub pending_acks: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_overwrite_not_duplicate() {
        let mut votes = VoteSet::default();
        votes.record("s1", Some(Vote::No));
        votes.record("s1", Some(Vote::Yes));

        assert_eq!(votes.len(), 1);
        assert_eq!(votes.get("s1"), Some(Some(Vote::Yes)));
        assert!(!votes.any_no());
    }

    #[test]
    fn test_ack_duplicates_not_counted() {
        let mut acks = AckSet::default();
        acks.expect(["s1", "s2"]);

        assert!(acks.record("s1"));
        assert!(!acks.record("s1"));
        assert!(!acks.is_complete());

        assert!(acks.record("s2"));
        assert!(acks.is_complete());
        assert_eq!(acks.received().len(), acks.needed().len());
    }

    #[test]
    fn test_ack_from_unexpected_sender_ignored() {
        let mut acks = AckSet::default();
        acks.expect(["s1"]);

        assert!(!acks.record("s9"));
        assert!(acks.received().is_empty());
        assert_eq!(acks.pending(), vec!["s1".to_string()]);
    }

    #[test]
    fn test_expect_keeps_received_subset() {
        let mut acks = AckSet::default();
        acks.expect(["s1", "s2"]);
        acks.record("s1");

        acks.expect(["s1", "s2", "s3"]);
        assert!(acks.received().contains("s1"));
        assert_eq!(acks.pending(), vec!["s2".to_string(), "s3".to_string()]);

        acks.expect(["s2"]);
        assert!(acks.received().is_empty());
    }

    #[test]
    fn test_empty_ack_set_is_never_complete() {
        let acks = AckSet::default();
        assert!(!acks.is_complete());
        assert!(acks.is_empty());
    }

    #[test]
    fn test_drop_volatile_keeps_acks() {
        let mut state = SessionState::new(
            "s",
            "http://c",
            Role::Coordinator(CoordinatorRole::new(vec!["a".into(), "b".into()])),
        );
        {
            let c = state.coordinator_mut().unwrap();
            c.votes.record("a", Some(Vote::Yes));
            c.acks.expect(["a", "b"]);
            c.acks.record("a");
        }

        state.drop_volatile();

        let c = state.coordinator().unwrap();
        assert!(c.votes.is_empty());
        assert_eq!(c.acks.received().len(), 1);
    }

    #[test]
    fn test_status_shape() {
        let state = SessionState::new(
            "s",
            "http://p",
            Role::Participant(ParticipantRole {
                coordinator: "http://c".into(),
            }),
        );
        let json = serde_json::to_value(state.status()).unwrap();

        assert_eq!(json["role"], "participant");
        assert_eq!(json["coordinator"], "http://c");
        assert_eq!(json["active"], true);
        assert_eq!(json["dieAfter"], "none");
        assert_eq!(json["phase"], "IDLE");
        assert!(json.get("timer").is_none());
    }
}
