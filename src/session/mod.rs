//! Session state and registry
//!
//! A session is one 2PC run on this node, keyed by a caller supplied id.
//! Sessions are fully independent; there is no cross-session lock.

mod registry;
mod setup;
mod state;

pub use registry::{lock_session, SessionHandle, SessionRegistry};
pub use setup::{SessionSettings, SessionSetup};
pub use state::{
    AckSet, CoordinatorRole, ParticipantRole, ProtocolPhase, Role, RoleName, SessionState,
    SessionStatus, Vote, VoteSet,
};
