//! twopc - a two-phase commit node with crash injection and recovery
//!
//! Each node hosts independent sessions. In a session the node is either
//! the coordinator or a participant of one classical blocking 2PC run,
//! and can be told to crash after a chosen protocol step. Recovery resumes
//! from the session's decision log through the cooperative termination
//! protocol.

pub mod cli;
pub mod crash_point;
pub mod decision_log;
pub mod http_server;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod timeout;
pub mod transport;
