//! Two-phase commit protocol
//!
//! [`TransactionEngine`] runs the per-session state machine: it handles
//! inbound messages, drives phase transitions, writes decision records,
//! arms the session timer and sends through the transport. Recovery after
//! a simulated crash or a timeout lives next to it and resumes from the
//! latest decision record.
//!
//! # Usage
//!
//! ```ignore
//! use twopc::protocol::TransactionEngine;
//! use twopc::session::SessionSetup;
//!
//! let engine = TransactionEngine::new(node_url, log, transport, timeouts, metrics);
//! engine.setup("s1", SessionSetup::coordinator(["http://s1", "http://s2"]))?;
//! engine.start_transaction("s1")?;
//! ```

mod engine;
mod errors;
mod machine;
mod message;
mod recovery;
mod sweep;

pub use engine::{RecoveryCause, TransactionEngine};
pub use errors::{ProtocolError, ProtocolResult};
pub use message::{MessageKind, ProtocolMessage, TransactionId};
