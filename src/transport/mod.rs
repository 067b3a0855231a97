//! Node-to-node transport
//!
//! Sends are fire-and-forget. A send returns a result, but the protocol
//! engine deliberately discards it after logging: reliability comes from
//! the protocol's timeouts and resends, not from the transport.

mod errors;
mod http;
mod memory;
mod wire;

pub use errors::{TransportError, TransportResult};
pub use http::HttpTransport;
pub use memory::{Envelope, MemoryTransport};
pub use wire::{InquiryBody, MessageBody};

use crate::protocol::ProtocolMessage;

pub trait Transport: Send + Sync {
    /// Hands `message` off for delivery to `target`. Must not block on the
    /// network.
    fn send(&self, target: &str, message: &ProtocolMessage) -> TransportResult<()>;
}
