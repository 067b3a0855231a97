//! # Transport Errors

use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport errors
///
/// Callers in the protocol engine log these and move on; a lost message is
/// recovered by timeouts and resends, never by the transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// HTTP client could not be built
    #[error("Client creation failed: {0}")]
    ClientCreationFailed(String),

    /// Sending needs a tokio runtime to run the request on
    #[error("No async runtime available to send on")]
    NoRuntime,

    /// Peer cannot be reached
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    /// Peer answered with a non-success status
    #[error("Peer {peer} answered with status {status}")]
    Status { peer: String, status: u16 },

    /// Request failed in flight
    #[error("Request failed: {0}")]
    Request(String),
}
