//! # HTTP Server Module
//!
//! The node's HTTP surface, one Axum router over a shared
//! [`TransactionEngine`](crate::protocol::TransactionEngine).
//!
//! # Endpoints
//!
//! - `POST /setup`, `/start`, `/settings`, `/teardown` - session control
//! - `POST /message`, `/inquiry` - node to node protocol traffic
//! - `GET /status`, `/info` - session snapshot and decision log
//! - `GET /health`, `/metrics` - observability

pub mod config;
pub mod observability_routes;
pub mod protocol_routes;
pub mod server;

pub use config::HttpServerConfig;
pub use server::HttpServer;
