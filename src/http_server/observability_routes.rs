//! Observability HTTP Routes
//!
//! Health check and protocol counters.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use crate::protocol::TransactionEngine;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub node: String,
    pub sessions: usize,
}

/// Create observability routes
pub fn observability_routes(engine: Arc<TransactionEngine>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(engine)
}

/// Health check handler
async fn health_handler(State(engine): State<Arc<TransactionEngine>>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        node: engine.node_id().to_string(),
        sessions: engine.session_ids().len(),
    };

    (StatusCode::OK, Json(response))
}

/// Metrics handler - returns the counter snapshot as JSON
async fn metrics_handler(State(engine): State<Arc<TransactionEngine>>) -> impl IntoResponse {
    (StatusCode::OK, Json(engine.metrics()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            node: "http://127.0.0.1:8080".to_string(),
            sessions: 2,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["sessions"], 2);
    }
}
