//! Protocol HTTP Routes
//!
//! Session control and node-to-node endpoints. Every route takes the
//! session as `?session=<id>`.
//!
//! Structurally valid requests always get 200. A request the protocol
//! turns down (unknown session, wrong role or phase) answers with a
//! [`Rejected`] body instead of an error status, and protocol messages for
//! unknown or inactive sessions are dropped the same way; a crashed node
//! does not answer differently from a slow one. Only an invalid setup
//! (400) and a decision log failure (500) leave the 200 path.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::decision_log::LogEntry;
use crate::observability::{log_event, Event};
use crate::protocol::{ProtocolError, ProtocolResult, TransactionEngine, TransactionId};
use crate::session::{SessionSettings, SessionSetup, SessionStatus};
use crate::transport::{InquiryBody, MessageBody};

// ==================
// Request/Response Types
// ==================

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub session: String,
    pub transaction_id: TransactionId,
}

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    /// `false` when the session is unknown or inactive
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct TeardownResponse {
    pub session: String,
    pub removed: bool,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub session: String,
    pub entries: Vec<LogEntry>,
}

/// A request the protocol turned down
#[derive(Debug, Serialize)]
pub struct Rejected {
    pub session: String,
    /// Always `false`
    pub accepted: bool,
    pub reason: String,
}

/// Either the operation's result or why it was turned down
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Outcome<T> {
    Applied(T),
    Rejected(Rejected),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

type ApiResult<T> = Result<Json<Outcome<T>>, (StatusCode, Json<ErrorResponse>)>;

/// Folds an engine result into a response. Invalid setups and storage
/// failures keep their error status; everything else is a 200.
fn respond<T>(session: &str, result: ProtocolResult<T>) -> ApiResult<T> {
    match result {
        Ok(value) => Ok(Json(Outcome::Applied(value))),
        Err(err @ ProtocolError::InvalidSetup(_)) => {
            Err(error_response(StatusCode::BAD_REQUEST, err))
        }
        Err(err @ ProtocolError::Log(_)) => {
            log_event(
                Event::BackgroundFailure,
                &[("session", session), ("error", &err.to_string())],
            );
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, err))
        }
        Err(err) => Ok(Json(Outcome::Rejected(Rejected {
            session: session.to_string(),
            accepted: false,
            reason: err.to_string(),
        }))),
    }
}

fn error_response(status: StatusCode, err: ProtocolError) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: status.as_u16(),
        }),
    )
}

// ==================
// Protocol Routes
// ==================

/// Create protocol routes
pub fn protocol_routes(engine: Arc<TransactionEngine>) -> Router {
    Router::new()
        // Session control
        .route("/setup", post(setup_handler))
        .route("/start", post(start_handler))
        .route("/settings", post(settings_handler))
        .route("/teardown", post(teardown_handler))
        // Node to node
        .route("/message", post(message_handler))
        .route("/inquiry", post(inquiry_handler))
        // Inspection
        .route("/status", get(status_handler))
        .route("/info", get(info_handler))
        .with_state(engine)
}

// ==================
// Session Control Handlers
// ==================

async fn setup_handler(
    State(engine): State<Arc<TransactionEngine>>,
    Query(query): Query<SessionQuery>,
    Json(request): Json<SessionSetup>,
) -> ApiResult<SessionStatus> {
    respond(&query.session, engine.setup(&query.session, request))
}

async fn start_handler(
    State(engine): State<Arc<TransactionEngine>>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<StartResponse> {
    let result = engine
        .start_transaction(&query.session)
        .map(|transaction_id| StartResponse {
            session: query.session.clone(),
            transaction_id,
        });
    respond(&query.session, result)
}

async fn settings_handler(
    State(engine): State<Arc<TransactionEngine>>,
    Query(query): Query<SessionQuery>,
    Json(request): Json<SessionSettings>,
) -> ApiResult<SessionStatus> {
    respond(&query.session, engine.configure(&query.session, request))
}

async fn teardown_handler(
    State(engine): State<Arc<TransactionEngine>>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<TeardownResponse> {
    let result = engine.teardown(&query.session).map(|removed| TeardownResponse {
        session: query.session.clone(),
        removed,
    });
    respond(&query.session, result)
}

// ==================
// Node To Node Handlers
// ==================

async fn message_handler(
    State(engine): State<Arc<TransactionEngine>>,
    Query(query): Query<SessionQuery>,
    Json(body): Json<MessageBody>,
) -> Json<DeliveryResponse> {
    let accepted = engine.deliver(body.into_message(query.session));
    Json(DeliveryResponse { accepted })
}

async fn inquiry_handler(
    State(engine): State<Arc<TransactionEngine>>,
    Query(query): Query<SessionQuery>,
    Json(body): Json<InquiryBody>,
) -> Json<DeliveryResponse> {
    let accepted = engine.deliver(body.into_message(query.session));
    Json(DeliveryResponse { accepted })
}

// ==================
// Inspection Handlers
// ==================

async fn status_handler(
    State(engine): State<Arc<TransactionEngine>>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<SessionStatus> {
    respond(&query.session, engine.status(&query.session))
}

async fn info_handler(
    State(engine): State<Arc<TransactionEngine>>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<InfoResponse> {
    let result = engine.entries(&query.session).map(|entries| InfoResponse {
        session: query.session.clone(),
        entries,
    });
    respond(&query.session, result)
}
