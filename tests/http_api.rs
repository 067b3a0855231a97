//! HTTP surface tests
//!
//! Drives one node's router in process with `tower::ServiceExt::oneshot`;
//! outbound protocol traffic lands in a [`MemoryTransport`].

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use twopc::decision_log::MemoryDecisionLog;
use twopc::http_server::{HttpServer, HttpServerConfig};
use twopc::observability::MetricsRegistry;
use twopc::protocol::{MessageKind, TransactionEngine};
use twopc::timeout::TimeoutConfig;
use twopc::transport::MemoryTransport;

const NODE: &str = "http://127.0.0.1:8080";

fn app() -> (Router, MemoryTransport) {
    let transport = MemoryTransport::new();
    let engine = TransactionEngine::new(
        NODE,
        Arc::new(MemoryDecisionLog::new()),
        Arc::new(transport.clone()),
        TimeoutConfig::default(),
        Arc::new(MetricsRegistry::new()),
    );
    let router = HttpServer::new(HttpServerConfig::default(), engine).router();
    (router, transport)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    call(app, Method::POST, uri, Some(body)).await
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    call(app, Method::GET, uri, None).await
}

fn coordinator_setup() -> Value {
    json!({
        "isCoordinator": true,
        "isSubordinate": false,
        "coordinator": null,
        "subordinates": ["http://10.0.0.2:8080", "http://10.0.0.3:8080"]
    })
}

fn participant_setup() -> Value {
    json!({
        "isCoordinator": false,
        "isSubordinate": true,
        "coordinator": "http://10.0.0.1:8080",
        "subordinates": []
    })
}

// =============================================================================
// Session control
// =============================================================================

#[tokio::test]
async fn test_setup_and_status() {
    let (app, _) = app();

    let (status, body) = post(&app, "/setup?session=s1", coordinator_setup()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "coordinator");
    assert_eq!(body["phase"], "IDLE");
    assert_eq!(body["node"], NODE);
    assert_eq!(body["subordinates"].as_array().unwrap().len(), 2);

    let (status, body) = get(&app, "/status?session=s1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"], "s1");
    assert_eq!(body["active"], true);
    assert_eq!(body["dieAfter"], "none");
}

#[tokio::test]
async fn test_setup_rejects_invalid_role() {
    let (app, _) = app();

    let (status, body) = post(
        &app,
        "/setup?session=s1",
        json!({"isCoordinator": true, "isSubordinate": true, "coordinator": "http://x"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn test_unknown_session_is_rejected_with_ok() {
    let (app, transport) = app();

    for (method, uri) in [
        (Method::GET, "/status?session=missing"),
        (Method::GET, "/info?session=missing"),
        (Method::POST, "/start?session=missing"),
    ] {
        let body = (method == Method::POST).then(|| json!({}));
        let (status, body) = call(&app, method, uri, body).await;
        assert_eq!(status, StatusCode::OK, "{}", uri);
        assert_eq!(body["accepted"], false, "{}", uri);
        assert_eq!(body["session"], "missing");
        assert!(body["reason"].as_str().unwrap().contains("not found"));
    }

    let (status, body) = post(&app, "/settings?session=missing", json!({"vote": false})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], false);

    assert!(transport.is_empty());
}

#[tokio::test]
async fn test_missing_session_query_rejected() {
    let (app, _) = app();
    let (status, _) = get(&app, "/status").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_start_broadcasts_prepare() {
    let (app, transport) = app();
    post(&app, "/setup?session=s1", coordinator_setup()).await;

    let (status, body) = post(&app, "/start?session=s1", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["transactionId"].is_string());

    let sent = transport.drain();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|e| e.message.kind == MessageKind::Prepare));

    let (_, body) = get(&app, "/status?session=s1").await;
    assert_eq!(body["phase"], "WAIT_VOTES");
    assert_eq!(body["timer"], "vote");

    // Already running: turned down, nothing resent
    let (status, body) = post(&app, "/start?session=s1", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], false);
    assert!(transport.is_empty());

    let (_, body) = get(&app, "/status?session=s1").await;
    assert_eq!(body["phase"], "WAIT_VOTES");
}

#[tokio::test]
async fn test_start_on_participant_is_rejected() {
    let (app, transport) = app();
    post(&app, "/setup?session=s1", participant_setup()).await;

    let (status, body) = post(&app, "/start?session=s1", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], false);
    assert!(body["reason"].as_str().unwrap().contains("not a coordinator"));
    assert!(body.get("transactionId").is_none());
    assert!(transport.is_empty());
}

#[tokio::test]
async fn test_start_on_deactivated_coordinator() {
    let (app, transport) = app();
    post(&app, "/setup?session=s1", coordinator_setup()).await;
    post(&app, "/settings?session=s1", json!({"active": false})).await;

    let (status, body) = post(&app, "/start?session=s1", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["transactionId"].is_string());

    let (_, body) = get(&app, "/status?session=s1").await;
    assert_eq!(body["active"], true);
    assert_eq!(body["phase"], "WAIT_VOTES");

    let sent = transport.drain();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|e| e.message.kind == MessageKind::Prepare));
}

#[tokio::test]
async fn test_settings_update_status() {
    let (app, _) = app();
    post(&app, "/setup?session=s1", participant_setup()).await;

    let (status, body) = post(
        &app,
        "/settings?session=s1",
        json!({"dieAfter": "afterVoteSend", "vote": false}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dieAfter"], "afterVoteSend");
    assert_eq!(body["vote"], false);
    assert_eq!(body["active"], true);

    let (_, body) = post(&app, "/settings?session=s1", json!({"active": false})).await;
    assert_eq!(body["active"], false);
    assert_eq!(body["phase"], "CRASHED");
}

#[tokio::test]
async fn test_teardown_removes_session() {
    let (app, _) = app();
    post(&app, "/setup?session=s1", participant_setup()).await;

    let (status, body) = post(&app, "/teardown?session=s1", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);

    let (_, body) = post(&app, "/teardown?session=s1", json!({})).await;
    assert_eq!(body["removed"], false);

    let (status, body) = get(&app, "/info?session=s1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], false);
    assert!(body.get("entries").is_none());
}

// =============================================================================
// Node to node
// =============================================================================

#[tokio::test]
async fn test_prepare_message_gets_a_vote() {
    let (app, transport) = app();
    post(&app, "/setup?session=s1", participant_setup()).await;

    let txid = "0b6f5a3e-6a55-4a5e-9d0e-4c1f7a2b9c11";
    let (status, body) = post(
        &app,
        "/message?session=s1",
        json!({
            "message": "PREPARE",
            "node": "http://10.0.0.1:8080",
            "coordinator": "http://10.0.0.1:8080",
            "subordinates": [],
            "transId": txid
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);

    // Queued for the sweep; nothing answered yet
    assert!(transport.is_empty());
}

#[tokio::test]
async fn test_message_to_unknown_session_dropped() {
    let (app, _) = app();

    let (status, body) = post(
        &app,
        "/inquiry?session=nope",
        json!({"sender": "http://10.0.0.2:8080", "transId": "0b6f5a3e-6a55-4a5e-9d0e-4c1f7a2b9c11"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], false);

    let (_, metrics) = get(&app, "/metrics").await;
    assert_eq!(metrics["messages_dropped"], 1);
}

#[tokio::test]
async fn test_malformed_message_rejected() {
    let (app, _) = app();
    post(&app, "/setup?session=s1", participant_setup()).await;

    let (status, _) = post(
        &app,
        "/message?session=s1",
        json!({"message": "MAYBE", "node": "http://x", "transId": "not-a-uuid"}),
    )
    .await;
    assert!(status.is_client_error());
}

// =============================================================================
// Inspection
// =============================================================================

#[tokio::test]
async fn test_info_lists_log_entries() {
    let (app, _) = app();
    post(
        &app,
        "/setup?session=s1",
        json!({"isCoordinator": true, "subordinates": []}),
    )
    .await;
    post(&app, "/start?session=s1", json!({})).await;

    let (status, body) = get(&app, "/info?session=s1").await;
    assert_eq!(status, StatusCode::OK);

    let entries = body["entries"].as_array().unwrap();
    let decisions: Vec<&str> = entries
        .iter()
        .filter(|e| e["durable"] == true)
        .filter_map(|e| e["decision"].as_str())
        .collect();
    assert_eq!(decisions, vec!["COMMIT", "END"]);

    let sequences: Vec<u64> = entries
        .iter()
        .filter_map(|e| e["sequence"].as_u64())
        .collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_health_and_metrics() {
    let (app, _) = app();
    post(&app, "/setup?session=a", participant_setup()).await;
    post(&app, "/setup?session=b", coordinator_setup()).await;

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["node"], NODE);
    assert_eq!(body["sessions"], 2);

    let (status, body) = get(&app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions_created"], 2);
}
