//! Integration tests for the API server over the in-memory backend.

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use event_store::MemoryEventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> axum::Router {
    let state = server::create_state(MemoryEventStore::new());
    server::create_app(state, get_metrics_handle())
}

fn append_body(expected_nonce: serde_json::Value, event_types: &[&str]) -> serde_json::Value {
    let events: Vec<serde_json::Value> = event_types
        .iter()
        .map(|t| {
            serde_json::json!({
                "event_type": t,
                "content_type": "application/json",
                "payload": BASE64.encode(format!("{{\"t\":\"{t}\"}}")),
            })
        })
        .collect();
    serde_json::json!({
        "aggregate_type": "Order",
        "expected_nonce": expected_nonce,
        "events": events,
    })
}

fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_append_and_read_stream_roundtrip() {
    let app = setup();
    let aggregate_id = uuid::Uuid::new_v4();
    let uri = format!("/streams/{aggregate_id}/events");

    let response = app
        .clone()
        .oneshot(post_json(
            &uri,
            &append_body(serde_json::json!("no_stream"), &["OrderPlaced", "OrderPaid"]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    let records = json["records"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["aggregate_nonce"], 1);
    assert_eq!(records[1]["aggregate_nonce"], 2);
    assert_eq!(records[0]["event_type"], "OrderPlaced");

    let response = app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let records = json.as_array().unwrap();
    assert_eq!(records.len(), 2);
    let payload = BASE64
        .decode(records[0]["payload"].as_str().unwrap())
        .unwrap();
    assert_eq!(payload, br#"{"t":"OrderPlaced"}"#);
}

#[tokio::test]
async fn test_stale_append_returns_conflict_code() {
    let app = setup();
    let aggregate_id = uuid::Uuid::new_v4();
    let uri = format!("/streams/{aggregate_id}/events");

    let response = app
        .clone()
        .oneshot(post_json(
            &uri,
            &append_body(serde_json::json!("no_stream"), &["E1", "E2"]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // Stale writer still believes the stream is at 1.
    let response = app
        .oneshot(post_json(
            &uri,
            &append_body(serde_json::json!({"exact": 1}), &["E3"]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let json = body_json(response).await;
    assert_eq!(json["code"], "concurrency_conflict");
    assert_eq!(json["expected"], 1);
    assert_eq!(json["actual"], 2);
}

#[tokio::test]
async fn test_duplicate_event_id_returns_conflict_code() {
    let app = setup();
    let aggregate_id = uuid::Uuid::new_v4();
    let uri = format!("/streams/{aggregate_id}/events");
    let event_id = uuid::Uuid::new_v4();

    let body = serde_json::json!({
        "aggregate_type": "Order",
        "expected_nonce": "no_stream",
        "events": [{
            "event_id": event_id,
            "event_type": "OrderPlaced",
            "payload": BASE64.encode("{}"),
        }],
    });
    let response = app.clone().oneshot(post_json(&uri, &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let retry = serde_json::json!({
        "aggregate_type": "Order",
        "expected_nonce": {"exact": 1},
        "events": [{
            "event_id": event_id,
            "event_type": "OrderPlaced",
            "payload": BASE64.encode("{}"),
        }],
    });
    let response = app.oneshot(post_json(&uri, &retry)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let json = body_json(response).await;
    assert_eq!(json["code"], "duplicate_event");
    assert_eq!(json["event_id"], event_id.to_string());
}

#[tokio::test]
async fn test_invalid_base64_payload_is_rejected() {
    let app = setup();
    let aggregate_id = uuid::Uuid::new_v4();

    let body = serde_json::json!({
        "aggregate_type": "Order",
        "expected_nonce": "any",
        "events": [{
            "event_type": "OrderPlaced",
            "payload": "not base64!!!",
        }],
    });
    let response = app
        .oneshot(post_json(&format!("/streams/{aggregate_id}/events"), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["code"], "invalid_request");
}

#[tokio::test]
async fn test_invalid_aggregate_id_is_rejected() {
    let app = setup();

    let response = app
        .oneshot(post_json(
            "/streams/not-a-uuid/events",
            &append_body(serde_json::json!("any"), &["E1"]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let app = setup();
    let aggregate_id = uuid::Uuid::new_v4();

    let response = app
        .oneshot(post_json(
            &format!("/streams/{aggregate_id}/events"),
            &append_body(serde_json::json!("any"), &[]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["code"], "invalid_request");
}

#[tokio::test]
async fn test_read_unknown_stream_is_not_found() {
    let app = setup();
    let aggregate_id = uuid::Uuid::new_v4();

    let response = app
        .oneshot(get(&format!("/streams/{aggregate_id}/events")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["code"], "stream_not_found");
}

#[tokio::test]
async fn test_read_all_orders_and_pages() {
    let app = setup();
    let a = uuid::Uuid::new_v4();
    let b = uuid::Uuid::new_v4();

    app.clone()
        .oneshot(post_json(
            &format!("/streams/{a}/events"),
            &append_body(serde_json::json!("no_stream"), &["A1", "A2"]),
        ))
        .await
        .unwrap();
    app.clone()
        .oneshot(post_json(
            &format!("/streams/{b}/events"),
            &append_body(serde_json::json!("no_stream"), &["B1"]),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get("/events?from_global_nonce=0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let globals: Vec<i64> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["global_nonce"].as_i64().unwrap())
        .collect();
    assert_eq!(globals, vec![1, 2, 3]);

    let response = app
        .oneshot(get("/events?from_global_nonce=1&limit=1"))
        .await
        .unwrap();
    let json = body_json(response).await;
    let page = json.as_array().unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["global_nonce"], 2);
}

#[tokio::test]
async fn test_subscribe_streams_ndjson() {
    let app = setup();
    let aggregate_id = uuid::Uuid::new_v4();

    app.clone()
        .oneshot(post_json(
            &format!("/streams/{aggregate_id}/events"),
            &append_body(serde_json::json!("no_stream"), &["E1"]),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(get("/events/subscribe?from_global_nonce=0"))
        .await
        .unwrap();

    // The body is a live stream; only the handshake is asserted here.
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/x-ndjson"
    );
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
