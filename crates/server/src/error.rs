//! API error types with stable wire codes.
//!
//! Every store error maps to one HTTP status and one machine-readable
//! `code`; internal detail (SQL text, driver messages) is logged here and
//! never crosses the boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use event_store::EventStoreError;
use serde_json::json;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request detected at the API boundary (bad UUID, bad
    /// base64, ...).
    BadRequest(String),
    /// An error surfaced by the event store.
    Store(EventStoreError),
}

impl From<EventStoreError> for ApiError {
    fn from(err: EventStoreError) -> Self {
        ApiError::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, extra) = match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                msg,
                serde_json::Map::new(),
            ),
            ApiError::Store(err) => store_error_to_response(err),
        };

        let mut body = serde_json::Map::new();
        body.insert("code".to_string(), json!(code));
        body.insert("error".to_string(), json!(message));
        body.extend(extra);

        (status, axum::Json(serde_json::Value::Object(body))).into_response()
    }
}

fn store_error_to_response(
    err: EventStoreError,
) -> (
    StatusCode,
    &'static str,
    String,
    serde_json::Map<String, serde_json::Value>,
) {
    let mut extra = serde_json::Map::new();
    let (status, code, message) = match &err {
        EventStoreError::ConcurrencyConflict {
            expected, actual, ..
        } => {
            extra.insert("expected".to_string(), json!(expected.as_i64()));
            extra.insert("actual".to_string(), json!(actual.as_i64()));
            (StatusCode::CONFLICT, "concurrency_conflict", err.to_string())
        }
        EventStoreError::DuplicateEvent { event_id } => {
            extra.insert("event_id".to_string(), json!(event_id.to_string()));
            (StatusCode::CONFLICT, "duplicate_event", err.to_string())
        }
        EventStoreError::NotFound(_) => (StatusCode::NOT_FOUND, "stream_not_found", err.to_string()),
        EventStoreError::InvalidRequest(_) => {
            (StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
        }
        EventStoreError::BackendUnavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "backend_unavailable",
            err.to_string(),
        ),
        EventStoreError::SubscriberLagged => (
            StatusCode::SERVICE_UNAVAILABLE,
            "subscriber_lagged",
            err.to_string(),
        ),
        EventStoreError::Database(_)
        | EventStoreError::Migration(_)
        | EventStoreError::Serialization(_) => {
            tracing::error!(error = %err, "internal storage error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "internal storage error".to_string(),
            )
        }
    };
    (status, code, message, extra)
}
