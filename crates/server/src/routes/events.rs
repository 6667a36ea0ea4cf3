//! Append, read, and subscribe endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use event_store::{
    AggregateId, AppendRequest, EventRecord, EventStore, ExpectedNonce, GlobalNonce, NewEvent,
    Nonce,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub store: S,
}

/// Page size when the caller doesn't pass `limit`.
const DEFAULT_PAGE_LIMIT: usize = 1000;

// -- Request types --

#[derive(Deserialize)]
pub struct AppendBody {
    pub aggregate_type: String,
    pub expected_nonce: ExpectedNonce,
    pub events: Vec<NewEventRequest>,
}

#[derive(Deserialize)]
pub struct NewEventRequest {
    /// Optional idempotency key; generated when absent.
    pub event_id: Option<uuid::Uuid>,
    pub event_type: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Base64-encoded payload bytes.
    pub payload: String,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ReadStreamParams {
    pub from_nonce: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ReadAllParams {
    pub from_global_nonce: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeParams {
    pub from_global_nonce: Option<i64>,
}

// -- Response types --

#[derive(Serialize)]
pub struct EventRecordResponse {
    pub global_nonce: i64,
    pub event_id: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub aggregate_nonce: i64,
    pub event_type: String,
    pub content_type: String,
    /// Base64-encoded payload bytes.
    pub payload: String,
    pub created_at: String,
}

impl From<&EventRecord> for EventRecordResponse {
    fn from(record: &EventRecord) -> Self {
        Self {
            global_nonce: record.global_nonce.as_i64(),
            event_id: record.event_id.to_string(),
            aggregate_id: record.aggregate_id.to_string(),
            aggregate_type: record.aggregate_type.clone(),
            aggregate_nonce: record.aggregate_nonce.as_i64(),
            event_type: record.event_type.clone(),
            content_type: record.content_type.clone(),
            payload: BASE64.encode(&record.payload),
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct AppendResponse {
    pub records: Vec<EventRecordResponse>,
}

// -- Handlers --

/// POST /streams/:id/events — append a batch under an expected-nonce
/// precondition.
#[tracing::instrument(skip(state, body))]
pub async fn append<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(body): Json<AppendBody>,
) -> Result<(StatusCode, Json<AppendResponse>), ApiError> {
    let aggregate_id = parse_aggregate_id(&id)?;

    let mut events = Vec::with_capacity(body.events.len());
    for event in body.events {
        let payload = BASE64
            .decode(event.payload.as_bytes())
            .map_err(|e| ApiError::BadRequest(format!("invalid base64 payload: {e}")))?;
        let mut new_event = NewEvent::new(event.event_type, event.content_type, payload);
        if let Some(event_id) = event.event_id {
            new_event = new_event.with_event_id(event_id.into());
        }
        events.push(new_event);
    }

    let records = state
        .store
        .append(AppendRequest::new(
            aggregate_id,
            body.aggregate_type,
            body.expected_nonce,
            events,
        ))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AppendResponse {
            records: records.iter().map(Into::into).collect(),
        }),
    ))
}

/// GET /streams/:id/events — read one stream in nonce order, paged.
#[tracing::instrument(skip(state))]
pub async fn read_stream<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Query(params): Query<ReadStreamParams>,
) -> Result<Json<Vec<EventRecordResponse>>, ApiError> {
    let aggregate_id = parse_aggregate_id(&id)?;
    let from_nonce = Nonce::new(params.from_nonce.unwrap_or(0));
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);

    let records = state.store.read_stream(aggregate_id, from_nonce, limit).await?;
    Ok(Json(records.iter().map(Into::into).collect()))
}

/// GET /events — read the global log in commit order, paged.
#[tracing::instrument(skip(state))]
pub async fn read_all<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ReadAllParams>,
) -> Result<Json<Vec<EventRecordResponse>>, ApiError> {
    let from = GlobalNonce::new(params.from_global_nonce.unwrap_or(0));
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);

    let records = state.store.read_all(from, limit).await?;
    Ok(Json(records.iter().map(Into::into).collect()))
}

/// GET /events/subscribe — live NDJSON stream of the global log: backlog
/// first, then every subsequently committed record, until the client
/// disconnects.
#[tracing::instrument(skip(state))]
pub async fn subscribe<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<SubscribeParams>,
) -> Result<Response, ApiError> {
    let from = GlobalNonce::new(params.from_global_nonce.unwrap_or(0));
    let stream = state.store.subscribe(from).await?;

    let body_stream = stream.map(|item| match item {
        Ok(record) => serde_json::to_string(&EventRecordResponse::from(&record))
            .map(|line| line + "\n")
            .map_err(std::io::Error::other),
        Err(err) => Err(std::io::Error::other(err.to_string())),
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(body_stream),
    )
        .into_response())
}

fn parse_aggregate_id(id: &str) -> Result<AggregateId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("invalid aggregate ID: {e}")))?;
    Ok(AggregateId::from(uuid))
}
