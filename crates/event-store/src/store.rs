use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::{AggregateId, EventRecord, EventStoreError, GlobalNonce, NewEvent, Nonce, Result};

/// Expected-nonce precondition for an append, for optimistic concurrency
/// control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedNonce {
    /// No check is performed (use with caution).
    Any,
    /// The aggregate must not exist yet.
    NoStream,
    /// The current stream length must equal this value.
    Exact(Nonce),
}

impl ExpectedNonce {
    /// Checks the precondition against the current stream length.
    ///
    /// Returns the `(expected, actual)` pair on mismatch so callers can
    /// build a `ConcurrencyConflict` without recomputing either side.
    pub fn check(&self, current: Nonce) -> std::result::Result<(), (Nonce, Nonce)> {
        match self {
            ExpectedNonce::Any => Ok(()),
            ExpectedNonce::NoStream => {
                if current == Nonce::initial() {
                    Ok(())
                } else {
                    Err((Nonce::initial(), current))
                }
            }
            ExpectedNonce::Exact(expected) => {
                if current == *expected {
                    Ok(())
                } else {
                    Err((*expected, current))
                }
            }
        }
    }
}

/// An append request: one ordered batch of new events for one aggregate.
///
/// The whole batch commits atomically; either every event is durably
/// recorded with its assigned nonces, or none are.
#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub expected_nonce: ExpectedNonce,
    pub events: Vec<NewEvent>,
}

impl AppendRequest {
    /// Creates an append request for a batch of events.
    pub fn new(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        expected_nonce: ExpectedNonce,
        events: Vec<NewEvent>,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            expected_nonce,
            events,
        }
    }
}

/// Validates an append request before any backend work.
///
/// Rejects empty batches and negative `Exact` preconditions with
/// `InvalidRequest`, and event IDs repeated within the batch with
/// `DuplicateEvent`.
pub fn validate_append(request: &AppendRequest) -> Result<()> {
    if request.events.is_empty() {
        return Err(EventStoreError::InvalidRequest(
            "cannot append an empty batch".to_string(),
        ));
    }
    if let ExpectedNonce::Exact(nonce) = request.expected_nonce
        && nonce.as_i64() < 0
    {
        return Err(EventStoreError::InvalidRequest(format!(
            "expected nonce must not be negative, got {nonce}"
        )));
    }
    let mut seen = HashSet::with_capacity(request.events.len());
    for event in &request.events {
        if event.event_type.is_empty() {
            return Err(EventStoreError::InvalidRequest(
                "event_type must not be empty".to_string(),
            ));
        }
        if !seen.insert(event.event_id) {
            return Err(EventStoreError::DuplicateEvent {
                event_id: event.event_id,
            });
        }
    }
    Ok(())
}

/// A possibly-infinite ordered stream of committed records.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventRecord>> + Send>>;

/// Core trait for event store backends.
///
/// All implementations must be thread-safe (Send + Sync) and uphold the
/// store invariants: per-aggregate nonces gapless from 1, global nonces
/// unique and strictly increasing in commit order, committed records
/// immutable, event IDs unique store-wide.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events to one aggregate's stream.
    ///
    /// Validates the expected-nonce precondition against the current stream
    /// length, assigns per-aggregate and global nonces, and commits the
    /// batch atomically. On a precondition mismatch the store is left
    /// unchanged and `ConcurrencyConflict` is returned.
    ///
    /// Returns the committed records in batch order.
    async fn append(&self, request: AppendRequest) -> Result<Vec<EventRecord>>;

    /// Reads one aggregate's stream in nonce order.
    ///
    /// `from_nonce` is exclusive: pass `Nonce::initial()` to read from the
    /// start. Returns at most `limit` records; an empty page means the
    /// stream is exhausted. Fails with `NotFound` if the aggregate has no
    /// events at all.
    async fn read_stream(
        &self,
        aggregate_id: AggregateId,
        from_nonce: Nonce,
        limit: usize,
    ) -> Result<Vec<EventRecord>>;

    /// Reads the global log in commit order.
    ///
    /// `from` is exclusive: pass `GlobalNonce::start()` to read from the
    /// beginning. Returns at most `limit` records.
    async fn read_all(&self, from: GlobalNonce, limit: usize) -> Result<Vec<EventRecord>>;

    /// Subscribes to the global log from a position.
    ///
    /// Returns a live ordered stream of every record with a global nonce
    /// greater than `from`: the already-committed backlog first, then every
    /// subsequently committed record, with no gap and no duplicate at the
    /// join point. The stream continues until the caller drops it or the
    /// subscriber falls too far behind (`SubscriberLagged`).
    async fn subscribe(&self, from: GlobalNonce) -> Result<EventStream>;

    /// Returns the current stream length (highest aggregate nonce) for an
    /// aggregate, or None if the aggregate doesn't exist.
    async fn stream_nonce(&self, aggregate_id: AggregateId) -> Result<Option<Nonce>>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event.
    async fn append_one(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected_nonce: ExpectedNonce,
        event: NewEvent,
    ) -> Result<EventRecord> {
        let mut records = self
            .append(AppendRequest::new(
                aggregate_id,
                aggregate_type,
                expected_nonce,
                vec![event],
            ))
            .await?;
        Ok(records.remove(0))
    }

    /// Checks if an aggregate exists (has any events).
    async fn stream_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.stream_nonce(aggregate_id).await?.is_some())
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}
