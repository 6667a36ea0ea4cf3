use thiserror::Error;

use crate::{AggregateId, EventId, Nonce};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The expected-nonce precondition did not match the current stream
    /// length. The caller must re-read the stream and reissue; the store
    /// never retries this on its own.
    #[error(
        "concurrency conflict for aggregate {aggregate_id}: expected nonce {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Nonce,
        actual: Nonce,
    },

    /// The batch contained an event ID that is already committed (or
    /// repeated within the batch). Nothing from the batch was written.
    #[error("duplicate event {event_id}")]
    DuplicateEvent { event_id: EventId },

    /// The aggregate has no events in the store.
    #[error("aggregate not found: {0}")]
    NotFound(AggregateId),

    /// The request was malformed (empty batch, negative nonce, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A transient infrastructure failure persisted through the bounded
    /// internal retries.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The subscriber fell behind the live feed and was disconnected.
    #[error("subscriber lagged behind the live feed and was disconnected")]
    SubscriberLagged,

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
