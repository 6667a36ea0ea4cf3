use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an aggregate instance.
///
/// Wraps a UUID so stream identities cannot be mixed up with other
/// UUID-based identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

impl AggregateId {
    /// Creates a new random aggregate ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an aggregate ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AggregateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<AggregateId> for Uuid {
    fn from(id: AggregateId) -> Self {
        id.0
    }
}

/// Unique identifier for an event.
///
/// The event ID is the store-wide idempotency key: appending a batch that
/// contains an already-committed event ID fails with `DuplicateEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EventId> for Uuid {
    fn from(id: EventId) -> Self {
        id.0
    }
}

/// Per-aggregate sequence number, used for optimistic concurrency control.
///
/// Nonces start at 1 for the first event of a stream and increment by 1 for
/// each subsequent event, with no gaps. A nonce of 0 denotes a stream with
/// no events yet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Nonce(i64);

impl Nonce {
    /// Creates a nonce from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial nonce (0) for a stream with no events.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first nonce (1) assigned to the first event of a stream.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next nonce.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Nonce {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Nonce> for i64 {
    fn from(nonce: Nonce) -> Self {
        nonce.0
    }
}

/// Store-wide position, assigned at commit time.
///
/// Global nonces are unique and strictly increasing in commit order across
/// all aggregates; reading in increasing global-nonce order reproduces the
/// commit order of the whole store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GlobalNonce(i64);

impl GlobalNonce {
    /// Creates a global nonce from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the position before the first record (0). Subscribing or
    /// reading from here yields the entire log.
    pub fn start() -> Self {
        Self(0)
    }

    /// Returns the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for GlobalNonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for GlobalNonce {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<GlobalNonce> for i64 {
    fn from(nonce: GlobalNonce) -> Self {
        nonce.0
    }
}

/// The caller-supplied portion of an append: an opaque payload plus the tags
/// describing its shape. Nonces and the commit timestamp are assigned by the
/// store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// Idempotency key for this logical event. Generated by `new`, or
    /// supplied by the caller for idempotent retries.
    pub event_id: EventId,

    /// Tag describing the payload's shape (e.g. "OrderPlaced"). Not
    /// interpreted by the store.
    pub event_type: String,

    /// Media type of the payload bytes (e.g. "application/json"). Not
    /// interpreted by the store.
    pub content_type: String,

    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl NewEvent {
    /// Creates a new event with a freshly generated event ID.
    pub fn new(
        event_type: impl Into<String>,
        content_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            content_type: content_type.into(),
            payload,
        }
    }

    /// Replaces the generated event ID with a caller-supplied one.
    pub fn with_event_id(mut self, event_id: EventId) -> Self {
        self.event_id = event_id;
        self
    }
}

/// A committed event record — the sole persisted entity.
///
/// Records are created only by a successful append, are never mutated, and
/// are never deleted. Ordering is by global nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Store-wide position in commit order.
    pub global_nonce: GlobalNonce,

    /// Store-wide idempotency key.
    pub event_id: EventId,

    /// The stream this record belongs to.
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g. "Order").
    pub aggregate_type: String,

    /// Position within the stream: 1, 2, ... with no gaps.
    pub aggregate_nonce: Nonce,

    /// Tag describing the payload's shape.
    pub event_type: String,

    /// Media type of the payload bytes.
    pub content_type: String,

    /// Opaque payload bytes.
    pub payload: Vec<u8>,

    /// Commit timestamp, assigned by the store.
    pub created_at: DateTime<Utc>,
}

impl PartialOrd for EventRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventRecord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.global_nonce.cmp(&other.global_nonce)
    }
}
