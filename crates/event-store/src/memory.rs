use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventId, EventRecord, EventStoreError, GlobalNonce, Nonce, Result,
    hub::{self, SubscriptionHub},
    store::{AppendRequest, EventStore, EventStream, validate_append},
};

/// Global log plus per-stream index. Positions in `streams` index into
/// `log`, so the stream length is the per-aggregate nonce.
#[derive(Default)]
struct Inner {
    log: Vec<EventRecord>,
    streams: HashMap<AggregateId, Vec<usize>>,
    event_ids: HashSet<EventId>,
}

/// In-memory event store for tests and development.
///
/// A single exclusive section covers read-current-length, precondition
/// check, nonce assignment, insert, and hub publish, so the store
/// invariants hold under concurrent callers and subscribers see commits in
/// order. Provides no durability across restarts by design.
#[derive(Clone)]
pub struct MemoryEventStore {
    inner: Arc<RwLock<Inner>>,
    hub: Arc<SubscriptionHub>,
}

impl MemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            hub: Arc::new(SubscriptionHub::new()),
        }
    }

    /// Creates a store whose subscription hub retains up to `capacity`
    /// batches for live receivers. Useful for exercising slow subscribers.
    pub fn with_hub_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            hub: Arc::new(SubscriptionHub::with_capacity(capacity)),
        }
    }

    /// Returns the total number of committed records.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.log.len()
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, request: AppendRequest) -> Result<Vec<EventRecord>> {
        validate_append(&request)?;

        let mut inner = self.inner.write().await;

        let current = Nonce::new(
            inner
                .streams
                .get(&request.aggregate_id)
                .map_or(0, |positions| positions.len()) as i64,
        );

        if let Err((expected, actual)) = request.expected_nonce.check(current) {
            metrics::counter!("event_store_concurrency_conflicts_total", "backend" => "memory")
                .increment(1);
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id: request.aggregate_id,
                expected,
                actual,
            });
        }

        for event in &request.events {
            if inner.event_ids.contains(&event.event_id) {
                return Err(EventStoreError::DuplicateEvent {
                    event_id: event.event_id,
                });
            }
        }

        let created_at = Utc::now();
        let mut nonce = current;
        let mut committed = Vec::with_capacity(request.events.len());

        for event in request.events {
            nonce = nonce.next();
            let position = inner.log.len();
            let record = EventRecord {
                global_nonce: GlobalNonce::new(position as i64 + 1),
                event_id: event.event_id,
                aggregate_id: request.aggregate_id,
                aggregate_type: request.aggregate_type.clone(),
                aggregate_nonce: nonce,
                event_type: event.event_type,
                content_type: event.content_type,
                payload: event.payload,
                created_at,
            };
            inner.event_ids.insert(record.event_id);
            inner
                .streams
                .entry(request.aggregate_id)
                .or_default()
                .push(position);
            inner.log.push(record.clone());
            committed.push(record);
        }

        metrics::counter!("event_store_appends_total", "backend" => "memory").increment(1);
        metrics::counter!("event_store_appended_events_total", "backend" => "memory")
            .increment(committed.len() as u64);

        // Published inside the exclusive section: delivery order is commit
        // order.
        self.hub.publish(Arc::new(committed.clone()));

        Ok(committed)
    }

    async fn read_stream(
        &self,
        aggregate_id: AggregateId,
        from_nonce: Nonce,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        if from_nonce.as_i64() < 0 {
            return Err(EventStoreError::InvalidRequest(format!(
                "from_nonce must not be negative, got {from_nonce}"
            )));
        }

        let inner = self.inner.read().await;
        let positions = inner
            .streams
            .get(&aggregate_id)
            .ok_or(EventStoreError::NotFound(aggregate_id))?;

        // Nonce n lives at positions[n - 1]; `from_nonce` is exclusive.
        let records = positions
            .iter()
            .skip(from_nonce.as_i64() as usize)
            .take(limit)
            .map(|&position| inner.log[position].clone())
            .collect();
        Ok(records)
    }

    async fn read_all(&self, from: GlobalNonce, limit: usize) -> Result<Vec<EventRecord>> {
        if from.as_i64() < 0 {
            return Err(EventStoreError::InvalidRequest(format!(
                "from_global_nonce must not be negative, got {from}"
            )));
        }

        let inner = self.inner.read().await;
        // Global nonces are dense in this backend: record k is log[k - 1].
        let start = (from.as_i64() as usize).min(inner.log.len());
        Ok(inner.log[start..].iter().take(limit).cloned().collect())
    }

    async fn subscribe(&self, from: GlobalNonce) -> Result<EventStream> {
        if from.as_i64() < 0 {
            return Err(EventStoreError::InvalidRequest(format!(
                "from_global_nonce must not be negative, got {from}"
            )));
        }

        // Register before paging the backlog so nothing is missed in between.
        let rx = self.hub.register();
        Ok(hub::spawn_forwarder(
            self.clone(),
            rx,
            from,
            hub::SUBSCRIBER_BUFFER,
        ))
    }

    async fn stream_nonce(&self, aggregate_id: AggregateId) -> Result<Option<Nonce>> {
        let inner = self.inner.read().await;
        Ok(inner
            .streams
            .get(&aggregate_id)
            .map(|positions| Nonce::new(positions.len() as i64)))
    }
}
