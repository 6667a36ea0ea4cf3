//! Fan-out of newly committed events to live subscribers.
//!
//! Backends publish each committed batch to a broadcast channel; every
//! subscriber is served by its own forwarding task that pages the backlog
//! first and then tails the live feed, deduplicating at the join point.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    EventRecord, EventStoreError, GlobalNonce, Result,
    store::{EventStore, EventStream},
};

/// One committed batch, published as a single item so a multi-event append
/// is visible to subscribers atomically, never interleaved with records
/// from other aggregates.
pub type CommittedBatch = Arc<Vec<EventRecord>>;

/// How many committed batches the live feed retains for slow receivers.
const DEFAULT_HUB_CAPACITY: usize = 1024;

/// Bounded per-subscriber delivery buffer.
pub(crate) const SUBSCRIBER_BUFFER: usize = 256;

/// Page size used when reading the backlog before going live.
pub(crate) const CATCH_UP_PAGE: usize = 256;

/// In-process publish/subscribe hub for committed event batches.
///
/// Producers are never blocked by subscribers: publishing into the
/// broadcast ring always succeeds, and a subscriber that falls off the ring
/// is disconnected rather than slowing anyone down.
#[derive(Debug)]
pub struct SubscriptionHub {
    tx: broadcast::Sender<CommittedBatch>,
}

impl SubscriptionHub {
    /// Creates a hub with the default ring capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HUB_CAPACITY)
    }

    /// Creates a hub retaining up to `capacity` batches for live receivers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes a committed batch to all live receivers.
    ///
    /// A send error only means there are no receivers right now; the batch
    /// is still durable in the backend and reachable via the backlog.
    pub fn publish(&self, batch: CommittedBatch) {
        let _ = self.tx.send(batch);
    }

    /// Registers a live receiver. Must happen before the backlog read so
    /// nothing committed in between is missed.
    pub fn register(&self) -> broadcast::Receiver<CommittedBatch> {
        self.tx.subscribe()
    }

    /// Number of currently registered live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the per-subscriber forwarding task and returns its stream.
///
/// The task delivers the backlog after `from` in commit order, then live
/// batches from `rx`, skipping anything at or below the last delivered
/// nonce. It exits when the subscriber drops the stream, and disconnects
/// the subscriber with `SubscriberLagged` if it falls off the broadcast
/// ring.
pub(crate) fn spawn_forwarder<S>(
    store: S,
    mut rx: broadcast::Receiver<CommittedBatch>,
    from: GlobalNonce,
    buffer: usize,
) -> EventStream
where
    S: EventStore + 'static,
{
    let (tx, out) = mpsc::channel::<Result<EventRecord>>(buffer);

    tokio::spawn(async move {
        let mut last = from;

        // Backlog: page the already-committed records after `from`.
        loop {
            let page = match store.read_all(last, CATCH_UP_PAGE).await {
                Ok(page) => page,
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            };
            if page.is_empty() {
                break;
            }
            for record in page {
                last = record.global_nonce;
                if tx.send(Ok(record)).await.is_err() {
                    return;
                }
            }
        }

        // Live tail. Records at or below `last` were already delivered from
        // the backlog.
        loop {
            match rx.recv().await {
                Ok(batch) => {
                    for record in batch.iter() {
                        if record.global_nonce <= last {
                            continue;
                        }
                        last = record.global_nonce;
                        if tx.send(Ok(record.clone())).await.is_err() {
                            return;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "disconnecting lagged subscriber");
                    let _ = tx.send(Err(EventStoreError::SubscriberLagged)).await;
                    return;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    Box::pin(ReceiverStream::new(out))
}
