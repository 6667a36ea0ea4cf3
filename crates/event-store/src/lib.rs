pub mod error;
pub mod event;
pub mod hub;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{EventStoreError, Result};
pub use event::{AggregateId, EventId, EventRecord, GlobalNonce, NewEvent, Nonce};
pub use hub::SubscriptionHub;
pub use memory::MemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{AppendRequest, EventStore, EventStoreExt, EventStream, ExpectedNonce};
