use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventId, EventRecord, EventStoreError, GlobalNonce, Nonce, Result,
    hub::{self, SubscriptionHub},
    store::{AppendRequest, EventStore, EventStream, ExpectedNonce, validate_append},
};

/// Advisory-lock key for the writer gate. Held from nonce assignment
/// through commit so the engine-assigned global nonce order equals commit
/// order; released automatically at transaction end.
const WRITER_GATE_KEY: i64 = 0x6576_656e_7473;

/// Bounded retry policy for transient connectivity failures.
const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

const RECORD_COLUMNS: &str = "global_nonce, event_id, aggregate_id, aggregate_type, \
     aggregate_nonce, event_type, content_type, payload, created_at";

/// PostgreSQL-backed event store.
///
/// The storage engine enforces the store invariants itself: `global_nonce`
/// is an identity primary key, `(aggregate_id, aggregate_nonce)` and
/// `event_id` carry unique constraints, and an append-only trigger rejects
/// every UPDATE/DELETE independent of application code.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    hub: Arc<SubscriptionHub>,
    commit_gate: Arc<tokio::sync::Mutex<()>>,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store over a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            hub: Arc::new(SubscriptionHub::new()),
            commit_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<EventRecord> {
        Ok(EventRecord {
            global_nonce: GlobalNonce::new(row.try_get("global_nonce")?),
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_nonce: Nonce::new(row.try_get("aggregate_nonce")?),
            event_type: row.try_get("event_type")?,
            content_type: row.try_get("content_type")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn try_append(&self, request: &AppendRequest) -> Result<Vec<EventRecord>> {
        let mut tx = self.pool.begin().await?;

        // Writer gate: serializes assign-nonces-and-commit across all
        // writers of this database. Reads and precondition failures never
        // touch it for longer than the query below.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(WRITER_GATE_KEY)
            .execute(&mut *tx)
            .await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(aggregate_nonce) FROM events WHERE aggregate_id = $1")
                .bind(request.aggregate_id.as_uuid())
                .fetch_one(&mut *tx)
                .await?;
        let current = Nonce::new(current.unwrap_or(0));

        if let Err((expected, actual)) = request.expected_nonce.check(current) {
            metrics::counter!("event_store_concurrency_conflicts_total", "backend" => "postgres")
                .increment(1);
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id: request.aggregate_id,
                expected,
                actual,
            });
        }

        let mut nonce = current;
        let mut committed = Vec::with_capacity(request.events.len());
        for event in &request.events {
            nonce = nonce.next();
            let row = sqlx::query(
                r#"
                INSERT INTO events (event_id, aggregate_id, aggregate_type, aggregate_nonce, event_type, content_type, payload)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING global_nonce, created_at
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(request.aggregate_id.as_uuid())
            .bind(&request.aggregate_type)
            .bind(nonce.as_i64())
            .bind(&event.event_type)
            .bind(&event.content_type)
            .bind(&event.payload)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_insert_error(e, request, event.event_id, nonce))?;

            committed.push(EventRecord {
                global_nonce: GlobalNonce::new(row.try_get("global_nonce")?),
                event_id: event.event_id,
                aggregate_id: request.aggregate_id,
                aggregate_type: request.aggregate_type.clone(),
                aggregate_nonce: nonce,
                event_type: event.event_type.clone(),
                content_type: event.content_type.clone(),
                payload: event.payload.clone(),
                created_at: row.try_get("created_at")?,
            });
        }

        let batch = Arc::new(committed.clone());
        {
            // Commit and publish as one ordered step so live delivery
            // order matches commit order within this process.
            let _ordered = self.commit_gate.lock().await;
            tx.commit().await?;
            self.hub.publish(batch);
        }

        metrics::counter!("event_store_appends_total", "backend" => "postgres").increment(1);
        metrics::counter!("event_store_appended_events_total", "backend" => "postgres")
            .increment(committed.len() as u64);

        Ok(committed)
    }

    async fn try_read_stream(
        &self,
        aggregate_id: AggregateId,
        from_nonce: Nonce,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM events \
             WHERE aggregate_id = $1 AND aggregate_nonce > $2 \
             ORDER BY aggregate_nonce ASC LIMIT $3"
        ))
        .bind(aggregate_id.as_uuid())
        .bind(from_nonce.as_i64())
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM events WHERE aggregate_id = $1 LIMIT 1")
                    .bind(aggregate_id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?;
            if exists.is_none() {
                return Err(EventStoreError::NotFound(aggregate_id));
            }
        }

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn try_read_all(&self, from: GlobalNonce, limit: usize) -> Result<Vec<EventRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM events \
             WHERE global_nonce > $1 \
             ORDER BY global_nonce ASC LIMIT $2"
        ))
        .bind(from.as_i64())
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, request: AppendRequest) -> Result<Vec<EventRecord>> {
        validate_append(&request)?;
        with_backoff(|| self.try_append(&request)).await
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
        with_backoff(|| self.try_read_stream(aggregate_id, from_nonce, limit)).await
    }

    async fn read_all(&self, from: GlobalNonce, limit: usize) -> Result<Vec<EventRecord>> {
        if from.as_i64() < 0 {
            return Err(EventStoreError::InvalidRequest(format!(
                "from_global_nonce must not be negative, got {from}"
            )));
        }
        with_backoff(|| self.try_read_all(from, limit)).await
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
        let nonce: Option<i64> = with_backoff(|| async move {
            sqlx::query_scalar("SELECT MAX(aggregate_nonce) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(EventStoreError::from)
        })
        .await?;
        Ok(nonce.map(Nonce::new))
    }
}

/// Maps constraint violations raced past the in-transaction check to the
/// store's error taxonomy. With the writer gate held this is a backstop,
/// not the primary detection path.
fn map_insert_error(
    error: sqlx::Error,
    request: &AppendRequest,
    event_id: EventId,
    attempted: Nonce,
) -> EventStoreError {
    if let sqlx::Error::Database(ref db_err) = error {
        match db_err.constraint() {
            Some("uq_events_event_id") => {
                return EventStoreError::DuplicateEvent { event_id };
            }
            Some("uq_events_aggregate_nonce") => {
                let expected = match request.expected_nonce {
                    ExpectedNonce::Exact(nonce) => nonce,
                    ExpectedNonce::NoStream => Nonce::initial(),
                    ExpectedNonce::Any => attempted,
                };
                return EventStoreError::ConcurrencyConflict {
                    aggregate_id: request.aggregate_id,
                    expected,
                    actual: attempted,
                };
            }
            _ => {}
        }
    }
    EventStoreError::Database(error)
}

fn clamp_limit(limit: usize) -> i64 {
    limit.min(i64::MAX as usize) as i64
}

fn is_transient(error: &EventStoreError) -> bool {
    matches!(
        error,
        EventStoreError::Database(sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
    )
}

/// Retries transient connectivity failures with bounded linear backoff,
/// surfacing `BackendUnavailable` on exhaustion. Validation outcomes
/// (conflicts, duplicates) pass through untouched on the first attempt.
async fn with_backoff<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Err(err) if is_transient(&err) => {
                if attempt >= MAX_RETRIES {
                    return Err(EventStoreError::BackendUnavailable(err.to_string()));
                }
                attempt += 1;
                tracing::warn!(error = %err, attempt, "transient backend failure, retrying");
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_io_and_pool_timeouts() {
        assert!(is_transient(&EventStoreError::Database(
            sqlx::Error::PoolTimedOut
        )));
        assert!(is_transient(&EventStoreError::Database(sqlx::Error::Io(
            std::io::Error::other("connection reset")
        ))));

        assert!(!is_transient(&EventStoreError::Database(
            sqlx::Error::RowNotFound
        )));
        assert!(!is_transient(&EventStoreError::ConcurrencyConflict {
            aggregate_id: AggregateId::new(),
            expected: Nonce::initial(),
            actual: Nonce::first(),
        }));
    }

    #[tokio::test]
    async fn with_backoff_surfaces_backend_unavailable_after_exhaustion() {
        let result: Result<()> = with_backoff(|| async {
            Err(EventStoreError::Database(sqlx::Error::PoolTimedOut))
        })
        .await;

        assert!(matches!(
            result,
            Err(EventStoreError::BackendUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn with_backoff_does_not_retry_validation_errors() {
        let mut calls = 0u32;
        let result: Result<()> = with_backoff(|| {
            calls += 1;
            async {
                Err(EventStoreError::InvalidRequest("nope".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(EventStoreError::InvalidRequest(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn clamp_limit_handles_usize_max() {
        assert_eq!(clamp_limit(usize::MAX), i64::MAX);
        assert_eq!(clamp_limit(10), 10);
    }
}
