//! Postgres-backed event store implementation.
//!
//! Streams are rows in a single `events` table with a unique constraint on
//! `(aggregate_id, sequence_number)`. The optimistic concurrency check runs
//! inside a transaction; if another writer commits between the version check
//! and the insert, the unique constraint turns the race into a
//! `Concurrency` error, which the dispatcher's caller resolves by reloading
//! and re-deciding. That is exactly the per-listing mutual exclusion the
//! engine relies on, enforced at the database level.
//!
//! ## Error mapping
//!
//! | SQLx error | PG code | `EventStoreError` |
//! |------------|---------|-------------------|
//! | unique violation | `23505` | `Concurrency` |
//! | check violation | `23514` | `InvalidAppend` |
//! | anything else | — | `Backend` |

use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::instrument;

use plotfund_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    event_id        UUID PRIMARY KEY,
    aggregate_id    UUID NOT NULL,
    aggregate_type  TEXT NOT NULL,
    sequence_number BIGINT NOT NULL CHECK (sequence_number > 0),
    event_type      TEXT NOT NULL,
    event_version   INT NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    payload         JSONB NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (aggregate_id, sequence_number)
);
CREATE INDEX IF NOT EXISTS idx_events_aggregate ON events (aggregate_id, sequence_number);
"#;

/// Postgres-backed append-only event store.
///
/// Shares a SQLx connection pool; safe to clone and share across threads.
/// The synchronous [`EventStore`] impl bridges onto the ambient tokio runtime,
/// so calls must come from within a runtime context.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the `events` table and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Load all events for an aggregate stream, in sequence-number order.
    #[instrument(skip(self), fields(aggregate_id = %aggregate_id.as_uuid()), err)]
    pub async fn load_stream_async(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload
            FROM events
            WHERE aggregate_id = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        rows.iter().map(stored_event_from_row).collect()
    }

    /// Append events to a stream with optimistic concurrency control.
    #[instrument(
        skip(self, events),
        fields(
            aggregate_id = %aggregate_id.as_uuid(),
            event_count = events.len(),
            expected_version = ?expected_version
        ),
        err
    )]
    pub async fn append_async(
        &self,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let aggregate_type = events[0].aggregate_type.clone();
        for (idx, e) in events.iter().enumerate() {
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let (current_version, existing_type) =
            check_stream_version(&mut tx, aggregate_id).await?;

        if let Some(existing) = &existing_type {
            if existing != &aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{existing}', attempted append with '{aggregate_type}'"
                )));
            }
        }

        if !expected_version.matches(current_version) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current_version}"
            )));
        }

        let mut committed = Vec::with_capacity(events.len());
        let mut next_sequence = current_version + 1;

        for event in events {
            sqlx::query(
                r#"
                INSERT INTO events (
                    event_id,
                    aggregate_id,
                    aggregate_type,
                    sequence_number,
                    event_type,
                    event_version,
                    occurred_at,
                    payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id)
            .bind(aggregate_id.as_uuid())
            .bind(&aggregate_type)
            .bind(next_sequence as i64)
            .bind(&event.event_type)
            .bind(event.event_version as i32)
            .bind(event.occurred_at)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                // A unique violation here means another transaction appended
                // concurrently after our version check.
                if is_unique_violation(&e) {
                    EventStoreError::Concurrency(format!(
                        "concurrent append detected: sequence_number {next_sequence} already exists"
                    ))
                } else {
                    map_sqlx_error("insert_event", e)
                }
            })?;

            committed.push(StoredEvent {
                event_id: event.event_id,
                aggregate_id: event.aggregate_id,
                aggregate_type: event.aggregate_type,
                sequence_number: next_sequence,
                event_type: event.event_type,
                event_version: event.event_version,
                occurred_at: event.occurred_at,
                payload: event.payload,
            });
            next_sequence += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        Ok(committed)
    }
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        // The EventStore trait is synchronous; bridge onto the ambient tokio
        // runtime.
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            EventStoreError::Backend(
                "PostgresEventStore requires a tokio runtime context".to_string(),
            )
        })?;

        if events.is_empty() {
            return Ok(vec![]);
        }
        let aggregate_id = events[0].aggregate_id;

        handle.block_on(self.append_async(aggregate_id, events, expected_version))
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            EventStoreError::Backend(
                "PostgresEventStore requires a tokio runtime context".to_string(),
            )
        })?;

        handle.block_on(self.load_stream_async(aggregate_id))
    }
}

/// Current version (0 if the stream does not exist) and aggregate type.
async fn check_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(MAX(sequence_number), 0) AS current_version,
            MAX(aggregate_type) AS aggregate_type
        FROM events
        WHERE aggregate_id = $1
        "#,
    )
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current_version: i64 = row
        .try_get("current_version")
        .map_err(|e| EventStoreError::Backend(format!("failed to read current_version: {e}")))?;
    let aggregate_type: Option<String> = row
        .try_get("aggregate_type")
        .map_err(|e| EventStoreError::Backend(format!("failed to read aggregate_type: {e}")))?;

    Ok((current_version as u64, aggregate_type))
}

fn stored_event_from_row(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, EventStoreError> {
    let read = |e: sqlx::Error| EventStoreError::Backend(format!("failed to read event row: {e}"));

    let sequence_number: i64 = row.try_get("sequence_number").map_err(read)?;
    let event_version: i32 = row.try_get("event_version").map_err(read)?;
    let aggregate_id: uuid::Uuid = row.try_get("aggregate_id").map_err(read)?;

    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(read)?,
        aggregate_id: AggregateId::from_uuid(aggregate_id),
        aggregate_type: row.try_get("aggregate_type").map_err(read)?,
        sequence_number: sequence_number as u64,
        event_type: row.try_get("event_type").map_err(read)?,
        event_version: event_version as u32,
        occurred_at: row.try_get("occurred_at").map_err(read)?,
        payload: row.try_get("payload").map_err(read)?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => EventStoreError::Concurrency(format!(
                "{operation}: concurrent append detected ({db})"
            )),
            Some("23514") => {
                EventStoreError::InvalidAppend(format!("{operation}: check violation ({db})"))
            }
            _ => EventStoreError::Backend(format!("{operation}: {db}")),
        },
        _ => EventStoreError::Backend(format!("{operation}: {err}")),
    }
}
