//! PostgreSQL store
//!
//! Claims run as a single `UPDATE ... FROM (SELECT ... FOR UPDATE SKIP LOCKED)`
//! inside a transaction. Batch writes guard on the `version` column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::{BatchStore, BatchWithEvents, EventStore, FailedEventFilter, StoreError, StoreResult};
use crate::domain::{BatchStatus, BatchUpload, DomainError, EventStatus, ProcessingEvent};

const EVENT_COLUMNS: &str = "e.id, e.batch_id, e.document, e.client_identifier, e.action_type, \
     e.side_effects, e.status, e.retry_count, e.created_at, e.started_at, e.completed_at, \
     e.error_message, e.response_data";

const BATCH_COLUMNS: &str = "b.id, b.file_name, b.original_file_name, b.file_size_bytes, b.owner, \
     b.status, b.total_events, b.created_at, b.started_at, b.completed_at, b.error_message, \
     b.version";

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    batch_id: Uuid,
    document: String,
    client_identifier: String,
    action_type: String,
    side_effects: Value,
    status: i16,
    retry_count: i32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    response_data: Option<String>,
}

impl TryFrom<EventRow> for ProcessingEvent {
    type Error = DomainError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(ProcessingEvent {
            id: row.id,
            batch_id: row.batch_id,
            document: row.document,
            client_identifier: row.client_identifier,
            action_type: row.action_type,
            side_effects: row.side_effects,
            status: EventStatus::try_from(row.status)?,
            retry_count: row.retry_count,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            response_data: row.response_data,
        })
    }
}

#[derive(Debug, FromRow)]
struct BatchRow {
    id: Uuid,
    file_name: String,
    original_file_name: String,
    file_size_bytes: i64,
    owner: String,
    status: i16,
    total_events: i32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    version: i64,
}

impl TryFrom<BatchRow> for BatchUpload {
    type Error = DomainError;

    fn try_from(row: BatchRow) -> Result<Self, Self::Error> {
        Ok(BatchUpload {
            id: row.id,
            file_name: row.file_name,
            original_file_name: row.original_file_name,
            file_size_bytes: row.file_size_bytes,
            owner: row.owner,
            status: BatchStatus::try_from(row.status)?,
            total_events: row.total_events,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            version: row.version,
        })
    }
}

fn into_events(rows: Vec<EventRow>) -> StoreResult<Vec<ProcessingEvent>> {
    rows.into_iter()
        .map(|row| ProcessingEvent::try_from(row).map_err(StoreError::from))
        .collect()
}

/// Store backed by a shared connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn claim_pending_events(&self, limit: usize) -> StoreResult<Vec<ProcessingEvent>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut tx = self.pool.begin().await?;

        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            r#"
            UPDATE processing_events e
            SET status = $1, started_at = NOW()
            FROM (
                SELECT id FROM processing_events
                WHERE status = $2
                ORDER BY created_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            ) claimable
            WHERE e.id = claimable.id
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(EventStatus::Processing.code())
        .bind(EventStatus::Pending.code())
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        // RETURNING does not preserve the subquery's order
        let mut events = into_events(rows)?;
        events.sort_by_key(|e| e.created_at());

        debug!(claimed = events.len(), "Claimed pending events");
        Ok(events)
    }

    async fn update_event(&self, event: &ProcessingEvent) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE processing_events
            SET status = $2,
                retry_count = $3,
                started_at = $4,
                completed_at = $5,
                error_message = $6,
                response_data = $7
            WHERE id = $1
            "#,
        )
        .bind(event.id())
        .bind(event.status().code())
        .bind(event.retry_count())
        .bind(event.started_at())
        .bind(event.completed_at())
        .bind(event.error_message())
        .bind(event.response_data())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Event", event.id()));
        }

        Ok(())
    }

    async fn record_outcome(&self, event: &ProcessingEvent) -> StoreResult<bool> {
        let Some(claimed_at) = event.started_at() else {
            return Ok(false);
        };

        let result = sqlx::query(
            r#"
            UPDATE processing_events
            SET status = $2,
                retry_count = $3,
                completed_at = $4,
                error_message = $5,
                response_data = $6
            WHERE id = $1 AND status = $7 AND started_at = $8
            "#,
        )
        .bind(event.id())
        .bind(event.status().code())
        .bind(event.retry_count())
        .bind(event.completed_at())
        .bind(event.error_message())
        .bind(event.response_data())
        .bind(EventStatus::Processing.code())
        .bind(claimed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<ProcessingEvent>> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM processing_events e WHERE e.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ProcessingEvent::try_from).transpose()?)
    }

    async fn failed_events(&self, filter: &FailedEventFilter) -> StoreResult<Vec<ProcessingEvent>> {
        let failed = EventStatus::Failed.code();

        let rows: Vec<EventRow> = match filter {
            FailedEventFilter::All => {
                sqlx::query_as(&format!(
                    r#"
                    SELECT {EVENT_COLUMNS} FROM processing_events e
                    WHERE e.status = $1
                    ORDER BY e.completed_at DESC NULLS LAST
                    "#
                ))
                .bind(failed)
                .fetch_all(&self.pool)
                .await?
            },
            FailedEventFilter::Batch(batch_id) => {
                sqlx::query_as(&format!(
                    r#"
                    SELECT {EVENT_COLUMNS} FROM processing_events e
                    WHERE e.status = $1 AND e.batch_id = $2
                    ORDER BY e.completed_at DESC NULLS LAST
                    "#
                ))
                .bind(failed)
                .bind(batch_id)
                .fetch_all(&self.pool)
                .await?
            },
            FailedEventFilter::Owner(owner) => {
                sqlx::query_as(&format!(
                    r#"
                    SELECT {EVENT_COLUMNS} FROM processing_events e
                    JOIN batch_uploads b ON b.id = e.batch_id
                    WHERE e.status = $1 AND b.owner = $2
                    ORDER BY e.completed_at DESC NULLS LAST
                    "#
                ))
                .bind(failed)
                .bind(owner)
                .fetch_all(&self.pool)
                .await?
            },
        };

        into_events(rows)
    }

    async fn reclaim_stale_events(&self, started_before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE processing_events
            SET status = $1, started_at = NULL
            WHERE status = $2 AND started_at < $3
            "#,
        )
        .bind(EventStatus::Pending.code())
        .bind(EventStatus::Processing.code())
        .bind(started_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BatchStore for PgStore {
    async fn create_batch(&self, batch: &BatchUpload, events: &[ProcessingEvent]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO batch_uploads (
                id, file_name, original_file_name, file_size_bytes, owner, status,
                total_events, created_at, started_at, completed_at, error_message, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(batch.id())
        .bind(batch.file_name())
        .bind(batch.original_file_name())
        .bind(batch.file_size_bytes())
        .bind(batch.owner())
        .bind(batch.status().code())
        .bind(batch.total_events())
        .bind(batch.created_at())
        .bind(batch.started_at())
        .bind(batch.completed_at())
        .bind(batch.error_message())
        .bind(batch.version())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|db_err| db_err.is_unique_violation()) {
                StoreError::duplicate("Batch", batch.id())
            } else {
                StoreError::from(e)
            }
        })?;

        for event in events {
            sqlx::query(
                r#"
                INSERT INTO processing_events (
                    id, batch_id, document, client_identifier, action_type, side_effects,
                    status, retry_count, created_at, started_at, completed_at,
                    error_message, response_data
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(event.id())
            .bind(event.batch_id())
            .bind(event.document())
            .bind(event.client_identifier())
            .bind(event.action_type())
            .bind(event.side_effects())
            .bind(event.status().code())
            .bind(event.retry_count())
            .bind(event.created_at())
            .bind(event.started_at())
            .bind(event.completed_at())
            .bind(event.error_message())
            .bind(event.response_data())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(batch_id = %batch.id(), events = events.len(), "Inserted batch");
        Ok(())
    }

    async fn get_batch(&self, id: Uuid) -> StoreResult<Option<BatchUpload>> {
        let row: Option<BatchRow> = sqlx::query_as(&format!(
            "SELECT {BATCH_COLUMNS} FROM batch_uploads b WHERE b.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(BatchUpload::try_from).transpose()?)
    }

    async fn get_batch_with_events(&self, id: Uuid) -> StoreResult<Option<BatchWithEvents>> {
        let Some(batch) = self.get_batch(id).await? else {
            return Ok(None);
        };

        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM processing_events e WHERE e.batch_id = $1 ORDER BY e.created_at"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(BatchWithEvents {
            batch,
            events: into_events(rows)?,
        }))
    }

    async fn try_update_batch(&self, batch: &mut BatchUpload) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE batch_uploads
            SET status = $3,
                total_events = $4,
                started_at = $5,
                completed_at = $6,
                error_message = $7,
                version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(batch.id())
        .bind(batch.version())
        .bind(batch.status().code())
        .bind(batch.total_events())
        .bind(batch.started_at())
        .bind(batch.completed_at())
        .bind(batch.error_message())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(batch_id = %batch.id(), version = batch.version(), "Batch version conflict");
            return Ok(false);
        }

        batch.version += 1;
        Ok(true)
    }

    async fn list_batches(
        &self,
        owner: Option<&str>,
        skip: i64,
        take: i64,
    ) -> StoreResult<Vec<BatchUpload>> {
        let rows: Vec<BatchRow> = sqlx::query_as(&format!(
            r#"
            SELECT {BATCH_COLUMNS} FROM batch_uploads b
            WHERE ($1::text IS NULL OR b.owner = $1)
            ORDER BY b.created_at DESC
            OFFSET $2
            LIMIT $3
            "#
        ))
        .bind(owner)
        .bind(skip)
        .bind(take)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| BatchUpload::try_from(row).map_err(StoreError::from))
            .collect()
    }

    async fn find_active_batch(&self, owner: &str) -> StoreResult<Option<BatchUpload>> {
        let row: Option<BatchRow> = sqlx::query_as(&format!(
            r#"
            SELECT {BATCH_COLUMNS} FROM batch_uploads b
            WHERE b.owner = $1 AND b.status IN ($2, $3)
            ORDER BY b.created_at DESC
            LIMIT 1
            "#
        ))
        .bind(owner)
        .bind(BatchStatus::Uploaded.code())
        .bind(BatchStatus::Processing.code())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(BatchUpload::try_from).transpose()?)
    }

    async fn has_unfinished_events(&self, owner: &str) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM processing_events e
                JOIN batch_uploads b ON b.id = e.batch_id
                WHERE b.owner = $1 AND e.status IN ($2, $3)
            )
            "#,
        )
        .bind(owner)
        .bind(EventStatus::Pending.code())
        .bind(EventStatus::Processing.code())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}
