//! Batch status query
//!
//! Progress counts are derived from the event rows on every call, so they are
//! accurate even while the batch status itself is waiting to be settled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::BatchStatus;
use crate::store::{BatchStore, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBatchStatusQuery {
    pub batch_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBatchStatusResponse {
    pub batch_id: Uuid,
    pub file_name: String,
    pub owner: String,
    pub status: BatchStatus,
    pub total_events: i32,
    pub processed_events: i32,
    pub successful_events: i32,
    pub failed_events: i32,
    pub percentage_complete: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GetBatchStatusError {
    #[error("Batch '{0}' not found")]
    NotFound(Uuid),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

#[tracing::instrument(skip(store), fields(batch_id = %query.batch_id))]
pub async fn handle<S>(
    store: &S,
    query: GetBatchStatusQuery,
) -> Result<GetBatchStatusResponse, GetBatchStatusError>
where
    S: BatchStore + ?Sized,
{
    let snapshot = store
        .get_batch_with_events(query.batch_id)
        .await?
        .ok_or(GetBatchStatusError::NotFound(query.batch_id))?;

    let progress = snapshot.progress();
    let batch = snapshot.batch;

    Ok(GetBatchStatusResponse {
        batch_id: batch.id(),
        file_name: batch.original_file_name().to_string(),
        owner: batch.owner().to_string(),
        status: batch.status(),
        total_events: progress.total_events,
        processed_events: progress.processed_events,
        successful_events: progress.successful_events,
        failed_events: progress.failed_events,
        percentage_complete: progress.percentage_complete,
        created_at: batch.created_at(),
        started_at: batch.started_at(),
        completed_at: batch.completed_at(),
        error_message: batch.error_message().map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::shared::test_helpers::{Seed, TestBatch};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_reports_progress_counts() {
        let store = MemoryStore::new();
        let (batch_id, _) = TestBatch::new("ops@example.com")
            .with(Seed::Completed)
            .with(Seed::Failed { times: 1 })
            .with(Seed::Pending)
            .with(Seed::Pending)
            .insert(&store)
            .await;

        let status = handle(&store, GetBatchStatusQuery { batch_id }).await.unwrap();

        assert_eq!(status.total_events, 4);
        assert_eq!(status.processed_events, 2);
        assert_eq!(status.successful_events, 1);
        assert_eq!(status.failed_events, 1);
        assert!((status.percentage_complete - 50.0).abs() < f64::EPSILON);
        assert_eq!(status.owner, "ops@example.com");
    }

    #[tokio::test]
    async fn test_unknown_batch_is_not_found() {
        let store = MemoryStore::new();
        let batch_id = Uuid::new_v4();

        let err = handle(&store, GetBatchStatusQuery { batch_id }).await.unwrap_err();
        assert!(matches!(err, GetBatchStatusError::NotFound(id) if id == batch_id));
    }
}
