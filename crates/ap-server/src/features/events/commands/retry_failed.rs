//! Retry failed events command
//!
//! Resets a finished batch's failed events to Pending so the processor picks
//! them up again, then reopens the batch. Events that have used up their
//! retries are left alone and counted in the response.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{BatchStatus, DomainError, EventStatus, DEFAULT_MAX_RETRIES};
use crate::features::shared::validation::{validate_owner, OwnerValidationError};
use crate::retry::{retry_on_conflict, CONFLICT_RETRY_ATTEMPTS, CONFLICT_RETRY_STEP};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryFailedEventsCommand {
    pub batch_id: Uuid,

    /// When set, the batch must belong to this owner and the owner may not
    /// have a different batch in flight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Restrict the retry to these events; all failed events when absent or
    /// empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_ids: Option<Vec<Uuid>>,

    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
}

fn default_max_retries() -> i32 {
    DEFAULT_MAX_RETRIES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryFailedEventsResponse {
    pub batch_id: Uuid,
    pub events_retried: usize,
    /// Failed events skipped because they reached the retry ceiling
    pub events_exhausted: usize,
    pub batch_status: BatchStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum RetryFailedEventsError {
    #[error("Owner validation failed: {0}")]
    Owner(#[from] OwnerValidationError),

    #[error("max_retries must be at least 1")]
    InvalidMaxRetries,

    #[error("Batch '{0}' not found")]
    NotFound(Uuid),

    #[error("Owner already has a batch in progress: '{file_name}' ({batch_id})")]
    OtherBatchActive { batch_id: Uuid, file_name: String },

    #[error("Only finished batches can be retried; batch is {0}")]
    BatchNotFinished(BatchStatus),

    #[error("Invalid event state: {0}")]
    Domain(#[from] DomainError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl RetryFailedEventsCommand {
    pub fn new(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            owner: None,
            event_ids: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_event_ids(mut self, event_ids: Vec<Uuid>) -> Self {
        self.event_ids = Some(event_ids);
        self
    }

    pub fn validate(&self) -> Result<(), RetryFailedEventsError> {
        if let Some(owner) = &self.owner {
            validate_owner(owner)?;
        }
        if self.max_retries < 1 {
            return Err(RetryFailedEventsError::InvalidMaxRetries);
        }
        Ok(())
    }
}

#[tracing::instrument(skip(store, command), fields(batch_id = %command.batch_id, owner = ?command.owner))]
pub async fn handle<S>(
    store: &S,
    command: RetryFailedEventsCommand,
) -> Result<RetryFailedEventsResponse, RetryFailedEventsError>
where
    S: Store + ?Sized,
{
    command.validate()?;

    let owner = command.owner.as_deref().map(str::trim);

    if let Some(owner) = owner {
        if let Some(active) = store.find_active_batch(owner).await? {
            if active.id() != command.batch_id {
                return Err(RetryFailedEventsError::OtherBatchActive {
                    batch_id: active.id(),
                    file_name: active.original_file_name().to_string(),
                });
            }
        }
    }

    let snapshot = store
        .get_batch_with_events(command.batch_id)
        .await?
        .ok_or(RetryFailedEventsError::NotFound(command.batch_id))?;

    // Someone else's batch looks the same as a missing one
    if owner.is_some_and(|o| snapshot.batch.owner() != o) {
        return Err(RetryFailedEventsError::NotFound(command.batch_id));
    }

    if !snapshot.batch.status().is_terminal() {
        return Err(RetryFailedEventsError::BatchNotFinished(snapshot.batch.status()));
    }

    let wanted: Option<HashSet<Uuid>> = command
        .event_ids
        .as_ref()
        .filter(|ids| !ids.is_empty())
        .map(|ids| ids.iter().copied().collect());

    let mut retried = 0;
    let mut exhausted = 0;

    for mut event in snapshot.events {
        if event.status() != EventStatus::Failed {
            continue;
        }
        if wanted.as_ref().is_some_and(|ids| !ids.contains(&event.id())) {
            continue;
        }
        if !event.can_retry(command.max_retries) {
            exhausted += 1;
            continue;
        }

        event.reset_for_retry()?;
        store.update_event(&event).await?;
        retried += 1;
    }

    let mut batch_status = snapshot.batch.status();

    if retried > 0 {
        let reopened = retry_on_conflict(CONFLICT_RETRY_ATTEMPTS, CONFLICT_RETRY_STEP, |_| {
            reopen_batch(store, command.batch_id)
        })
        .await?;

        if !reopened {
            // The processor reopens it when it settles the reset events
            tracing::warn!("Could not reopen batch after repeated version conflicts");
        }

        if let Some(batch) = store.get_batch(command.batch_id).await? {
            batch_status = batch.status();
        }
    }

    tracing::info!(retried, exhausted, "Reset failed events for retry");

    Ok(RetryFailedEventsResponse {
        batch_id: command.batch_id,
        events_retried: retried,
        events_exhausted: exhausted,
        batch_status,
    })
}

/// One optimistic attempt at moving the batch back to Processing
async fn reopen_batch<S>(store: &S, batch_id: Uuid) -> Result<bool, RetryFailedEventsError>
where
    S: Store + ?Sized,
{
    let Some(mut batch) = store.get_batch(batch_id).await? else {
        return Err(RetryFailedEventsError::NotFound(batch_id));
    };
    if !batch.status().is_terminal() {
        return Ok(true);
    }

    batch.reopen()?;
    Ok(store.try_update_batch(&mut batch).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::shared::test_helpers::{Seed, TestBatch};
    use crate::store::{BatchStore, EventStore, MemoryStore};

    const OWNER: &str = "ops@example.com";

    #[tokio::test]
    async fn test_resets_retryable_events_and_reopens_batch() {
        let store = MemoryStore::new();
        let (batch_id, event_ids) = TestBatch::new(OWNER)
            .with(Seed::Failed { times: 1 })
            .with(Seed::Failed { times: 3 })
            .with(Seed::Completed)
            .insert(&store)
            .await;

        let response = handle(&store, RetryFailedEventsCommand::new(batch_id).with_owner(OWNER))
            .await
            .unwrap();

        assert_eq!(response.events_retried, 1);
        assert_eq!(response.events_exhausted, 1);
        assert_eq!(response.batch_status, BatchStatus::Processing);

        let retried = store.get_event(event_ids[0]).await.unwrap().unwrap();
        assert_eq!(retried.status(), EventStatus::Pending);
        assert_eq!(retried.retry_count(), 1);

        let exhausted = store.get_event(event_ids[1]).await.unwrap().unwrap();
        assert_eq!(exhausted.status(), EventStatus::Failed);

        let batch = store.get_batch(batch_id).await.unwrap().unwrap();
        assert_eq!(batch.status(), BatchStatus::Processing);
        assert!(batch.completed_at().is_none());
    }

    #[tokio::test]
    async fn test_event_id_filter_limits_the_reset() {
        let store = MemoryStore::new();
        let (batch_id, event_ids) = TestBatch::new(OWNER)
            .with(Seed::Failed { times: 1 })
            .with(Seed::Failed { times: 1 })
            .insert(&store)
            .await;

        let response = handle(
            &store,
            RetryFailedEventsCommand::new(batch_id).with_event_ids(vec![event_ids[1]]),
        )
        .await
        .unwrap();

        assert_eq!(response.events_retried, 1);
        let untouched = store.get_event(event_ids[0]).await.unwrap().unwrap();
        assert_eq!(untouched.status(), EventStatus::Failed);
    }

    #[tokio::test]
    async fn test_nothing_to_retry_leaves_batch_finished() {
        let store = MemoryStore::new();
        let (batch_id, _) = TestBatch::new(OWNER)
            .with(Seed::Failed { times: 3 })
            .insert(&store)
            .await;

        let response = handle(&store, RetryFailedEventsCommand::new(batch_id)).await.unwrap();

        assert_eq!(response.events_retried, 0);
        assert_eq!(response.batch_status, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn test_running_batch_cannot_be_retried() {
        let store = MemoryStore::new();
        let (batch_id, _) = TestBatch::new(OWNER).with(Seed::Pending).insert(&store).await;

        let err = handle(&store, RetryFailedEventsCommand::new(batch_id)).await.unwrap_err();
        assert!(matches!(err, RetryFailedEventsError::BatchNotFinished(BatchStatus::Uploaded)));
    }

    #[tokio::test]
    async fn test_foreign_batch_is_not_found() {
        let store = MemoryStore::new();
        let (batch_id, _) = TestBatch::new("someone@example.com")
            .with(Seed::Failed { times: 1 })
            .insert(&store)
            .await;

        let err = handle(&store, RetryFailedEventsCommand::new(batch_id).with_owner(OWNER))
            .await
            .unwrap_err();
        assert!(matches!(err, RetryFailedEventsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_other_active_batch_blocks_retry() {
        let store = MemoryStore::new();
        let (failed_id, _) = TestBatch::new(OWNER)
            .with(Seed::Failed { times: 1 })
            .insert(&store)
            .await;
        TestBatch::new(OWNER).with(Seed::Pending).insert(&store).await;

        let err = handle(&store, RetryFailedEventsCommand::new(failed_id).with_owner(OWNER))
            .await
            .unwrap_err();
        assert!(matches!(err, RetryFailedEventsError::OtherBatchActive { .. }));
    }
}
