//! Owner status query
//!
//! Answers whether an owner may upload a new file right now, using the same
//! two checks the upload command enforces.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::BatchStatus;
use crate::features::shared::validation::{validate_owner, OwnerValidationError};
use crate::store::{BatchStore, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOwnerStatusQuery {
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOwnerStatusResponse {
    pub owner: String,
    pub has_active_batch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_batch_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_batch_file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_batch_status: Option<BatchStatus>,
    pub has_pending_events: bool,
    pub can_upload_new_file: bool,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckOwnerStatusError {
    #[error("Owner validation failed: {0}")]
    Owner(#[from] OwnerValidationError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl CheckOwnerStatusQuery {
    pub fn validate(&self) -> Result<(), CheckOwnerStatusError> {
        validate_owner(&self.owner)?;
        Ok(())
    }
}

#[tracing::instrument(skip(store), fields(owner = %query.owner))]
pub async fn handle<S>(
    store: &S,
    query: CheckOwnerStatusQuery,
) -> Result<CheckOwnerStatusResponse, CheckOwnerStatusError>
where
    S: BatchStore + ?Sized,
{
    query.validate()?;

    let owner = query.owner.trim();
    let active = store.find_active_batch(owner).await?;
    let has_pending_events = store.has_unfinished_events(owner).await?;
    let can_upload_new_file = active.is_none() && !has_pending_events;

    let message = if can_upload_new_file {
        "Owner can upload a new file"
    } else {
        "Owner has a file in progress"
    };

    Ok(CheckOwnerStatusResponse {
        owner: owner.to_string(),
        has_active_batch: active.is_some(),
        active_batch_id: active.as_ref().map(|b| b.id()),
        active_batch_file_name: active.as_ref().map(|b| b.original_file_name().to_string()),
        active_batch_status: active.as_ref().map(|b| b.status()),
        has_pending_events,
        can_upload_new_file,
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::shared::test_helpers::{Seed, TestBatch};
    use crate::store::MemoryStore;

    fn query(owner: &str) -> CheckOwnerStatusQuery {
        CheckOwnerStatusQuery {
            owner: owner.to_string(),
        }
    }

    #[tokio::test]
    async fn test_idle_owner_can_upload() {
        let store = MemoryStore::new();
        TestBatch::new("ops@example.com").with(Seed::Completed).insert(&store).await;

        let status = handle(&store, query("ops@example.com")).await.unwrap();

        assert!(status.can_upload_new_file);
        assert!(!status.has_active_batch);
        assert!(!status.has_pending_events);
    }

    #[tokio::test]
    async fn test_busy_owner_cannot_upload() {
        let store = MemoryStore::new();
        let (batch_id, _) = TestBatch::new("ops@example.com").with(Seed::Pending).insert(&store).await;

        let status = handle(&store, query("ops@example.com")).await.unwrap();

        assert!(!status.can_upload_new_file);
        assert_eq!(status.active_batch_id, Some(batch_id));
        assert_eq!(status.active_batch_status, Some(BatchStatus::Uploaded));
        assert!(status.has_pending_events);
    }

    #[tokio::test]
    async fn test_empty_owner_is_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            handle(&store, query(" ")).await,
            Err(CheckOwnerStatusError::Owner(_))
        ));
    }
}
