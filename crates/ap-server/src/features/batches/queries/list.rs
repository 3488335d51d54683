use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{BatchStatus, BatchUpload};
use crate::features::shared::pagination::{PaginationError, PaginationParams};
use crate::store::{BatchStore, StoreError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListBatchesQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(flatten)]
    pub pagination: PaginationParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchListItem {
    pub batch_id: Uuid,
    pub file_name: String,
    pub owner: String,
    pub status: BatchStatus,
    pub total_events: i32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<BatchUpload> for BatchListItem {
    fn from(batch: BatchUpload) -> Self {
        Self {
            batch_id: batch.id(),
            file_name: batch.original_file_name().to_string(),
            owner: batch.owner().to_string(),
            status: batch.status(),
            total_events: batch.total_events(),
            created_at: batch.created_at(),
            completed_at: batch.completed_at(),
            error_message: batch.error_message().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListBatchesResponse {
    pub items: Vec<BatchListItem>,
    pub page: i64,
    pub per_page: i64,
    pub has_next: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ListBatchesError {
    #[error(transparent)]
    InvalidPagination(#[from] PaginationError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl ListBatchesQuery {
    pub fn validate(&self) -> Result<(), ListBatchesError> {
        Ok(self.pagination.validate()?)
    }
}

/// Newest batches first. Fetches one extra row to tell whether another page
/// exists.
#[tracing::instrument(skip(store, query), fields(owner = ?query.owner))]
pub async fn handle<S>(
    store: &S,
    query: ListBatchesQuery,
) -> Result<ListBatchesResponse, ListBatchesError>
where
    S: BatchStore + ?Sized,
{
    query.validate()?;

    let per_page = query.pagination.per_page();
    let owner = query.owner.as_deref().map(str::trim).filter(|o| !o.is_empty());
    let (skip, take) = query.pagination.lookahead_window();

    let mut batches = store.list_batches(owner, skip, take).await?;

    let has_next = batches.len() as i64 > per_page;
    batches.truncate(per_page as usize);

    Ok(ListBatchesResponse {
        items: batches.into_iter().map(BatchListItem::from).collect(),
        page: query.pagination.page(),
        per_page,
        has_next,
    })
}
