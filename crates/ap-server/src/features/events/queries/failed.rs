//! Failed events query

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{ProcessingEvent, DEFAULT_MAX_RETRIES};
use crate::features::shared::validation::{validate_owner, OwnerValidationError};
use crate::store::{EventStore, FailedEventFilter, StoreError};

/// Failed events for one batch, one owner, or everything when neither is set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetFailedEventsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Retry ceiling behind `can_retry`; [`DEFAULT_MAX_RETRIES`] when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedEventItem {
    pub event_id: Uuid,
    pub batch_id: Uuid,
    pub document: String,
    pub client_identifier: String,
    pub action_type: String,
    pub side_effects: Value,
    pub retry_count: i32,
    pub can_retry: bool,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FailedEventItem {
    fn new(event: ProcessingEvent, max_retries: i32) -> Self {
        Self {
            event_id: event.id(),
            batch_id: event.batch_id(),
            can_retry: event.can_retry(max_retries),
            retry_count: event.retry_count(),
            completed_at: event.completed_at(),
            document: event.document,
            client_identifier: event.client_identifier,
            action_type: event.action_type,
            side_effects: event.side_effects,
            error_message: event.error_message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFailedEventsResponse {
    pub events: Vec<FailedEventItem>,
}

#[derive(Debug, thiserror::Error)]
pub enum GetFailedEventsError {
    #[error("Filter by batch or by owner, not both")]
    ConflictingFilters,

    #[error("Owner validation failed: {0}")]
    Owner(#[from] OwnerValidationError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl GetFailedEventsQuery {
    pub fn for_batch(batch_id: Uuid) -> Self {
        Self {
            batch_id: Some(batch_id),
            ..Self::default()
        }
    }

    pub fn for_owner(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub fn validate(&self) -> Result<(), GetFailedEventsError> {
        if self.batch_id.is_some() && self.owner.is_some() {
            return Err(GetFailedEventsError::ConflictingFilters);
        }
        if let Some(owner) = &self.owner {
            validate_owner(owner)?;
        }
        Ok(())
    }

    fn filter(&self) -> FailedEventFilter {
        match (&self.batch_id, &self.owner) {
            (Some(batch_id), _) => FailedEventFilter::Batch(*batch_id),
            (None, Some(owner)) => FailedEventFilter::Owner(owner.trim().to_string()),
            (None, None) => FailedEventFilter::All,
        }
    }
}

#[tracing::instrument(skip(store))]
pub async fn handle<S>(
    store: &S,
    query: GetFailedEventsQuery,
) -> Result<GetFailedEventsResponse, GetFailedEventsError>
where
    S: EventStore + ?Sized,
{
    query.validate()?;

    let events = store.failed_events(&query.filter()).await?;
    let max_retries = query.max_retries();

    Ok(GetFailedEventsResponse {
        events: events
            .into_iter()
            .map(|event| FailedEventItem::new(event, max_retries))
            .collect(),
    })
}
