//! Processing event entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::action::EventData;
use super::DomainError;

/// Retry ceiling used when the caller does not configure one
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Event status (persisted as SMALLINT)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum EventStatus {
    Pending = 0,
    Processing = 1,
    Completed = 2,
    Failed = 3,
}

impl EventStatus {
    pub fn as_str(&self) -> &str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }

    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::Failed)
    }
}

impl TryFrom<i16> for EventStatus {
    type Error = DomainError;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(EventStatus::Pending),
            1 => Ok(EventStatus::Processing),
            2 => Ok(EventStatus::Completed),
            3 => Ok(EventStatus::Failed),
            _ => Err(DomainError::UnknownStatus {
                entity: "event",
                code,
            }),
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of external-action work, derived from one input row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingEvent {
    pub(crate) id: Uuid,
    pub(crate) batch_id: Uuid,
    pub(crate) document: String,
    pub(crate) client_identifier: String,
    pub(crate) action_type: String,
    pub(crate) side_effects: Value,
    pub(crate) status: EventStatus,
    pub(crate) retry_count: i32,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) error_message: Option<String>,
    pub(crate) response_data: Option<String>,
}

impl ProcessingEvent {
    /// Create a pending event belonging to `batch_id`
    pub fn new(batch_id: Uuid, data: EventData) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            document: data.document,
            client_identifier: data.client_identifier,
            action_type: data.action_type,
            side_effects: data.side_effects,
            status: EventStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            response_data: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn client_identifier(&self) -> &str {
        &self.client_identifier
    }

    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    pub fn side_effects(&self) -> &Value {
        &self.side_effects
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    pub fn retry_count(&self) -> i32 {
        self.retry_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn response_data(&self) -> Option<&str> {
        self.response_data.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Handler input for this event
    pub fn event_data(&self) -> EventData {
        EventData {
            document: self.document.clone(),
            client_identifier: self.client_identifier.clone(),
            action_type: self.action_type.clone(),
            side_effects: self.side_effects.clone(),
        }
    }

    /// Claim the event. Valid from Pending, or Failed for a re-claim.
    pub fn start(&mut self) -> Result<(), DomainError> {
        if !matches!(self.status, EventStatus::Pending | EventStatus::Failed) {
            return Err(DomainError::invalid_state("event", "start", self.status));
        }

        self.status = EventStatus::Processing;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, response_data: Option<String>) -> Result<(), DomainError> {
        if self.status != EventStatus::Processing {
            return Err(DomainError::invalid_state("event", "complete", self.status));
        }

        self.status = EventStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.response_data = response_data;
        self.error_message = None;
        Ok(())
    }

    /// Record a failure. Always bumps `retry_count`.
    pub fn fail(&mut self, error_message: impl Into<String>) -> Result<(), DomainError> {
        if self.status != EventStatus::Processing {
            return Err(DomainError::invalid_state("event", "fail", self.status));
        }

        self.status = EventStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error_message.into());
        self.response_data = None;
        self.retry_count += 1;
        Ok(())
    }

    pub fn can_retry(&self, max_retries: i32) -> bool {
        self.status == EventStatus::Failed && self.retry_count < max_retries
    }

    /// Put a failed event back in the queue, keeping its retry count
    pub fn reset_for_retry(&mut self) -> Result<(), DomainError> {
        if self.status != EventStatus::Failed {
            return Err(DomainError::invalid_state("event", "retry", self.status));
        }

        self.status = EventStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.error_message = None;
        self.response_data = None;
        Ok(())
    }

    /// Give up a claim whose worker disappeared (stale lease)
    pub fn release(&mut self) -> Result<(), DomainError> {
        if self.status != EventStatus::Processing {
            return Err(DomainError::invalid_state("event", "release", self.status));
        }

        self.status = EventStatus::Pending;
        self.started_at = None;
        Ok(())
    }
}
