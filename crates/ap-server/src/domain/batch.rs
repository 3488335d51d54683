//! Batch upload entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::{EventStatus, ProcessingEvent};
use super::DomainError;

/// Batch status (persisted as SMALLINT)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum BatchStatus {
    Uploaded = 0,
    Processing = 1,
    Completed = 2,
    Failed = 3,
}

impl BatchStatus {
    pub fn as_str(&self) -> &str {
        match self {
            BatchStatus::Uploaded => "uploaded",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl TryFrom<i16> for BatchStatus {
    type Error = DomainError;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(BatchStatus::Uploaded),
            1 => Ok(BatchStatus::Processing),
            2 => Ok(BatchStatus::Completed),
            3 => Ok(BatchStatus::Failed),
            _ => Err(DomainError::UnknownStatus {
                entity: "batch",
                code,
            }),
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ingested file and the aggregate state of its events
///
/// Events reference the batch by id only; the two are loaded and persisted
/// independently. `version` is the optimistic concurrency token and is only
/// advanced by the store on a successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchUpload {
    pub(crate) id: Uuid,
    pub(crate) file_name: String,
    pub(crate) original_file_name: String,
    pub(crate) file_size_bytes: i64,
    pub(crate) owner: String,
    pub(crate) status: BatchStatus,
    pub(crate) total_events: i32,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) error_message: Option<String>,
    pub(crate) version: i64,
}

impl BatchUpload {
    pub fn new(
        original_file_name: impl Into<String>,
        file_size_bytes: i64,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: Uuid::new_v4().to_string(),
            original_file_name: original_file_name.into(),
            file_size_bytes,
            owner: owner.into(),
            status: BatchStatus::Uploaded,
            total_events: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            version: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn original_file_name(&self) -> &str {
        &self.original_file_name
    }

    pub fn file_size_bytes(&self) -> i64 {
        self.file_size_bytes
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn total_events(&self) -> i32 {
        self.total_events
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

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, BatchStatus::Uploaded | BatchStatus::Processing)
    }

    /// Record how many events ingestion produced. Allowed once, before start.
    pub fn set_total_events(&mut self, total_events: i32) -> Result<(), DomainError> {
        if self.status != BatchStatus::Uploaded || self.total_events != 0 {
            return Err(DomainError::invalid_state("batch", "set total events of", self.status));
        }

        self.total_events = total_events;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), DomainError> {
        if self.status != BatchStatus::Uploaded {
            return Err(DomainError::invalid_state("batch", "start", self.status));
        }

        self.status = BatchStatus::Processing;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), DomainError> {
        if self.status != BatchStatus::Processing {
            return Err(DomainError::invalid_state("batch", "complete", self.status));
        }

        self.status = BatchStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Fail the batch. Valid while Uploaded (nothing ingested) or Processing.
    pub fn fail(&mut self, error_message: impl Into<String>) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_state("batch", "fail", self.status));
        }

        self.status = BatchStatus::Failed;
        self.error_message = Some(error_message.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Return a finished batch to Processing after some of its events were
    /// reset for retry.
    pub fn reopen(&mut self) -> Result<(), DomainError> {
        if !self.status.is_terminal() {
            return Err(DomainError::invalid_state("batch", "reopen", self.status));
        }

        self.status = BatchStatus::Processing;
        self.completed_at = None;
        self.error_message = None;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Status the batch should have given the current state of its events.
    ///
    /// Recomputed from scratch on every call so a missed update is corrected
    /// the next time it runs.
    pub fn determine_completion_status(events: &[ProcessingEvent]) -> BatchStatus {
        if events.is_empty() {
            return BatchStatus::Failed;
        }

        if events.iter().any(|e| !e.is_terminal()) {
            return BatchStatus::Processing;
        }

        if events.iter().any(|e| e.status() == EventStatus::Completed) {
            BatchStatus::Completed
        } else {
            BatchStatus::Failed
        }
    }

    /// Move the batch to the status its events call for.
    ///
    /// Reopens a finished batch whose events were reset and starts one that
    /// is still Uploaded before applying the terminal transition. Returns
    /// `Ok(false)` when the batch already has the right status.
    pub fn apply_completion_status(&mut self, events: &[ProcessingEvent]) -> Result<bool, DomainError> {
        let target = Self::determine_completion_status(events);
        if target == self.status {
            return Ok(false);
        }

        let before = self.clone();
        let applied = self.transition_to(target, events.len());
        if applied.is_err() {
            *self = before;
        }
        applied.map(|_| true)
    }

    fn transition_to(&mut self, target: BatchStatus, event_count: usize) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            self.reopen()?;
        }
        if self.status == BatchStatus::Uploaded {
            self.start()?;
        }

        match target {
            BatchStatus::Completed => self.complete(),
            BatchStatus::Failed if event_count == 0 => self.fail("Batch has no events"),
            BatchStatus::Failed => self.fail(format!("All {} events failed", event_count)),
            BatchStatus::Uploaded | BatchStatus::Processing => Ok(()),
        }
    }

    pub fn progress(&self, events: &[ProcessingEvent]) -> BatchProgress {
        let successful = events
            .iter()
            .filter(|e| e.status() == EventStatus::Completed)
            .count() as i32;
        let failed = events
            .iter()
            .filter(|e| e.status() == EventStatus::Failed)
            .count() as i32;
        let processed = successful + failed;

        let percentage_complete = if self.total_events > 0 {
            f64::from(processed) * 100.0 / f64::from(self.total_events)
        } else {
            0.0
        };

        BatchProgress {
            batch_id: self.id,
            status: self.status,
            total_events: self.total_events,
            processed_events: processed,
            successful_events: successful,
            failed_events: failed,
            percentage_complete,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Progress snapshot computed from a batch and its events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub total_events: i32,
    pub processed_events: i32,
    pub successful_events: i32,
    pub failed_events: i32,
    pub percentage_complete: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
