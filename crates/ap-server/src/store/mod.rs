//! Persistence contracts for the durable work queue
//!
//! The processor only talks to storage through [`EventStore`] and
//! [`BatchStore`]. Two implementations ship with the crate:
//!
//! - [`postgres::PgStore`]: row locking with `FOR UPDATE SKIP LOCKED` for
//!   claims and a `version` column for optimistic batch updates
//! - [`memory::MemoryStore`]: a mutex-guarded in-process queue with the same
//!   semantics, used by tests and dry runs
//!
//! # Concurrency rules
//!
//! - A claimed event is owned by exactly one claimant. Its outcome is written
//!   only while the stored row still carries that claim (Processing with the
//!   same `started_at`); a claim released by stale reclaim is refused.
//! - Batches are written by whichever claimant settles them, so batch writes
//!   compare-and-increment `version` and report a conflict as `Ok(false)`.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{BatchProgress, BatchUpload, DomainError, ProcessingEvent};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Storage operation errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored row is inconsistent: {0}")]
    Domain(#[from] DomainError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Duplicate(String),
}

impl StoreError {
    pub fn not_found(resource_type: &str, id: Uuid) -> Self {
        Self::NotFound(format!("{} '{}' not found", resource_type, id))
    }

    pub fn duplicate(resource_type: &str, id: Uuid) -> Self {
        Self::Duplicate(format!("{} '{}' already exists", resource_type, id))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A batch loaded together with every event it owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchWithEvents {
    pub batch: BatchUpload,
    pub events: Vec<ProcessingEvent>,
}

impl BatchWithEvents {
    pub fn progress(&self) -> BatchProgress {
        self.batch.progress(&self.events)
    }

    pub fn has_unfinished_events(&self) -> bool {
        self.events.iter().any(|e| !e.is_terminal())
    }
}

/// Scope of a failed-event listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "value", rename_all = "snake_case")]
pub enum FailedEventFilter {
    All,
    Batch(Uuid),
    Owner(String),
}

/// Queue operations on processing events
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Claim up to `limit` pending events, oldest first.
    ///
    /// The selection and the switch to Processing happen in one transaction
    /// with rows locked `FOR UPDATE SKIP LOCKED`, so concurrent claimants
    /// never receive the same event. Returned events are already Processing.
    async fn claim_pending_events(&self, limit: usize) -> StoreResult<Vec<ProcessingEvent>>;

    /// Persist an event unconditionally
    async fn update_event(&self, event: &ProcessingEvent) -> StoreResult<()>;

    /// Persist the outcome of a claimed event.
    ///
    /// The write lands only if the stored event is still Processing under the
    /// claim `event` was handed, identified by its `started_at`. Returns
    /// `Ok(false)` when that claim has since been released or re-claimed.
    async fn record_outcome(&self, event: &ProcessingEvent) -> StoreResult<bool>;

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<ProcessingEvent>>;

    /// Failed events in scope, most recently failed first
    async fn failed_events(&self, filter: &FailedEventFilter) -> StoreResult<Vec<ProcessingEvent>>;

    /// Release events stuck in Processing since before `started_before`.
    /// Returns how many were released.
    async fn reclaim_stale_events(&self, started_before: DateTime<Utc>) -> StoreResult<u64>;
}

/// Batch persistence with optimistic concurrency
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Insert a batch and all of its events atomically
    async fn create_batch(&self, batch: &BatchUpload, events: &[ProcessingEvent]) -> StoreResult<()>;

    async fn get_batch(&self, id: Uuid) -> StoreResult<Option<BatchUpload>>;

    async fn get_batch_with_events(&self, id: Uuid) -> StoreResult<Option<BatchWithEvents>>;

    /// Write `batch` if its `version` still matches the stored one.
    ///
    /// On success the stored and in-memory versions are both incremented and
    /// `Ok(true)` is returned. A concurrent writer yields `Ok(false)`; the
    /// caller should reload and reapply its change.
    async fn try_update_batch(&self, batch: &mut BatchUpload) -> StoreResult<bool>;

    /// Batches newest first, optionally restricted to one owner
    async fn list_batches(
        &self,
        owner: Option<&str>,
        skip: i64,
        take: i64,
    ) -> StoreResult<Vec<BatchUpload>>;

    /// The owner's batch that is still Uploaded or Processing, if any
    async fn find_active_batch(&self, owner: &str) -> StoreResult<Option<BatchUpload>>;

    /// Whether any of the owner's events is Pending or Processing
    async fn has_unfinished_events(&self, owner: &str) -> StoreResult<bool>;
}

/// Both store halves behind one object, as the processor and the command
/// handlers need them
pub trait Store: EventStore + BatchStore {}

impl<T: EventStore + BatchStore + ?Sized> Store for T {}
