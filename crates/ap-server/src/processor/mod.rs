//! Event processor
//!
//! A single long-lived task that repeatedly claims pending events, runs them
//! through their action handlers and settles the batches they belong to.
//! Several processes may run it against one database; the claim query keeps
//! their work disjoint and the batch version token keeps their batch updates
//! consistent.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::{stream, FutureExt, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ProcessorConfig;
use crate::dispatch::ActionHandlerRegistry;
use crate::domain::{ActionResult, BatchStatus, EventStatus, ProcessingEvent};
use crate::retry::{retry_on_conflict, CONFLICT_RETRY_ATTEMPTS, CONFLICT_RETRY_STEP};
use crate::store::{BatchWithEvents, Store, StoreError, StoreResult};

/// Attempts at persisting one event outcome before it is left to stale reclaim
const OUTCOME_WRITE_ATTEMPTS: u32 = 3;

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Batches that reached Completed or Failed during the cycle
    pub batches_settled: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.claimed == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
}

/// Polls the event queue and drives events to a terminal state
pub struct EventProcessor {
    store: Arc<dyn Store>,
    registry: Arc<ActionHandlerRegistry>,
    config: ProcessorConfig,
}

impl EventProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<ActionHandlerRegistry>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Run cycles until `cancel` fires.
    ///
    /// A failed cycle is logged and the loop carries on after the poll
    /// interval. Events already handed to a handler when cancellation fires
    /// see it through their child token.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            batch_size = self.config.batch_size,
            max_concurrency = self.config.max_concurrency,
            action_types = ?self.registry.action_types(),
            "Event processor started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_cycle(&cancel).await {
                Ok(report) if report.is_idle() => debug!("No pending events"),
                Ok(report) => info!(
                    claimed = report.claimed,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    batches_settled = report.batches_settled,
                    "Processing cycle finished"
                ),
                Err(e) => error!(error = %e, "Processing cycle failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        info!("Event processor stopped");
    }

    /// One claim, dispatch and settle pass
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> StoreResult<CycleReport> {
        self.reclaim_stale().await?;

        let claimed = self.store.claim_pending_events(self.config.batch_size).await?;
        let mut report = CycleReport {
            claimed: claimed.len(),
            ..CycleReport::default()
        };
        if claimed.is_empty() {
            return Ok(report);
        }

        let batch_ids: BTreeSet<Uuid> = claimed.iter().map(ProcessingEvent::batch_id).collect();
        debug!(events = claimed.len(), batches = batch_ids.len(), "Claimed events");

        for &batch_id in &batch_ids {
            let started = retry_on_conflict(CONFLICT_RETRY_ATTEMPTS, CONFLICT_RETRY_STEP, |_| {
                self.begin_batch(batch_id)
            })
            .await;

            match started {
                Ok(true) => {},
                Ok(false) => warn!(%batch_id, "Could not mark batch as processing after repeated version conflicts"),
                Err(e) => error!(%batch_id, error = %e, "Failed to mark batch as processing"),
            }
        }

        let outcomes: Vec<Option<Outcome>> = stream::iter(claimed)
            .map(|event| self.process_event(event, cancel))
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Outcome::Succeeded => report.succeeded += 1,
                Outcome::Failed => report.failed += 1,
            }
        }

        for &batch_id in &batch_ids {
            match self.settle(batch_id).await {
                Ok(Some(status)) if status.is_terminal() => report.batches_settled += 1,
                Ok(_) => {},
                Err(e) => error!(%batch_id, error = %e, "Failed to settle batch"),
            }
        }

        Ok(report)
    }

    async fn reclaim_stale(&self) -> StoreResult<()> {
        let Some(timeout) = self.config.stale_event_timeout() else {
            return Ok(());
        };
        let Some(cutoff) = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(());
        };

        let released = self.store.reclaim_stale_events(cutoff).await?;
        if released > 0 {
            warn!(released, %cutoff, "Released stale event claims");
        }
        Ok(())
    }

    /// One optimistic attempt at moving a batch into Processing.
    /// A finished batch with freshly claimed events is reopened.
    async fn begin_batch(&self, batch_id: Uuid) -> StoreResult<bool> {
        let Some(mut batch) = self.store.get_batch(batch_id).await? else {
            return Err(StoreError::not_found("batch", batch_id));
        };

        match batch.status() {
            BatchStatus::Processing => return Ok(true),
            BatchStatus::Uploaded => batch.start()?,
            BatchStatus::Completed | BatchStatus::Failed => batch.reopen()?,
        }

        self.store.try_update_batch(&mut batch).await
    }

    /// Execute one claimed event and persist its outcome.
    ///
    /// Never propagates: handler faults, panics and store errors are logged
    /// so the rest of the cycle goes on. `None` means no outcome was
    /// recorded, either because the claim was released under us or because
    /// the store kept failing.
    async fn process_event(&self, mut event: ProcessingEvent, cancel: &CancellationToken) -> Option<Outcome> {
        let event_id = event.id();
        let result = self.execute(&event, cancel).await;

        let transition = match result {
            ActionResult::Success { response } => event.complete(response),
            ActionResult::Failure { message } => {
                debug!(%event_id, error = %message, "Event failed");
                event.fail(message)
            },
        };
        if let Err(e) = transition {
            error!(%event_id, error = %e, "Claimed event is in an unexpected state");
            return None;
        }

        match self.record_outcome(&event).await {
            Ok(true) => {},
            Ok(false) => {
                warn!(%event_id, "Claim was released before the outcome was recorded, discarding it");
                return None;
            },
            Err(e) => {
                error!(%event_id, error = %e, "Failed to record event outcome");
                return None;
            },
        }

        match event.status() {
            EventStatus::Completed => Some(Outcome::Succeeded),
            _ => Some(Outcome::Failed),
        }
    }

    /// Write the outcome under the event's claim, retrying store errors a
    /// few times with linear backoff
    async fn record_outcome(&self, event: &ProcessingEvent) -> StoreResult<bool> {
        let mut attempt = 1;
        loop {
            match self.store.record_outcome(event).await {
                Err(e) if attempt < OUTCOME_WRITE_ATTEMPTS => {
                    warn!(event_id = %event.id(), attempt, error = %e, "Recording event outcome failed, retrying");
                    tokio::time::sleep(CONFLICT_RETRY_STEP * attempt).await;
                    attempt += 1;
                },
                result => return result,
            }
        }
    }

    /// Resolve the handler and run it, folding every fault into a failure
    async fn execute(&self, event: &ProcessingEvent, cancel: &CancellationToken) -> ActionResult {
        let Some(handler) = self.registry.get(event.action_type()) else {
            warn!(event_id = %event.id(), action_type = event.action_type(), "No handler registered");
            return ActionResult::failure(format!(
                "No handler found for action type: {}",
                event.action_type()
            ));
        };

        let data = event.event_data();
        let call = AssertUnwindSafe(handler.execute(&data, cancel.child_token())).catch_unwind();

        match call.await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(event_id = %event.id(), error = %e, "Action handler fault");
                ActionResult::failure(format!("Processing error: {e}"))
            },
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(event_id = %event.id(), panic = %reason, "Action handler panicked");
                ActionResult::failure(format!("Processing error: {reason}"))
            },
        }
    }

    /// Bring the batch status in line with its events, retrying on version
    /// conflicts. Returns the status left in the store, or `None` when every
    /// attempt conflicted and the next cycle has to finish the job.
    async fn settle(&self, batch_id: Uuid) -> StoreResult<Option<BatchStatus>> {
        let settled = retry_on_conflict(CONFLICT_RETRY_ATTEMPTS, CONFLICT_RETRY_STEP, |attempt| {
            self.settle_once(batch_id, attempt)
        })
        .await?;

        if !settled {
            warn!(%batch_id, "Batch update kept conflicting, deferring to next cycle");
            return Ok(None);
        }

        Ok(self.store.get_batch(batch_id).await?.map(|b| b.status()))
    }

    async fn settle_once(&self, batch_id: Uuid, attempt: u32) -> StoreResult<bool> {
        let Some(BatchWithEvents { mut batch, events }) = self.store.get_batch_with_events(batch_id).await? else {
            return Err(StoreError::not_found("batch", batch_id));
        };

        if !batch.apply_completion_status(&events)? {
            return Ok(true);
        }

        let applied = self.store.try_update_batch(&mut batch).await?;
        if !applied {
            debug!(%batch_id, attempt, "Batch version conflict");
        } else if batch.status().is_terminal() {
            info!(
                %batch_id,
                status = %batch.status(),
                events = events.len(),
                "Batch finished"
            );
        }
        Ok(applied)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
