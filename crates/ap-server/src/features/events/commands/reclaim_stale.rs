//! Reclaim stale events command
//!
//! Releases events that have sat in Processing longer than the given age back
//! to Pending. Use it after a worker died mid-cycle; a live worker's claims
//! are younger than any sensible cutoff.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{EventStore, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimStaleEventsCommand {
    /// Minimum age of a claim, in seconds, before it is released
    pub older_than_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimStaleEventsResponse {
    pub events_released: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ReclaimStaleEventsError {
    #[error("older_than_secs must be greater than 0")]
    InvalidAge,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl ReclaimStaleEventsCommand {
    pub fn validate(&self) -> Result<(), ReclaimStaleEventsError> {
        if self.older_than_secs == 0 || i64::try_from(self.older_than_secs).is_err() {
            return Err(ReclaimStaleEventsError::InvalidAge);
        }
        Ok(())
    }
}

#[tracing::instrument(skip(store), fields(older_than_secs = command.older_than_secs))]
pub async fn handle<S>(
    store: &S,
    command: ReclaimStaleEventsCommand,
) -> Result<ReclaimStaleEventsResponse, ReclaimStaleEventsError>
where
    S: EventStore + ?Sized,
{
    command.validate()?;

    let age = i64::try_from(command.older_than_secs).map_err(|_| ReclaimStaleEventsError::InvalidAge)?;
    let cutoff = Utc::now() - Duration::seconds(age);

    let released = store.reclaim_stale_events(cutoff).await?;

    if released > 0 {
        tracing::warn!(released, %cutoff, "Released stale event claims");
    } else {
        tracing::debug!("No stale event claims");
    }

    Ok(ReclaimStaleEventsResponse {
        events_released: released,
    })
}
