pub mod reclaim_stale;
pub mod retry_failed;

pub use reclaim_stale::{ReclaimStaleEventsCommand, ReclaimStaleEventsError, ReclaimStaleEventsResponse};
pub use retry_failed::{RetryFailedEventsCommand, RetryFailedEventsError, RetryFailedEventsResponse};
