//! Processing events: failure inspection and recovery

pub mod commands;
pub mod queries;

pub use commands::{
    ReclaimStaleEventsCommand, ReclaimStaleEventsError, ReclaimStaleEventsResponse,
    RetryFailedEventsCommand, RetryFailedEventsError, RetryFailedEventsResponse,
};
pub use queries::{FailedEventItem, GetFailedEventsError, GetFailedEventsQuery, GetFailedEventsResponse};
