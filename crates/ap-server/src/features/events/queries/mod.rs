pub mod failed;

pub use failed::{FailedEventItem, GetFailedEventsError, GetFailedEventsQuery, GetFailedEventsResponse};
