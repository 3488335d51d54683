pub mod get_status;
pub mod list;

pub use get_status::{GetBatchStatusError, GetBatchStatusQuery, GetBatchStatusResponse};
pub use list::{BatchListItem, ListBatchesError, ListBatchesQuery, ListBatchesResponse};
