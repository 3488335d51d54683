//! Batch uploads: ingestion and status

pub mod commands;
pub mod queries;

pub use commands::{UploadBatchCommand, UploadBatchError, UploadBatchResponse};
pub use queries::{
    BatchListItem, GetBatchStatusError, GetBatchStatusQuery, GetBatchStatusResponse,
    ListBatchesError, ListBatchesQuery, ListBatchesResponse,
};
