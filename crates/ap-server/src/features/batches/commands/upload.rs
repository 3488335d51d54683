//! Upload batch command
//!
//! Turns an uploaded file into a batch and its pending events. The owner must
//! not have another batch in flight: a batch that is still Uploaded or
//! Processing, or any Pending/Processing event, blocks a new upload.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{BatchStatus, BatchUpload, DomainError, ProcessingEvent};
use crate::features::shared::validation::{
    validate_owner, validate_upload_file_name, validate_upload_size, FileValidationError,
    OwnerValidationError,
};
use crate::ingest::{parse_upload, SkippedRow};
use crate::store::{BatchStore, StoreError};

/// Recorded on a batch whose file produced no events
pub const NO_VALID_EVENTS: &str = "No valid events found in file.";

/// Command to ingest an uploaded file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadBatchCommand {
    /// Name of the file as uploaded
    pub file_name: String,

    /// Uploader identity, usually an e-mail address
    pub owner: String,

    /// Raw file content
    #[serde(skip)]
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadBatchResponse {
    pub batch_id: Uuid,
    pub original_file_name: String,
    pub status: BatchStatus,
    pub total_events: i32,
    pub skipped_rows: Vec<SkippedRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadBatchError {
    #[error("File validation failed: {0}")]
    File(#[from] FileValidationError),

    #[error("Owner validation failed: {0}")]
    Owner(#[from] OwnerValidationError),

    #[error("File is not valid UTF-8 text")]
    InvalidEncoding,

    #[error("Owner already has a batch in progress: '{file_name}' ({batch_id})")]
    ActiveBatch { batch_id: Uuid, file_name: String },

    #[error("Owner still has events waiting to be processed")]
    UnfinishedEvents,

    #[error("Invalid batch state: {0}")]
    Domain(#[from] DomainError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl UploadBatchCommand {
    pub fn new(file_name: impl Into<String>, owner: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            owner: owner.into(),
            content,
        }
    }

    /// Validates the command parameters
    ///
    /// # Errors
    ///
    /// - File name must be present and end in `.csv` or `.txt`
    /// - Content must be non-empty and at most 100 MiB
    /// - Owner must be present
    pub fn validate(&self) -> Result<(), UploadBatchError> {
        validate_upload_file_name(&self.file_name)?;
        validate_upload_size(self.content.len())?;
        validate_owner(&self.owner)?;
        Ok(())
    }
}

/// Ingest the file: admission check, parse, then one atomic insert of the
/// batch and all of its events.
#[tracing::instrument(
    skip(store, command),
    fields(
        file_name = %command.file_name,
        owner = %command.owner,
        size = command.content.len()
    )
)]
pub async fn handle<S>(
    store: &S,
    command: UploadBatchCommand,
) -> Result<UploadBatchResponse, UploadBatchError>
where
    S: BatchStore + ?Sized,
{
    command.validate()?;

    let owner = command.owner.trim();

    if let Some(active) = store.find_active_batch(owner).await? {
        tracing::warn!(active_batch_id = %active.id(), "Upload blocked by active batch");
        return Err(UploadBatchError::ActiveBatch {
            batch_id: active.id(),
            file_name: active.original_file_name().to_string(),
        });
    }

    if store.has_unfinished_events(owner).await? {
        tracing::warn!("Upload blocked by unfinished events");
        return Err(UploadBatchError::UnfinishedEvents);
    }

    let content = std::str::from_utf8(&command.content).map_err(|_| UploadBatchError::InvalidEncoding)?;
    let parsed = parse_upload(content);

    let file_size = i64::try_from(command.content.len()).unwrap_or(i64::MAX);
    let mut batch = BatchUpload::new(command.file_name.as_str(), file_size, owner);

    if parsed.rows.is_empty() {
        batch.fail(NO_VALID_EVENTS)?;
        store.create_batch(&batch, &[]).await?;

        tracing::warn!(
            batch_id = %batch.id(),
            skipped = parsed.skipped.len(),
            "Upload produced no valid events"
        );

        return Ok(UploadBatchResponse {
            batch_id: batch.id(),
            original_file_name: batch.original_file_name().to_string(),
            status: batch.status(),
            total_events: 0,
            skipped_rows: parsed.skipped,
            error_message: Some(NO_VALID_EVENTS.to_string()),
        });
    }

    let events: Vec<ProcessingEvent> = parsed
        .rows
        .into_iter()
        .map(|row| ProcessingEvent::new(batch.id(), row))
        .collect();
    let total_events = i32::try_from(events.len()).unwrap_or(i32::MAX);
    batch.set_total_events(total_events)?;

    store.create_batch(&batch, &events).await?;

    tracing::info!(
        batch_id = %batch.id(),
        events = total_events,
        skipped = parsed.skipped.len(),
        "Batch uploaded"
    );

    Ok(UploadBatchResponse {
        batch_id: batch.id(),
        original_file_name: batch.original_file_name().to_string(),
        status: batch.status(),
        total_events,
        skipped_rows: parsed.skipped,
        error_message: None,
    })
}
