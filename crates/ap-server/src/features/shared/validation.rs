//! Shared validation utilities
//!
//! ```rust,ignore
//! use ap_server::features::shared::validation::{validate_owner, validate_upload_file_name};
//!
//! validate_owner("ops@example.com")?;
//! validate_upload_file_name("events.csv")?;
//! ```

use thiserror::Error;

/// Longest owner identifier accepted (an e-mail address)
pub const MAX_OWNER_LENGTH: usize = 320;

/// Largest accepted upload, in bytes (100 MiB)
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Accepted upload file extensions, lowercase
pub const ALLOWED_EXTENSIONS: &[&str] = &["csv", "txt"];

/// Errors that can occur during owner validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OwnerValidationError {
    #[error("Owner is required and cannot be empty")]
    Required,

    #[error("Owner must be at most {max_length} characters")]
    TooLong { max_length: usize },
}

/// Errors that can occur during upload file validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FileValidationError {
    #[error("File name is required")]
    NameRequired,

    #[error("Only CSV and TXT files are supported")]
    UnsupportedExtension,

    #[error("File cannot be empty")]
    Empty,

    #[error("File size cannot exceed 100MB")]
    TooLarge,
}

/// Validate an owner identifier
///
/// # Rules
/// - Must not be empty or whitespace
/// - Must not exceed [`MAX_OWNER_LENGTH`] characters
pub fn validate_owner(owner: &str) -> Result<(), OwnerValidationError> {
    if owner.trim().is_empty() {
        return Err(OwnerValidationError::Required);
    }

    if owner.chars().count() > MAX_OWNER_LENGTH {
        return Err(OwnerValidationError::TooLong {
            max_length: MAX_OWNER_LENGTH,
        });
    }

    Ok(())
}

/// Validate the name of an uploaded file (extension check is case-insensitive)
pub fn validate_upload_file_name(file_name: &str) -> Result<(), FileValidationError> {
    if file_name.trim().is_empty() {
        return Err(FileValidationError::NameRequired);
    }

    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(FileValidationError::UnsupportedExtension),
    }
}

/// Validate the size of an uploaded file
pub fn validate_upload_size(len: usize) -> Result<(), FileValidationError> {
    if len == 0 {
        return Err(FileValidationError::Empty);
    }

    if len > MAX_UPLOAD_BYTES {
        return Err(FileValidationError::TooLarge);
    }

    Ok(())
}
