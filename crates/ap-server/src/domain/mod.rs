//! Batch and event entities
//!
//! The entities own their lifecycle rules. Every transition is a method that
//! either applies the change or returns [`DomainError::InvalidState`] and
//! leaves the entity untouched. Nothing in this module performs I/O.

pub mod action;
pub mod batch;
pub mod event;

pub use action::{ActionResult, EventData};
pub use batch::{BatchProgress, BatchStatus, BatchUpload};
pub use event::{EventStatus, ProcessingEvent, DEFAULT_MAX_RETRIES};

use thiserror::Error;

/// Rejected entity transition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Cannot {action} {entity} in {status} status")]
    InvalidState {
        entity: &'static str,
        action: &'static str,
        status: String,
    },

    #[error("Unknown {entity} status code: {code}")]
    UnknownStatus { entity: &'static str, code: i16 },
}

impl DomainError {
    pub(crate) fn invalid_state(
        entity: &'static str,
        action: &'static str,
        status: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidState {
            entity,
            action,
            status: status.to_string(),
        }
    }
}
