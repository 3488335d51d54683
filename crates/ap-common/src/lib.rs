//! Action Processor Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging setup for the Action Processor workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`ApError`] and the [`Result`] alias used by parsers
//!   and other code that has no database dependency
//! - **Logging**: [`logging::init_logging`] configures the global `tracing`
//!   subscriber from a [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use ap_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> ap_common::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("worker starting");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{ApError, Result};
