//! Action Processor Server Library
//!
//! Turns uploaded batch files into processing events and drives each event
//! through an external action.
//!
//! # Overview
//!
//! - **Ingestion**: a delimited text file becomes a [`domain::BatchUpload`]
//!   and one [`domain::ProcessingEvent`] per valid row, inserted atomically
//! - **Processing**: [`processor::EventProcessor`] claims pending events with
//!   `FOR UPDATE SKIP LOCKED`, routes them through the
//!   [`dispatch::ActionHandlerRegistry`] and settles their batches
//! - **Recovery**: failed events can be reset for another pass, stale claims
//!   released back to the queue
//!
//! # Architecture
//!
//! The feature layer follows a **CQRS** split:
//!
//! - **Commands** change state: upload a batch, retry failed events, reclaim
//!   stale claims
//! - **Queries** only read: batch status, failed events, owner status, batch
//!   listing
//!
//! Persistence sits behind the [`store::EventStore`] and [`store::BatchStore`]
//! traits. [`store::PgStore`] is the production backend;
//! [`store::MemoryStore`] backs the test suite.
//!
//! Batch rows carry a `version` token. Every batch write is a
//! compare-and-increment, and writers that lose the race reload and reapply
//! their change through [`retry::retry_on_conflict`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ap_server::{config::Config, db, dispatch, processor::EventProcessor, store::PgStore};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     let store = Arc::new(PgStore::new(pool));
//!
//!     let mut registry = dispatch::ActionHandlerRegistry::new();
//!     registry.register(Arc::new(dispatch::SampleActionHandler::new()))?;
//!
//!     let processor = EventProcessor::new(store, Arc::new(registry), config.processor);
//!     processor.run(CancellationToken::new()).await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod domain;
pub mod features;
pub mod ingest;
pub mod processor;
pub mod retry;
pub mod store;

pub use config::Config;
pub use processor::{CycleReport, EventProcessor};
pub use store::{StoreError, StoreResult};
