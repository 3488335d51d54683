//! Feature slices: the commands and queries the CLI exposes
//!
//! Each slice follows the same shape:
//! - `commands/` - write operations (upload, retry, reclaim)
//! - `queries/` - read operations that never mutate state
//!
//! A command or query is a plain data struct with a `validate()` method and a
//! standalone `handle(store, request)` function holding the logic. Handlers
//! are generic over [`crate::store::Store`], so they run unchanged against
//! PostgreSQL or the in-memory store.
//!
//! # Features
//!
//! - **batches**: upload a file as a batch, inspect and list batches
//! - **events**: list failed events, retry them, reclaim stale claims
//! - **owners**: admission status of an uploader

pub mod batches;
pub mod events;
pub mod owners;
pub mod shared;
