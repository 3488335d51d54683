//! Owner admission status

pub mod queries;

pub use queries::{CheckOwnerStatusError, CheckOwnerStatusQuery, CheckOwnerStatusResponse};
