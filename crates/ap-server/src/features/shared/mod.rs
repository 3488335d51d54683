//! Shared utilities for commands and queries

pub mod pagination;
pub mod validation;

#[cfg(test)]
pub mod test_helpers;
