//! Page/offset handling for listing queries

use serde::{Deserialize, Serialize};

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PaginationError {
    #[error("Page must be greater than 0")]
    InvalidPage,

    #[error("Per page must be between 1 and {MAX_PER_PAGE}")]
    InvalidPerPage,
}

/// 1-indexed page request. Missing values fall back to page 1 and
/// [`DEFAULT_PER_PAGE`] rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<i64>,
}

impl PaginationParams {
    pub fn new(page: Option<i64>, per_page: Option<i64>) -> Self {
        Self { page, per_page }
    }

    pub fn page(&self) -> i64 {
        self.page.map_or(1, |p| p.max(1))
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.map_or(DEFAULT_PER_PAGE, |n| n.clamp(1, MAX_PER_PAGE))
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.per_page())
    }

    /// `(skip, take)` for the store, taking one row past the page so the
    /// caller can tell whether a next page exists
    pub fn lookahead_window(&self) -> (i64, i64) {
        (self.offset(), self.per_page() + 1)
    }

    pub fn validate(&self) -> Result<(), PaginationError> {
        if self.page.is_some_and(|p| p < 1) {
            return Err(PaginationError::InvalidPage);
        }
        if self.per_page.is_some_and(|n| !(1..=MAX_PER_PAGE).contains(&n)) {
            return Err(PaginationError::InvalidPerPage);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_window() {
        let params = PaginationParams::default();
        assert_eq!((params.page(), params.per_page()), (1, DEFAULT_PER_PAGE));
        assert_eq!(params.lookahead_window(), (0, DEFAULT_PER_PAGE + 1));

        let params = PaginationParams::new(Some(3), Some(50));
        assert_eq!(params.lookahead_window(), (100, 51));
    }

    #[test]
    fn test_out_of_range_values() {
        assert!(PaginationParams::new(Some(1), Some(MAX_PER_PAGE)).validate().is_ok());
        assert_eq!(
            PaginationParams::new(Some(0), None).validate(),
            Err(PaginationError::InvalidPage)
        );
        assert_eq!(
            PaginationParams::new(None, Some(MAX_PER_PAGE + 1)).validate(),
            Err(PaginationError::InvalidPerPage)
        );
        // accessors clamp even when validation is skipped
        assert_eq!(PaginationParams::new(Some(-4), Some(0)).per_page(), 1);
    }
}
