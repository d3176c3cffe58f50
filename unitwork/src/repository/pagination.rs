//! Pagination normalization
//!
//! Callers may page with `offset`/`limit` or with `page`/`page_size`. The three
//! functions here reconcile both styles into one canonical window and are always
//! composed in the same order:
//!
//! 1. [`normalize`]: offset/limit wins when `offset >= 0 && limit > 0`
//! 2. [`validate_bounds`]: clamp to `1..` pages and `1..=max` page sizes
//! 3. [`compute_offset_limit`]: produce the `(offset, limit)` the backend sees
//!
//! ```rust
//! use unitwork::repository::pagination::{compute_offset_limit, normalize, validate_bounds};
//!
//! let by_offset = normalize(40, 20, 0, 0);
//! let by_page = normalize(-1, 0, 3, 20);
//! assert_eq!(by_offset, by_page);
//!
//! let (page, size) = validate_bounds(by_page.0, by_page.1, 200);
//! assert_eq!(compute_offset_limit(page, size), (40, 20));
//! ```

/// Page size used whenever none (or a non-positive one) is supplied
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Ceiling applied by [`validate_bounds`] when the caller passes a non-positive maximum
pub const MAX_PAGE_SIZE: i64 = 200;

/// Reconcile the two parameterizations into `(page, page_size)`
pub fn normalize(offset: i64, limit: i64, page: i64, page_size: i64) -> (i64, i64) {
    if offset >= 0 && limit > 0 {
        return ((offset / limit).saturating_add(1), limit);
    }
    default_page(page, page_size)
}

/// Clamp a page to `page >= 1` and `1 <= page_size <= max_page_size`
pub fn validate_bounds(page: i64, page_size: i64, max_page_size: i64) -> (i64, i64) {
    let max_page_size = if max_page_size <= 0 {
        MAX_PAGE_SIZE
    } else {
        max_page_size
    };
    let (page, page_size) = default_page(page, page_size);
    (page, page_size.min(max_page_size))
}

/// Turn a page into the `(offset, limit)` window
pub fn compute_offset_limit(page: i64, page_size: i64) -> (i64, i64) {
    let (page, page_size) = default_page(page, page_size);
    ((page - 1).saturating_mul(page_size), page_size)
}

fn default_page(page: i64, page_size: i64) -> (i64, i64) {
    let page = if page < 1 { 1 } else { page };
    let page_size = if page_size < 1 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size
    };
    (page, page_size)
}

/// The resolved window a backend applies to a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Number of records to skip
    pub offset: u64,
    /// Maximum number of records to return
    pub limit: u64,
}

impl Pagination {
    #[must_use]
    pub const fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// A window holding only the first record
    #[must_use]
    pub const fn first() -> Self {
        Self::new(0, 1)
    }

    /// Window for a 1-indexed page, after running the normalization pipeline
    #[must_use]
    pub fn page(page: i64, page_size: i64) -> Self {
        let (page, page_size) = validate_bounds(page, page_size, MAX_PAGE_SIZE);
        let (offset, limit) = compute_offset_limit(page, page_size);
        Self::from_offset_limit(offset, limit)
    }

    /// Convert a computed `(offset, limit)` pair; negatives clamp to zero
    #[must_use]
    pub fn from_offset_limit(offset: i64, limit: i64) -> Self {
        Self::new(
            u64::try_from(offset).unwrap_or(0),
            u64::try_from(limit).unwrap_or(0),
        )
    }
}
