//! Query parameters for list operations
//!
//! [`QueryParams`] bundles filters, sort, search, soft-delete visibility,
//! pagination and preload hints. Translators never look at it directly; they
//! consume the [`QuerySpec`] trait, which [`Identifier`] implements as well.
//!
//! ```rust
//! use unitwork::repository::{DeletedVisibility, Identifier, QueryParams};
//!
//! let mut params = QueryParams::new()
//!     .with_page(2)
//!     .with_page_size(25)
//!     .add_sort_desc("created_at")
//!     .with_filters(Some(&Identifier::new().equal("status", "active")))
//!     .include_deleted_records();
//! params.prepare_defaults();
//!
//! assert_eq!(params.computed_offset(), 25);
//! assert_eq!(params.computed_limit(), 25);
//! assert_eq!(params.visibility(), DeletedVisibility::Include);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::criteria::FilterCriterion;
use super::identifier::Identifier;
use super::pagination::{
    compute_offset_limit, normalize, validate_bounds, Pagination, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "asc"),
            Self::Desc => write!(f, "desc"),
        }
    }
}

impl SortOrder {
    /// SQL `ORDER BY` keyword
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    /// Document-store sort direction (`1` / `-1`)
    #[must_use]
    pub const fn as_direction(&self) -> i32 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }
}

/// One entry of an ordered sort specification; the first entry is primary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortField {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, SortOrder::Asc)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, SortOrder::Desc)
    }
}

/// Which records a read sees with respect to the `deleted_at` marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletedVisibility {
    /// Only records without a deletion marker
    #[default]
    Exclude,
    /// All records regardless of the marker
    Include,
    /// Only records with a deletion marker
    Only,
}

impl DeletedVisibility {
    /// `only_deleted` wins over `include_deleted`
    pub fn from_flags(include_deleted: bool, only_deleted: bool) -> Self {
        match (include_deleted, only_deleted) {
            (_, true) => Self::Only,
            (true, false) => Self::Include,
            (false, false) => Self::Exclude,
        }
    }
}

/// Statically typed view of everything a translator needs from a query
pub trait QuerySpec {
    fn filters(&self) -> &[FilterCriterion];

    fn sort(&self) -> &[SortField] {
        &[]
    }

    /// Non-empty search term, if any
    fn search(&self) -> Option<&str> {
        None
    }

    fn visibility(&self) -> DeletedVisibility {
        DeletedVisibility::Exclude
    }

    fn preloads(&self) -> &[String] {
        &[]
    }
}

impl QuerySpec for Identifier {
    fn filters(&self) -> &[FilterCriterion] {
        self.criteria()
    }
}

/// Pagination, filtering, sorting, search, visibility and preload hints
///
/// `computed_offset`/`computed_limit` are derived by
/// [`QueryParams::prepare_defaults`] and are never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryParams {
    pub page: i64,
    pub page_size: i64,
    pub offset: i64,
    pub limit: i64,
    #[serde(skip)]
    computed_offset: i64,
    #[serde(skip)]
    computed_limit: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub search: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortField>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterCriterion>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub include_deleted: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub only_deleted: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub preloads: Vec<String>,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            offset: 0,
            limit: 0,
            computed_offset: 0,
            computed_limit: DEFAULT_PAGE_SIZE,
            search: String::new(),
            sort: Vec::new(),
            filters: Vec::new(),
            include_deleted: false,
            only_deleted: false,
            preloads: Vec::new(),
        }
    }
}

impl QueryParams {
    /// Page 1 of 50, no filters, deleted records excluded
    pub fn new() -> Self {
        Self::default()
    }

    /// Run normalize, validate (max 200) and compute in place
    ///
    /// Idempotent: calling it again yields the same state.
    pub fn prepare_defaults(&mut self) -> &mut Self {
        self.prepare_defaults_with_max(MAX_PAGE_SIZE)
    }

    /// [`QueryParams::prepare_defaults`] with a configured page-size ceiling
    pub fn prepare_defaults_with_max(&mut self, max_page_size: i64) -> &mut Self {
        let (page, page_size) = normalize(self.offset, self.limit, self.page, self.page_size);
        let (page, page_size) = validate_bounds(page, page_size, max_page_size);
        self.page = page;
        self.page_size = page_size;
        let (offset, limit) = compute_offset_limit(page, page_size);
        self.computed_offset = offset;
        self.computed_limit = limit;
        self
    }

    pub fn computed_offset(&self) -> i64 {
        self.computed_offset
    }

    pub fn computed_limit(&self) -> i64 {
        self.computed_limit
    }

    /// Window derived by the last [`QueryParams::prepare_defaults`]
    pub fn window(&self) -> Pagination {
        Pagination::from_offset_limit(self.computed_offset, self.computed_limit)
    }

    #[must_use]
    pub fn with_page(mut self, page: i64) -> Self {
        self.page = page;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Replace filters with the identifier's current criteria; `None` is a no-op
    #[must_use]
    pub fn with_filters(mut self, identifier: Option<&Identifier>) -> Self {
        if let Some(identifier) = identifier {
            self.filters = identifier.to_filter_criteria();
        }
        self
    }

    #[must_use]
    pub fn add_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortField::new(field, order));
        self
    }

    #[must_use]
    pub fn add_sort_asc(self, field: impl Into<String>) -> Self {
        self.add_sort(field, SortOrder::Asc)
    }

    #[must_use]
    pub fn add_sort_desc(self, field: impl Into<String>) -> Self {
        self.add_sort(field, SortOrder::Desc)
    }

    #[must_use]
    pub fn clear_sort(mut self) -> Self {
        self.sort.clear();
        self
    }

    #[must_use]
    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = term.into();
        self
    }

    #[must_use]
    pub fn with_preloads<I, S>(mut self, preloads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preloads = preloads.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn add_preload(mut self, preload: impl Into<String>) -> Self {
        self.preloads.push(preload.into());
        self
    }

    /// Set both visibility flags as given; `only_deleted` still wins when both are set
    #[must_use]
    pub fn with_deleted_visibility(mut self, include_deleted: bool, only_deleted: bool) -> Self {
        self.include_deleted = include_deleted;
        self.only_deleted = only_deleted;
        self
    }

    #[must_use]
    pub fn include_deleted_records(self) -> Self {
        self.with_deleted_visibility(true, false)
    }

    #[must_use]
    pub fn only_deleted_records(self) -> Self {
        self.with_deleted_visibility(false, true)
    }

    #[must_use]
    pub fn exclude_deleted_records(self) -> Self {
        self.with_deleted_visibility(false, false)
    }

    pub fn has_search(&self) -> bool {
        !self.search.is_empty()
    }

    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    pub fn has_sort(&self) -> bool {
        !self.sort.is_empty()
    }

    pub fn has_preloads(&self) -> bool {
        !self.preloads.is_empty()
    }
}

impl QuerySpec for QueryParams {
    fn filters(&self) -> &[FilterCriterion] {
        &self.filters
    }

    fn sort(&self) -> &[SortField] {
        &self.sort
    }

    fn search(&self) -> Option<&str> {
        self.has_search().then_some(self.search.as_str())
    }

    fn visibility(&self) -> DeletedVisibility {
        DeletedVisibility::from_flags(self.include_deleted, self.only_deleted)
    }

    fn preloads(&self) -> &[String] {
        &self.preloads
    }
}
