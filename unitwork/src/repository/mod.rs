//! Backend-agnostic query description
//!
//! Everything a caller needs to say *what* to read or write, without naming a
//! backend:
//!
//! - **Criteria**: [`FilterCriterion`], [`FilterOperator`], [`FilterValue`]
//! - **Builder**: [`Identifier`], an immutable fluent accumulator of criteria
//! - **Pagination**: the [`pagination`] normalizer and the [`Pagination`] window
//! - **Query parameters**: [`QueryParams`] and the [`QuerySpec`] contract
//! - **Entities**: [`Entity`] and its embedded [`Record`]
//! - **Errors**: [`RepositoryError`]
//!
//! # Example
//!
//! ```rust
//! use unitwork::repository::{FilterCriterion, Identifier, QueryParams};
//!
//! // (role = admin OR role = owner) AND active = true
//! let role = Identifier::new()
//!     .equal("role", "admin")
//!     .or(&Identifier::new().equal("role", "owner"));
//! let filter = Identifier::new()
//!     .push(FilterCriterion::group(role.to_filter_criteria()))
//!     .and(&Identifier::new().equal("active", true));
//!
//! let mut params = QueryParams::new().with_filters(Some(&filter)).add_sort_asc("name");
//! params.prepare_defaults();
//! assert_eq!(params.filters.len(), 2);
//! ```

mod criteria;
mod entity;
mod error;
mod identifier;
pub mod pagination;
mod query;
mod traits;

pub use criteria::{
    validate_criteria, FilterCriterion, FilterOperator, FilterValue, LogicalOperator,
};
pub use entity::{Entity, Record, DELETED_AT_FIELD, ID_FIELD, SLUG_FIELD};
pub use error::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
pub use identifier::Identifier;
pub use pagination::Pagination;
pub use query::{DeletedVisibility, QueryParams, QuerySpec, SortField, SortOrder};
pub use traits::{Page, RelationLoader, RepositoryResult};
