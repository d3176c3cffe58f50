//! # unitwork
//!
//! Backend-agnostic persistence: describe *what* to read or write once, run it
//! against PostgreSQL or a document store.
//!
//! ## Features
//!
//! - **Filter criteria**: [`Identifier`](repository::Identifier), an immutable
//!   fluent builder over fourteen operators, with AND/OR chaining and nested groups
//! - **Pagination**: offset/limit and page/page-size reconciled into one window
//! - **Query parameters**: filters, sort, search, soft-delete visibility and
//!   preload hints in one serializable aggregate
//! - **Translators**: one combination algorithm, two native outputs
//!   ([`SqlPredicate`](translate::SqlPredicate) and
//!   [`DocumentFilter`](translate::DocumentFilter))
//! - **Unit of work**: transactional CRUD, soft delete/restore and bulk
//!   operations over any [`Backend`](backend::Backend)
//!
//! ## Example
//!
//! ```rust,no_run
//! use unitwork::prelude::*;
//! # use serde::{Deserialize, Serialize};
//! # #[derive(Debug, Clone, Serialize, Deserialize)]
//! # struct User { #[serde(flatten)] record: Record, email: String, age: i64 }
//! # impl Entity for User {
//! #     const COLLECTION: &'static str = "users";
//! #     fn record(&self) -> &Record { &self.record }
//! #     fn record_mut(&mut self) -> &mut Record { &mut self.record }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let db = config.database.as_ref().ok_or_else(|| Error::Internal("no database".into()))?;
//!     let backend = PostgresBackend::connect(db).await?;
//!     let mut users = UnitOfWork::<_, User>::new(backend).with_pagination(config.pagination.clone());
//!
//!     let adults = Identifier::new().greater_or_equal("age", 18);
//!     let params = QueryParams::new()
//!         .with_filters(Some(&adults))
//!         .add_sort_asc("email")
//!         .with_page_size(20);
//!
//!     let page = users.find_all_with_pagination(&params).await?;
//!     tracing::info!(total = page.total, "adults");
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
#[cfg(feature = "database")]
pub mod database;
pub mod error;
pub mod observability;
pub mod repository;
pub mod translate;
pub mod unit_of_work;

pub use error::{Error, Result};
pub use unit_of_work::{UnitOfWork, UnitOfWorkFactory};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::{Backend, MemoryDocumentStore};
    #[cfg(feature = "database")]
    pub use crate::backend::PostgresBackend;

    pub use crate::config::{Config, DatabaseConfig, LoggingConfig, PaginationConfig};
    pub use crate::error::{Error, Result};
    pub use crate::observability::init_tracing;

    pub use crate::repository::{
        DeletedVisibility, Entity, FilterCriterion, FilterOperator, FilterValue, Identifier,
        LogicalOperator, Page, QueryParams, QuerySpec, Record, RelationLoader, RepositoryError,
        RepositoryErrorKind, RepositoryResult, SortField, SortOrder,
    };

    pub use crate::translate::{DocumentFilter, DocumentTranslator, FilterTranslator};
    #[cfg(feature = "database")]
    pub use crate::translate::{SqlPredicate, SqlTranslator};

    pub use crate::unit_of_work::{UnitOfWork, UnitOfWorkFactory};

    pub use async_trait::async_trait;
}
