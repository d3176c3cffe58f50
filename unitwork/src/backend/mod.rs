//! Storage backends
//!
//! A [`Backend`] is the narrow set of primitives the unit of work needs from a
//! store: transaction control plus six data operations over JSON documents,
//! each filtered by the backend's own native predicate. Entities are converted
//! to and from [`serde_json::Value`] by the caller, so a backend never sees a
//! concrete entity type.
//!
//! Every data operation takes an optional transaction. With `Some`, the
//! operation runs inside it; with `None`, it runs directly against the store.
//!
//! Two implementations ship with the crate:
//!
//! - [`PostgresBackend`] (feature `database`): `sqlx` pool, rows mapped
//!   through `to_jsonb` / `jsonb_populate_record`
//! - [`MemoryDocumentStore`]: in-process collections of JSON documents with
//!   snapshot transactions

mod memory;
#[cfg(feature = "database")]
mod postgres;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::repository::{Pagination, RepositoryResult, SortField};
use crate::translate::FilterTranslator;

pub use memory::{MemoryDocumentStore, MemoryTransaction};
#[cfg(feature = "database")]
pub use postgres::PostgresBackend;

/// Native predicate type of a backend
pub type PredicateOf<B> = <<B as Backend>::Translator as FilterTranslator>::Predicate;

/// Store primitives used by [`UnitOfWork`](crate::UnitOfWork)
///
/// Uses RPITIT so implementors write plain `async fn`.
pub trait Backend: Send + Sync {
    /// Translator producing this backend's predicates
    type Translator: FilterTranslator;

    /// Open transaction handle
    type Transaction: Send;

    /// Short name for logs
    fn name(&self) -> &'static str;

    fn translator(&self) -> &Self::Translator;

    fn begin(&self) -> impl Future<Output = RepositoryResult<Self::Transaction>> + Send;

    fn commit(&self, tx: Self::Transaction) -> impl Future<Output = RepositoryResult<()>> + Send;

    fn rollback(&self, tx: Self::Transaction)
        -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Matching documents in `sort` order, windowed when `window` is set
    fn find(
        &self,
        tx: Option<&mut Self::Transaction>,
        collection: &str,
        predicate: &<Self::Translator as FilterTranslator>::Predicate,
        sort: &[SortField],
        window: Option<Pagination>,
    ) -> impl Future<Output = RepositoryResult<Vec<Value>>> + Send;

    fn count(
        &self,
        tx: Option<&mut Self::Transaction>,
        collection: &str,
        predicate: &<Self::Translator as FilterTranslator>::Predicate,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    fn insert(
        &self,
        tx: Option<&mut Self::Transaction>,
        collection: &str,
        document: &Value,
    ) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Overwrite every matching document with `document`; returns the match count
    fn replace(
        &self,
        tx: Option<&mut Self::Transaction>,
        collection: &str,
        predicate: &<Self::Translator as FilterTranslator>::Predicate,
        document: &Value,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Set or clear the soft-delete marker on every match
    fn set_deleted_at(
        &self,
        tx: Option<&mut Self::Transaction>,
        collection: &str,
        predicate: &<Self::Translator as FilterTranslator>::Predicate,
        deleted_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Physically remove every match
    fn delete(
        &self,
        tx: Option<&mut Self::Transaction>,
        collection: &str,
        predicate: &<Self::Translator as FilterTranslator>::Predicate,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;
}
