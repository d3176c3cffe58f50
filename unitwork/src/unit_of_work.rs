//! Transactional CRUD and soft-delete lifecycle over a [`Backend`]
//!
//! A [`UnitOfWork`] is bound to one backend and one entity type. It is either
//! idle or holds one open transaction; while a transaction is open every
//! operation runs inside it.
//!
//! ```text
//! idle --begin_transaction--> active --commit_transaction / rollback_transaction--> idle
//! ```
//!
//! Reads default to live records (no `deleted_at`). Trash operations
//! ([`UnitOfWork::get_trashed`], [`UnitOfWork::restore`]) look only at
//! trashed records, and [`UnitOfWork::hard_delete`] ignores the marker.
//!
//! Several units of work can share one transaction: begin it through a
//! [`UnitOfWorkFactory`], hand it to each unit with
//! [`UnitOfWork::attach_transaction`], take it back with
//! [`UnitOfWork::detach_transaction`] and finish it through the factory.
//!
//! Bulk operations run the singular operation per element in order and stop
//! at the first failure. Elements already applied stay applied unless the
//! caller opened a transaction around the call and rolls it back.
//!
//! # Example
//!
//! ```rust
//! # use serde::{Deserialize, Serialize};
//! # use unitwork::prelude::*;
//! # #[derive(Debug, Clone, Serialize, Deserialize)]
//! # struct Task { #[serde(flatten)] record: Record, title: String }
//! # impl Entity for Task {
//! #     const COLLECTION: &'static str = "tasks";
//! #     fn record(&self) -> &Record { &self.record }
//! #     fn record_mut(&mut self) -> &mut Record { &mut self.record }
//! # }
//! # tokio_test_block(async {
//! let mut uow = UnitOfWork::<_, Task>::new(MemoryDocumentStore::new());
//!
//! uow.begin_transaction().await?;
//! let task = uow
//!     .insert(Task { record: Record::default(), title: "write docs".into() })
//!     .await?;
//! uow.commit_transaction().await?;
//!
//! let by_id = Identifier::new().equal("id", task.id());
//! uow.soft_delete(&by_id).await?;
//! assert!(uow.find_one_by_id(task.id()).await.is_err());
//!
//! uow.restore(&by_id).await?;
//! assert_eq!(uow.find_one_by_id(task.id()).await?.title, "write docs");
//! # Ok::<(), RepositoryError>(())
//! # });
//! # fn tokio_test_block<F: std::future::Future<Output = RepositoryResult<()>>>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f).unwrap();
//! # }
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;

use chrono::{DurationRound, TimeDelta, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::backend::{Backend, PredicateOf};
use crate::config::PaginationConfig;
use crate::repository::{
    validate_criteria, DeletedVisibility, Entity, FilterCriterion, FilterValue, Identifier, Page,
    Pagination, QueryParams, QuerySpec, RelationLoader, RepositoryError, RepositoryOperation,
    RepositoryResult, SortField, ID_FIELD, SLUG_FIELD,
};
use crate::translate::FilterTranslator;

/// Orchestrates reads and writes of `E` against backend `B`
pub struct UnitOfWork<B: Backend, E: Entity> {
    backend: B,
    tx: Option<B::Transaction>,
    loaders: HashMap<String, Box<dyn RelationLoader<E>>>,
    pagination: PaginationConfig,
    _entity: PhantomData<fn() -> E>,
}

impl<B: Backend, E: Entity> UnitOfWork<B, E> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            tx: None,
            loaders: HashMap::new(),
            pagination: PaginationConfig::default(),
            _entity: PhantomData,
        }
    }

    /// Page-size policy applied by the paginated reads
    #[must_use]
    pub fn with_pagination(mut self, pagination: PaginationConfig) -> Self {
        self.pagination = pagination;
        self
    }

    /// Register the loader answering to `loader.relation()`; replaces any previous one
    #[must_use]
    pub fn with_relation_loader(mut self, loader: impl RelationLoader<E> + 'static) -> Self {
        self.loaders
            .insert(loader.relation().to_string(), Box::new(loader));
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    // ------------------------------------------------------------------
    // Transaction management
    // ------------------------------------------------------------------

    pub async fn begin_transaction(&mut self) -> RepositoryResult<()> {
        if self.tx.is_some() {
            return Err(RepositoryError::transaction_state(
                "transaction already in progress",
            ));
        }
        self.tx = Some(self.backend.begin().await?);
        tracing::debug!(backend = self.backend.name(), collection = E::COLLECTION, "transaction started");
        Ok(())
    }

    /// Commit the open transaction; the unit of work is idle afterwards even on failure
    pub async fn commit_transaction(&mut self) -> RepositoryResult<()> {
        let Some(tx) = self.tx.take() else {
            return Err(RepositoryError::transaction_state(
                "no active transaction to commit",
            ));
        };
        self.backend.commit(tx).await?;
        tracing::debug!(backend = self.backend.name(), collection = E::COLLECTION, "transaction committed");
        Ok(())
    }

    /// Roll back the open transaction; no-op when idle
    pub async fn rollback_transaction(&mut self) -> RepositoryResult<()> {
        if let Some(tx) = self.tx.take() {
            self.backend.rollback(tx).await?;
            tracing::debug!(backend = self.backend.name(), collection = E::COLLECTION, "transaction rolled back");
        }
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Run subsequent operations inside `tx`, begun elsewhere
    ///
    /// Hands `tx` back untouched when a transaction is already open.
    pub fn attach_transaction(&mut self, tx: B::Transaction) -> Result<(), B::Transaction> {
        if self.tx.is_some() {
            return Err(tx);
        }
        self.tx = Some(tx);
        tracing::debug!(backend = self.backend.name(), collection = E::COLLECTION, "transaction attached");
        Ok(())
    }

    /// Release the open transaction without finishing it; the unit is idle afterwards
    pub fn detach_transaction(&mut self) -> Option<B::Transaction> {
        self.tx.take()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Every live record
    pub async fn find_all(&mut self) -> RepositoryResult<Vec<E>> {
        let predicate = self.scoped(&[], DeletedVisibility::Exclude);
        self.fetch(&predicate, &[], None, RepositoryOperation::FindAll)
            .await
    }

    /// One page plus the total count of the unpaged query
    ///
    /// `params` is not modified; a copy is normalized against the configured
    /// page-size policy before use.
    pub async fn find_all_with_pagination(
        &mut self,
        params: &QueryParams,
    ) -> RepositoryResult<Page<E>> {
        let params = self.prepared(params);
        validate(&params.filters, RepositoryOperation::FindAll)?;
        let predicate = self.backend.translator().translate(&params);
        tracing::debug!(collection = E::COLLECTION, predicate = ?predicate, page = params.page, page_size = params.page_size, "paged read");

        let total = self
            .backend
            .count(self.tx.as_mut(), E::COLLECTION, &predicate)
            .await?;
        let mut items = self
            .fetch(
                &predicate,
                &params.sort,
                Some(params.window()),
                RepositoryOperation::FindAll,
            )
            .await?;
        self.preload(&mut items, &params.preloads).await?;

        Ok(Page {
            items,
            total,
            page: params.page,
            page_size: params.page_size,
        })
    }

    /// First record matching `query` in its sort order
    ///
    /// Search, visibility and preloads of `query` apply.
    pub async fn find_one<Q: QuerySpec + ?Sized>(&mut self, query: &Q) -> RepositoryResult<E> {
        validate(query.filters(), RepositoryOperation::FindOne)?;
        let predicate = self.backend.translator().translate(query);
        let mut found = self
            .fetch(
                &predicate,
                query.sort(),
                Some(Pagination::first()),
                RepositoryOperation::FindOne,
            )
            .await?;
        self.preload(&mut found, query.preloads()).await?;
        found
            .pop()
            .ok_or_else(|| RepositoryError::not_found(E::COLLECTION, describe(query.filters())))
    }

    /// First live record matching `identifier`
    pub async fn find_one_by_identifier(&mut self, identifier: &Identifier) -> RepositoryResult<E> {
        self.find_one(identifier).await
    }

    pub async fn find_one_by_id(&mut self, id: Uuid) -> RepositoryResult<E> {
        self.find_one(&Identifier::new().equal(ID_FIELD, id)).await
    }

    pub async fn find_one_by_slug(&mut self, slug: &str) -> RepositoryResult<E> {
        self.find_one(&Identifier::new().equal(SLUG_FIELD, slug)).await
    }

    /// Number of records matching filters, search and visibility; pagination is ignored
    pub async fn count(&mut self, params: &QueryParams) -> RepositoryResult<u64> {
        validate(&params.filters, RepositoryOperation::Count)?;
        let predicate = self.backend.translator().translate(params);
        self.backend
            .count(self.tx.as_mut(), E::COLLECTION, &predicate)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Count))
    }

    /// Whether any live record matches `identifier`
    pub async fn exists(&mut self, identifier: &Identifier) -> RepositoryResult<bool> {
        validate(identifier.criteria(), RepositoryOperation::Exists)?;
        let predicate = self.scoped(identifier.criteria(), DeletedVisibility::Exclude);
        let count = self
            .backend
            .count(self.tx.as_mut(), E::COLLECTION, &predicate)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Exists))?;
        Ok(count > 0)
    }

    /// Id of the live record whose `field` equals `value`
    pub async fn resolve_id_by_unique_field(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> RepositoryResult<Uuid> {
        let entity = self
            .find_one(&Identifier::new().equal(field, value))
            .await?;
        Ok(entity.id())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Persist a new record
    ///
    /// Stamps `created_at`/`updated_at`, generates a UUIDv7 id and a slug when
    /// absent and sets `version` to 1 when unset.
    pub async fn insert(&mut self, mut entity: E) -> RepositoryResult<E> {
        let now = now();
        let record = entity.record_mut();
        if !record.has_id() {
            record.id = Uuid::now_v7();
        }
        if record.slug.is_empty() {
            record.slug = format!("{}-{}", E::COLLECTION, record.id.simple());
        }
        record.created_at = now;
        record.updated_at = now;
        if record.version == 0 {
            record.version = 1;
        }

        let document = encode(&entity, RepositoryOperation::Insert)?;
        self.backend
            .insert(self.tx.as_mut(), E::COLLECTION, &document)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Insert))?;
        tracing::debug!(collection = E::COLLECTION, id = %entity.id(), "inserted");
        Ok(entity)
    }

    /// Overwrite the live record matching `identifier` with `entity`
    ///
    /// The stored id, `created_at` and soft-delete marker are kept; the slug
    /// and version are kept when `entity` leaves them unset. `version` is not
    /// compared.
    pub async fn update(&mut self, identifier: &Identifier, mut entity: E) -> RepositoryResult<E> {
        let existing = self
            .find_one(identifier)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Update))?;
        let existing = existing.record();

        let record = entity.record_mut();
        record.id = existing.id;
        record.created_at = existing.created_at;
        record.deleted_at = existing.deleted_at;
        if record.slug.is_empty() {
            record.slug = existing.slug.clone();
        }
        if record.version == 0 {
            record.version = existing.version;
        }
        record.updated_at = now();

        let document = encode(&entity, RepositoryOperation::Update)?;
        let predicate = self.by_id(entity.id(), DeletedVisibility::Include);
        self.backend
            .replace(self.tx.as_mut(), E::COLLECTION, &predicate, &document)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Update))?;
        tracing::debug!(collection = E::COLLECTION, id = %entity.id(), "updated");
        Ok(entity)
    }

    /// Soft-delete every live record matching `identifier`; returns the number marked
    pub async fn delete(&mut self, identifier: &Identifier) -> RepositoryResult<u64> {
        validate(identifier.criteria(), RepositoryOperation::SoftDelete)?;
        self.mark(identifier, DeletedVisibility::Exclude, true).await
    }

    /// Soft-delete the live records matching `identifier`
    ///
    /// Fails with not-found when nothing live matches. Returns the first
    /// match as it was before deletion.
    pub async fn soft_delete(&mut self, identifier: &Identifier) -> RepositoryResult<E> {
        let snapshot = self
            .find_one(identifier)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::SoftDelete))?;
        self.mark(identifier, DeletedVisibility::Exclude, true).await?;
        Ok(snapshot)
    }

    /// Physically remove every record matching `identifier`, trashed or not
    ///
    /// Returns the first match as it was before removal.
    pub async fn hard_delete(&mut self, identifier: &Identifier) -> RepositoryResult<E> {
        validate(identifier.criteria(), RepositoryOperation::HardDelete)?;
        let predicate = self.scoped(identifier.criteria(), DeletedVisibility::Include);
        let snapshot = self
            .fetch(
                &predicate,
                &[],
                Some(Pagination::first()),
                RepositoryOperation::HardDelete,
            )
            .await?
            .pop()
            .ok_or_else(|| {
                RepositoryError::not_found(E::COLLECTION, identifier.to_string())
                    .with_operation(RepositoryOperation::HardDelete)
            })?;

        let removed = self
            .backend
            .delete(self.tx.as_mut(), E::COLLECTION, &predicate)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::HardDelete))?;
        tracing::debug!(collection = E::COLLECTION, removed, "hard deleted");
        Ok(snapshot)
    }

    // ------------------------------------------------------------------
    // Trash
    // ------------------------------------------------------------------

    /// Every trashed record
    pub async fn get_trashed(&mut self) -> RepositoryResult<Vec<E>> {
        let predicate = self.scoped(&[], DeletedVisibility::Only);
        self.fetch(&predicate, &[], None, RepositoryOperation::FindAll)
            .await
    }

    /// [`UnitOfWork::find_all_with_pagination`] restricted to trashed records
    pub async fn get_trashed_with_pagination(
        &mut self,
        params: Option<&QueryParams>,
    ) -> RepositoryResult<Page<E>> {
        let params = params.cloned().unwrap_or_default().only_deleted_records();
        self.find_all_with_pagination(&params).await
    }

    /// Clear the marker on the trashed records matching `identifier`
    ///
    /// Fails with not-found when nothing trashed matches. Returns the first
    /// match re-read after restoring.
    pub async fn restore(&mut self, identifier: &Identifier) -> RepositoryResult<E> {
        validate(identifier.criteria(), RepositoryOperation::Restore)?;
        let predicate = self.scoped(identifier.criteria(), DeletedVisibility::Only);
        let trashed = self
            .fetch(
                &predicate,
                &[],
                Some(Pagination::first()),
                RepositoryOperation::Restore,
            )
            .await?
            .pop()
            .ok_or_else(|| {
                RepositoryError::not_found(E::COLLECTION, identifier.to_string())
                    .with_operation(RepositoryOperation::Restore)
            })?;

        self.backend
            .set_deleted_at(self.tx.as_mut(), E::COLLECTION, &predicate, None)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Restore))?;

        self.find_one_by_id(trashed.id())
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Restore))
    }

    /// Clear the marker on every trashed record; returns the number restored
    pub async fn restore_all(&mut self) -> RepositoryResult<u64> {
        let predicate = self.scoped(&[], DeletedVisibility::Only);
        let restored = self
            .backend
            .set_deleted_at(self.tx.as_mut(), E::COLLECTION, &predicate, None)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Restore))?;
        tracing::debug!(collection = E::COLLECTION, restored, "restored all");
        Ok(restored)
    }

    // ------------------------------------------------------------------
    // Bulk
    // ------------------------------------------------------------------

    pub async fn bulk_insert(&mut self, entities: Vec<E>) -> RepositoryResult<Vec<E>> {
        let mut inserted = Vec::with_capacity(entities.len());
        for entity in entities {
            inserted.push(self.insert(entity).await?);
        }
        Ok(inserted)
    }

    /// Update each entity by its own id
    pub async fn bulk_update(&mut self, entities: Vec<E>) -> RepositoryResult<Vec<E>> {
        let mut updated = Vec::with_capacity(entities.len());
        for entity in entities {
            let identifier = Identifier::new().equal(ID_FIELD, entity.id());
            updated.push(self.update(&identifier, entity).await?);
        }
        Ok(updated)
    }

    /// Soft-delete per identifier; returns the total number marked
    pub async fn bulk_soft_delete(&mut self, identifiers: &[Identifier]) -> RepositoryResult<u64> {
        let mut marked = 0;
        for identifier in identifiers {
            marked += self.delete(identifier).await?;
        }
        Ok(marked)
    }

    /// Hard-delete per identifier, trashed or not; returns the total number removed
    pub async fn bulk_hard_delete(&mut self, identifiers: &[Identifier]) -> RepositoryResult<u64> {
        let mut removed = 0;
        for identifier in identifiers {
            validate(identifier.criteria(), RepositoryOperation::HardDelete)?;
            let predicate = self.scoped(identifier.criteria(), DeletedVisibility::Include);
            removed += self
                .backend
                .delete(self.tx.as_mut(), E::COLLECTION, &predicate)
                .await
                .map_err(|e| e.with_operation(RepositoryOperation::HardDelete))?;
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn scoped(&self, criteria: &[FilterCriterion], visibility: DeletedVisibility) -> PredicateOf<B> {
        self.backend.translator().scoped(criteria, visibility)
    }

    fn by_id(&self, id: Uuid, visibility: DeletedVisibility) -> PredicateOf<B> {
        self.scoped(Identifier::new().equal(ID_FIELD, id).criteria(), visibility)
    }

    fn prepared(&self, params: &QueryParams) -> QueryParams {
        let mut params = params.clone();
        if params.page_size <= 0 && params.limit <= 0 {
            params.page_size = self.pagination.default_page_size;
        }
        params.prepare_defaults_with_max(self.pagination.max_page_size.max(1));
        params
    }

    async fn fetch(
        &mut self,
        predicate: &PredicateOf<B>,
        sort: &[SortField],
        window: Option<Pagination>,
        operation: RepositoryOperation,
    ) -> RepositoryResult<Vec<E>> {
        let documents = self
            .backend
            .find(self.tx.as_mut(), E::COLLECTION, predicate, sort, window)
            .await
            .map_err(|e| e.with_operation(operation))?;
        documents
            .into_iter()
            .map(|document| decode(document, operation))
            .collect()
    }

    async fn mark(
        &mut self,
        identifier: &Identifier,
        visibility: DeletedVisibility,
        deleted: bool,
    ) -> RepositoryResult<u64> {
        let predicate = self.scoped(identifier.criteria(), visibility);
        let marker = deleted.then(now);
        let marked = self
            .backend
            .set_deleted_at(self.tx.as_mut(), E::COLLECTION, &predicate, marker)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::SoftDelete))?;
        tracing::debug!(collection = E::COLLECTION, marked, "soft deleted");
        Ok(marked)
    }

    async fn preload(&self, entities: &mut [E], preloads: &[String]) -> RepositoryResult<()> {
        for relation in preloads {
            let Some(loader) = self.loaders.get(relation) else {
                return Err(RepositoryError::validation_failed(format!(
                    "no relation loader registered for preload '{}'",
                    relation
                ))
                .with_operation(RepositoryOperation::Preload));
            };
            loader
                .load(entities)
                .await
                .map_err(|e| e.with_operation(RepositoryOperation::Preload))?;
        }
        Ok(())
    }
}

/// Creates units of work over one backend and the transactions they share
///
/// ```rust
/// # use serde::{Deserialize, Serialize};
/// # use unitwork::prelude::*;
/// # #[derive(Debug, Clone, Serialize, Deserialize)]
/// # struct Order { #[serde(flatten)] record: Record }
/// # impl Entity for Order {
/// #     const COLLECTION: &'static str = "orders";
/// #     fn record(&self) -> &Record { &self.record }
/// #     fn record_mut(&mut self) -> &mut Record { &mut self.record }
/// # }
/// # #[derive(Debug, Clone, Serialize, Deserialize)]
/// # struct Invoice { #[serde(flatten)] record: Record }
/// # impl Entity for Invoice {
/// #     const COLLECTION: &'static str = "invoices";
/// #     fn record(&self) -> &Record { &self.record }
/// #     fn record_mut(&mut self) -> &mut Record { &mut self.record }
/// # }
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let factory = UnitOfWorkFactory::new(MemoryDocumentStore::new());
/// let mut orders = factory.unit_of_work::<Order>();
/// let mut invoices = factory.unit_of_work::<Invoice>();
///
/// let tx = factory.new_transaction().await?;
/// orders.attach_transaction(tx).ok();
/// orders.insert(Order { record: Record::default() }).await?;
///
/// let tx = orders.detach_transaction().expect("attached above");
/// invoices.attach_transaction(tx).ok();
/// invoices.insert(Invoice { record: Record::default() }).await?;
///
/// let tx = invoices.detach_transaction().expect("attached above");
/// factory.commit_transaction(tx).await?;
/// # Ok::<(), RepositoryError>(())
/// # }).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct UnitOfWorkFactory<B> {
    backend: B,
    pagination: PaginationConfig,
}

impl<B: Backend + Clone> UnitOfWorkFactory<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            pagination: PaginationConfig::default(),
        }
    }

    /// Page-size policy handed to every unit of work created afterwards
    #[must_use]
    pub fn with_pagination(mut self, pagination: PaginationConfig) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// An idle unit of work for `E` on this factory's backend
    pub fn unit_of_work<E: Entity>(&self) -> UnitOfWork<B, E> {
        UnitOfWork::new(self.backend.clone()).with_pagination(self.pagination.clone())
    }

    /// Begin a transaction that units of work can attach to
    pub async fn new_transaction(&self) -> RepositoryResult<B::Transaction> {
        let tx = self
            .backend
            .begin()
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Transaction))?;
        tracing::debug!(backend = self.backend.name(), "shared transaction started");
        Ok(tx)
    }

    pub async fn commit_transaction(&self, tx: B::Transaction) -> RepositoryResult<()> {
        self.backend
            .commit(tx)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Transaction))?;
        tracing::debug!(backend = self.backend.name(), "shared transaction committed");
        Ok(())
    }

    pub async fn rollback_transaction(&self, tx: B::Transaction) -> RepositoryResult<()> {
        self.backend
            .rollback(tx)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Transaction))?;
        tracing::debug!(backend = self.backend.name(), "shared transaction rolled back");
        Ok(())
    }
}

/// Current time truncated to microseconds, the resolution PostgreSQL stores
fn now() -> chrono::DateTime<Utc> {
    let now = Utc::now();
    now.duration_trunc(TimeDelta::microseconds(1)).unwrap_or(now)
}

fn validate(criteria: &[FilterCriterion], operation: RepositoryOperation) -> RepositoryResult<()> {
    validate_criteria(criteria).map_err(|e| e.with_operation(operation))
}

fn describe(criteria: &[FilterCriterion]) -> String {
    Identifier::from_criteria(criteria.to_vec()).to_string()
}

fn encode<E: Entity>(entity: &E, operation: RepositoryOperation) -> RepositoryResult<Value> {
    serde_json::to_value(entity)
        .map_err(|e| RepositoryError::serialization_error(operation, e.to_string()))
}

fn decode<E: Entity>(document: Value, operation: RepositoryOperation) -> RepositoryResult<E> {
    serde_json::from_value(document)
        .map_err(|e| RepositoryError::serialization_error(operation, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryDocumentStore;
    use crate::repository::{Record, RepositoryErrorKind};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Widget {
        #[serde(flatten)]
        record: Record,
        name: String,
        qty: i64,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    }

    impl Entity for Widget {
        const COLLECTION: &'static str = "widgets";

        fn record(&self) -> &Record {
            &self.record
        }

        fn record_mut(&mut self) -> &mut Record {
            &mut self.record
        }
    }

    fn widget(name: &str, qty: i64) -> Widget {
        Widget {
            record: Record::default(),
            name: name.to_string(),
            qty,
            tags: Vec::new(),
            label: None,
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Part {
        #[serde(flatten)]
        record: Record,
        widget: Uuid,
    }

    impl Entity for Part {
        const COLLECTION: &'static str = "parts";

        fn record(&self) -> &Record {
            &self.record
        }

        fn record_mut(&mut self) -> &mut Record {
            &mut self.record
        }
    }

    fn part(widget: &Widget) -> Part {
        Part {
            record: Record::default(),
            widget: widget.id(),
        }
    }

    fn uow() -> UnitOfWork<MemoryDocumentStore, Widget> {
        UnitOfWork::new(MemoryDocumentStore::new())
    }

    fn by_id(widget: &Widget) -> Identifier {
        Identifier::new().equal(ID_FIELD, widget.id())
    }

    async fn seeded(names: &[(&str, i64)]) -> (UnitOfWork<MemoryDocumentStore, Widget>, Vec<Widget>) {
        let mut uow = uow();
        let widgets = uow
            .bulk_insert(names.iter().map(|(n, q)| widget(n, *q)).collect())
            .await
            .unwrap();
        (uow, widgets)
    }

    struct LabelLoader;

    #[async_trait]
    impl RelationLoader<Widget> for LabelLoader {
        fn relation(&self) -> &str {
            "label"
        }

        async fn load(&self, widgets: &mut [Widget]) -> RepositoryResult<()> {
            for widget in widgets {
                widget.label = Some(widget.name.to_uppercase());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_insert_populates_bookkeeping() {
        let mut uow = uow();
        let inserted = uow.insert(widget("bolt", 3)).await.unwrap();

        assert!(inserted.record.has_id());
        assert_eq!(inserted.id().get_version_num(), 7);
        assert_eq!(
            inserted.record.slug,
            format!("widgets-{}", inserted.id().simple())
        );
        assert_eq!(inserted.record.version, 1);
        assert_eq!(inserted.record.created_at, inserted.record.updated_at);
        assert!(!inserted.record.is_deleted());

        let found = uow.find_one_by_id(inserted.id()).await.unwrap();
        assert_eq!(found.name, "bolt");
        assert_eq!(found.record, inserted.record);

        let by_slug = uow.find_one_by_slug(&inserted.record.slug).await.unwrap();
        assert_eq!(by_slug.id(), inserted.id());
    }

    #[tokio::test]
    async fn test_insert_keeps_supplied_id_and_slug() {
        let mut uow = uow();
        let mut w = widget("nut", 1);
        let id = Uuid::now_v7();
        w.record.id = id;
        w.record.slug = "the-nut".to_string();
        w.record.version = 4;

        let inserted = uow.insert(w).await.unwrap();
        assert_eq!(inserted.id(), id);
        assert_eq!(inserted.record.slug, "the-nut");
        assert_eq!(inserted.record.version, 4);
    }

    #[tokio::test]
    async fn test_transaction_state_machine() {
        let mut uow = uow();
        assert!(!uow.in_transaction());

        let err = uow.commit_transaction().await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::TransactionState);
        assert_eq!(err.message, "no active transaction to commit");

        uow.rollback_transaction().await.unwrap();

        uow.begin_transaction().await.unwrap();
        assert!(uow.in_transaction());
        let err = uow.begin_transaction().await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::TransactionState);
        assert_eq!(err.message, "transaction already in progress");

        uow.commit_transaction().await.unwrap();
        assert!(!uow.in_transaction());
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let mut uow = uow();
        uow.begin_transaction().await.unwrap();
        let w = uow.insert(widget("gear", 2)).await.unwrap();
        assert!(uow.find_one_by_id(w.id()).await.is_ok());
        uow.rollback_transaction().await.unwrap();

        let err = uow.find_one_by_id(w.id()).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(uow.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_committed_writes_are_visible_to_other_units() {
        let store = MemoryDocumentStore::new();
        let mut writer = UnitOfWork::<_, Widget>::new(store.clone());
        let mut reader = UnitOfWork::<_, Widget>::new(store);

        writer.begin_transaction().await.unwrap();
        let w = writer.insert(widget("cog", 1)).await.unwrap();
        assert!(reader.find_one_by_id(w.id()).await.is_err());

        writer.commit_transaction().await.unwrap();
        assert!(reader.find_one_by_id(w.id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_commit_keeps_writes_of_other_units() {
        let store = MemoryDocumentStore::new();
        let mut idle = UnitOfWork::<_, Widget>::new(store.clone());
        let mut other = UnitOfWork::<_, Widget>::new(store);

        idle.begin_transaction().await.unwrap();
        let w = other.insert(widget("cog", 1)).await.unwrap();
        idle.commit_transaction().await.unwrap();

        assert!(other.find_one_by_id(w.id()).await.is_ok());
        assert!(idle.find_one_by_id(w.id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_transactions_both_land() {
        let store = MemoryDocumentStore::new();
        let mut first = UnitOfWork::<_, Widget>::new(store.clone());
        let mut second = UnitOfWork::<_, Widget>::new(store);

        first.begin_transaction().await.unwrap();
        second.begin_transaction().await.unwrap();
        first.insert(widget("a", 1)).await.unwrap();
        second.insert(widget("b", 2)).await.unwrap();
        second.commit_transaction().await.unwrap();
        first.commit_transaction().await.unwrap();

        assert_eq!(first.find_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_shared_transaction_commits_both_collections() {
        let factory = UnitOfWorkFactory::new(MemoryDocumentStore::new());
        let mut widgets = factory.unit_of_work::<Widget>();
        let mut parts = factory.unit_of_work::<Part>();

        let tx = factory.new_transaction().await.unwrap();
        assert!(widgets.attach_transaction(tx).is_ok());
        let w = widgets.insert(widget("frame", 1)).await.unwrap();
        let tx = widgets.detach_transaction().unwrap();
        assert!(!widgets.in_transaction());

        assert!(parts.attach_transaction(tx).is_ok());
        let p = parts.insert(part(&w)).await.unwrap();
        let tx = parts.detach_transaction().unwrap();

        assert!(factory.backend().documents("widgets").await.is_empty());
        factory.commit_transaction(tx).await.unwrap();

        assert!(widgets.find_one_by_id(w.id()).await.is_ok());
        assert_eq!(parts.find_one_by_id(p.id()).await.unwrap().widget, w.id());
    }

    #[tokio::test]
    async fn test_shared_transaction_rolls_back_both_collections() {
        let factory = UnitOfWorkFactory::new(MemoryDocumentStore::new());
        let mut widgets = factory.unit_of_work::<Widget>();
        let mut parts = factory.unit_of_work::<Part>();

        let tx = factory.new_transaction().await.unwrap();
        assert!(widgets.attach_transaction(tx).is_ok());
        let w = widgets.insert(widget("frame", 1)).await.unwrap();
        let tx = widgets.detach_transaction().unwrap();
        assert!(parts.attach_transaction(tx).is_ok());
        parts.insert(part(&w)).await.unwrap();
        let tx = parts.detach_transaction().unwrap();

        factory.rollback_transaction(tx).await.unwrap();
        assert!(widgets.find_all().await.unwrap().is_empty());
        assert!(parts.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attach_refuses_when_busy() {
        let factory = UnitOfWorkFactory::new(MemoryDocumentStore::new());
        let mut widgets = factory.unit_of_work::<Widget>();
        widgets.begin_transaction().await.unwrap();

        let tx = factory.new_transaction().await.unwrap();
        let returned = widgets.attach_transaction(tx).unwrap_err();
        factory.rollback_transaction(returned).await.unwrap();
        assert!(widgets.in_transaction());
    }

    #[tokio::test]
    async fn test_soft_delete_round_trip() {
        let (mut uow, widgets) = seeded(&[("bolt", 1), ("nut", 2)]).await;
        let bolt = &widgets[0];

        let snapshot = uow.soft_delete(&by_id(bolt)).await.unwrap();
        assert_eq!(snapshot.id(), bolt.id());
        assert!(!snapshot.record.is_deleted());

        assert!(uow.find_one_by_id(bolt.id()).await.unwrap_err().is_not_found());
        assert!(!uow.exists(&by_id(bolt)).await.unwrap());
        assert_eq!(uow.find_all().await.unwrap().len(), 1);

        let trashed = uow.get_trashed().await.unwrap();
        assert_eq!(trashed.len(), 1);
        assert_eq!(trashed[0].id(), bolt.id());
        assert!(trashed[0].record.is_deleted());

        let restored = uow.restore(&by_id(bolt)).await.unwrap();
        assert!(!restored.record.is_deleted());
        assert!(uow.find_one_by_id(bolt.id()).await.is_ok());
        assert!(uow.get_trashed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_soft_delete_requires_live_match() {
        let (mut uow, widgets) = seeded(&[("bolt", 1)]).await;
        uow.soft_delete(&by_id(&widgets[0])).await.unwrap();

        let err = uow.soft_delete(&by_id(&widgets[0])).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.operation, RepositoryOperation::SoftDelete);
    }

    #[tokio::test]
    async fn test_restore_requires_trashed_match() {
        let (mut uow, widgets) = seeded(&[("bolt", 1)]).await;
        let err = uow.restore(&by_id(&widgets[0])).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.operation, RepositoryOperation::Restore);
    }

    #[tokio::test]
    async fn test_delete_marks_every_match() {
        let (mut uow, _) = seeded(&[("a", 1), ("b", 1), ("c", 5)]).await;
        let marked = uow.delete(&Identifier::new().equal("qty", 1)).await.unwrap();
        assert_eq!(marked, 2);
        assert_eq!(uow.get_trashed().await.unwrap().len(), 2);
        assert_eq!(uow.delete(&Identifier::new().equal("qty", 1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hard_delete_ignores_marker() {
        let (mut uow, widgets) = seeded(&[("bolt", 1), ("nut", 2)]).await;
        let bolt = &widgets[0];
        uow.soft_delete(&by_id(bolt)).await.unwrap();

        let removed = uow.hard_delete(&by_id(bolt)).await.unwrap();
        assert_eq!(removed.id(), bolt.id());
        assert!(uow.get_trashed().await.unwrap().is_empty());
        assert_eq!(uow.backend().documents("widgets").await.len(), 1);

        let err = uow.hard_delete(&by_id(bolt)).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.operation, RepositoryOperation::HardDelete);
    }

    #[tokio::test]
    async fn test_restore_all() {
        let (mut uow, _) = seeded(&[("a", 1), ("b", 2), ("c", 3)]).await;
        uow.delete(&Identifier::new().less_than("qty", 3)).await.unwrap();
        assert_eq!(uow.find_all().await.unwrap().len(), 1);

        assert_eq!(uow.restore_all().await.unwrap(), 2);
        assert_eq!(uow.find_all().await.unwrap().len(), 3);
        assert_eq!(uow.restore_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_preserves_identity() {
        let (mut uow, widgets) = seeded(&[("bolt", 1)]).await;
        let original = widgets[0].clone();

        let mut replacement = widget("hex bolt", 9);
        replacement.tags = vec!["m8".to_string()];
        let updated = uow.update(&by_id(&original), replacement).await.unwrap();

        assert_eq!(updated.id(), original.id());
        assert_eq!(updated.record.slug, original.record.slug);
        assert_eq!(updated.record.created_at, original.record.created_at);
        assert_eq!(updated.record.version, original.record.version);
        assert!(updated.record.updated_at >= original.record.updated_at);

        let stored = uow.find_one_by_id(original.id()).await.unwrap();
        assert_eq!(stored.name, "hex bolt");
        assert_eq!(stored.qty, 9);
        assert_eq!(stored.tags, vec!["m8".to_string()]);
        assert_eq!(uow.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let mut uow = uow();
        let err = uow
            .update(&Identifier::new().equal(ID_FIELD, Uuid::now_v7()), widget("x", 1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.operation, RepositoryOperation::Update);
    }

    #[tokio::test]
    async fn test_update_does_not_check_version() {
        let (mut uow, widgets) = seeded(&[("bolt", 1)]).await;
        let mut stale = widgets[0].clone();
        stale.record.version = 99;
        stale.name = "stale".to_string();

        let updated = uow.update(&by_id(&widgets[0]), stale).await.unwrap();
        assert_eq!(updated.record.version, 99);
    }

    #[tokio::test]
    async fn test_pagination_returns_page_and_total() {
        let names: Vec<(String, i64)> = (1..=7).map(|i| (format!("w{}", i), i)).collect();
        let names: Vec<(&str, i64)> = names.iter().map(|(n, q)| (n.as_str(), *q)).collect();
        let (mut uow, _) = seeded(&names).await;

        let params = QueryParams::new()
            .with_page(2)
            .with_page_size(3)
            .add_sort_desc("qty");
        let page = uow.find_all_with_pagination(&params).await.unwrap();

        assert_eq!(page.total, 7);
        assert_eq!(page.page, 2);
        assert_eq!(page.page_size, 3);
        let qty: Vec<i64> = page.items.iter().map(|w| w.qty).collect();
        assert_eq!(qty, vec![4, 3, 2]);
        assert!(page.has_next());

        // the caller's params are untouched
        assert_eq!(params.computed_offset(), 0);
    }

    #[tokio::test]
    async fn test_pagination_tolerates_extreme_offset() {
        let (mut uow, _) = seeded(&[("a", 1), ("b", 2)]).await;
        let params: QueryParams =
            serde_json::from_value(serde_json::json!({"offset": i64::MAX, "limit": 1})).unwrap();

        let page = uow.find_all_with_pagination(&params).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 2);
        assert_eq!(page.page, i64::MAX);
    }

    #[tokio::test]
    async fn test_pagination_offset_limit_and_filters() {
        let (mut uow, _) = seeded(&[("a", 1), ("b", 2), ("c", 3), ("d", 4)]).await;
        let params = QueryParams::new()
            .with_offset(1)
            .with_limit(1)
            .with_filters(Some(&Identifier::new().greater_than("qty", 1)))
            .add_sort_asc("qty");
        let page = uow.find_all_with_pagination(&params).await.unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.page, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].qty, 3);
    }

    #[tokio::test]
    async fn test_configured_page_size_ceiling() {
        let names: Vec<(String, i64)> = (0..5).map(|i| (format!("w{}", i), i)).collect();
        let names: Vec<(&str, i64)> = names.iter().map(|(n, q)| (n.as_str(), *q)).collect();
        let (uow, _) = seeded(&names).await;
        let mut uow = uow.with_pagination(PaginationConfig {
            default_page_size: 2,
            max_page_size: 3,
        });

        let page = uow
            .find_all_with_pagination(&QueryParams::new().with_page_size(50))
            .await
            .unwrap();
        assert_eq!(page.page_size, 3);
        assert_eq!(page.items.len(), 3);

        let page = uow
            .find_all_with_pagination(&QueryParams::new().with_page_size(0))
            .await
            .unwrap();
        assert_eq!(page.page_size, 2);
    }

    #[tokio::test]
    async fn test_trashed_pagination() {
        let (mut uow, widgets) = seeded(&[("a", 1), ("b", 2), ("c", 3)]).await;
        uow.soft_delete(&by_id(&widgets[1])).await.unwrap();

        let page = uow.get_trashed_with_pagination(None).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id(), widgets[1].id());

        let include = QueryParams::new().include_deleted_records();
        let page = uow.get_trashed_with_pagination(Some(&include)).await.unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_count_and_exists() {
        let (mut uow, widgets) = seeded(&[("a", 1), ("b", 2), ("c", 3)]).await;
        uow.soft_delete(&by_id(&widgets[0])).await.unwrap();

        assert_eq!(uow.count(&QueryParams::new()).await.unwrap(), 2);
        assert_eq!(
            uow.count(&QueryParams::new().include_deleted_records())
                .await
                .unwrap(),
            3
        );
        let params = QueryParams::new()
            .with_filters(Some(&Identifier::new().greater_or_equal("qty", 3)))
            .with_page_size(1);
        assert_eq!(uow.count(&params).await.unwrap(), 1);

        assert!(uow.exists(&Identifier::new().equal("name", "b")).await.unwrap());
        assert!(!uow.exists(&Identifier::new().equal("name", "zzz")).await.unwrap());
    }

    #[tokio::test]
    async fn test_resolve_id_by_unique_field() {
        let (mut uow, widgets) = seeded(&[("a", 1), ("b", 2)]).await;
        let id = uow.resolve_id_by_unique_field("name", "b").await.unwrap();
        assert_eq!(id, widgets[1].id());
        assert!(uow
            .resolve_id_by_unique_field("name", "nope")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_filter_value_fails_before_storage() {
        let (mut uow, _) = seeded(&[("a", 1)]).await;
        let mixed = Identifier::new().in_values(
            "qty",
            vec![FilterValue::Integer(1), FilterValue::String("x".to_string())],
        );
        let err = uow.exists(&mixed).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
        assert_eq!(err.operation, RepositoryOperation::Exists);
    }

    #[tokio::test]
    async fn test_bulk_operations() {
        let (mut uow, widgets) = seeded(&[("a", 1), ("b", 2), ("c", 3)]).await;
        assert_eq!(widgets.len(), 3);

        let renamed: Vec<Widget> = widgets
            .iter()
            .cloned()
            .map(|mut w| {
                w.qty *= 10;
                w
            })
            .collect();
        let updated = uow.bulk_update(renamed).await.unwrap();
        assert_eq!(updated.iter().map(|w| w.qty).sum::<i64>(), 60);

        let ids: Vec<Identifier> = widgets.iter().map(by_id).collect();
        assert_eq!(uow.bulk_soft_delete(&ids[..2]).await.unwrap(), 2);
        assert_eq!(uow.find_all().await.unwrap().len(), 1);

        assert_eq!(uow.bulk_hard_delete(&ids).await.unwrap(), 3);
        assert!(uow.backend().documents("widgets").await.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_failure_keeps_earlier_elements() {
        let mut uow = uow();
        let mut first = widget("a", 1);
        first.record.id = Uuid::now_v7();
        let duplicate = first.clone();

        let err = uow
            .bulk_insert(vec![first, duplicate, widget("c", 3)])
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::ConstraintViolation);
        assert_eq!(uow.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_failure_inside_transaction_can_be_rolled_back() {
        let mut uow = uow();
        let mut first = widget("a", 1);
        first.record.id = Uuid::now_v7();
        let duplicate = first.clone();

        uow.begin_transaction().await.unwrap();
        assert!(uow.bulk_insert(vec![first, duplicate]).await.is_err());
        uow.rollback_transaction().await.unwrap();
        assert!(uow.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preloads_use_registered_loader() {
        let (uow, _) = seeded(&[("bolt", 1)]).await;
        let mut uow = uow.with_relation_loader(LabelLoader);

        let params = QueryParams::new().add_preload("label");
        let page = uow.find_all_with_pagination(&params).await.unwrap();
        assert_eq!(page.items[0].label.as_deref(), Some("BOLT"));

        let plain = uow.find_all_with_pagination(&QueryParams::new()).await.unwrap();
        assert!(plain.items[0].label.is_none());
    }

    #[tokio::test]
    async fn test_unknown_preload_is_rejected() {
        let (mut uow, _) = seeded(&[("bolt", 1)]).await;
        let err = uow
            .find_all_with_pagination(&QueryParams::new().add_preload("owner"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
        assert_eq!(err.operation, RepositoryOperation::Preload);
    }

    #[tokio::test]
    async fn test_search_and_like_filters() {
        let (mut uow, widgets) = seeded(&[("Hex Bolt", 1), ("Wing Nut", 2)]).await;
        let params = QueryParams::new().with_filters(Some(&Identifier::new().like("name", "%bolt")));
        let page = uow.find_all_with_pagination(&params).await.unwrap();
        assert_eq!(page.total, 1);

        let fragment = widgets[1].id().to_string()[24..].to_string();
        let page = uow
            .find_all_with_pagination(&QueryParams::new().with_search(fragment))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id(), widgets[1].id());
    }
}
