//! In-process document store
//!
//! Collections are vectors of JSON documents behind a `tokio` lock. A
//! transaction reads from a snapshot taken at `begin` and records each write
//! in order. `commit` replays that log against the live collections under the
//! write lock, all or nothing; `rollback` drops it. Writes committed by others
//! in the meantime are kept.
//!
//! `id` and `slug` are unique per collection.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use super::Backend;
use crate::repository::{
    Pagination, RepositoryError, RepositoryOperation, RepositoryResult, SortField, SortOrder,
    DELETED_AT_FIELD, ID_FIELD, SLUG_FIELD,
};
use crate::translate::document::{compare_stored, lookup};
use crate::translate::{DocumentFilter, DocumentTranslator};

type Collections = HashMap<String, Vec<Value>>;

const UNIQUE_FIELDS: [&str; 2] = [ID_FIELD, SLUG_FIELD];

/// A single write, applied directly or replayed at commit
#[derive(Debug, Clone)]
enum Write {
    Insert {
        collection: String,
        document: Value,
    },
    Replace {
        collection: String,
        predicate: DocumentFilter,
        document: Value,
    },
    Mark {
        collection: String,
        predicate: DocumentFilter,
        marker: Value,
    },
    Delete {
        collection: String,
        predicate: DocumentFilter,
    },
}

impl Write {
    /// Apply to `collections`; returns the number of documents touched
    fn apply(&self, collections: &mut Collections) -> RepositoryResult<u64> {
        match self {
            Self::Insert {
                collection,
                document,
            } => {
                let docs = collections.entry(collection.clone()).or_default();
                check_unique(collection, &docs[..], document, RepositoryOperation::Insert, |_| false)?;
                docs.push(document.clone());
                Ok(1)
            }
            Self::Replace {
                collection,
                predicate,
                document,
            } => {
                let Some(docs) = collections.get_mut(collection) else {
                    return Ok(0);
                };
                check_unique(collection, &docs[..], document, RepositoryOperation::Update, |d| {
                    predicate.matches(d)
                })?;
                let mut replaced = 0;
                for doc in docs.iter_mut().filter(|d| predicate.matches(d)) {
                    *doc = document.clone();
                    replaced += 1;
                }
                Ok(replaced)
            }
            Self::Mark {
                collection,
                predicate,
                marker,
            } => {
                let mut marked = 0;
                for doc in collections.get_mut(collection).into_iter().flatten() {
                    if !predicate.matches(doc) {
                        continue;
                    }
                    if let Value::Object(map) = doc {
                        map.insert(DELETED_AT_FIELD.to_string(), marker.clone());
                        marked += 1;
                    }
                }
                Ok(marked)
            }
            Self::Delete {
                collection,
                predicate,
            } => {
                let Some(docs) = collections.get_mut(collection) else {
                    return Ok(0);
                };
                let before = docs.len();
                docs.retain(|d| !predicate.matches(d));
                Ok((before - docs.len()) as u64)
            }
        }
    }
}

/// Reject `document` when one of its unique fields is already taken by a
/// document that `replaced` does not cover
fn check_unique(
    collection: &str,
    docs: &[Value],
    document: &Value,
    operation: RepositoryOperation,
    replaced: impl Fn(&Value) -> bool,
) -> RepositoryResult<()> {
    for field in UNIQUE_FIELDS {
        let Some(value) = document.get(field).filter(|v| !v.is_null()) else {
            continue;
        };
        let taken = docs
            .iter()
            .any(|d| d.get(field) == Some(value) && !replaced(d));
        if taken {
            return Err(RepositoryError::constraint_violation(
                operation,
                format!("duplicate value for unique field '{}'", field),
            )
            .with_entity(collection, value.to_string()));
        }
    }
    Ok(())
}

/// Open transaction of a [`MemoryDocumentStore`]
#[derive(Debug, Clone)]
pub struct MemoryTransaction {
    view: Collections,
    log: Vec<Write>,
}

/// Document store kept entirely in memory
///
/// Clones share the same collections.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    collections: Arc<RwLock<Collections>>,
    translator: DocumentTranslator,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every document currently committed to `collection`, in insertion order
    pub async fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    async fn read<R>(
        &self,
        tx: Option<&mut MemoryTransaction>,
        f: impl FnOnce(&Collections) -> R,
    ) -> R {
        match tx {
            Some(tx) => f(&tx.view),
            None => f(&*self.collections.read().await),
        }
    }

    async fn write(&self, tx: Option<&mut MemoryTransaction>, write: Write) -> RepositoryResult<u64> {
        match tx {
            Some(tx) => {
                let touched = write.apply(&mut tx.view)?;
                tx.log.push(write);
                Ok(touched)
            }
            None => write.apply(&mut *self.collections.write().await),
        }
    }
}

fn sort_documents(documents: &mut [Value], sort: &[SortField]) {
    let default_sort = [SortField::asc(ID_FIELD)];
    let keys = if sort.is_empty() { &default_sort[..] } else { sort };
    documents.sort_by(|a, b| {
        keys.iter()
            .map(|key| {
                let ordering = compare_stored(lookup(a, &key.field), lookup(b, &key.field));
                match key.order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

impl Backend for MemoryDocumentStore {
    type Translator = DocumentTranslator;
    type Transaction = MemoryTransaction;

    fn name(&self) -> &'static str {
        "memory"
    }

    fn translator(&self) -> &DocumentTranslator {
        &self.translator
    }

    async fn begin(&self) -> RepositoryResult<MemoryTransaction> {
        let view = self.collections.read().await.clone();
        Ok(MemoryTransaction {
            view,
            log: Vec::new(),
        })
    }

    async fn commit(&self, tx: MemoryTransaction) -> RepositoryResult<()> {
        if tx.log.is_empty() {
            return Ok(());
        }
        let mut live = self.collections.write().await;
        let mut staged = live.clone();
        for write in &tx.log {
            write
                .apply(&mut staged)
                .map_err(|e| e.with_operation(RepositoryOperation::Transaction))?;
        }
        *live = staged;
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTransaction) -> RepositoryResult<()> {
        drop(tx);
        Ok(())
    }

    async fn find(
        &self,
        tx: Option<&mut MemoryTransaction>,
        collection: &str,
        predicate: &DocumentFilter,
        sort: &[SortField],
        window: Option<Pagination>,
    ) -> RepositoryResult<Vec<Value>> {
        let mut found: Vec<Value> = self
            .read(tx, |collections| {
                collections
                    .get(collection)
                    .map(|docs| docs.iter().filter(|d| predicate.matches(d)).cloned().collect())
                    .unwrap_or_default()
            })
            .await;
        sort_documents(&mut found, sort);

        Ok(match window {
            Some(window) => {
                let offset = usize::try_from(window.offset).unwrap_or(usize::MAX);
                let limit = usize::try_from(window.limit).unwrap_or(usize::MAX);
                found.into_iter().skip(offset).take(limit).collect()
            }
            None => found,
        })
    }

    async fn count(
        &self,
        tx: Option<&mut MemoryTransaction>,
        collection: &str,
        predicate: &DocumentFilter,
    ) -> RepositoryResult<u64> {
        let count = self
            .read(tx, |collections| {
                collections
                    .get(collection)
                    .map_or(0, |docs| docs.iter().filter(|d| predicate.matches(d)).count())
            })
            .await;
        Ok(count as u64)
    }

    async fn insert(
        &self,
        tx: Option<&mut MemoryTransaction>,
        collection: &str,
        document: &Value,
    ) -> RepositoryResult<()> {
        let write = Write::Insert {
            collection: collection.to_string(),
            document: document.clone(),
        };
        self.write(tx, write).await.map(|_| ())
    }

    async fn replace(
        &self,
        tx: Option<&mut MemoryTransaction>,
        collection: &str,
        predicate: &DocumentFilter,
        document: &Value,
    ) -> RepositoryResult<u64> {
        let write = Write::Replace {
            collection: collection.to_string(),
            predicate: predicate.clone(),
            document: document.clone(),
        };
        self.write(tx, write).await
    }

    async fn set_deleted_at(
        &self,
        tx: Option<&mut MemoryTransaction>,
        collection: &str,
        predicate: &DocumentFilter,
        deleted_at: Option<DateTime<Utc>>,
    ) -> RepositoryResult<u64> {
        let write = Write::Mark {
            collection: collection.to_string(),
            predicate: predicate.clone(),
            marker: serde_json::to_value(deleted_at)?,
        };
        self.write(tx, write).await
    }

    async fn delete(
        &self,
        tx: Option<&mut MemoryTransaction>,
        collection: &str,
        predicate: &DocumentFilter,
    ) -> RepositoryResult<u64> {
        let write = Write::Delete {
            collection: collection.to_string(),
            predicate: predicate.clone(),
        };
        self.write(tx, write).await
    }
}
