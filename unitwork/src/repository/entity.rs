//! Entity contract consumed by the unit of work
//!
//! Entities embed a [`Record`] with `#[serde(flatten)]` so its columns sit next
//! to the entity's own fields in both backends:
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use unitwork::repository::{Entity, Record};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Article {
//!     #[serde(flatten)]
//!     record: Record,
//!     title: String,
//! }
//!
//! impl Entity for Article {
//!     const COLLECTION: &'static str = "articles";
//!
//!     fn record(&self) -> &Record {
//!         &self.record
//!     }
//!
//!     fn record_mut(&mut self) -> &mut Record {
//!         &mut self.record
//!     }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// Column holding the record identity
pub const ID_FIELD: &str = "id";
/// Column holding the public, unique slug
pub const SLUG_FIELD: &str = "slug";
/// Column holding the soft-delete marker
pub const DELETED_AT_FIELD: &str = "deleted_at";

/// Bookkeeping columns shared by every persisted entity
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Record {
    /// Nil until the first insert
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    /// Present while the record is trashed
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Stored and returned but never compared or incremented on update
    #[serde(default)]
    pub version: i64,
}

impl Record {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_nil()
    }
}

/// A persistable type with a fixed collection/table name
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Table (relational) or collection (document store) name
    const COLLECTION: &'static str;

    fn record(&self) -> &Record;

    fn record_mut(&mut self) -> &mut Record;

    fn id(&self) -> Uuid {
        self.record().id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Note {
        #[serde(flatten)]
        record: Record,
        body: String,
    }

    #[test]
    fn test_record_flattens_into_entity_columns() {
        let note = Note {
            record: Record::default(),
            body: "hi".to_string(),
        };
        let doc = serde_json::to_value(&note).unwrap();
        assert!(doc.get("id").is_some());
        assert!(doc.get("deleted_at").unwrap().is_null());
        assert_eq!(doc["body"], json!("hi"));
    }

    #[test]
    fn test_missing_bookkeeping_columns_default() {
        let note: Note = serde_json::from_value(json!({"body": "x"})).unwrap();
        assert!(!note.record.has_id());
        assert!(!note.record.is_deleted());
        assert_eq!(note.record.version, 0);
    }
}
