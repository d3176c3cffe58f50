//! Errors raised by repository operations
//!
//! Every fallible operation in this crate reports a [`RepositoryError`]: the
//! operation that was running, a coarse [`RepositoryErrorKind`], a message and,
//! when known, the collection and identifier involved.
//!
//! # Example
//!
//! ```rust
//! use unitwork::repository::{RepositoryError, RepositoryErrorKind};
//!
//! let error = RepositoryError::not_found("users", "slug eq \"ada\"");
//! assert!(matches!(error.kind, RepositoryErrorKind::NotFound));
//! assert!(error.entity_id.is_some());
//! ```

use std::fmt;

/// Unit-of-work step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    /// Looking up a single record
    FindOne,
    /// Listing records, optionally paginated
    FindAll,
    /// Counting records
    Count,
    /// Checking whether a record matches
    Exists,
    /// Inserting a new record
    Insert,
    /// Replacing an existing record
    Update,
    /// Marking a record as deleted
    SoftDelete,
    /// Permanently removing a record
    HardDelete,
    /// Clearing a deletion marker
    Restore,
    /// Beginning, committing or rolling back a transaction
    Transaction,
    /// Validating filter criteria before they reach storage
    Validate,
    /// Resolving preload hints through relation loaders
    Preload,
}

impl RepositoryOperation {
    /// Snake-case name used in messages and log fields
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FindOne => "find_one",
            Self::FindAll => "find_all",
            Self::Count => "count",
            Self::Exists => "exists",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::SoftDelete => "soft_delete",
            Self::HardDelete => "hard_delete",
            Self::Restore => "restore",
            Self::Transaction => "transaction",
            Self::Validate => "validate",
            Self::Preload => "preload",
        }
    }
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse failure class, stable across backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// No record matched the identifier, id or slug
    NotFound,
    /// Duplicate record; declared for callers, never raised by the unit of work
    AlreadyExists,
    /// Stale version; declared for callers, never raised by the unit of work
    ConcurrencyConflict,
    /// Begin while a transaction is active, or commit while none is
    TransactionState,
    /// Unique, foreign-key or check constraint rejected the write
    ConstraintViolation,
    /// Unsupported filter value or unknown preload
    ValidationFailed,
    /// Store unreachable or pool closed
    ConnectionFailed,
    /// Operation timed out
    Timeout,
    /// Any other driver-reported failure
    DatabaseError,
    /// Entity could not be converted to or from a document
    SerializationError,
    Other,
}

impl RepositoryErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::ConcurrencyConflict => "concurrency_conflict",
            Self::TransactionState => "transaction_state",
            Self::ConstraintViolation => "constraint_violation",
            Self::ValidationFailed => "validation_failed",
            Self::ConnectionFailed => "connection_failed",
            Self::Timeout => "timeout",
            Self::DatabaseError => "database_error",
            Self::SerializationError => "serialization_error",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a repository operation, with the step and target that failed
///
/// ```rust
/// use unitwork::repository::{RepositoryError, RepositoryOperation};
///
/// let error = RepositoryError::not_found("orders", "id eq 42")
///     .with_operation(RepositoryOperation::Update);
/// assert_eq!(
///     error.to_string(),
///     "Repository not_found error during update: Entity not found [orders: id eq 42]"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    /// Step that failed
    pub operation: RepositoryOperation,
    pub kind: RepositoryErrorKind,
    pub message: String,
    /// Collection or table involved
    pub entity_type: Option<String>,
    /// Identifier, id or slug that was looked up
    pub entity_id: Option<String>,
}

impl RepositoryError {
    pub fn new(
        operation: RepositoryOperation,
        kind: RepositoryErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            entity_type: None,
            entity_id: None,
        }
    }

    /// Nothing matched `entity_id` in `entity_type`
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::FindOne,
            RepositoryErrorKind::NotFound,
            "Entity not found",
        )
        .with_entity(entity_type, entity_id)
    }

    /// A document with the same id is already stored
    pub fn already_exists(entity_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Insert,
            RepositoryErrorKind::AlreadyExists,
            "Entity already exists",
        )
        .with_entity(entity_type, identifier)
    }

    pub fn concurrency_conflict(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self::new(
            RepositoryOperation::Update,
            RepositoryErrorKind::ConcurrencyConflict,
            "Entity was modified concurrently",
        )
        .with_entity(entity_type, entity_id)
    }

    /// Misuse of begin/commit
    ///
    /// ```rust
    /// use unitwork::repository::{RepositoryError, RepositoryErrorKind};
    ///
    /// let error = RepositoryError::transaction_state("transaction already in progress");
    /// assert_eq!(error.kind, RepositoryErrorKind::TransactionState);
    /// ```
    pub fn transaction_state(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Transaction,
            RepositoryErrorKind::TransactionState,
            message,
        )
    }

    /// Criteria or preload hints were rejected before reaching storage
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Validate,
            RepositoryErrorKind::ValidationFailed,
            message,
        )
    }

    pub fn constraint_violation(
        operation: RepositoryOperation,
        message: impl Into<String>,
    ) -> Self {
        Self::new(operation, RepositoryErrorKind::ConstraintViolation, message)
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Transaction,
            RepositoryErrorKind::ConnectionFailed,
            message,
        )
    }

    pub fn timeout(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::Timeout, message)
    }

    pub fn database_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::DatabaseError, message)
    }

    pub fn serialization_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::SerializationError, message)
    }

    /// Attach the collection and lookup key
    #[must_use]
    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Re-tag the error with the step that surfaced it
    #[must_use]
    pub fn with_operation(mut self, operation: RepositoryOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Whether this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        self.kind == RepositoryErrorKind::NotFound
    }

    /// Transient failure that a caller may retry; the unit of work never retries itself
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            RepositoryErrorKind::ConnectionFailed | RepositoryErrorKind::Timeout
        )
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Repository {} error during {}: {}", self.kind, self.operation, self.message)?;
        match (&self.entity_type, &self.entity_id) {
            (Some(collection), Some(key)) => write!(f, " [{collection}: {key}]"),
            _ => Ok(()),
        }
    }
}

impl std::error::Error for RepositoryError {}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_error(RepositoryOperation::FindAll, err.to_string())
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;
        match err {
            E::RowNotFound => Self::new(
                RepositoryOperation::FindOne,
                RepositoryErrorKind::NotFound,
                "Row not found",
            ),
            E::PoolTimedOut => Self::timeout(
                RepositoryOperation::Transaction,
                "Connection pool timed out",
            ),
            E::PoolClosed => Self::connection_failed("pool closed"),
            E::WorkerCrashed => Self::connection_failed("connection worker crashed"),
            E::Io(e) => Self::connection_failed(e.to_string()),
            E::Tls(e) => Self::connection_failed(format!("TLS error: {}", e)),
            E::ColumnDecode { index, source } => Self::serialization_error(
                RepositoryOperation::FindAll,
                format!("Failed to decode column {}: {}", index, source),
            ),
            E::Decode(e) => Self::serialization_error(RepositoryOperation::FindAll, e.to_string()),
            E::Database(db_err) => {
                let message = db_err.to_string();
                match db_err.kind() {
                    sqlx::error::ErrorKind::UniqueViolation
                    | sqlx::error::ErrorKind::ForeignKeyViolation
                    | sqlx::error::ErrorKind::NotNullViolation
                    | sqlx::error::ErrorKind::CheckViolation => {
                        Self::constraint_violation(RepositoryOperation::Insert, message)
                    }
                    _ => Self::database_error(RepositoryOperation::FindAll, message),
                }
            }
            other => Self::database_error(RepositoryOperation::FindAll, other.to_string()),
        }
    }
}
