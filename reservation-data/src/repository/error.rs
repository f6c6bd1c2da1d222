//! Repository error types
//!
//! Every repository and query operation reports failures as a structured
//! [`RepositoryError`]: the operation that failed, a [`RepositoryErrorKind`]
//! category, a message, and optional entity and constraint context. Callers
//! branch on the kind rather than parsing messages.
//!
//! # Example
//!
//! ```rust
//! use reservation_data::repository::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
//!
//! let error = RepositoryError::constraint(
//!     RepositoryOperation::Create,
//!     RepositoryErrorKind::UniqueConstraintViolation,
//!     "duplicate station name",
//!     Some("UQ_Stations_Name".to_string()),
//! );
//! assert!(error.is_constraint_violation());
//! assert!(!error.is_retriable());
//! ```

use std::fmt;

/// Operation being performed when the repository error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    /// Resolving entity metadata
    Resolve,
    /// Loading every row of a table
    GetAll,
    /// Inserting one entity
    Create,
    /// Inserting several entities in one statement
    CreateBulk,
    /// Updating one entity
    Update,
    /// Updating several entities in one statement
    UpdateBulk,
    /// Deleting one entity
    Delete,
    /// Deleting several entities in one statement
    DeleteBulk,
    /// Compiling or executing a query plan
    Query,
    /// Opening a connection
    Connect,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolve => write!(f, "resolve"),
            Self::GetAll => write!(f, "get_all"),
            Self::Create => write!(f, "create"),
            Self::CreateBulk => write!(f, "create_bulk"),
            Self::Update => write!(f, "update"),
            Self::UpdateBulk => write!(f, "update_bulk"),
            Self::Delete => write!(f, "delete"),
            Self::DeleteBulk => write!(f, "delete_bulk"),
            Self::Query => write!(f, "query"),
            Self::Connect => write!(f, "connect"),
        }
    }
}

/// Category of repository error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// Store unreachable or connection lost
    Unavailable,
    /// Command or pool acquisition timed out
    Timeout,
    /// Deadlock, serialization failure or lock contention
    Concurrency,
    /// The caller cancelled the operation
    Cancelled,
    /// Duplicate primary key
    PrimaryKeyViolation,
    /// Duplicate value in a unique constraint or index
    UniqueConstraintViolation,
    /// Referenced row missing or still referenced
    ForeignKeyViolation,
    /// CHECK constraint rejected the row
    CheckConstraintViolation,
    /// NULL written into a non-nullable column
    NotNullViolation,
    /// Entity metadata is malformed
    Configuration,
    /// Query plan cannot be compiled
    InvalidQuery,
    /// A row could not be mapped onto the requested type
    Mapping,
    /// No row matched where one was required
    NotFound,
    /// More than one row matched where exactly one was required
    MultipleResults,
    /// Unclassified backend failure
    Database,
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Timeout => write!(f, "timeout"),
            Self::Concurrency => write!(f, "concurrency"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::PrimaryKeyViolation => write!(f, "primary_key_violation"),
            Self::UniqueConstraintViolation => write!(f, "unique_constraint_violation"),
            Self::ForeignKeyViolation => write!(f, "foreign_key_violation"),
            Self::CheckConstraintViolation => write!(f, "check_constraint_violation"),
            Self::NotNullViolation => write!(f, "not_null_violation"),
            Self::Configuration => write!(f, "configuration"),
            Self::InvalidQuery => write!(f, "invalid_query"),
            Self::Mapping => write!(f, "mapping"),
            Self::NotFound => write!(f, "not_found"),
            Self::MultipleResults => write!(f, "multiple_results"),
            Self::Database => write!(f, "database"),
        }
    }
}

impl RepositoryErrorKind {
    /// Whether the kind belongs to the constraint-violation family
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::PrimaryKeyViolation
                | Self::UniqueConstraintViolation
                | Self::ForeignKeyViolation
                | Self::CheckConstraintViolation
                | Self::NotNullViolation
        )
    }
}

/// Structured repository error with operation context
///
/// # Example
///
/// ```rust
/// use reservation_data::repository::{RepositoryError, RepositoryOperation};
///
/// let error = RepositoryError::timeout(RepositoryOperation::GetAll, "command exceeded 30s")
///     .with_entity("Station");
/// assert_eq!(
///     error.to_string(),
///     "Repository timeout error during get_all: command exceeded 30s [Station]"
/// );
/// assert!(error.is_retriable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    /// The operation being performed when the error occurred
    pub operation: RepositoryOperation,
    /// The category of error
    pub kind: RepositoryErrorKind,
    /// Human-readable error message
    pub message: String,
    /// The type of entity involved (e.g., "Station")
    pub entity_type: Option<String>,
    /// Constraint or column name reported by the store
    pub constraint: Option<String>,
}

impl RepositoryError {
    /// Create a new repository error
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
            constraint: None,
        }
    }

    /// Malformed entity metadata
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Resolve,
            RepositoryErrorKind::Configuration,
            message,
        )
    }

    /// A query plan that cannot be compiled
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Query,
            RepositoryErrorKind::InvalidQuery,
            message,
        )
    }

    /// A row that cannot be mapped onto the requested type
    pub fn mapping(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::Mapping, message)
    }

    /// No row where one was required
    ///
    /// # Example
    ///
    /// ```rust
    /// use reservation_data::repository::{RepositoryError, RepositoryErrorKind};
    ///
    /// let error = RepositoryError::not_found("Station");
    /// assert!(matches!(error.kind, RepositoryErrorKind::NotFound));
    /// assert_eq!(error.entity_type.as_deref(), Some("Station"));
    /// ```
    pub fn not_found(entity_type: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Query,
            RepositoryErrorKind::NotFound,
            "Sequence contains no elements",
        )
        .with_entity(entity_type)
    }

    /// More than one row where exactly one was required
    pub fn multiple_results(entity_type: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Query,
            RepositoryErrorKind::MultipleResults,
            "Sequence contains more than one element",
        )
        .with_entity(entity_type)
    }

    /// The caller's cancellation token fired
    pub fn cancelled(operation: RepositoryOperation) -> Self {
        Self::new(
            operation,
            RepositoryErrorKind::Cancelled,
            "Operation was cancelled",
        )
    }

    /// Create a timeout error
    pub fn timeout(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::Timeout, message)
    }

    /// Create an unavailable-store error
    pub fn unavailable(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::Unavailable, message)
    }

    /// Create a constraint violation error of the given family member
    pub fn constraint(
        operation: RepositoryOperation,
        kind: RepositoryErrorKind,
        message: impl Into<String>,
        constraint: Option<String>,
    ) -> Self {
        Self {
            constraint,
            ..Self::new(operation, kind, message)
        }
    }

    /// Create an unclassified database error
    pub fn database_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::Database, message)
    }

    /// Add entity context to an existing error
    #[must_use]
    pub fn with_entity(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Set the operation that caused the error
    #[must_use]
    pub fn with_operation(mut self, operation: RepositoryOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Attach the constraint or column name reported by the store
    #[must_use]
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    /// Check if this error is retriable (transient errors that may succeed on retry)
    ///
    /// # Example
    ///
    /// ```rust
    /// use reservation_data::repository::{RepositoryError, RepositoryOperation};
    ///
    /// assert!(RepositoryError::unavailable(RepositoryOperation::Connect, "refused").is_retriable());
    /// assert!(!RepositoryError::not_found("Station").is_retriable());
    /// ```
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            RepositoryErrorKind::Unavailable
                | RepositoryErrorKind::Timeout
                | RepositoryErrorKind::Concurrency
        )
    }

    /// Whether this is one of the constraint-violation kinds
    pub fn is_constraint_violation(&self) -> bool {
        self.kind.is_constraint_violation()
    }

    /// Whether the caller cancelled the operation
    pub fn is_cancelled(&self) -> bool {
        self.kind == RepositoryErrorKind::Cancelled
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Repository {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        if let Some(ref entity_type) = self.entity_type {
            write!(f, " [{}]", entity_type)?;
        }
        if let Some(ref constraint) = self.constraint {
            write!(f, " (constraint: {})", constraint)?;
        }
        Ok(())
    }
}

impl std::error::Error for RepositoryError {}

/// Result type alias for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;
