//! Connections to the backing store
//!
//! The repository and query layers only see two traits:
//! [`ConnectionFactory`] opens connections and reports the SQL dialect,
//! [`Connection`] executes a [`Command`] and returns the affected-row count or
//! materialised [`Row`]s. Driver failures surface as [`BackendError`], which
//! keeps the native error code and constraint name for classification.
//!
//! sqlx-backed implementations live in [`sqlite`] and [`postgres`] behind the
//! features of the same names. Any other driver (for example a SQL Server
//! client) plugs in by implementing both traits.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::binder::{Command, Row};
use crate::sql::Dialect;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
use {
    crate::binder::Parameter,
    crate::value::{Value, ValueType},
    chrono::{DateTime, NaiveDate, Utc},
    uuid::Uuid,
};

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Driver-level failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The store rejected the statement
    #[error("{message}")]
    Database {
        /// Native error code (SQLSTATE, SQL Server error number, SQLite extended code)
        code: Option<String>,
        message: String,
        /// Constraint or column name, when the driver reports one
        constraint: Option<String>,
    },
    /// The store cannot be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Acquiring a connection or running a command took too long
    #[error("timed out: {0}")]
    Timeout(String),
    /// A result value has a type the mapper does not understand
    #[error("cannot decode result: {0}")]
    Decode(String),
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// A database error with a native code
    pub fn database(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            code: Some(code.into()),
            message: message.into(),
            constraint: None,
        }
    }

    /// Attach a constraint name to a database error
    #[must_use]
    pub fn with_constraint(self, name: impl Into<String>) -> Self {
        match self {
            Self::Database { code, message, .. } => Self::Database {
                code,
                message,
                constraint: Some(name.into()),
            },
            other => other,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;
        match err {
            E::Database(db_err) => {
                let constraint = db_err
                    .constraint()
                    .map(str::to_string)
                    .or_else(|| reported_column(db_err.as_ref()));
                Self::Database {
                    code: db_err.code().map(|c| c.into_owned()),
                    message: db_err.message().to_string(),
                    constraint,
                }
            }
            E::PoolTimedOut => Self::Timeout("Connection pool timed out".to_string()),
            E::PoolClosed => Self::Unavailable("Connection pool is closed".to_string()),
            E::WorkerCrashed => Self::Unavailable("Database worker crashed".to_string()),
            E::Io(e) => Self::Unavailable(e.to_string()),
            E::Tls(e) => Self::Unavailable(format!("TLS error: {}", e)),
            E::ColumnDecode { index, source } => {
                Self::Decode(format!("Failed to decode column {}: {}", index, source))
            }
            E::Decode(e) => Self::Decode(e.to_string()),
            E::ColumnNotFound(col) => Self::Decode(format!("Column not found: {}", col)),
            other => Self::Other(other.to_string()),
        }
    }
}

#[cfg(feature = "postgres")]
fn reported_column(db_err: &(dyn sqlx::error::DatabaseError + 'static)) -> Option<String> {
    db_err
        .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
        .and_then(|pg| pg.column())
        .map(str::to_string)
}

#[cfg(all(feature = "sqlite", not(feature = "postgres")))]
fn reported_column(_db_err: &(dyn sqlx::error::DatabaseError + 'static)) -> Option<String> {
    None
}

/// Attach every command parameter to a sqlx query, keeping NULLs typed
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn bind_parameters<'q, DB>(
    mut query: sqlx::query::Query<'q, DB, <DB as sqlx::Database>::Arguments<'q>>,
    params: &[Parameter],
) -> sqlx::query::Query<'q, DB, <DB as sqlx::Database>::Arguments<'q>>
where
    DB: sqlx::Database,
    bool: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    i64: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    f64: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    String: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    Vec<u8>: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    DateTime<Utc>: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    NaiveDate: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    Uuid: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    Option<bool>: sqlx::Encode<'q, DB>,
    Option<i64>: sqlx::Encode<'q, DB>,
    Option<f64>: sqlx::Encode<'q, DB>,
    Option<String>: sqlx::Encode<'q, DB>,
    Option<Vec<u8>>: sqlx::Encode<'q, DB>,
    Option<DateTime<Utc>>: sqlx::Encode<'q, DB>,
    Option<NaiveDate>: sqlx::Encode<'q, DB>,
    Option<Uuid>: sqlx::Encode<'q, DB>,
{
    for param in params {
        query = match (&param.value, param.ty) {
            (Value::Null, ValueType::Bool) => query.bind(None::<bool>),
            (Value::Null, ValueType::Int | ValueType::Enum) => query.bind(None::<i64>),
            (Value::Null, ValueType::Float) => query.bind(None::<f64>),
            (Value::Null, ValueType::Text) => query.bind(None::<String>),
            (Value::Null, ValueType::Bytes) => query.bind(None::<Vec<u8>>),
            (Value::Null, ValueType::DateTime) => query.bind(None::<DateTime<Utc>>),
            (Value::Null, ValueType::Date) => query.bind(None::<NaiveDate>),
            (Value::Null, ValueType::Uuid) => query.bind(None::<Uuid>),
            (Value::Bool(b), _) => query.bind(*b),
            (Value::Int(i), _) => query.bind(*i),
            (Value::Float(f), _) => query.bind(*f),
            (Value::Text(s), _) => query.bind(s.clone()),
            (Value::Bytes(b), _) => query.bind(b.clone()),
            (Value::DateTime(dt), _) => query.bind(*dt),
            (Value::Date(d), _) => query.bind(*d),
            (Value::Uuid(u), _) => query.bind(*u),
        };
    }
    query
}

/// An open connection or transaction
#[async_trait]
pub trait Connection: Send {
    /// Run a statement and return the affected-row count
    async fn execute(&mut self, command: &Command) -> Result<u64, BackendError>;

    /// Run a statement and materialise every returned row
    async fn fetch_all(&mut self, command: &Command) -> Result<Vec<Row>, BackendError>;
}

/// Source of connections for one store
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection + 'static;

    /// SQL dialect spoken by the store
    fn dialect(&self) -> Dialect;

    /// Open (or check out) a connection
    async fn open(&self) -> Result<Self::Connection, BackendError>;
}

/// A connection shared by several repositories, typically an open transaction
///
/// Calls through repositories sharing one connection are serialised by the
/// mutex.
pub type SharedConnection<C> = Arc<tokio::sync::Mutex<C>>;

/// Wrap a connection for sharing
pub fn share<C: Connection>(connection: C) -> SharedConnection<C> {
    Arc::new(tokio::sync::Mutex::new(connection))
}
