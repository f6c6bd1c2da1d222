//! Translation of driver failures into repository error kinds
//!
//! Classification is a pure function of the dialect and the native error
//! code, so it is tested without a database. Constraint names come from the
//! driver when it reports them and are otherwise parsed out of the message.

use crate::backend::BackendError;
use crate::sql::Dialect;

use super::{RepositoryError, RepositoryErrorKind, RepositoryOperation};

use super::RepositoryErrorKind as Kind;

/// Classify a backend failure into an error kind and optional constraint name
///
/// ```rust
/// use reservation_data::backend::BackendError;
/// use reservation_data::repository::{classify, RepositoryErrorKind};
/// use reservation_data::sql::Dialect;
///
/// let err = BackendError::database(
///     "2627",
///     "Violation of UNIQUE KEY constraint 'UQ_Stations_Name'. Cannot insert duplicate key in object 'dbo.Stations'.",
/// );
/// let (kind, constraint) = classify(Dialect::SqlServer, &err);
/// assert_eq!(kind, RepositoryErrorKind::UniqueConstraintViolation);
/// assert_eq!(constraint.as_deref(), Some("UQ_Stations_Name"));
/// ```
pub fn classify(dialect: Dialect, error: &BackendError) -> (RepositoryErrorKind, Option<String>) {
    match error {
        BackendError::Unavailable(_) => (Kind::Unavailable, None),
        BackendError::Timeout(_) => (Kind::Timeout, None),
        BackendError::Decode(_) => (Kind::Mapping, None),
        BackendError::Other(_) => (Kind::Database, None),
        BackendError::Database {
            code,
            message,
            constraint,
        } => {
            let code = code.as_deref().unwrap_or_default();
            let (kind, parsed) = match dialect {
                Dialect::SqlServer => classify_sql_server(code, message),
                Dialect::Postgres => (classify_postgres(code, constraint.as_deref()), None),
                Dialect::Sqlite => classify_sqlite(code, message),
            };
            let constraint = if kind.is_constraint_violation() {
                constraint.clone().or(parsed)
            } else {
                None
            };
            (kind, constraint)
        }
    }
}

impl RepositoryError {
    /// Build a repository error from a classified backend failure
    pub fn from_backend(
        dialect: Dialect,
        operation: RepositoryOperation,
        error: &BackendError,
    ) -> Self {
        let (kind, constraint) = classify(dialect, error);
        Self::constraint(operation, kind, error.to_string(), constraint)
    }
}

fn classify_sql_server(code: &str, message: &str) -> (RepositoryErrorKind, Option<String>) {
    match code {
        "2627" => {
            let kind = if message.contains("PRIMARY KEY") {
                Kind::PrimaryKeyViolation
            } else {
                Kind::UniqueConstraintViolation
            };
            (kind, quoted_after(message, "constraint '", '\''))
        }
        "2601" => (
            Kind::UniqueConstraintViolation,
            quoted_after(message, "unique index '", '\''),
        ),
        "547" => {
            let kind = if message.contains("CHECK constraint") {
                Kind::CheckConstraintViolation
            } else {
                Kind::ForeignKeyViolation
            };
            (kind, quoted_after(message, "constraint \"", '"'))
        }
        "515" => (
            Kind::NotNullViolation,
            quoted_after(message, "column '", '\''),
        ),
        "1205" | "1222" => (Kind::Concurrency, None),
        "-2" => (Kind::Timeout, None),
        "53" | "233" | "4060" | "10053" | "10054" | "10060" | "40613" => (Kind::Unavailable, None),
        _ => (Kind::Database, None),
    }
}

fn classify_postgres(code: &str, constraint: Option<&str>) -> RepositoryErrorKind {
    match code {
        "23505" if constraint.is_some_and(|c| c.ends_with("_pkey")) => Kind::PrimaryKeyViolation,
        "23505" => Kind::UniqueConstraintViolation,
        "23503" => Kind::ForeignKeyViolation,
        "23514" => Kind::CheckConstraintViolation,
        "23502" => Kind::NotNullViolation,
        "40001" | "40P01" | "55P03" => Kind::Concurrency,
        "57014" => Kind::Timeout,
        "53300" | "57P01" | "57P02" | "57P03" => Kind::Unavailable,
        c if c.starts_with("08") => Kind::Unavailable,
        _ => Kind::Database,
    }
}

fn classify_sqlite(code: &str, message: &str) -> (RepositoryErrorKind, Option<String>) {
    let parsed = message
        .split_once("constraint failed: ")
        .map(|(_, name)| name.trim().to_string());
    let kind = match code {
        "1555" => Kind::PrimaryKeyViolation,
        "2067" => Kind::UniqueConstraintViolation,
        "787" => Kind::ForeignKeyViolation,
        "275" => Kind::CheckConstraintViolation,
        "1299" => Kind::NotNullViolation,
        "19" => classify_sqlite_message(message),
        other => match other.parse::<i32>().map(|c| c & 0xff) {
            Ok(5 | 6) => Kind::Concurrency,
            Ok(10 | 14) => Kind::Unavailable,
            _ => Kind::Database,
        },
    };
    (kind, parsed)
}

fn classify_sqlite_message(message: &str) -> RepositoryErrorKind {
    if message.starts_with("UNIQUE") {
        Kind::UniqueConstraintViolation
    } else if message.starts_with("FOREIGN KEY") {
        Kind::ForeignKeyViolation
    } else if message.starts_with("CHECK") {
        Kind::CheckConstraintViolation
    } else if message.starts_with("NOT NULL") {
        Kind::NotNullViolation
    } else {
        Kind::Database
    }
}

fn quoted_after(message: &str, marker: &str, close: char) -> Option<String> {
    let start = message.find(marker)? + marker.len();
    let rest = &message[start..];
    let end = rest.find(close)?;
    Some(rest[..end].to_string())
}
