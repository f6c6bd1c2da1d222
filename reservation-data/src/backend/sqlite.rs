//! SQLite backend over sqlx
//!
//! ```rust,no_run
//! use reservation_data::backend::sqlite::SqliteFactory;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = SqliteFactory::connect("sqlite::memory:").await?;
//! let mut tx = factory.begin().await?;
//! // ... hand `tx` to repositories through `backend::share`
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as _, Row as _, Sqlite, SqliteConnection, Transaction, TypeInfo as _, ValueRef as _};

use super::{bind_parameters, BackendError, Connection, ConnectionFactory};
use crate::binder::{Command, Row};
use crate::sql::Dialect;
use crate::value::Value;

/// Connection factory over a sqlx SQLite pool
#[derive(Debug, Clone)]
pub struct SqliteFactory {
    pool: SqlitePool,
}

impl SqliteFactory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a single-connection pool for the URL
    ///
    /// In-memory databases exist per connection, so one connection keeps
    /// every statement on the same database.
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction; share it with [`super::share`] to scope several
    /// repositories to it
    pub async fn begin(&self) -> Result<SqliteSession, BackendError> {
        let tx = self.pool.begin().await?;
        Ok(SqliteSession {
            inner: Session::Transaction(Some(tx)),
        })
    }
}

#[async_trait]
impl ConnectionFactory for SqliteFactory {
    type Connection = SqliteSession;

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn open(&self) -> Result<SqliteSession, BackendError> {
        let conn = self.pool.acquire().await?;
        Ok(SqliteSession {
            inner: Session::Pooled(conn),
        })
    }
}

enum Session {
    Pooled(PoolConnection<Sqlite>),
    Transaction(Option<Transaction<'static, Sqlite>>),
}

/// A pooled SQLite connection or an open transaction
pub struct SqliteSession {
    inner: Session,
}

impl SqliteSession {
    pub fn is_transaction(&self) -> bool {
        matches!(self.inner, Session::Transaction(_))
    }

    /// Commit the transaction; a no-op for plain pooled connections
    pub async fn commit(&mut self) -> Result<(), BackendError> {
        match &mut self.inner {
            Session::Pooled(_) => Ok(()),
            Session::Transaction(tx) => match tx.take() {
                Some(tx) => Ok(tx.commit().await?),
                None => Err(finished()),
            },
        }
    }

    /// Roll the transaction back; a no-op for plain pooled connections
    pub async fn rollback(&mut self) -> Result<(), BackendError> {
        match &mut self.inner {
            Session::Pooled(_) => Ok(()),
            Session::Transaction(tx) => match tx.take() {
                Some(tx) => Ok(tx.rollback().await?),
                None => Err(finished()),
            },
        }
    }

    fn connection(&mut self) -> Result<&mut SqliteConnection, BackendError> {
        match &mut self.inner {
            Session::Pooled(conn) => Ok(&mut **conn),
            Session::Transaction(Some(tx)) => Ok(&mut **tx),
            Session::Transaction(None) => Err(finished()),
        }
    }
}

fn finished() -> BackendError {
    BackendError::Other("Transaction already completed".to_string())
}

#[async_trait]
impl Connection for SqliteSession {
    async fn execute(&mut self, command: &Command) -> Result<u64, BackendError> {
        let sql = Dialect::Sqlite.render_placeholders(command);
        let query = bind_parameters(sqlx::query::<Sqlite>(&sql), &command.params);
        let conn = self.connection()?;
        let result = query.execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, command: &Command) -> Result<Vec<Row>, BackendError> {
        let sql = Dialect::Sqlite.render_placeholders(command);
        let query = bind_parameters(sqlx::query::<Sqlite>(&sql), &command.params);
        let conn = self.connection()?;
        let rows = query.fetch_all(&mut *conn).await?;

        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let columns: Arc<[String]> = first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        rows.iter().map(|row| decode_row(row, &columns)).collect()
    }
}

/// Decode by the storage class of each value
fn decode_row(row: &SqliteRow, columns: &Arc<[String]>) -> Result<Row, BackendError> {
    let mut values = Vec::with_capacity(columns.len());
    for ordinal in 0..columns.len() {
        let storage = {
            let raw = row.try_get_raw(ordinal)?;
            if raw.is_null() {
                None
            } else {
                Some(raw.type_info().name().to_string())
            }
        };
        let value = match storage.as_deref() {
            None => Value::Null,
            Some("INTEGER" | "INT" | "BIGINT" | "BOOLEAN") => {
                Value::Int(row.try_get_unchecked::<i64, _>(ordinal)?)
            }
            Some("REAL" | "NUMERIC") => Value::Float(row.try_get_unchecked::<f64, _>(ordinal)?),
            Some("BLOB") => Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(ordinal)?),
            Some(_) => Value::Text(row.try_get_unchecked::<String, _>(ordinal)?),
        };
        values.push(value);
    }
    Ok(Row::new(Arc::clone(columns), values))
}
