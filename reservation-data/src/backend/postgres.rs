//! PostgreSQL backend over sqlx

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column as _, PgConnection, Postgres, Row as _, Transaction, TypeInfo as _};
use uuid::Uuid;

use super::{bind_parameters, BackendError, Connection, ConnectionFactory};
use crate::binder::{Command, Row};
use crate::sql::Dialect;
use crate::value::Value;

/// Connection factory over a sqlx PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PostgresFactory {
    pool: PgPool,
}

impl PostgresFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Start a transaction
    pub async fn begin(&self) -> Result<PostgresSession, BackendError> {
        let tx = self.pool.begin().await?;
        Ok(PostgresSession {
            inner: Session::Transaction(Some(tx)),
        })
    }
}

#[async_trait]
impl ConnectionFactory for PostgresFactory {
    type Connection = PostgresSession;

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn open(&self) -> Result<PostgresSession, BackendError> {
        let conn = self.pool.acquire().await?;
        Ok(PostgresSession {
            inner: Session::Pooled(conn),
        })
    }
}

enum Session {
    Pooled(PoolConnection<Postgres>),
    Transaction(Option<Transaction<'static, Postgres>>),
}

/// A pooled PostgreSQL connection or an open transaction
pub struct PostgresSession {
    inner: Session,
}

impl PostgresSession {
    pub fn is_transaction(&self) -> bool {
        matches!(self.inner, Session::Transaction(_))
    }

    pub async fn commit(&mut self) -> Result<(), BackendError> {
        match &mut self.inner {
            Session::Pooled(_) => Ok(()),
            Session::Transaction(tx) => match tx.take() {
                Some(tx) => Ok(tx.commit().await?),
                None => Err(finished()),
            },
        }
    }

    pub async fn rollback(&mut self) -> Result<(), BackendError> {
        match &mut self.inner {
            Session::Pooled(_) => Ok(()),
            Session::Transaction(tx) => match tx.take() {
                Some(tx) => Ok(tx.rollback().await?),
                None => Err(finished()),
            },
        }
    }

    fn connection(&mut self) -> Result<&mut PgConnection, BackendError> {
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
impl Connection for PostgresSession {
    async fn execute(&mut self, command: &Command) -> Result<u64, BackendError> {
        let sql = Dialect::Postgres.render_placeholders(command);
        let query = bind_parameters(sqlx::query::<Postgres>(&sql), &command.params);
        let conn = self.connection()?;
        let result = query.execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, command: &Command) -> Result<Vec<Row>, BackendError> {
        let sql = Dialect::Postgres.render_placeholders(command);
        let query = bind_parameters(sqlx::query::<Postgres>(&sql), &command.params);
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
        let kinds = column_kinds(
            &columns,
            first.columns().iter().map(|c| c.type_info().name()),
        )?;
        rows.iter()
            .map(|row| decode_row(row, &columns, &kinds))
            .collect()
    }
}

/// How a result column is read back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Text,
    Bytes,
    TimestampTz,
    Timestamp,
    Date,
    Uuid,
}

impl ColumnKind {
    fn from_type_name(name: &str) -> Option<Self> {
        Some(match name {
            "BOOL" => Self::Bool,
            "INT2" => Self::Int2,
            "INT4" => Self::Int4,
            "INT8" => Self::Int8,
            "FLOAT4" => Self::Float4,
            "FLOAT8" => Self::Float8,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => Self::Text,
            "BYTEA" => Self::Bytes,
            "TIMESTAMPTZ" => Self::TimestampTz,
            "TIMESTAMP" => Self::Timestamp,
            "DATE" => Self::Date,
            "UUID" => Self::Uuid,
            _ => return None,
        })
    }
}

/// Map the declared type of every column, rejecting types with no `Value` form
fn column_kinds<'a>(
    columns: &[String],
    type_names: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<ColumnKind>, BackendError> {
    columns
        .iter()
        .zip(type_names)
        .map(|(column, type_name)| {
            ColumnKind::from_type_name(type_name).ok_or_else(|| {
                BackendError::Decode(format!(
                    "Unsupported column type {} for column {}",
                    type_name, column
                ))
            })
        })
        .collect()
}

fn decode_row(row: &PgRow, columns: &Arc<[String]>, kinds: &[ColumnKind]) -> Result<Row, BackendError> {
    let mut values = Vec::with_capacity(kinds.len());
    for (ordinal, kind) in kinds.iter().enumerate() {
        let value = match kind {
            ColumnKind::Bool => row.try_get::<Option<bool>, _>(ordinal)?.map(Value::Bool),
            ColumnKind::Int2 => row
                .try_get::<Option<i16>, _>(ordinal)?
                .map(|v| Value::Int(i64::from(v))),
            ColumnKind::Int4 => row
                .try_get::<Option<i32>, _>(ordinal)?
                .map(|v| Value::Int(i64::from(v))),
            ColumnKind::Int8 => row.try_get::<Option<i64>, _>(ordinal)?.map(Value::Int),
            ColumnKind::Float4 => row
                .try_get::<Option<f32>, _>(ordinal)?
                .map(|v| Value::Float(f64::from(v))),
            ColumnKind::Float8 => row.try_get::<Option<f64>, _>(ordinal)?.map(Value::Float),
            ColumnKind::Text => row.try_get::<Option<String>, _>(ordinal)?.map(Value::Text),
            ColumnKind::Bytes => row.try_get::<Option<Vec<u8>>, _>(ordinal)?.map(Value::Bytes),
            ColumnKind::TimestampTz => row
                .try_get::<Option<DateTime<Utc>>, _>(ordinal)?
                .map(Value::DateTime),
            ColumnKind::Timestamp => row
                .try_get::<Option<NaiveDateTime>, _>(ordinal)?
                .map(|v| Value::DateTime(v.and_utc())),
            ColumnKind::Date => row.try_get::<Option<NaiveDate>, _>(ordinal)?.map(Value::Date),
            ColumnKind::Uuid => row.try_get::<Option<Uuid>, _>(ordinal)?.map(Value::Uuid),
        };
        values.push(value.unwrap_or(Value::Null));
    }
    Ok(Row::new(Arc::clone(columns), values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::bind;
    use crate::metadata::{assign, unknown_member, ColumnDef, Entity, EntityDescriptor};
    use crate::query::col;
    use crate::repository::{GenericRepository, RepositoryErrorKind, RepositoryResult};
    use crate::value::{DeclaredType, ValueType};
    use sqlx::postgres::PgPoolOptions;
    use tokio_util::sync::CancellationToken;

    // Live tests run when DATABASE_URL points at a PostgreSQL server:
    // DATABASE_URL=postgres://... cargo test --features postgres

    /// Single-connection factory so temporary tables stay visible
    async fn live_factory() -> Option<PostgresFactory> {
        let url = std::env::var("DATABASE_URL").ok()?;
        if !url.starts_with("postgres") {
            return None;
        }
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .expect("DATABASE_URL must reach a PostgreSQL server");
        Some(PostgresFactory::new(pool))
    }

    fn names(columns: &[&str]) -> Vec<String> {
        columns.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_column_kinds_for_supported_types() {
        let columns = names(&["a", "b", "c", "d", "e"]);
        let kinds =
            column_kinds(&columns, ["INT8", "VARCHAR", "FLOAT8", "TIMESTAMPTZ", "BOOL"]).unwrap();
        assert_eq!(
            kinds,
            [
                ColumnKind::Int8,
                ColumnKind::Text,
                ColumnKind::Float8,
                ColumnKind::TimestampTz,
                ColumnKind::Bool
            ]
        );
        assert_eq!(ColumnKind::from_type_name("BPCHAR"), Some(ColumnKind::Text));
        assert_eq!(ColumnKind::from_type_name("INT2"), Some(ColumnKind::Int2));
    }

    #[test]
    fn test_numeric_columns_are_rejected() {
        let columns = names(&["id", "total"]);
        let err = column_kinds(&columns, ["INT8", "NUMERIC"]).unwrap_err();
        match err {
            BackendError::Decode(message) => {
                assert!(message.contains("NUMERIC"));
                assert!(message.contains("total"));
            }
            other => panic!("expected a decode error, got {other:?}"),
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Coach {
        id: i64,
        seats: i64,
    }

    impl Entity for Coach {
        fn describe() -> EntityDescriptor {
            EntityDescriptor::new("pg_coaches")
                .column(ColumnDef::new("id", DeclaredType::required(ValueType::Int)).key().computed())
                .column(ColumnDef::new("seats", DeclaredType::required(ValueType::Int)))
        }

        fn value(&self, member: &str) -> Value {
            match member {
                "id" => self.id.into(),
                "seats" => self.seats.into(),
                _ => Value::Null,
            }
        }

        fn set_value(&mut self, member: &str, value: Value) -> RepositoryResult<()> {
            match member {
                "id" => assign(&mut self.id, member, value),
                "seats" => assign(&mut self.seats, member, value),
                _ => Err(unknown_member::<Self>(member)),
            }
        }
    }

    #[tokio::test]
    async fn test_execute_and_fetch_round_trip() {
        let Some(factory) = live_factory().await else {
            return;
        };
        let mut conn = factory.open().await.unwrap();
        conn.execute(&Command::new(
            "CREATE TEMP TABLE pg_round_trip (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL, score DOUBLE PRECISION, at TIMESTAMPTZ)",
        ))
        .await
        .unwrap();

        let mut insert = Command::new(
            "INSERT INTO pg_round_trip (name, score, at) VALUES (@p0, @p1, @p2) RETURNING id",
        );
        bind(&mut insert, "p0", "a".into(), DeclaredType::required(ValueType::Text));
        bind(&mut insert, "p1", Value::Null, DeclaredType::nullable(ValueType::Float));
        bind(&mut insert, "p2", Value::Null, DeclaredType::nullable(ValueType::DateTime));
        let echoed = conn.fetch_all(&insert).await.unwrap();
        assert_eq!(echoed[0].get("id"), Some(&Value::Int(1)));

        let rows = conn
            .fetch_all(&Command::new("SELECT id, name, score, at FROM pg_round_trip"))
            .await
            .unwrap();
        assert_eq!(
            rows[0].values(),
            [Value::Int(1), Value::Text("a".into()), Value::Null, Value::Null]
        );
    }

    #[tokio::test]
    async fn test_violations_carry_constraint_names() {
        let Some(factory) = live_factory().await else {
            return;
        };
        let mut conn = factory.open().await.unwrap();
        conn.execute(&Command::new(
            "CREATE TEMP TABLE pg_unique (name TEXT CONSTRAINT pg_unique_name_key UNIQUE, city TEXT NOT NULL)",
        ))
        .await
        .unwrap();
        conn.execute(&Command::new("INSERT INTO pg_unique VALUES ('x', 'y')"))
            .await
            .unwrap();

        let duplicate = conn
            .execute(&Command::new("INSERT INTO pg_unique VALUES ('x', 'z')"))
            .await
            .unwrap_err();
        assert_eq!(duplicate.code(), Some("23505"));
        assert!(matches!(
            &duplicate,
            BackendError::Database { constraint: Some(c), .. } if c == "pg_unique_name_key"
        ));

        let missing = conn
            .execute(&Command::new("INSERT INTO pg_unique (name) VALUES ('w')"))
            .await
            .unwrap_err();
        assert_eq!(missing.code(), Some("23502"));
        assert!(matches!(
            &missing,
            BackendError::Database { constraint: Some(c), .. } if c == "city"
        ));
    }

    #[tokio::test]
    async fn test_transaction_rollback() {
        let Some(factory) = live_factory().await else {
            return;
        };
        {
            let mut conn = factory.open().await.unwrap();
            conn.execute(&Command::new("CREATE TEMP TABLE pg_rollback (v BIGINT)"))
                .await
                .unwrap();
        }

        let mut tx = factory.begin().await.unwrap();
        assert!(tx.is_transaction());
        tx.execute(&Command::new("INSERT INTO pg_rollback VALUES (1)"))
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        assert!(tx.commit().await.is_err());
        drop(tx);

        let mut conn = factory.open().await.unwrap();
        let rows = conn
            .fetch_all(&Command::new("SELECT COUNT(*) AS n FROM pg_rollback"))
            .await
            .unwrap();
        assert_eq!(rows[0].get("n"), Some(&Value::Int(0)));
    }

    #[tokio::test]
    async fn test_sum_and_average_of_integers_decode_as_floats() {
        let Some(factory) = live_factory().await else {
            return;
        };
        {
            let mut conn = factory.open().await.unwrap();
            conn.execute(&Command::new(
                "CREATE TEMP TABLE pg_coaches (id BIGSERIAL PRIMARY KEY, seats BIGINT NOT NULL)",
            ))
            .await
            .unwrap();
        }

        let repo = GenericRepository::<Coach, _>::new(Arc::new(factory));
        let cancel = CancellationToken::new();
        let mut coaches = vec![
            Coach { id: 0, seats: 40 },
            Coach { id: 0, seats: 52 },
            Coach { id: 0, seats: 45 },
        ];
        assert_eq!(repo.create_bulk(&mut coaches, &cancel).await.unwrap(), 3);
        assert!(coaches.iter().all(|c| c.id != 0));

        let q = repo.query();
        assert_eq!(q.sum::<f64>(col("seats"), &cancel).await.unwrap(), 137.0);
        let average = q.average(col("seats"), &cancel).await.unwrap().unwrap();
        assert!((average - 137.0 / 3.0).abs() < 1e-9);
        assert_eq!(q.max::<i64>(col("seats"), &cancel).await.unwrap(), Some(52));

        let err = repo
            .update(&mut coaches[0], Some(&["id"]), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidQuery);
    }
}
