//! # reservation-data
//!
//! Generic data-access core for the reservation service: a metadata-driven
//! entity-to-table mapper, a dynamic SQL statement builder with batched bulk
//! operations and generated-value echo-back, and a composable query-plan
//! compiler that turns chained query operations into one parameterised
//! statement at the terminal call.
//!
//! ## Features
//!
//! - **Metadata**: entities describe their table once through [`metadata::Entity`];
//!   the description is validated and cached per type
//! - **Repositories**: single and bulk create/update/delete with computed
//!   columns copied back onto the caller's entities
//! - **Queries**: filter, join, group, having, order, paginate and aggregate,
//!   compiled lazily for SQL Server, PostgreSQL or SQLite
//! - **Errors**: native driver codes classified into a typed
//!   [`RepositoryErrorKind`](repository::RepositoryErrorKind) with a retriable flag
//! - **Backends**: sqlx SQLite (`sqlite`, default) and PostgreSQL (`postgres`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use reservation_data::prelude::*;
//! use reservation_data::backend::sqlite::SqliteFactory;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let factory = Arc::new(SqliteFactory::connect("sqlite::memory:").await?);
//!     let stations = GenericRepository::<Station, _>::new(factory);
//!     let cancel = CancellationToken::new();
//!
//!     let mut retiro = Station::new("Retiro", Some("Buenos Aires"));
//!     stations.create(&mut retiro, &cancel).await?;
//!
//!     let central = stations
//!         .query()
//!         .filter(col("city").eq("Buenos Aires"))
//!         .order_by(col("name"))
//!         .to_list(&cancel)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod binder;
pub mod config;
pub mod database;
pub mod error;
pub mod metadata;
pub mod observability;
pub mod query;
pub mod repository;
pub mod sql;
pub mod value;

/// Prelude module for convenient imports
pub mod prelude {
    pub use std::sync::Arc;

    pub use tokio_util::sync::CancellationToken;

    pub use crate::backend::{share, BackendError, Connection, ConnectionFactory, SharedConnection};
    pub use crate::binder::{Command, Row};
    pub use crate::config::{Config, DatabaseConfig};
    pub use crate::error::{Error, Result};
    pub use crate::metadata::{assign, unknown_member, ColumnDef, Entity, EntityDescriptor};
    pub use crate::observability::init_tracing;
    pub use crate::query::{
        avg, col, count, count_all, field, lit, max, min, sum, AggregateDescriptor, Expr,
        OrderDirection, PagedResult, Query, Record,
    };
    pub use crate::repository::{
        AggregateResult, DataContext, GenericRepository, OperationResult, OptionalResult,
        Repository, RepositoryError, RepositoryErrorKind, RepositoryOperation, RepositoryOptions,
        RepositoryResult,
    };
    pub use crate::sql::Dialect;
    pub use crate::value::{DeclaredType, FromValue, SqlEnum, Value, ValueType};

    #[cfg(feature = "sqlite")]
    pub use crate::backend::sqlite::{SqliteFactory, SqliteSession};

    #[cfg(feature = "postgres")]
    pub use crate::backend::postgres::{PostgresFactory, PostgresSession};

    #[cfg(feature = "sqlite")]
    pub use crate::database::create_sqlite_pool;

    #[cfg(feature = "postgres")]
    pub use crate::database::create_pg_pool;
}
