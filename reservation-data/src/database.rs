//! Database connection pool management
//!
//! Pools are created with exponential-backoff retry driven by
//! [`DatabaseConfig::max_retries`] and [`DatabaseConfig::retry_delay_secs`].
//! Connection URLs are sanitised before they reach logs or errors.

use std::time::Duration;

#[cfg(any(feature = "sqlite", feature = "postgres"))]
use std::future::Future;

#[cfg(feature = "postgres")]
use sqlx::{postgres::PgPoolOptions, PgPool};
#[cfg(feature = "sqlite")]
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

#[cfg(any(feature = "sqlite", feature = "postgres"))]
use crate::{backend::BackendError, config::DatabaseConfig, error::Result};

/// Create a SQLite connection pool with retry logic
///
/// In-memory databases are private to each connection, so their pools are
/// capped at one connection and keep it open.
#[cfg(feature = "sqlite")]
pub async fn create_sqlite_pool(config: &DatabaseConfig) -> Result<SqlitePool> {
    let in_memory = is_in_memory_sqlite(&config.url);
    let (max, min) = if in_memory {
        (1, 1)
    } else {
        (config.max_connections, config.min_connections)
    };
    with_retries(config, || {
        let options = SqlitePoolOptions::new()
            .max_connections(max)
            .min_connections(min)
            .acquire_timeout(config.connection_timeout());
        let options = if in_memory {
            options.idle_timeout(None).max_lifetime(None)
        } else {
            options
        };
        options.connect(&config.url)
    })
    .await
}

/// Whether a SQLite URL names a per-connection in-memory database
pub fn is_in_memory_sqlite(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Create a PostgreSQL connection pool with retry logic
#[cfg(feature = "postgres")]
pub async fn create_pg_pool(config: &DatabaseConfig) -> Result<PgPool> {
    with_retries(config, || {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connection_timeout())
            .connect(&config.url)
    })
    .await
}

/// Run `connect` until it succeeds or the retry budget is spent
///
/// Uses exponential backoff strategy for retries
#[cfg(any(feature = "sqlite", feature = "postgres"))]
async fn with_retries<P, C, Fut>(config: &DatabaseConfig, connect: C) -> Result<P>
where
    C: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<P, sqlx::Error>>,
{
    let url_safe = sanitize_connection_url(&config.url);
    let base_delay = Duration::from_secs(config.retry_delay_secs);
    let mut attempt = 0;

    loop {
        match connect().await {
            Ok(pool) => {
                if attempt > 0 {
                    tracing::info!(
                        "Database connection established after {} attempt(s)",
                        attempt + 1
                    );
                } else {
                    tracing::info!(
                        url = %url_safe,
                        "Database connection pool created: max={}, min={}",
                        config.max_connections,
                        config.min_connections
                    );
                }
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;
                let category = categorize_db_error(&e);
                let err = BackendError::from(e);

                if attempt > config.max_retries {
                    tracing::error!(
                        url = %url_safe,
                        "Failed to connect to database after {} attempts: {} ({})",
                        config.max_retries + 1,
                        err,
                        category
                    );
                    return Err(err.into());
                }

                let delay = retry_delay(base_delay, attempt);
                tracing::warn!(
                    url = %url_safe,
                    "Database connection attempt {} failed: {} ({}). Retrying in {:?}...",
                    attempt,
                    err,
                    category,
                    delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Backoff before retry `attempt` (1-based): `base * 2^(attempt - 1)`
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(multiplier)
}

/// Sanitize connection URL for safe logging (remove password)
pub fn sanitize_connection_url(url: &str) -> String {
    if let (Some(at_pos), Some(scheme_end)) = (url.rfind('@'), url.find("://")) {
        let credentials_start = scheme_end + 3;
        if at_pos > credentials_start {
            let scheme = &url[..credentials_start];
            let after_at = &url[at_pos..];
            let credentials = &url[credentials_start..at_pos];
            return match credentials.find(':') {
                Some(colon_pos) => format!("{}{}:***{}", scheme, &credentials[..colon_pos], after_at),
                None => format!("{}{}{}", scheme, credentials, after_at),
            };
        }
    }
    url.to_string()
}

/// Categorize database error for better user guidance
#[cfg(any(feature = "sqlite", feature = "postgres"))]
fn categorize_db_error(err: &sqlx::Error) -> &'static str {
    use sqlx::Error;
    match err {
        Error::Configuration(_) => "configuration error",
        Error::Database(_) => "database rejected the connection",
        Error::Io(_) => "network I/O error - check connectivity",
        Error::Tls(_) => "TLS/SSL error - check certificate configuration",
        Error::PoolTimedOut => "connection pool timeout - database may be overloaded",
        Error::PoolClosed => "connection pool closed",
        Error::WorkerCrashed => "database worker crashed",
        _ => "connection error",
    }
}
