//! Statement execution shared by repositories and queries
//!
//! A [`DataContext`] owns the connection factory and decides where commands
//! run: on a fresh connection per call, or on one caller-supplied shared
//! connection (usually an open transaction). It races every command against
//! the caller's cancellation token and the optional command timeout, and
//! translates driver failures into [`RepositoryError`]s.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backend::{BackendError, Connection, ConnectionFactory, SharedConnection};
use crate::binder::{Command, Row};
use crate::sql::Dialect;

use super::{RepositoryError, RepositoryOperation, RepositoryResult};

/// Per-context execution options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepositoryOptions {
    /// Upper bound for a single command, connection acquisition included
    pub command_timeout: Option<Duration>,
}

impl RepositoryOptions {
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }
}

enum Scope<C> {
    PerCall,
    Shared(SharedConnection<C>),
}

impl<C> Clone for Scope<C> {
    fn clone(&self) -> Self {
        match self {
            Self::PerCall => Self::PerCall,
            Self::Shared(shared) => Self::Shared(Arc::clone(shared)),
        }
    }
}

/// Connection factory plus connection scope and options
pub struct DataContext<F: ConnectionFactory> {
    factory: Arc<F>,
    scope: Scope<F::Connection>,
    options: RepositoryOptions,
}

impl<F: ConnectionFactory> Clone for DataContext<F> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            scope: self.scope.clone(),
            options: self.options,
        }
    }
}

impl<F: ConnectionFactory> DataContext<F> {
    /// Open a connection from the factory for every command
    pub fn new(factory: Arc<F>) -> Self {
        Self {
            factory,
            scope: Scope::PerCall,
            options: RepositoryOptions::default(),
        }
    }

    /// Run every command on one shared connection
    pub fn with_connection(factory: Arc<F>, connection: SharedConnection<F::Connection>) -> Self {
        Self {
            factory,
            scope: Scope::Shared(connection),
            options: RepositoryOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: RepositoryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> RepositoryOptions {
        self.options
    }

    pub fn dialect(&self) -> Dialect {
        self.factory.dialect()
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.scope, Scope::Shared(_))
    }

    /// Run a statement and return the affected-row count
    pub(crate) async fn execute(
        &self,
        operation: RepositoryOperation,
        entity: &str,
        command: &Command,
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        let work = async {
            match &self.scope {
                Scope::PerCall => {
                    let mut conn = self.factory.open().await?;
                    conn.execute(command).await
                }
                Scope::Shared(shared) => {
                    let mut conn = shared.lock().await;
                    conn.execute(command).await
                }
            }
        };
        self.guard(operation, entity, command, cancel, work).await
    }

    /// Run a statement and materialise the returned rows
    pub(crate) async fn fetch(
        &self,
        operation: RepositoryOperation,
        entity: &str,
        command: &Command,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Vec<Row>> {
        let work = async {
            match &self.scope {
                Scope::PerCall => {
                    let mut conn = self.factory.open().await?;
                    conn.fetch_all(command).await
                }
                Scope::Shared(shared) => {
                    let mut conn = shared.lock().await;
                    conn.fetch_all(command).await
                }
            }
        };
        self.guard(operation, entity, command, cancel, work).await
    }

    async fn guard<R>(
        &self,
        operation: RepositoryOperation,
        entity: &str,
        command: &Command,
        cancel: &CancellationToken,
        work: impl Future<Output = Result<R, BackendError>>,
    ) -> RepositoryResult<R> {
        tracing::debug!(
            operation = %operation,
            entity,
            params = command.params.len(),
            "Executing statement"
        );
        tracing::trace!(sql = %command.sql, "Statement text");

        let limit = self.options.command_timeout;
        let bounded = async {
            match limit {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::Timeout(format!(
                        "Command exceeded {:?}",
                        limit
                    ))),
                },
                None => work.await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(operation = %operation, entity, "Operation cancelled");
                return Err(RepositoryError::cancelled(operation).with_entity(entity));
            }
            result = bounded => result,
        };

        result.map_err(|e| {
            let err = RepositoryError::from_backend(self.dialect(), operation, &e).with_entity(entity);
            tracing::error!(
                operation = %operation,
                entity,
                kind = %err.kind,
                constraint = ?err.constraint,
                retriable = err.is_retriable(),
                "Repository error: {}",
                err.message
            );
            err
        })
    }
}
