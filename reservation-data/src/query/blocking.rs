//! Synchronous terminals
//!
//! [`BlockingQuery`] drives the async terminals to completion on a tokio
//! runtime handle, for callers that are not async themselves. Calling it
//! from inside a runtime worker panics, as with
//! [`Handle::block_on`](tokio::runtime::Handle::block_on).

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::backend::ConnectionFactory;
use crate::metadata::Entity;
use crate::repository::{AggregateResult, RepositoryResult};
use crate::value::FromValue;

use super::expr::Expr;
use super::model::AggregateDescriptor;
use super::queryable::{Materialize, PagedResult, Query};

/// A query whose terminals block the calling thread
pub struct BlockingQuery<'q, T, O, F: ConnectionFactory> {
    query: &'q Query<T, O, F>,
    handle: Handle,
    cancel: CancellationToken,
}

impl<'q, T: Entity, O: Materialize, F: ConnectionFactory> BlockingQuery<'q, T, O, F> {
    pub(crate) fn new(query: &'q Query<T, O, F>, handle: Handle) -> Self {
        Self {
            query,
            handle,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel the blocking terminals through `cancel`
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn to_list(&self) -> RepositoryResult<Vec<O>> {
        self.handle.block_on(self.query.to_list(&self.cancel))
    }

    pub fn first(&self) -> RepositoryResult<O> {
        self.handle.block_on(self.query.first(&self.cancel))
    }

    pub fn first_or_default(&self) -> RepositoryResult<Option<O>> {
        self.handle.block_on(self.query.first_or_default(&self.cancel))
    }

    pub fn single(&self) -> RepositoryResult<O> {
        self.handle.block_on(self.query.single(&self.cancel))
    }

    pub fn single_or_default(&self) -> RepositoryResult<Option<O>> {
        self.handle.block_on(self.query.single_or_default(&self.cancel))
    }

    pub fn count(&self) -> RepositoryResult<u64> {
        self.handle.block_on(self.query.count(&self.cancel))
    }

    pub fn any(&self) -> RepositoryResult<bool> {
        self.handle.block_on(self.query.any(&self.cancel))
    }

    pub fn sum<V: FromValue>(&self, selector: Expr) -> RepositoryResult<V> {
        self.handle.block_on(self.query.sum(selector, &self.cancel))
    }

    pub fn min<V: FromValue>(&self, selector: Expr) -> RepositoryResult<Option<V>> {
        self.handle.block_on(self.query.min(selector, &self.cancel))
    }

    pub fn max<V: FromValue>(&self, selector: Expr) -> RepositoryResult<Option<V>> {
        self.handle.block_on(self.query.max(selector, &self.cancel))
    }

    pub fn average(&self, selector: Expr) -> RepositoryResult<Option<f64>> {
        self.handle.block_on(self.query.average(selector, &self.cancel))
    }

    pub fn aggregate(&self, descriptors: &[AggregateDescriptor]) -> RepositoryResult<AggregateResult> {
        self.handle
            .block_on(self.query.aggregate(descriptors, &self.cancel))
    }

    pub fn to_paged_result(&self) -> RepositoryResult<PagedResult<O>> {
        self.handle.block_on(self.query.to_paged_result(&self.cancel))
    }
}
