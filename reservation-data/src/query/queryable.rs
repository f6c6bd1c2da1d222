//! Composable query plans
//!
//! A [`Query`] is a handle on an immutable plan chain. Builder methods take
//! `&self` and return a new query one node longer, so a base query can be
//! shared and extended in several directions. Nothing touches the store
//! until a terminal method runs; the terminal folds the chain, compiles one
//! statement and executes it through the repository's [`DataContext`].
//!
//! # Example
//!
//! ```rust,ignore
//! use reservation_data::prelude::*;
//!
//! let active = stations.query().filter(col("active").eq(true));
//!
//! let page = active
//!     .order_by(col("name"))
//!     .page(2, 20)
//!     .to_paged_result(&cancel)
//!     .await?;
//! println!("{} of {}", page.items.len(), page.total_count);
//!
//! let per_city = active
//!     .group_by([col("city")])
//!     .select([("city", col("city")), ("stations", count_all())])
//!     .to_list(&cancel)
//!     .await?;
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::backend::ConnectionFactory;
use crate::binder::{self, ColumnIndex, Command, Row};
use crate::metadata::{self, entity_name, Entity, EntityMetadata};
use crate::repository::{
    AggregateResult, DataContext, RepositoryError, RepositoryOperation, RepositoryResult,
};
use crate::value::{DeclaredType, FromValue, Value, ValueType};

use super::compiler::{compile, Terminal};
use super::expr::Expr;
use super::model::{
    AggregateDescriptor, FilterDescriptor, GroupDescriptor, JoinDescriptor, JoinKind, Operation,
    OrderDirection, PlanNode, ProjectionDescriptor, QueryModel,
};

const OP: RepositoryOperation = RepositoryOperation::Query;

/// Result shape a plan materialises into
pub trait Materialize: Sized + Send {
    /// Whether rows must carry the root entity's columns in metadata order
    const ENTITY: bool;

    fn materialize(metadata: &EntityMetadata, row: Row) -> RepositoryResult<Self>;
}

impl<E: Entity> Materialize for E {
    const ENTITY: bool = true;

    fn materialize(metadata: &EntityMetadata, row: Row) -> RepositoryResult<Self> {
        metadata::materialize(metadata, &row, OP)
    }
}

/// One row of a projected, grouped or joined plan
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    row: Row,
}

impl Record {
    /// Column value by ordinal or case-insensitive alias
    pub fn get<I: ColumnIndex>(&self, index: I) -> Option<&Value> {
        self.row.get(index)
    }

    /// Typed column value
    pub fn get_as<V: FromValue>(&self, name: &str) -> RepositoryResult<V> {
        let value = self
            .row
            .get(name)
            .cloned()
            .ok_or_else(|| RepositoryError::mapping(OP, format!("Record has no column '{name}'")))?;
        V::from_value(value)
            .map_err(|e| RepositoryError::mapping(OP, format!("Column '{name}': {e}")))
    }

    pub fn columns(&self) -> &[String] {
        self.row.columns()
    }

    pub fn into_row(self) -> Row {
        self.row
    }
}

impl Materialize for Record {
    const ENTITY: bool = false;

    fn materialize(_metadata: &EntityMetadata, row: Row) -> RepositoryResult<Self> {
        Ok(Self { row })
    }
}

/// One page of results plus the size of the whole result
#[derive(Debug, Clone, PartialEq)]
pub struct PagedResult<O> {
    pub items: Vec<O>,
    /// Rows matching the plan with pagination removed
    pub total_count: u64,
    pub skip: u64,
    pub take: Option<u64>,
}

impl<O> PagedResult<O> {
    /// Whether rows exist past this page
    pub fn has_more(&self) -> bool {
        self.skip.saturating_add(self.items.len() as u64) < self.total_count
    }

    /// Number of pages of `take` rows; `1` for an unbounded page
    pub fn page_count(&self) -> u64 {
        match self.take {
            Some(0) => 0,
            Some(take) => self.total_count.div_ceil(take),
            None => 1,
        }
    }
}

/// A lazily compiled query over entity `T`, producing `O` per row
///
/// `O` is `T` until the plan is projected with [`Query::select`], after
/// which rows come back as [`Record`]s.
pub struct Query<T, O, F: ConnectionFactory> {
    context: Arc<DataContext<F>>,
    head: Option<Arc<PlanNode>>,
    _shape: PhantomData<fn() -> (T, O)>,
}

impl<T, O, F: ConnectionFactory> Clone for Query<T, O, F> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            head: self.head.clone(),
            _shape: PhantomData,
        }
    }
}

impl<T: Entity, F: ConnectionFactory> Query<T, T, F> {
    pub(crate) fn new(context: Arc<DataContext<F>>) -> Self {
        Self {
            context,
            head: None,
            _shape: PhantomData,
        }
    }
}

impl<T: Entity, O: Materialize, F: ConnectionFactory> Query<T, O, F> {
    fn push<P>(&self, operation: Operation) -> Query<T, P, F> {
        Query {
            context: Arc::clone(&self.context),
            head: Some(PlanNode::push(self.head.as_ref(), operation)),
            _shape: PhantomData,
        }
    }

    /// Keep rows matching `predicate`; filters combine with `AND`
    pub fn filter(&self, predicate: Expr) -> Self {
        self.push(Operation::Filter(FilterDescriptor { predicate }))
    }

    /// Alias of [`Query::filter`]
    pub fn where_(&self, predicate: Expr) -> Self {
        self.filter(predicate)
    }

    /// Project the result onto named expressions
    ///
    /// A later `select` replaces an earlier one.
    pub fn select<S, I>(&self, columns: I) -> Query<T, Record, F>
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, Expr)>,
    {
        let columns = columns
            .into_iter()
            .map(|(alias, expr)| (alias.into(), expr))
            .collect();
        self.push(Operation::Project(ProjectionDescriptor { columns }))
    }

    /// Inner join entity `J` under `alias`
    ///
    /// Joined members are addressed with [`field`](super::field). Select the
    /// result columns before materialising.
    pub fn join<J: Entity>(&self, alias: impl Into<String>, on: Expr) -> Self {
        self.join_with::<J>(JoinKind::Inner, alias.into(), on)
    }

    /// Left outer join entity `J` under `alias`
    pub fn left_join<J: Entity>(&self, alias: impl Into<String>, on: Expr) -> Self {
        self.join_with::<J>(JoinKind::Left, alias.into(), on)
    }

    fn join_with<J: Entity>(&self, kind: JoinKind, alias: String, on: Expr) -> Self {
        self.push(Operation::Join(JoinDescriptor {
            alias,
            kind,
            predicate: on,
            entity_name: entity_name::<J>(),
            resolver: EntityMetadata::resolve::<J>,
        }))
    }

    pub fn group_by(&self, keys: impl IntoIterator<Item = Expr>) -> Self {
        self.push(Operation::Group(GroupDescriptor {
            keys: keys.into_iter().collect(),
        }))
    }

    /// Filter groups; requires [`Query::group_by`]
    pub fn having(&self, predicate: Expr) -> Self {
        self.push(Operation::Having(FilterDescriptor { predicate }))
    }

    /// Append an ascending key after any existing ordering
    pub fn order_by(&self, key: Expr) -> Self {
        self.order(key, OrderDirection::Ascending, None)
    }

    pub fn order_by_desc(&self, key: Expr) -> Self {
        self.order(key, OrderDirection::Descending, None)
    }

    pub fn then_by(&self, key: Expr) -> Self {
        self.order(key, OrderDirection::Ascending, None)
    }

    pub fn then_by_desc(&self, key: Expr) -> Self {
        self.order(key, OrderDirection::Descending, None)
    }

    /// Ordering key with an explicit priority; lower sorts first and ties
    /// keep insertion order
    pub fn order_by_priority(&self, key: Expr, direction: OrderDirection, priority: u32) -> Self {
        self.order(key, direction, Some(priority))
    }

    fn order(&self, key: Expr, direction: OrderDirection, priority: Option<u32>) -> Self {
        self.push(Operation::Order {
            key,
            direction,
            priority,
        })
    }

    /// 1-indexed page of `size` rows; replaces skip/take
    pub fn page(&self, number: u64, size: u64) -> Self {
        self.push(Operation::Page { number, size })
    }

    pub fn skip(&self, count: u64) -> Self {
        self.push(Operation::Skip(count))
    }

    pub fn take(&self, count: u64) -> Self {
        self.push(Operation::Take(count))
    }

    pub fn distinct(&self) -> Self {
        self.push(Operation::Distinct)
    }

    pub fn clear_ordering(&self) -> Self {
        self.push(Operation::ClearOrdering)
    }

    pub fn clear_pagination(&self) -> Self {
        self.push(Operation::ClearPagination)
    }

    /// The folded plan
    pub fn model(&self) -> QueryModel {
        QueryModel::from_chain(self.head.as_ref())
    }

    /// Compile the row-returning statement without running it
    pub fn to_command(&self) -> RepositoryResult<Command> {
        let metadata = self.metadata()?;
        self.compile(&metadata, &self.model(), Terminal::Rows { entity: O::ENTITY })
    }

    /// Every row of the plan
    pub async fn to_list(&self, cancel: &CancellationToken) -> RepositoryResult<Vec<O>> {
        self.rows(self.model(), cancel).await
    }

    /// The first row; `NotFound` when there is none
    pub async fn first(&self, cancel: &CancellationToken) -> RepositoryResult<O> {
        let metadata = self.metadata()?;
        self.first_or_default(cancel)
            .await?
            .ok_or_else(|| RepositoryError::not_found(&metadata.entity_name))
    }

    pub async fn first_or_default(&self, cancel: &CancellationToken) -> RepositoryResult<Option<O>> {
        let model = capped(self.model(), 1);
        Ok(self.rows(model, cancel).await?.into_iter().next())
    }

    /// The only row; `NotFound` for none, `MultipleResults` for more
    pub async fn single(&self, cancel: &CancellationToken) -> RepositoryResult<O> {
        let metadata = self.metadata()?;
        self.single_or_default(cancel)
            .await?
            .ok_or_else(|| RepositoryError::not_found(&metadata.entity_name))
    }

    /// The only row or `None`; `MultipleResults` for more than one
    pub async fn single_or_default(&self, cancel: &CancellationToken) -> RepositoryResult<Option<O>> {
        let model = capped(self.model(), 2);
        let mut rows = self.rows(model, cancel).await?;
        if rows.len() > 1 {
            let metadata = self.metadata()?;
            return Err(RepositoryError::multiple_results(&metadata.entity_name));
        }
        Ok(rows.pop())
    }

    /// Number of rows the plan yields, honouring pagination and distinct
    pub async fn count(&self, cancel: &CancellationToken) -> RepositoryResult<u64> {
        self.count_model(&self.model(), cancel).await
    }

    pub async fn any(&self, cancel: &CancellationToken) -> RepositoryResult<bool> {
        let metadata = self.metadata()?;
        let command = self.compile(&metadata, &self.model(), Terminal::Any)?;
        let row = self.scalar_row(&metadata, &command, cancel).await?;
        let value = binder::read(&row, "has_rows", DeclaredType::required(ValueType::Bool))?;
        convert(value, "has_rows")
    }

    /// Sum of `selector`; an empty input sums to zero
    pub async fn sum<V: FromValue>(&self, selector: Expr, cancel: &CancellationToken) -> RepositoryResult<V> {
        let value = self
            .single_aggregate(AggregateDescriptor::sum(selector, "value"), cancel)
            .await?;
        let value = if value.is_null() { Value::Int(0) } else { value };
        convert(value, "value")
    }

    /// Smallest value of `selector`; `None` for an empty input
    pub async fn min<V: FromValue>(
        &self,
        selector: Expr,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Option<V>> {
        let value = self
            .single_aggregate(AggregateDescriptor::min(selector, "value"), cancel)
            .await?;
        convert_optional(value)
    }

    /// Largest value of `selector`; `None` for an empty input
    pub async fn max<V: FromValue>(
        &self,
        selector: Expr,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Option<V>> {
        let value = self
            .single_aggregate(AggregateDescriptor::max(selector, "value"), cancel)
            .await?;
        convert_optional(value)
    }

    /// Mean of `selector` as a float; `None` for an empty input
    pub async fn average(&self, selector: Expr, cancel: &CancellationToken) -> RepositoryResult<Option<f64>> {
        let value = self
            .single_aggregate(AggregateDescriptor::average(selector, "value"), cancel)
            .await?;
        convert_optional(value)
    }

    /// Several named aggregates in one statement
    pub async fn aggregate(
        &self,
        descriptors: &[AggregateDescriptor],
        cancel: &CancellationToken,
    ) -> RepositoryResult<AggregateResult> {
        let metadata = self.metadata()?;
        let command = self.compile(&metadata, &self.model(), Terminal::Aggregates(descriptors))?;
        let row = self.scalar_row(&metadata, &command, cancel).await?;
        Ok(AggregateResult::from_row(row))
    }

    /// The current page plus the unpaged total
    ///
    /// Fails with `InvalidQuery` when the plan has no pagination.
    pub async fn to_paged_result(&self, cancel: &CancellationToken) -> RepositoryResult<PagedResult<O>> {
        let model = self.model();
        let Some(page) = model.pagination else {
            let metadata = self.metadata()?;
            return Err(RepositoryError::invalid_query(
                "to_paged_result requires page, skip or take",
            )
            .with_entity(&metadata.entity_name));
        };

        let total = QueryModel {
            pagination: None,
            orders: Vec::new(),
            ..model.clone()
        };
        let items = self.rows(model, cancel).await?;
        let total_count = self.count_model(&total, cancel).await?;
        Ok(PagedResult {
            items,
            total_count,
            skip: page.offset,
            take: page.limit,
        })
    }

    /// Run terminals synchronously on `handle`
    ///
    /// Must not be called from within an async task.
    pub fn blocking(&self, handle: tokio::runtime::Handle) -> super::BlockingQuery<'_, T, O, F> {
        super::BlockingQuery::new(self, handle)
    }

    fn metadata(&self) -> RepositoryResult<Arc<EntityMetadata>> {
        EntityMetadata::resolve::<T>().map_err(|e| e.with_operation(OP))
    }

    fn compile(
        &self,
        metadata: &Arc<EntityMetadata>,
        model: &QueryModel,
        terminal: Terminal<'_>,
    ) -> RepositoryResult<Command> {
        compile(self.context.dialect(), metadata, model, terminal)
            .map_err(|e| e.with_operation(OP).with_entity(&metadata.entity_name))
    }

    async fn rows(&self, model: QueryModel, cancel: &CancellationToken) -> RepositoryResult<Vec<O>> {
        let metadata = self.metadata()?;
        let command = self.compile(&metadata, &model, Terminal::Rows { entity: O::ENTITY })?;
        let rows = self
            .context
            .fetch(OP, &metadata.entity_name, &command, cancel)
            .await?;
        rows.into_iter()
            .map(|row| O::materialize(&metadata, row))
            .collect()
    }

    async fn count_model(&self, model: &QueryModel, cancel: &CancellationToken) -> RepositoryResult<u64> {
        let metadata = self.metadata()?;
        let command = self.compile(&metadata, model, Terminal::Count)?;
        let row = self.scalar_row(&metadata, &command, cancel).await?;
        let value = binder::read(&row, "row_count", DeclaredType::required(ValueType::Int))?;
        let count: i64 = convert(value, "row_count")?;
        u64::try_from(count)
            .map_err(|_| RepositoryError::mapping(OP, format!("Negative row count {count}")))
    }

    async fn single_aggregate(
        &self,
        descriptor: AggregateDescriptor,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Value> {
        let result = self.aggregate(std::slice::from_ref(&descriptor), cancel).await?;
        Ok(result.value(&descriptor.name).cloned().unwrap_or_default())
    }

    async fn scalar_row(
        &self,
        metadata: &EntityMetadata,
        command: &Command,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Row> {
        self.context
            .fetch(OP, &metadata.entity_name, command, cancel)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RepositoryError::mapping(OP, "Scalar query returned no row")
                    .with_entity(&metadata.entity_name)
            })
    }
}

fn capped(mut model: QueryModel, cap: u64) -> QueryModel {
    model.pagination = Some(model.pagination.unwrap_or_default().capped(cap));
    model
}

fn convert<V: FromValue>(value: Value, name: &str) -> RepositoryResult<V> {
    V::from_value(value).map_err(|e| RepositoryError::mapping(OP, format!("Column '{name}': {e}")))
}

fn convert_optional<V: FromValue>(value: Value) -> RepositoryResult<Option<V>> {
    match value {
        Value::Null => Ok(None),
        value => convert(value, "value").map(Some),
    }
}
