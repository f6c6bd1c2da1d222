//! Query plan nodes and the folded plan model
//!
//! Each builder call on a [`Query`](super::Query) pushes one immutable
//! [`PlanNode`] that points at its parent. Nothing is shared mutably: a
//! plan that has been extended is still valid and can be run on its own.
//! [`QueryModel::from_chain`] folds the chain oldest-first into plain data
//! for the compiler.

use std::fmt;
use std::sync::Arc;

use crate::metadata::EntityMetadata;
use crate::repository::RepositoryResult;

use super::expr::{AggregateFunction, Expr};

/// Sort direction for ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    /// Ascending order (A-Z, 0-9, oldest first)
    #[default]
    Ascending,
    /// Descending order (Z-A, 9-0, newest first)
    Descending,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "ASC"),
            Self::Descending => write!(f, "DESC"),
        }
    }
}

/// Skip/take window over a result set
///
/// Both page/size and skip/take requests normalise to this pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination {
    /// Number of results to skip
    pub offset: u64,
    /// Maximum number of results to return; `None` is unbounded
    pub limit: Option<u64>,
}

impl Pagination {
    #[must_use]
    pub const fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    /// Pagination for a page number (1-indexed; 0 is treated as 1)
    ///
    /// ```rust
    /// use reservation_data::query::Pagination;
    ///
    /// let page3 = Pagination::page(3, 20);
    /// assert_eq!(page3.offset, 40);
    /// assert_eq!(page3.limit, Some(20));
    /// ```
    #[must_use]
    pub const fn page(page_number: u64, page_size: u64) -> Self {
        Self {
            offset: page_number.saturating_sub(1).saturating_mul(page_size),
            limit: Some(page_size),
        }
    }

    /// Same window with the limit capped at `cap`
    #[must_use]
    pub fn capped(self, cap: u64) -> Self {
        Self {
            offset: self.offset,
            limit: Some(self.limit.map_or(cap, |limit| limit.min(cap))),
        }
    }
}

/// Boolean predicate for `WHERE` or `HAVING`
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDescriptor {
    pub predicate: Expr,
}

/// One ordering key
///
/// Keys sort by `priority`; equal priorities keep the order they were added.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDescriptor {
    pub key: Expr,
    pub direction: OrderDirection,
    pub priority: u32,
}

/// Output columns as `(alias, expression)` pairs
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionDescriptor {
    pub columns: Vec<(String, Expr)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupDescriptor {
    pub keys: Vec<Expr>,
}

/// A named aggregate for the `aggregate` terminal
///
/// ```rust
/// use reservation_data::query::{col, AggregateDescriptor};
///
/// let wanted = [
///     AggregateDescriptor::count("trips"),
///     AggregateDescriptor::average(col("price"), "avg_price"),
/// ];
/// assert_eq!(wanted[1].name, "avg_price");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateDescriptor {
    pub function: AggregateFunction,
    /// `None` only for `COUNT(*)`
    pub selector: Option<Expr>,
    pub name: String,
}

impl AggregateDescriptor {
    pub fn new(function: AggregateFunction, selector: Option<Expr>, name: impl Into<String>) -> Self {
        Self {
            function,
            selector,
            name: name.into(),
        }
    }

    pub fn count(name: impl Into<String>) -> Self {
        Self::new(AggregateFunction::Count, None, name)
    }

    pub fn sum(selector: Expr, name: impl Into<String>) -> Self {
        Self::new(AggregateFunction::Sum, Some(selector), name)
    }

    pub fn min(selector: Expr, name: impl Into<String>) -> Self {
        Self::new(AggregateFunction::Min, Some(selector), name)
    }

    pub fn max(selector: Expr, name: impl Into<String>) -> Self {
        Self::new(AggregateFunction::Max, Some(selector), name)
    }

    pub fn average(selector: Expr, name: impl Into<String>) -> Self {
        Self::new(AggregateFunction::Average, Some(selector), name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner => write!(f, "INNER JOIN"),
            Self::Left => write!(f, "LEFT JOIN"),
        }
    }
}

/// Resolves the joined entity's metadata when the plan is compiled
pub type MetadataResolver = fn() -> RepositoryResult<Arc<EntityMetadata>>;

/// A joined entity, addressed in expressions through `alias`
///
/// The result selector of a join is the plan's projection.
#[derive(Clone)]
pub struct JoinDescriptor {
    pub alias: String,
    pub kind: JoinKind,
    pub predicate: Expr,
    pub entity_name: String,
    pub resolver: MetadataResolver,
}

impl fmt::Debug for JoinDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinDescriptor")
            .field("alias", &self.alias)
            .field("kind", &self.kind)
            .field("predicate", &self.predicate)
            .field("entity_name", &self.entity_name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for JoinDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.alias == other.alias
            && self.kind == other.kind
            && self.predicate == other.predicate
            && self.entity_name == other.entity_name
    }
}

/// One builder step
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Filter(FilterDescriptor),
    Project(ProjectionDescriptor),
    Join(JoinDescriptor),
    Group(GroupDescriptor),
    Having(FilterDescriptor),
    /// `priority: None` appends after the keys already present
    Order {
        key: Expr,
        direction: OrderDirection,
        priority: Option<u32>,
    },
    ClearOrdering,
    Skip(u64),
    Take(u64),
    Page { number: u64, size: u64 },
    ClearPagination,
    Distinct,
}

/// Immutable link in a plan chain
#[derive(Debug)]
pub struct PlanNode {
    pub operation: Operation,
    pub parent: Option<Arc<PlanNode>>,
}

impl PlanNode {
    pub fn push(parent: Option<&Arc<PlanNode>>, operation: Operation) -> Arc<PlanNode> {
        Arc::new(PlanNode {
            operation,
            parent: parent.cloned(),
        })
    }
}

/// The folded plan: pure data, inspectable and re-runnable
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryModel {
    pub filters: Vec<FilterDescriptor>,
    pub projection: Option<ProjectionDescriptor>,
    pub joins: Vec<JoinDescriptor>,
    pub group: Option<GroupDescriptor>,
    pub having: Vec<FilterDescriptor>,
    pub orders: Vec<OrderDescriptor>,
    pub pagination: Option<Pagination>,
    pub distinct: bool,
}

impl QueryModel {
    /// Fold a plan chain, oldest step first
    pub fn from_chain(head: Option<&Arc<PlanNode>>) -> Self {
        let mut steps = Vec::new();
        let mut cursor = head;
        while let Some(node) = cursor {
            steps.push(&node.operation);
            cursor = node.parent.as_ref();
        }

        let mut model = QueryModel::default();
        for operation in steps.into_iter().rev() {
            model.apply(operation);
        }
        model
    }

    fn apply(&mut self, operation: &Operation) {
        match operation {
            Operation::Filter(filter) => self.filters.push(filter.clone()),
            Operation::Project(projection) => self.projection = Some(projection.clone()),
            Operation::Join(join) => self.joins.push(join.clone()),
            Operation::Group(group) => self.group = Some(group.clone()),
            Operation::Having(filter) => self.having.push(filter.clone()),
            Operation::Order {
                key,
                direction,
                priority,
            } => {
                let priority = priority.unwrap_or_else(|| {
                    self.orders
                        .iter()
                        .map(|o| o.priority.saturating_add(1))
                        .max()
                        .unwrap_or(0)
                });
                self.orders.push(OrderDescriptor {
                    key: key.clone(),
                    direction: *direction,
                    priority,
                });
            }
            Operation::ClearOrdering => self.orders.clear(),
            Operation::Skip(n) => {
                let current = self.pagination.unwrap_or_default();
                self.pagination = Some(Pagination {
                    offset: *n,
                    ..current
                });
            }
            Operation::Take(n) => {
                let current = self.pagination.unwrap_or_default();
                self.pagination = Some(Pagination {
                    limit: Some(*n),
                    ..current
                });
            }
            Operation::Page { number, size } => {
                self.pagination = Some(Pagination::page(*number, *size));
            }
            Operation::ClearPagination => self.pagination = None,
            Operation::Distinct => self.distinct = true,
        }
    }

    /// Ordering keys by priority, ties in insertion order
    pub fn sorted_orders(&self) -> Vec<&OrderDescriptor> {
        let mut orders: Vec<&OrderDescriptor> = self.orders.iter().collect();
        orders.sort_by_key(|o| o.priority);
        orders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::col;

    fn chain(operations: Vec<Operation>) -> Option<Arc<PlanNode>> {
        operations
            .into_iter()
            .fold(None, |head, op| Some(PlanNode::push(head.as_ref(), op)))
    }

    fn order(name: &str, priority: Option<u32>) -> Operation {
        Operation::Order {
            key: col(name),
            direction: OrderDirection::Ascending,
            priority,
        }
    }

    #[test]
    fn test_pagination_page_normalises() {
        assert_eq!(Pagination::page(1, 10), Pagination::new(0, 10));
        assert_eq!(Pagination::page(0, 10), Pagination::new(0, 10));
        assert_eq!(Pagination::page(4, 25).offset, 75);
    }

    #[test]
    fn test_pagination_capped() {
        assert_eq!(Pagination::new(5, 10).capped(1), Pagination::new(5, 1));
        assert_eq!(Pagination::new(5, 0).capped(2).limit, Some(0));
        let skip_only = Pagination {
            offset: 3,
            limit: None,
        };
        assert_eq!(skip_only.capped(2), Pagination::new(3, 2));
    }

    #[test]
    fn test_skip_and_take_merge_and_page_replaces() {
        let head = chain(vec![Operation::Skip(20), Operation::Take(5)]);
        assert_eq!(
            QueryModel::from_chain(head.as_ref()).pagination,
            Some(Pagination::new(20, 5))
        );

        let head = chain(vec![
            Operation::Skip(20),
            Operation::Page { number: 2, size: 10 },
        ]);
        assert_eq!(
            QueryModel::from_chain(head.as_ref()).pagination,
            Some(Pagination::new(10, 10))
        );

        let head = chain(vec![Operation::Take(5), Operation::ClearPagination]);
        assert_eq!(QueryModel::from_chain(head.as_ref()).pagination, None);
    }

    #[test]
    fn test_order_priority_and_clear() {
        let head = chain(vec![
            order("a", None),
            order("b", None),
            order("c", Some(0)),
        ]);
        let model = QueryModel::from_chain(head.as_ref());
        let keys: Vec<&Expr> = model.sorted_orders().into_iter().map(|o| &o.key).collect();
        assert_eq!(keys, vec![&col("a"), &col("c"), &col("b")]);

        let head = chain(vec![order("a", None), Operation::ClearOrdering, order("b", None)]);
        let model = QueryModel::from_chain(head.as_ref());
        assert_eq!(model.orders.len(), 1);
        assert_eq!(model.orders[0].priority, 0);
    }

    #[test]
    fn test_extending_a_plan_leaves_parent_intact() {
        let base = chain(vec![Operation::Filter(FilterDescriptor {
            predicate: col("a").eq(1_i64),
        })]);
        let extended = PlanNode::push(base.as_ref(), Operation::Distinct);

        assert!(!QueryModel::from_chain(base.as_ref()).distinct);
        let model = QueryModel::from_chain(Some(&extended));
        assert!(model.distinct);
        assert_eq!(model.filters.len(), 1);
    }
}
