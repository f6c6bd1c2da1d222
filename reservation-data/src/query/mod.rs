//! Lazily compiled query plans
//!
//! - **Expressions**: [`Expr`] built with [`col`], [`field`], [`lit`] and the
//!   aggregate helpers
//! - **Plans**: [`Query`], an immutable chain of [`Operation`]s folded into a
//!   [`QueryModel`]
//! - **Compilation**: [`compile`] turns a model into one parameterised
//!   [`Command`](crate::binder::Command) per terminal call
//! - **Sync access**: [`BlockingQuery`] via [`Query::blocking`]

mod blocking;
mod compiler;
mod expr;
mod model;
mod queryable;

pub use blocking::BlockingQuery;
pub use compiler::{compile, Terminal};
pub use expr::{
    avg, col, count, count_all, field, lit, max, min, sum, AggregateFunction, CompareOp, Expr,
    IntoExpr,
};
pub use model::{
    AggregateDescriptor, FilterDescriptor, GroupDescriptor, JoinDescriptor, JoinKind,
    MetadataResolver, Operation, OrderDescriptor, OrderDirection, Pagination, PlanNode,
    ProjectionDescriptor, QueryModel,
};
pub use queryable::{Materialize, PagedResult, Query, Record};
