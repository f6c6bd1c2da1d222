//! Query expressions
//!
//! [`Expr`] is a small tagged-union AST: member references, literals,
//! comparisons, boolean connectives, `LIKE`, `IN`, null tests and
//! aggregates. Literals never reach SQL text; the compiler turns each one
//! into a parameter.
//!
//! ```rust
//! use reservation_data::query::{col, field, Expr};
//!
//! let central = col("city").eq("Buenos Aires").and(col("name").like("Re%"));
//! let joined = field("s", "id").eq(col("station_id"));
//! let unknown_city: Expr = col("city").is_null();
//! # let _ = (central, joined, unknown_city);
//! ```

use std::fmt;
use std::ops::Not;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::value::Value;

/// Binary comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        })
    }
}

/// Aggregate function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
    Average,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Average => "AVG",
        })
    }
}

/// A scalar or boolean expression over entity members
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A member of the root entity (`source: None`) or of a joined entity
    Member {
        source: Option<String>,
        name: String,
    },
    Literal(Value),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    Like {
        operand: Box<Expr>,
        pattern: Box<Expr>,
    },
    InList {
        operand: Box<Expr>,
        values: Vec<Expr>,
    },
    /// `argument: None` means `COUNT(*)`
    Aggregate {
        function: AggregateFunction,
        argument: Option<Box<Expr>>,
    },
}

/// Member of the root entity
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Member {
        source: None,
        name: name.into(),
    }
}

/// Member of the entity joined under `source`
pub fn field(source: impl Into<String>, name: impl Into<String>) -> Expr {
    Expr::Member {
        source: Some(source.into()),
        name: name.into(),
    }
}

pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

/// `COUNT(*)`
pub fn count_all() -> Expr {
    Expr::Aggregate {
        function: AggregateFunction::Count,
        argument: None,
    }
}

pub fn count(expr: Expr) -> Expr {
    aggregate(AggregateFunction::Count, expr)
}

pub fn sum(expr: Expr) -> Expr {
    aggregate(AggregateFunction::Sum, expr)
}

pub fn min(expr: Expr) -> Expr {
    aggregate(AggregateFunction::Min, expr)
}

pub fn max(expr: Expr) -> Expr {
    aggregate(AggregateFunction::Max, expr)
}

pub fn avg(expr: Expr) -> Expr {
    aggregate(AggregateFunction::Average, expr)
}

fn aggregate(function: AggregateFunction, expr: Expr) -> Expr {
    Expr::Aggregate {
        function,
        argument: Some(Box::new(expr)),
    }
}

/// Conversion into an expression operand
pub trait IntoExpr {
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl IntoExpr for Value {
    fn into_expr(self) -> Expr {
        Expr::Literal(self)
    }
}

macro_rules! literal_into_expr {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoExpr for $ty {
                fn into_expr(self) -> Expr {
                    Expr::Literal(self.into())
                }
            }
        )*
    };
}

literal_into_expr!(
    bool,
    i16,
    i32,
    i64,
    u32,
    f64,
    &str,
    String,
    &String,
    Vec<u8>,
    DateTime<Utc>,
    NaiveDate,
    Uuid,
);

impl<T: Into<Value>> IntoExpr for Option<T> {
    fn into_expr(self) -> Expr {
        Expr::Literal(self.into())
    }
}

impl Expr {
    fn compare(self, op: CompareOp, other: impl IntoExpr) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(self),
            right: Box::new(other.into_expr()),
        }
    }

    /// `=`; comparing with a NULL literal compiles to `IS NULL`
    pub fn eq(self, other: impl IntoExpr) -> Expr {
        self.compare(CompareOp::Eq, other)
    }

    /// `<>`; comparing with a NULL literal compiles to `IS NOT NULL`
    pub fn ne(self, other: impl IntoExpr) -> Expr {
        self.compare(CompareOp::Ne, other)
    }

    pub fn lt(self, other: impl IntoExpr) -> Expr {
        self.compare(CompareOp::Lt, other)
    }

    pub fn le(self, other: impl IntoExpr) -> Expr {
        self.compare(CompareOp::Le, other)
    }

    pub fn gt(self, other: impl IntoExpr) -> Expr {
        self.compare(CompareOp::Gt, other)
    }

    pub fn ge(self, other: impl IntoExpr) -> Expr {
        self.compare(CompareOp::Ge, other)
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull(Box::new(self))
    }

    pub fn is_not_null(self) -> Expr {
        Expr::IsNotNull(Box::new(self))
    }

    /// SQL `LIKE` with `%` and `_` wildcards
    pub fn like(self, pattern: impl Into<String>) -> Expr {
        Expr::Like {
            operand: Box::new(self),
            pattern: Box::new(Expr::Literal(Value::Text(pattern.into()))),
        }
    }

    /// `IN (...)`; an empty list matches nothing
    pub fn in_list<I>(self, values: I) -> Expr
    where
        I: IntoIterator,
        I::Item: IntoExpr,
    {
        Expr::InList {
            operand: Box::new(self),
            values: values.into_iter().map(IntoExpr::into_expr).collect(),
        }
    }

    fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Member { .. } | Expr::Literal(_) => Vec::new(),
            Expr::Compare { left, right, .. } => vec![&**left, &**right],
            Expr::And(a, b) | Expr::Or(a, b) => vec![&**a, &**b],
            Expr::Not(e) | Expr::IsNull(e) | Expr::IsNotNull(e) => vec![&**e],
            Expr::Like { operand, pattern } => vec![&**operand, &**pattern],
            Expr::InList { operand, values } => {
                let mut children: Vec<&Expr> = vec![&**operand];
                children.extend(values.iter());
                children
            }
            Expr::Aggregate { argument, .. } => argument.iter().map(|a| a.as_ref()).collect(),
        }
    }

    /// Whether an aggregate appears anywhere in the expression
    pub fn contains_aggregate(&self) -> bool {
        matches!(self, Expr::Aggregate { .. })
            || self.children().into_iter().any(Expr::contains_aggregate)
    }

    /// Whether a member is referenced outside of any aggregate
    pub fn references_member(&self) -> bool {
        match self {
            Expr::Member { .. } => true,
            Expr::Aggregate { .. } => false,
            other => other.children().into_iter().any(Expr::references_member),
        }
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}
