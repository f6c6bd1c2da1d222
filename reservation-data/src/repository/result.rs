//! Outcome types for expected, non-exceptional results
//!
//! [`OptionalResult`] distinguishes "found", "nothing there" and "failed"
//! without forcing the caller through error handling for the empty case.
//! [`AggregateResult`] carries named aggregate values from a single query.

use crate::binder::Row;
use crate::value::{FromValue, Value};

use super::{RepositoryError, RepositoryOperation, RepositoryResult};

/// Success or failure of an operation that yields no value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    Success,
    Failure(String),
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn failure_message(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Failure(message) => Some(message),
        }
    }
}

impl<T> From<RepositoryResult<T>> for OperationResult {
    fn from(result: RepositoryResult<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => Self::Failure(e.to_string()),
        }
    }
}

/// A value, no value, or an error message
///
/// # Example
///
/// ```rust
/// use reservation_data::repository::OptionalResult;
///
/// let found: OptionalResult<&str> = OptionalResult::Value("Retiro");
/// let label = found.match_with(
///     |name| format!("found {name}"),
///     || "none".to_string(),
///     |err| format!("failed: {err}"),
/// );
/// assert_eq!(label, "found Retiro");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum OptionalResult<T> {
    Value(T),
    NoValue,
    Error(String),
}

impl<T> OptionalResult<T> {
    pub fn has_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::NoValue)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Run `f` when a value is present
    pub fn if_value(&self, f: impl FnOnce(&T)) -> &Self {
        if let Self::Value(value) = self {
            f(value);
        }
        self
    }

    /// Run `f` when there is no value
    pub fn if_empty(&self, f: impl FnOnce()) -> &Self {
        if let Self::NoValue = self {
            f();
        }
        self
    }

    /// Run `f` with the error message on failure
    pub fn if_error(&self, f: impl FnOnce(&str)) -> &Self {
        if let Self::Error(message) = self {
            f(message);
        }
        self
    }

    /// Fold all three cases into one value
    pub fn match_with<R>(
        self,
        on_value: impl FnOnce(T) -> R,
        on_empty: impl FnOnce() -> R,
        on_error: impl FnOnce(String) -> R,
    ) -> R {
        match self {
            Self::Value(value) => on_value(value),
            Self::NoValue => on_empty(),
            Self::Error(message) => on_error(message),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OptionalResult<U> {
        match self {
            Self::Value(value) => OptionalResult::Value(f(value)),
            Self::NoValue => OptionalResult::NoValue,
            Self::Error(message) => OptionalResult::Error(message),
        }
    }

    /// The value, if any; errors collapse to `None`
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl<T> From<RepositoryResult<Option<T>>> for OptionalResult<T> {
    fn from(result: RepositoryResult<Option<T>>) -> Self {
        match result {
            Ok(Some(value)) => Self::Value(value),
            Ok(None) => Self::NoValue,
            Err(e) => Self::Error(e.to_string()),
        }
    }
}

/// Named aggregate values from a single query
///
/// # Example
///
/// ```rust
/// use reservation_data::repository::AggregateResult;
/// use reservation_data::value::Value;
///
/// let result = AggregateResult::from_pairs([("trips", Value::Int(12)), ("avg_price", Value::Null)]);
/// assert_eq!(result.get::<i64>("trips").unwrap(), 12);
/// assert_eq!(result.try_get::<f64>("avg_price"), None);
/// assert!(result.get::<i64>("missing").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregateResult {
    values: Vec<(String, Value)>,
}

impl AggregateResult {
    pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (S, Value)>) -> Self {
        Self {
            values: pairs.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        }
    }

    pub(crate) fn from_row(row: Row) -> Self {
        Self {
            values: row.into_pairs().collect(),
        }
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    /// Typed value; fails when the name is absent or the type does not match
    pub fn get<T: FromValue>(&self, name: &str) -> RepositoryResult<T> {
        let value = self.value(name).cloned().ok_or_else(|| {
            RepositoryError::mapping(
                RepositoryOperation::Query,
                format!("No aggregate named '{name}'"),
            )
        })?;
        T::from_value(value).map_err(|e| {
            RepositoryError::mapping(
                RepositoryOperation::Query,
                format!("Aggregate '{name}': {e}"),
            )
        })
    }

    /// Typed value, or `None` when absent, NULL or of another type
    pub fn try_get<T: FromValue>(&self, name: &str) -> Option<T> {
        match self.value(name)? {
            Value::Null => None,
            value => T::from_value(value.clone()).ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryErrorKind;
    use std::cell::Cell;

    #[test]
    fn test_operation_result_from_result() {
        let ok: RepositoryResult<u64> = Ok(1);
        assert!(OperationResult::from(ok).is_success());
        let err: RepositoryResult<u64> = Err(RepositoryError::not_found("Station"));
        let failure = OperationResult::from(err);
        assert!(failure.failure_message().unwrap().contains("not_found"));
    }

    #[test]
    fn test_optional_result_callbacks() {
        let hits = Cell::new(0);
        OptionalResult::Value(3)
            .if_value(|v| hits.set(hits.get() + *v))
            .if_empty(|| hits.set(100))
            .if_error(|_| hits.set(200));
        assert_eq!(hits.get(), 3);

        let empty: OptionalResult<i32> = OptionalResult::NoValue;
        empty.if_empty(|| hits.set(0));
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_optional_result_from_repository_result() {
        let found: OptionalResult<i32> = Ok(Some(1)).into();
        assert_eq!(found, OptionalResult::Value(1));
        let none: OptionalResult<i32> = Ok(None).into();
        assert!(none.is_empty());
        let failed: OptionalResult<i32> = Err(RepositoryError::invalid_query("bad")).into();
        assert!(failed.is_error());
        assert_eq!(failed.map(|v| v * 2).into_option(), None);
    }

    #[test]
    fn test_aggregate_get_type_mismatch() {
        let result = AggregateResult::from_pairs([("name", Value::Text("x".into()))]);
        let err = result.get::<i64>("name").unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::Mapping);
        assert_eq!(result.try_get::<i64>("name"), None);
        assert_eq!(result.try_get::<String>("NAME").as_deref(), Some("x"));
    }

    #[test]
    fn test_aggregate_from_row_keeps_names() {
        let row = Row::from_pairs([("total", Value::Int(4)), ("maximum", Value::Float(2.5))]);
        let result = AggregateResult::from_row(row);
        assert_eq!(result.names().collect::<Vec<_>>(), vec!["total", "maximum"]);
        assert_eq!(result.get::<f64>("maximum").unwrap(), 2.5);
    }
}
