//! Semantic values exchanged between entities and the backing store
//!
//! A [`Value`] is the backend-neutral representation of one column value.
//! Entities convert their members into values when they are written, and
//! values read back from a row are converted into members through
//! [`FromValue`].
//!
//! # Example
//!
//! ```rust
//! use reservation_data::value::{FromValue, Value};
//!
//! let value: Value = "Retiro".into();
//! assert_eq!(String::from_value(value).unwrap(), "Retiro");
//!
//! let missing: Value = Option::<i64>::None.into();
//! assert!(missing.is_null());
//! ```

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A single column value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// SQL NULL
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit integer value (also the storage form of enumerations)
    Int(i64),
    /// 64-bit floating point value
    Float(f64),
    /// Text value
    Text(String),
    /// Byte sequence
    Bytes(Vec<u8>),
    /// Timestamp in UTC
    DateTime(DateTime<Utc>),
    /// Calendar date
    Date(NaiveDate),
    /// UUID value
    Uuid(Uuid),
}

impl Value {
    /// Returns `true` for [`Value::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The natural [`ValueType`] of this value, `None` for NULL
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ValueType::Bool),
            Self::Int(_) => Some(ValueType::Int),
            Self::Float(_) => Some(ValueType::Float),
            Self::Text(_) => Some(ValueType::Text),
            Self::Bytes(_) => Some(ValueType::Bytes),
            Self::DateTime(_) => Some(ValueType::DateTime),
            Self::Date(_) => Some(ValueType::Date),
            Self::Uuid(_) => Some(ValueType::Uuid),
        }
    }

    /// Store an enumeration as its integer representation
    pub fn from_enum<E: SqlEnum>(value: &E) -> Self {
        Self::Int(value.to_repr())
    }

    /// Convert a stored integer representation back into an enumeration
    pub fn into_enum<E: SqlEnum>(self) -> Result<E, ValueError> {
        let repr = i64::from_value(self)?;
        E::from_repr(repr).ok_or_else(|| ValueError::new("enum", format!("unknown discriminant {repr}")))
    }

    fn describe(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => format!("bool {b}"),
            Self::Int(i) => format!("int {i}"),
            Self::Float(f) => format!("float {f}"),
            Self::Text(s) => format!("text {s:?}"),
            Self::Bytes(b) => format!("{} bytes", b.len()),
            Self::DateTime(dt) => format!("datetime {}", dt.to_rfc3339()),
            Self::Date(d) => format!("date {d}"),
            Self::Uuid(u) => format!("uuid {u}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// Declared storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    DateTime,
    Date,
    Uuid,
    /// Enumeration stored as its integer representation
    Enum,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Text => write!(f, "text"),
            Self::Bytes => write!(f, "bytes"),
            Self::DateTime => write!(f, "datetime"),
            Self::Date => write!(f, "date"),
            Self::Uuid => write!(f, "uuid"),
            Self::Enum => write!(f, "enum"),
        }
    }
}

/// A column's declared type together with its nullability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeclaredType {
    pub ty: ValueType,
    pub nullable: bool,
}

impl DeclaredType {
    /// A non-nullable column of the given type
    #[must_use]
    pub const fn required(ty: ValueType) -> Self {
        Self {
            ty,
            nullable: false,
        }
    }

    /// A nullable column of the given type
    #[must_use]
    pub const fn nullable(ty: ValueType) -> Self {
        Self { ty, nullable: true }
    }
}

/// Enumerations persisted as their underlying integer representation
///
/// # Example
///
/// ```rust
/// use reservation_data::value::{SqlEnum, Value};
///
/// #[derive(Debug, PartialEq)]
/// enum SeatClass { Economy, Business }
///
/// impl SqlEnum for SeatClass {
///     fn to_repr(&self) -> i64 {
///         match self { Self::Economy => 0, Self::Business => 1 }
///     }
///     fn from_repr(repr: i64) -> Option<Self> {
///         match repr { 0 => Some(Self::Economy), 1 => Some(Self::Business), _ => None }
///     }
/// }
///
/// let stored = Value::from_enum(&SeatClass::Business);
/// assert_eq!(stored, Value::Int(1));
/// assert_eq!(stored.into_enum::<SeatClass>().unwrap(), SeatClass::Business);
/// ```
pub trait SqlEnum: Sized {
    fn to_repr(&self) -> i64;
    fn from_repr(repr: i64) -> Option<Self>;
}

/// Conversion failure between a [`Value`] and a Rust type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected {expected} value, found {found}")]
pub struct ValueError {
    pub expected: &'static str,
    pub found: String,
}

impl ValueError {
    pub fn new(expected: &'static str, found: impl Into<String>) -> Self {
        Self {
            expected,
            found: found.into(),
        }
    }

    fn mismatch(expected: &'static str, found: &Value) -> Self {
        Self::new(expected, found.describe())
    }
}

/// Conversion from a [`Value`] read back from the store
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, ValueError>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        Ok(value)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Int(i) => Ok(i != 0),
            other => Err(ValueError::mismatch("bool", &other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Int(i) => Ok(i),
            Value::Bool(b) => Ok(i64::from(b)),
            // Aggregates such as SUM come back as floating point on some backends
            Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
            other => Err(ValueError::mismatch("int", &other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| ValueError::new("i32", format!("int {wide} out of range")))
    }
}

impl FromValue for i16 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        let wide = i64::from_value(value)?;
        i16::try_from(wide).map_err(|_| ValueError::new("i16", format!("int {wide} out of range")))
    }
}

impl FromValue for u32 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        let wide = i64::from_value(value)?;
        u32::try_from(wide).map_err(|_| ValueError::new("u32", format!("int {wide} out of range")))
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            other => Err(ValueError::mismatch("float", &other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(ValueError::mismatch("text", &other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(ValueError::mismatch("bytes", &other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::DateTime(dt) => Ok(dt),
            other => Err(ValueError::mismatch("datetime", &other)),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Date(d) => Ok(d),
            Value::DateTime(dt) => Ok(dt.date_naive()),
            other => Err(ValueError::mismatch("date", &other)),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Uuid(u) => Ok(u),
            other => Err(ValueError::mismatch("uuid", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i16> for Value {
    fn from(n: i16) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Self::Text(s.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Status {
        Pending,
        Confirmed,
    }

    impl SqlEnum for Status {
        fn to_repr(&self) -> i64 {
            match self {
                Self::Pending => 0,
                Self::Confirmed => 1,
            }
        }

        fn from_repr(repr: i64) -> Option<Self> {
            match repr {
                0 => Some(Self::Pending),
                1 => Some(Self::Confirmed),
                _ => None,
            }
        }
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(Some(5_i32)), Value::Int(5));
        assert_eq!(Value::from(Option::<String>::None), Value::Null);
    }

    #[test]
    fn test_nullable_from_value() {
        assert_eq!(Option::<i64>::from_value(Value::Null).unwrap(), None);
        assert_eq!(Option::<i64>::from_value(Value::Int(3)).unwrap(), Some(3));
    }

    #[test]
    fn test_non_nullable_rejects_null() {
        let err = String::from_value(Value::Null).unwrap_err();
        assert_eq!(err.expected, "text");
        assert_eq!(err.found, "null");
    }

    #[test]
    fn test_integral_float_reads_as_int() {
        assert_eq!(i64::from_value(Value::Float(42.0)).unwrap(), 42);
        assert!(i64::from_value(Value::Float(4.5)).is_err());
    }

    #[test]
    fn test_narrow_int_out_of_range() {
        assert!(i16::from_value(Value::Int(70_000)).is_err());
        assert_eq!(i32::from_value(Value::Int(-7)).unwrap(), -7);
    }

    #[test]
    fn test_enum_round_trip_through_repr() {
        let stored = Value::from_enum(&Status::Confirmed);
        assert_eq!(stored, Value::Int(1));
        assert_eq!(stored.into_enum::<Status>().unwrap(), Status::Confirmed);
        assert!(Value::Int(9).into_enum::<Status>().is_err());
    }

    #[test]
    fn test_value_type() {
        assert_eq!(Value::Null.value_type(), None);
        assert_eq!(Value::from(vec![1_u8, 2]).value_type(), Some(ValueType::Bytes));
        assert_eq!(Value::from(true).value_type(), Some(ValueType::Bool));
    }

    #[test]
    fn test_value_type_display() {
        assert_eq!(format!("{}", ValueType::DateTime), "datetime");
        assert_eq!(format!("{}", ValueType::Enum), "enum");
    }
}
