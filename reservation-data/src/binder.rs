//! Parameter binding and typed column reads
//!
//! [`bind`] attaches a named parameter to a [`Command`], carrying the
//! declared column type so that NULLs stay typed. [`read`] is the inverse:
//! it takes a value from a materialised [`Row`] and coerces the backend's
//! representation into the declared type.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::repository::{RepositoryError, RepositoryOperation, RepositoryResult};
use crate::value::{DeclaredType, Value, ValueType};

/// A named, typed statement parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
    pub ty: ValueType,
}

/// SQL text plus its parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    pub sql: String,
    pub params: Vec<Parameter>,
}

impl Command {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Parameter by name, without the `@` prefix
    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Zero-based position of the first parameter with the given name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }
}

/// Attach a parameter to a command
///
/// Never fails. NULL keeps the declared type; integers written to boolean
/// columns, booleans written to integer or enum columns, and dates written to
/// timestamp columns are normalised to the declared type. Any other mismatch
/// is passed through for the store to judge.
///
/// # Example
///
/// ```rust
/// use reservation_data::binder::{bind, Command};
/// use reservation_data::value::{DeclaredType, Value, ValueType};
///
/// let mut command = Command::new("UPDATE [Stations] SET city = @set0 WHERE id=@key0");
/// bind(&mut command, "set0", Value::Null, DeclaredType::nullable(ValueType::Text));
/// bind(&mut command, "key0", 7_i64.into(), DeclaredType::required(ValueType::Int));
///
/// let city = command.param("set0").unwrap();
/// assert_eq!(city.value, Value::Null);
/// assert_eq!(city.ty, ValueType::Text);
/// ```
pub fn bind(command: &mut Command, name: impl Into<String>, raw: Value, declared: DeclaredType) {
    let value = normalize(raw, declared.ty);
    command.params.push(Parameter {
        name: name.into(),
        value,
        ty: declared.ty,
    });
}

pub(crate) fn normalize(raw: Value, ty: ValueType) -> Value {
    match (ty, raw) {
        (_, Value::Null) => Value::Null,
        (ValueType::Bool, Value::Int(i)) => Value::Bool(i != 0),
        (ValueType::Float, Value::Int(i)) => Value::Float(i as f64),
        (ValueType::Int | ValueType::Enum, Value::Bool(b)) => Value::Int(i64::from(b)),
        (ValueType::DateTime, Value::Date(d)) => {
            Value::DateTime(d.and_time(chrono::NaiveTime::MIN).and_utc())
        }
        (_, value) => value,
    }
}

/// A materialised result row with access by ordinal or column name
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row; the column list is usually shared across a result set
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn from_pairs<S, I>(pairs: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, Value)>,
    {
        let (columns, values): (Vec<String>, Vec<Value>) =
            pairs.into_iter().map(|(c, v)| (c.into(), v)).unzip();
        Self::new(columns.into(), values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get<I: ColumnIndex>(&self, index: I) -> Option<&Value> {
        index.position(self).and_then(|i| self.values.get(i))
    }

    pub fn into_pairs(self) -> impl Iterator<Item = (String, Value)> {
        let columns = self.columns.to_vec();
        columns.into_iter().zip(self.values)
    }
}

/// Column lookup by ordinal or case-insensitive name
pub trait ColumnIndex {
    fn position(&self, row: &Row) -> Option<usize>;
    fn describe(&self) -> String;
}

impl ColumnIndex for usize {
    fn position(&self, row: &Row) -> Option<usize> {
        (*self < row.values.len()).then_some(*self)
    }

    fn describe(&self) -> String {
        format!("ordinal {self}")
    }
}

impl ColumnIndex for &str {
    fn position(&self, row: &Row) -> Option<usize> {
        row.columns
            .iter()
            .position(|c| c == self)
            .or_else(|| row.columns.iter().position(|c| c.eq_ignore_ascii_case(self)))
    }

    fn describe(&self) -> String {
        format!("column '{self}'")
    }
}

/// Read one column and coerce it into the declared type
///
/// # Example
///
/// ```rust
/// use reservation_data::binder::{read, Row};
/// use reservation_data::value::{DeclaredType, Value, ValueType};
///
/// let row = Row::from_pairs([("active", Value::Int(1)), ("note", Value::Null)]);
/// let active = read(&row, "active", DeclaredType::required(ValueType::Bool)).unwrap();
/// assert_eq!(active, Value::Bool(true));
///
/// assert!(read(&row, 1, DeclaredType::required(ValueType::Text)).is_err());
/// ```
pub fn read<I: ColumnIndex>(
    row: &Row,
    index: I,
    declared: DeclaredType,
) -> RepositoryResult<Value> {
    let raw = index
        .position(row)
        .and_then(|i| row.values.get(i))
        .cloned()
        .ok_or_else(|| {
            RepositoryError::mapping(
                RepositoryOperation::Query,
                format!("Result set has no {}", index.describe()),
            )
        })?;
    coerce(raw, declared).map_err(|found| {
        RepositoryError::mapping(
            RepositoryOperation::Query,
            format!(
                "Cannot read {} as {}: found {}",
                index.describe(),
                describe_declared(declared),
                found
            ),
        )
    })
}

fn describe_declared(declared: DeclaredType) -> String {
    if declared.nullable {
        format!("nullable {}", declared.ty)
    } else {
        declared.ty.to_string()
    }
}

fn coerce(raw: Value, declared: DeclaredType) -> Result<Value, Value> {
    if raw.is_null() {
        return if declared.nullable { Ok(Value::Null) } else { Err(raw) };
    }

    match (declared.ty, raw) {
        (ValueType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
        (ValueType::Bool, Value::Int(i)) => Ok(Value::Bool(i != 0)),
        (ValueType::Bool, Value::Text(s)) => match s.as_str() {
            "1" | "true" | "TRUE" | "True" => Ok(Value::Bool(true)),
            "0" | "false" | "FALSE" | "False" => Ok(Value::Bool(false)),
            _ => Err(Value::Text(s)),
        },

        (ValueType::Int | ValueType::Enum, Value::Int(i)) => Ok(Value::Int(i)),
        (ValueType::Int | ValueType::Enum, Value::Bool(b)) => Ok(Value::Int(i64::from(b))),
        (ValueType::Int | ValueType::Enum, Value::Float(f)) if f.fract() == 0.0 => {
            Ok(Value::Int(f as i64))
        }
        (ValueType::Int | ValueType::Enum, Value::Text(s)) => {
            s.trim().parse::<i64>().map(Value::Int).map_err(|_| Value::Text(s))
        }

        (ValueType::Float, Value::Float(f)) => Ok(Value::Float(f)),
        (ValueType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
        (ValueType::Float, Value::Text(s)) => {
            s.trim().parse::<f64>().map(Value::Float).map_err(|_| Value::Text(s))
        }

        (ValueType::Text, Value::Text(s)) => Ok(Value::Text(s)),
        (ValueType::Text, Value::Uuid(u)) => Ok(Value::Text(u.to_string())),

        (ValueType::Bytes, Value::Bytes(b)) => Ok(Value::Bytes(b)),
        (ValueType::Bytes, Value::Text(s)) => Ok(Value::Bytes(s.into_bytes())),

        (ValueType::DateTime, Value::DateTime(dt)) => Ok(Value::DateTime(dt)),
        (ValueType::DateTime, Value::Date(d)) => {
            Ok(Value::DateTime(d.and_time(chrono::NaiveTime::MIN).and_utc()))
        }
        (ValueType::DateTime, Value::Text(s)) => {
            parse_datetime(&s).map(Value::DateTime).ok_or(Value::Text(s))
        }
        (ValueType::DateTime, Value::Int(secs)) => DateTime::<Utc>::from_timestamp(secs, 0)
            .map(Value::DateTime)
            .ok_or(Value::Int(secs)),

        (ValueType::Date, Value::Date(d)) => Ok(Value::Date(d)),
        (ValueType::Date, Value::DateTime(dt)) => Ok(Value::Date(dt.date_naive())),
        (ValueType::Date, Value::Text(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .ok()
            .or_else(|| parse_datetime(&s).map(|dt| dt.date_naive()))
            .map(Value::Date)
            .ok_or(Value::Text(s)),

        (ValueType::Uuid, Value::Uuid(u)) => Ok(Value::Uuid(u)),
        (ValueType::Uuid, Value::Text(s)) => Uuid::parse_str(s.trim())
            .map(Value::Uuid)
            .map_err(|_| Value::Text(s)),
        (ValueType::Uuid, Value::Bytes(b)) => Uuid::from_slice(&b)
            .map(Value::Uuid)
            .map_err(|_| Value::Bytes(b)),

        (_, other) => Err(other),
    }
}

/// Parse the textual timestamp forms SQLite and other stores hand back
fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryErrorKind;
    use chrono::TimeZone;

    fn required(ty: ValueType) -> DeclaredType {
        DeclaredType::required(ty)
    }

    #[test]
    fn test_bind_typed_null() {
        let mut command = Command::new("SELECT 1");
        bind(&mut command, "p0", Value::Null, DeclaredType::nullable(ValueType::Uuid));
        assert_eq!(command.params[0].ty, ValueType::Uuid);
        assert!(command.params[0].value.is_null());
    }

    #[test]
    fn test_bind_normalises_to_declared_type() {
        let mut command = Command::default();
        bind(&mut command, "a", Value::Int(1), required(ValueType::Bool));
        bind(&mut command, "b", Value::Bool(true), required(ValueType::Enum));
        bind(&mut command, "c", Value::Int(2), required(ValueType::Float));
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        bind(&mut command, "d", Value::Date(date), required(ValueType::DateTime));

        assert_eq!(command.param("a").unwrap().value, Value::Bool(true));
        assert_eq!(command.param("b").unwrap().value, Value::Int(1));
        assert_eq!(command.param("c").unwrap().value, Value::Float(2.0));
        assert_eq!(
            command.param("d").unwrap().value,
            Value::DateTime(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(command.index_of("c"), Some(2));
    }

    #[test]
    fn test_bind_passes_mismatch_through() {
        let mut command = Command::default();
        bind(&mut command, "p0", Value::Text("x".into()), required(ValueType::Int));
        assert_eq!(command.params[0].value, Value::Text("x".into()));
    }

    #[test]
    fn test_read_by_name_is_case_insensitive() {
        let row = Row::from_pairs([("Name", Value::Text("Retiro".into()))]);
        assert_eq!(
            read(&row, "name", required(ValueType::Text)).unwrap(),
            Value::Text("Retiro".into())
        );
    }

    #[test]
    fn test_read_missing_column() {
        let row = Row::from_pairs([("id", Value::Int(1))]);
        let err = read(&row, "city", required(ValueType::Text)).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::Mapping);
        assert!(err.message.contains("column 'city'"));
        assert!(read(&row, 3, required(ValueType::Int)).is_err());
    }

    #[test]
    fn test_read_null_into_nullable() {
        let row = Row::from_pairs([("city", Value::Null)]);
        assert_eq!(
            read(&row, 0, DeclaredType::nullable(ValueType::Text)).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_read_null_into_required_is_mapping_error() {
        let row = Row::from_pairs([("city", Value::Null)]);
        let err = read(&row, 0, required(ValueType::Text)).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::Mapping);
    }

    #[test]
    fn test_read_sqlite_text_timestamp() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap();
        for text in [
            "2024-05-17 09:30:00",
            "2024-05-17T09:30:00Z",
            "2024-05-17 09:30:00+00:00",
            "2024-05-17T11:30:00+02:00",
        ] {
            let row = Row::from_pairs([("at", Value::Text(text.into()))]);
            assert_eq!(
                read(&row, 0, required(ValueType::DateTime)).unwrap(),
                Value::DateTime(expected),
                "{text}"
            );
        }
    }

    #[test]
    fn test_read_text_date_and_uuid() {
        let id = Uuid::new_v4();
        let row = Row::from_pairs([
            ("day", Value::Text("2024-02-29".into())),
            ("id", Value::Text(id.to_string())),
        ]);
        assert_eq!(
            read(&row, "day", required(ValueType::Date)).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(read(&row, "id", required(ValueType::Uuid)).unwrap(), Value::Uuid(id));
    }

    #[test]
    fn test_read_integral_float_as_int() {
        let row = Row::from_pairs([("total", Value::Float(12.0)), ("avg", Value::Float(1.5))]);
        assert_eq!(read(&row, 0, required(ValueType::Int)).unwrap(), Value::Int(12));
        assert!(read(&row, 1, required(ValueType::Int)).is_err());
    }

    #[test]
    fn test_into_pairs_keeps_order() {
        let row = Row::from_pairs([("a", Value::Int(1)), ("b", Value::Int(2))]);
        let pairs: Vec<_> = row.into_pairs().collect();
        assert_eq!(pairs[1], ("b".to_string(), Value::Int(2)));
    }
}
