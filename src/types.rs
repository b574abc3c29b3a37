use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::SqlDialectError;

/// Values that can be bound to a statement or read back from a row.
///
/// ```rust
/// use sql_dialect::prelude::*;
///
/// let binds = [
///     ("id", RowValues::Int(1)),
///     ("name", RowValues::Text("alice".into())),
/// ];
/// # let _ = binds;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let RowValues::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let RowValues::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Convert a resolved configuration/constant value into a bind value.
    #[must_use]
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => RowValues::Null,
            JsonValue::Bool(b) => RowValues::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => RowValues::Int(i),
                None => n.as_f64().map_or(RowValues::Null, RowValues::Float),
            },
            JsonValue::String(s) => RowValues::Text(s),
            other => RowValues::JSON(other),
        }
    }
}

impl From<i64> for RowValues {
    fn from(value: i64) -> Self {
        RowValues::Int(value)
    }
}

impl From<i32> for RowValues {
    fn from(value: i32) -> Self {
        RowValues::Int(i64::from(value))
    }
}

impl From<f64> for RowValues {
    fn from(value: f64) -> Self {
        RowValues::Float(value)
    }
}

impl From<bool> for RowValues {
    fn from(value: bool) -> Self {
        RowValues::Bool(value)
    }
}

impl From<&str> for RowValues {
    fn from(value: &str) -> Self {
        RowValues::Text(value.to_owned())
    }
}

impl From<String> for RowValues {
    fn from(value: String) -> Self {
        RowValues::Text(value)
    }
}

impl From<NaiveDateTime> for RowValues {
    fn from(value: NaiveDateTime) -> Self {
        RowValues::Timestamp(value)
    }
}

/// Native column/parameter type tags understood by SQL Server drivers.
///
/// Names match the driver constant namespace, so `"${VarChar}"` in
/// `input_bind_types` resolves to [`BindType::VarChar`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum BindType {
    #[value(name = "Bit")]
    Bit,
    #[value(name = "TinyInt")]
    TinyInt,
    #[value(name = "SmallInt")]
    SmallInt,
    #[value(name = "Int")]
    Int,
    #[value(name = "BigInt")]
    BigInt,
    #[value(name = "Float")]
    Float,
    #[value(name = "Real")]
    Real,
    #[value(name = "Decimal")]
    Decimal,
    #[value(name = "Numeric")]
    Numeric,
    #[value(name = "Money")]
    Money,
    #[value(name = "Char")]
    Char,
    #[value(name = "NChar")]
    NChar,
    #[value(name = "VarChar")]
    VarChar,
    #[value(name = "NVarChar")]
    NVarChar,
    #[value(name = "Text")]
    Text,
    #[value(name = "NText")]
    NText,
    #[value(name = "Date")]
    Date,
    #[value(name = "Time")]
    Time,
    #[value(name = "DateTime")]
    DateTime,
    #[value(name = "DateTime2")]
    DateTime2,
    #[value(name = "DateTimeOffset")]
    DateTimeOffset,
    #[value(name = "UniqueIdentifier")]
    UniqueIdentifier,
    #[value(name = "Binary")]
    Binary,
    #[value(name = "VarBinary")]
    VarBinary,
    #[value(name = "Xml")]
    Xml,
}

impl BindType {
    /// Names exposed through the driver constant namespace.
    #[must_use]
    pub fn names() -> impl Iterator<Item = String> {
        Self::value_variants()
            .iter()
            .filter_map(ValueEnum::to_possible_value)
            .map(|v| v.get_name().to_owned())
    }
}

impl fmt::Display for BindType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_possible_value() {
            Some(v) => f.write_str(v.get_name()),
            None => write!(f, "{self:?}"),
        }
    }
}

impl FromStr for BindType {
    type Err = SqlDialectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
            .map_err(|_| SqlDialectError::ParameterError(format!("unknown bind type \"{s}\"")))
    }
}

/// Transaction isolation levels, named as in the driver `ISOLATION_LEVEL` namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    #[value(name = "READ_UNCOMMITTED")]
    ReadUncommitted,
    #[value(name = "READ_COMMITTED")]
    ReadCommitted,
    #[value(name = "REPEATABLE_READ")]
    RepeatableRead,
    #[value(name = "SERIALIZABLE")]
    Serializable,
    #[value(name = "SNAPSHOT")]
    Snapshot,
}

impl IsolationLevel {
    #[must_use]
    pub fn names() -> impl Iterator<Item = String> {
        Self::value_variants()
            .iter()
            .filter_map(ValueEnum::to_possible_value)
            .map(|v| v.get_name().to_owned())
    }

    /// The T-SQL spelling used in `SET TRANSACTION ISOLATION LEVEL`.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::Snapshot => "SNAPSHOT",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_possible_value() {
            Some(v) => f.write_str(v.get_name()),
            None => write!(f, "{self:?}"),
        }
    }
}

impl FromStr for IsolationLevel {
    type Err = SqlDialectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true).map_err(|_| {
            SqlDialectError::ConfigError(format!("unknown transaction isolation level \"{s}\""))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bind_types_parse_driver_names() {
        assert_eq!("VarChar".parse::<BindType>().unwrap(), BindType::VarChar);
        assert_eq!("datetime2".parse::<BindType>().unwrap(), BindType::DateTime2);
        assert!("VarCharz".parse::<BindType>().is_err());
        assert_eq!(BindType::NVarChar.to_string(), "NVarChar");
        assert!(BindType::names().any(|n| n == "UniqueIdentifier"));
    }

    #[test]
    fn isolation_levels_round_trip_through_names() {
        for name in IsolationLevel::names() {
            let level: IsolationLevel = name.parse().unwrap();
            assert_eq!(level.to_string(), name);
        }
        assert_eq!(IsolationLevel::RepeatableRead.as_sql(), "REPEATABLE READ");
    }

    #[test]
    fn json_values_become_bind_values() {
        assert_eq!(RowValues::from_json(json!(7)), RowValues::Int(7));
        assert_eq!(RowValues::from_json(json!(1.5)), RowValues::Float(1.5));
        assert_eq!(RowValues::from_json(json!("x")), RowValues::Text("x".into()));
        assert!(RowValues::from_json(json!(null)).is_null());
        assert!(matches!(RowValues::from_json(json!({"a": 1})), RowValues::JSON(_)));
    }
}
