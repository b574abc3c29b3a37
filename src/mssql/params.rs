use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use tiberius::{ColumnData, IntoSql, Uuid};

use crate::error::SqlDialectError;
use crate::types::{BindType, RowValues};

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d"];

/// Owned SQL Server parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum MssqlParam {
    Bit(Option<bool>),
    TinyInt(Option<u8>),
    SmallInt(Option<i16>),
    Int(Option<i32>),
    BigInt(Option<i64>),
    Real(Option<f32>),
    Float(Option<f64>),
    Text(Option<String>),
    Date(Option<NaiveDate>),
    Time(Option<NaiveTime>),
    DateTime(Option<NaiveDateTime>),
    DateTimeOffset(Option<DateTime<FixedOffset>>),
    Guid(Option<Uuid>),
    Binary(Option<Vec<u8>>),
}

impl<'a> IntoSql<'a> for MssqlParam {
    fn into_sql(self) -> ColumnData<'a> {
        match self {
            MssqlParam::Bit(v) => ColumnData::Bit(v),
            MssqlParam::TinyInt(v) => ColumnData::U8(v),
            MssqlParam::SmallInt(v) => ColumnData::I16(v),
            MssqlParam::Int(v) => ColumnData::I32(v),
            MssqlParam::BigInt(v) => ColumnData::I64(v),
            MssqlParam::Real(v) => ColumnData::F32(v),
            MssqlParam::Float(v) => ColumnData::F64(v),
            MssqlParam::Text(v) => ColumnData::String(v.map(Cow::Owned)),
            MssqlParam::Date(v) => v.into_sql(),
            MssqlParam::Time(v) => v.into_sql(),
            MssqlParam::DateTime(v) => v.into_sql(),
            MssqlParam::DateTimeOffset(v) => v.into_sql(),
            MssqlParam::Guid(v) => ColumnData::Guid(v),
            MssqlParam::Binary(v) => ColumnData::Binary(v.map(Cow::Owned)),
        }
    }
}

/// Convert a bind value for SQL Server.
///
/// Without a declared type the value keeps its natural SQL Server type; with one
/// it is coerced to that type, `Null` becoming a typed NULL.
///
/// # Errors
/// `ParameterError` when the value cannot be represented as `bind_type`.
pub fn to_param(
    name: &str,
    value: &RowValues,
    bind_type: Option<BindType>,
) -> Result<MssqlParam, SqlDialectError> {
    let Some(bind_type) = bind_type else {
        return Ok(untyped(value));
    };
    let mismatch = || {
        SqlDialectError::ParameterError(format!(
            "bind \":{name}\" cannot be sent as {bind_type}: {value:?}"
        ))
    };
    let null = value.is_null();

    let param = match bind_type {
        BindType::Bit => MssqlParam::Bit(if null {
            None
        } else {
            Some(as_bool(value).ok_or_else(mismatch)?)
        }),
        BindType::TinyInt => MssqlParam::TinyInt(if null {
            None
        } else {
            Some(as_i64(value).and_then(|i| u8::try_from(i).ok()).ok_or_else(mismatch)?)
        }),
        BindType::SmallInt => MssqlParam::SmallInt(if null {
            None
        } else {
            Some(as_i64(value).and_then(|i| i16::try_from(i).ok()).ok_or_else(mismatch)?)
        }),
        BindType::Int => MssqlParam::Int(if null {
            None
        } else {
            Some(as_i64(value).and_then(|i| i32::try_from(i).ok()).ok_or_else(mismatch)?)
        }),
        BindType::BigInt => MssqlParam::BigInt(if null {
            None
        } else {
            Some(as_i64(value).ok_or_else(mismatch)?)
        }),
        #[allow(clippy::cast_possible_truncation)]
        BindType::Real => MssqlParam::Real(if null {
            None
        } else {
            Some(as_f64(value).ok_or_else(mismatch)? as f32)
        }),
        BindType::Float | BindType::Decimal | BindType::Numeric | BindType::Money => {
            MssqlParam::Float(if null {
                None
            } else {
                Some(as_f64(value).ok_or_else(mismatch)?)
            })
        }
        BindType::Char
        | BindType::NChar
        | BindType::VarChar
        | BindType::NVarChar
        | BindType::Text
        | BindType::NText
        | BindType::Xml => MssqlParam::Text(if null {
            None
        } else {
            Some(as_string(value).ok_or_else(mismatch)?)
        }),
        BindType::Date => MssqlParam::Date(if null {
            None
        } else {
            Some(as_timestamp(value).ok_or_else(mismatch)?.date())
        }),
        BindType::Time => MssqlParam::Time(if null {
            None
        } else {
            Some(as_time(value).ok_or_else(mismatch)?)
        }),
        BindType::DateTime | BindType::DateTime2 => MssqlParam::DateTime(if null {
            None
        } else {
            Some(as_timestamp(value).ok_or_else(mismatch)?)
        }),
        BindType::DateTimeOffset => MssqlParam::DateTimeOffset(if null {
            None
        } else {
            Some(as_offset_timestamp(value).ok_or_else(mismatch)?)
        }),
        BindType::UniqueIdentifier => MssqlParam::Guid(if null {
            None
        } else {
            Some(as_uuid(value).ok_or_else(mismatch)?)
        }),
        BindType::Binary | BindType::VarBinary => MssqlParam::Binary(match value {
            RowValues::Null => None,
            RowValues::Blob(bytes) => Some(bytes.clone()),
            RowValues::Text(s) => Some(s.as_bytes().to_vec()),
            _ => return Err(mismatch()),
        }),
    };
    Ok(param)
}

fn untyped(value: &RowValues) -> MssqlParam {
    match value {
        RowValues::Int(i) => MssqlParam::BigInt(Some(*i)),
        RowValues::Float(f) => MssqlParam::Float(Some(*f)),
        RowValues::Text(s) => MssqlParam::Text(Some(s.clone())),
        RowValues::Bool(b) => MssqlParam::Bit(Some(*b)),
        RowValues::Timestamp(dt) => MssqlParam::DateTime(Some(*dt)),
        RowValues::Null => MssqlParam::Text(None),
        RowValues::JSON(jsval) => MssqlParam::Text(Some(jsval.to_string())),
        RowValues::Blob(bytes) => MssqlParam::Binary(Some(bytes.clone())),
    }
}

fn as_bool(value: &RowValues) -> Option<bool> {
    match value {
        RowValues::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        RowValues::Int(i) => Some(*i != 0),
        other => other.as_bool().copied(),
    }
}

fn as_i64(value: &RowValues) -> Option<i64> {
    match value {
        RowValues::Int(i) => Some(*i),
        RowValues::Bool(b) => Some(i64::from(*b)),
        RowValues::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(value: &RowValues) -> Option<f64> {
    match value {
        RowValues::Float(f) => Some(*f),
        RowValues::Int(i) => Some(*i as f64),
        RowValues::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_string(value: &RowValues) -> Option<String> {
    match value {
        RowValues::Text(s) => Some(s.clone()),
        RowValues::Int(i) => Some(i.to_string()),
        RowValues::Float(f) => Some(f.to_string()),
        RowValues::Bool(b) => Some(b.to_string()),
        RowValues::Timestamp(dt) => Some(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        RowValues::JSON(jsval) => Some(jsval.to_string()),
        RowValues::Null | RowValues::Blob(_) => None,
    }
}

fn as_timestamp(value: &RowValues) -> Option<NaiveDateTime> {
    match value {
        RowValues::Timestamp(dt) => Some(*dt),
        RowValues::Text(s) => parse_timestamp(s.trim()),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(s, fmt).ok().or_else(|| {
            NaiveDate::parse_from_str(s, fmt)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
    })
}

fn as_time(value: &RowValues) -> Option<NaiveTime> {
    match value {
        RowValues::Timestamp(dt) => Some(dt.time()),
        RowValues::Text(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").ok(),
        _ => None,
    }
}

fn as_offset_timestamp(value: &RowValues) -> Option<DateTime<FixedOffset>> {
    match value {
        RowValues::Text(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .or_else(|| parse_timestamp(s.trim()).map(|dt| dt.and_utc().fixed_offset())),
        other => as_timestamp(other).map(|dt| dt.and_utc().fixed_offset()),
    }
}

fn as_uuid(value: &RowValues) -> Option<Uuid> {
    match value {
        RowValues::Text(s) => Uuid::parse_str(s.trim()).ok(),
        RowValues::Blob(bytes) => Uuid::from_slice(bytes).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untyped_values_keep_natural_types() {
        assert_eq!(to_param("a", &RowValues::Int(5), None).unwrap(), MssqlParam::BigInt(Some(5)));
        assert_eq!(to_param("a", &RowValues::Null, None).unwrap(), MssqlParam::Text(None));
        assert_eq!(
            to_param("a", &RowValues::Bool(true), None).unwrap(),
            MssqlParam::Bit(Some(true))
        );
    }

    #[test]
    fn declared_types_coerce_values() {
        assert_eq!(
            to_param("a", &RowValues::Int(5), Some(BindType::TinyInt)).unwrap(),
            MssqlParam::TinyInt(Some(5))
        );
        assert_eq!(
            to_param("a", &RowValues::Text("42".into()), Some(BindType::Int)).unwrap(),
            MssqlParam::Int(Some(42))
        );
        assert_eq!(
            to_param("a", &RowValues::Int(42), Some(BindType::NVarChar)).unwrap(),
            MssqlParam::Text(Some("42".into()))
        );
        assert_eq!(
            to_param("a", &RowValues::Null, Some(BindType::DateTime2)).unwrap(),
            MssqlParam::DateTime(None)
        );
        let date = to_param("a", &RowValues::Text("2024-03-01".into()), Some(BindType::Date)).unwrap();
        assert_eq!(
            date,
            MssqlParam::Date(NaiveDate::from_ymd_opt(2024, 3, 1))
        );
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = to_param("age", &RowValues::Int(300), Some(BindType::TinyInt)).unwrap_err();
        assert!(matches!(err, SqlDialectError::ParameterError(msg) if msg.contains(":age")));
        assert!(to_param("id", &RowValues::Text("nope".into()), Some(BindType::UniqueIdentifier)).is_err());
        assert!(to_param("b", &RowValues::Float(1.5), Some(BindType::VarBinary)).is_err());
    }

    #[test]
    fn guids_parse_from_text() {
        let param = to_param(
            "id",
            &RowValues::Text("6f9619ff-8b86-d011-b42d-00c04fc964ff".into()),
            Some(BindType::UniqueIdentifier),
        )
        .unwrap();
        assert!(matches!(param, MssqlParam::Guid(Some(_))));
    }
}
