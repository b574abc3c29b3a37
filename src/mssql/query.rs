use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures_util::TryStreamExt;
use tiberius::numeric::Numeric;
use tiberius::{Query, QueryItem, Uuid};

use super::config::MssqlClient;
use super::params::to_param;
use crate::driver::Request;
use crate::error::SqlDialectError;
use crate::results::{RawResult, ResultSet};
use crate::types::{BindType, RowValues};

/// Run `request` on `client`, collecting every record set.
///
/// Inputs bind in order to `@P1..@Pn`. A parameter without its own bind type uses
/// the type `declared` for its name, if any.
///
/// # Errors
/// `Unimplemented` for output parameters, `ParameterError` for unconvertible
/// values, otherwise the tiberius failure.
pub async fn run_query(
    client: &mut MssqlClient,
    request: &Request,
    declared: Option<&BTreeMap<String, BindType>>,
) -> Result<RawResult, SqlDialectError> {
    if !request.outputs.is_empty() {
        return Err(SqlDialectError::Unimplemented(
            "output parameters are not supported by the tiberius driver".to_string(),
        ));
    }
    let query = bind_query_params(request, declared)?;
    let mut stream = query.query(client).await?;

    let mut raw = RawResult::default();
    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(meta) => {
                let column_names: Vec<String> =
                    meta.columns().iter().map(|col| col.name().to_string()).collect();
                let mut result_set = ResultSet::with_capacity(10);
                result_set.set_column_names(column_names);
                raw.recordsets.push(result_set);
            }
            QueryItem::Row(row) => {
                let Some(result_set) = raw.recordsets.last_mut() else {
                    return Err(SqlDialectError::ExecutionError(
                        "row received before column metadata".to_string(),
                    ));
                };
                let mut row_values = Vec::with_capacity(row.len());
                for idx in 0..row.len() {
                    row_values.push(extract_value(&row, idx).unwrap_or(RowValues::Null));
                }
                result_set.add_row_values(row_values);
            }
        }
    }
    raw.rows_affected = raw
        .recordsets
        .iter()
        .map(|rs| u64::try_from(rs.len()).unwrap_or(u64::MAX))
        .collect();
    Ok(raw)
}

/// Bind parameters directly to the query for SQL Server
pub fn bind_query_params<'a>(
    request: &'a Request,
    declared: Option<&BTreeMap<String, BindType>>,
) -> Result<Query<'a>, SqlDialectError> {
    let mut query = Query::new(request.sql.as_str());
    for param in &request.inputs {
        let bind_type = param
            .bind_type
            .or_else(|| declared.and_then(|d| d.get(&param.name).copied()));
        query.bind(to_param(&param.name, &param.value, bind_type)?);
    }
    Ok(query)
}

/// Extract a value from a row at a specific index; `None` for NULL.
fn extract_value(row: &tiberius::Row, idx: usize) -> Option<RowValues> {
    if let Ok(Some(val)) = row.try_get::<i32, _>(idx) {
        return Some(RowValues::Int(i64::from(val)));
    }
    if let Ok(Some(val)) = row.try_get::<i64, _>(idx) {
        return Some(RowValues::Int(val));
    }
    if let Ok(Some(val)) = row.try_get::<i16, _>(idx) {
        return Some(RowValues::Int(i64::from(val)));
    }
    if let Ok(Some(val)) = row.try_get::<u8, _>(idx) {
        return Some(RowValues::Int(i64::from(val)));
    }
    if let Ok(Some(val)) = row.try_get::<f32, _>(idx) {
        return Some(RowValues::Float(f64::from(val)));
    }
    if let Ok(Some(val)) = row.try_get::<f64, _>(idx) {
        return Some(RowValues::Float(val));
    }
    if let Ok(Some(val)) = row.try_get::<Numeric, _>(idx) {
        return Some(RowValues::Float(f64::from(val)));
    }
    if let Ok(Some(val)) = row.try_get::<bool, _>(idx) {
        return Some(RowValues::Bool(val));
    }
    if let Ok(Some(val)) = row.try_get::<NaiveDateTime, _>(idx) {
        return Some(RowValues::Timestamp(val));
    }
    if let Ok(Some(val)) = row.try_get::<DateTime<FixedOffset>, _>(idx) {
        return Some(RowValues::Timestamp(val.naive_utc()));
    }
    if let Ok(Some(val)) = row.try_get::<NaiveDate, _>(idx) {
        return Some(RowValues::Timestamp(val.and_time(NaiveTime::MIN)));
    }
    if let Ok(Some(val)) = row.try_get::<NaiveTime, _>(idx) {
        return Some(RowValues::Text(val.to_string()));
    }
    if let Ok(Some(val)) = row.try_get::<Uuid, _>(idx) {
        return Some(RowValues::Text(val.to_string()));
    }
    if let Ok(Some(val)) = row.try_get::<&str, _>(idx) {
        return Some(RowValues::Text(val.to_string()));
    }
    if let Ok(Some(val)) = row.try_get::<&[u8], _>(idx) {
        return Some(RowValues::Blob(val.to_vec()));
    }
    None
}
