//! Raw results handed back from the driver.

mod result_set;
mod row;

use std::collections::BTreeMap;

pub use result_set::ResultSet;
pub use row::{Columns, CustomDbRow};

use crate::types::RowValues;

/// Everything the driver reported for one execution.
#[derive(Debug, Clone, Default)]
pub struct RawResult {
    /// Every record set, in the order the engine produced them.
    pub recordsets: Vec<ResultSet>,
    /// Affected-row counts, one per statement in the batch.
    pub rows_affected: Vec<u64>,
    /// Output parameter values keyed by bind name.
    pub output: BTreeMap<String, RowValues>,
}

impl RawResult {
    /// The first record set, or an empty one when the statement returned no rows.
    #[must_use]
    pub fn first_recordset(&self) -> ResultSet {
        self.recordsets.first().cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn total_rows_affected(&self) -> u64 {
        self.rows_affected.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn rows_share_column_lookup() {
        let mut rs = ResultSet::with_capacity(2);
        rs.set_column_names(vec!["id".into(), "name".into()]);
        rs.add_row_values(vec![RowValues::Int(1), RowValues::Text("a".into())]);
        rs.add_row_values(vec![RowValues::Int(2), RowValues::Text("b".into())]);

        assert_eq!(rs.len(), 2);
        assert_eq!(rs.results[1].get("name").and_then(RowValues::as_text), Some("b"));
        assert!(Arc::ptr_eq(rs.results[0].columns(), rs.results[1].columns()));
        let pairs: Vec<_> = rs.results[0].iter().collect();
        assert_eq!(pairs[0], ("id", &RowValues::Int(1)));
    }

    #[test]
    fn duplicate_columns_resolve_to_first() {
        let mut rs = ResultSet::with_capacity(1);
        rs.add_row_values(vec![RowValues::Int(0)]);
        rs.set_column_names(vec!["v".into(), "v".into()]);
        rs.add_row_values(vec![RowValues::Int(1), RowValues::Int(2)]);

        assert_eq!(rs.len(), 1);
        assert_eq!(rs.results[0].get("v"), Some(&RowValues::Int(1)));
        assert_eq!(rs.results[0].get_by_index(1), Some(&RowValues::Int(2)));
    }

    #[test]
    fn first_recordset_defaults_to_empty() {
        let raw = RawResult {
            rows_affected: vec![2, 3],
            ..RawResult::default()
        };
        assert!(raw.first_recordset().is_empty());
        assert_eq!(raw.total_rows_affected(), 5);
    }
}
