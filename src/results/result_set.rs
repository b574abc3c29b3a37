use std::sync::Arc;

use super::row::{Columns, CustomDbRow};
use crate::types::RowValues;

/// One record set returned by a statement.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub results: Vec<CustomDbRow>,
    /// Rows collected into `results`.
    pub rows_affected: usize,
    columns: Option<Arc<Columns>>,
}

impl ResultSet {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            results: Vec::with_capacity(capacity),
            ..ResultSet::default()
        }
    }

    /// Columns for every row pushed afterwards.
    pub fn set_column_names(&mut self, names: Vec<String>) {
        self.columns = Some(Arc::new(Columns::new(names)));
    }

    #[must_use]
    pub fn column_names(&self) -> Option<&[String]> {
        self.columns.as_deref().map(Columns::names)
    }

    /// Append a row. Values pushed before any column names are dropped.
    pub fn add_row_values(&mut self, values: Vec<RowValues>) {
        let Some(columns) = &self.columns else {
            return;
        };
        self.results.push(CustomDbRow::new(Arc::clone(columns), values));
        self.rows_affected += 1;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
