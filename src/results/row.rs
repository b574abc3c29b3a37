use std::collections::HashMap;
use std::sync::Arc;

use crate::types::RowValues;

/// Column names of one record set plus their name lookup.
#[derive(Debug, Default)]
pub struct Columns {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Columns {
    /// Duplicate names resolve to their first position.
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        let mut index = HashMap::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            index.entry(name.clone()).or_insert(position);
        }
        Self { names, index }
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One row; its [`Columns`] are shared with the rest of the record set.
#[derive(Debug, Clone)]
pub struct CustomDbRow {
    columns: Arc<Columns>,
    pub values: Vec<RowValues>,
}

impl CustomDbRow {
    #[must_use]
    pub fn new(columns: Arc<Columns>, values: Vec<RowValues>) -> Self {
        Self { columns, values }
    }

    #[must_use]
    pub fn columns(&self) -> &Arc<Columns> {
        &self.columns
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&RowValues> {
        self.columns
            .position(column)
            .and_then(|position| self.values.get(position))
    }

    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.values.get(index)
    }

    /// `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RowValues)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}
