//! Per-call options for `init`, `begin_transaction` and `exec`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SqlDialectError;
use crate::types::{IsolationLevel, RowValues};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitOptions {
    /// Number of prepared call sites the host expects; reported when the pool is created.
    #[serde(default)]
    pub num_of_prepared_funcs: usize,
}

impl InitOptions {
    #[must_use]
    pub fn new(num_of_prepared_funcs: usize) -> Self {
        Self {
            num_of_prepared_funcs,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOptions {
    /// A level name (`SERIALIZABLE`) or a `${token}` resolved against the driver's
    /// isolation-level constants. `None` keeps the server default.
    #[serde(default)]
    pub isolation_level: Option<String>,
}

impl TransactionOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_isolation_level(mut self, level: impl Into<String>) -> Self {
        self.isolation_level = Some(level.into());
        self
    }

    #[must_use]
    pub fn with_isolation(self, level: IsolationLevel) -> Self {
        self.with_isolation_level(level.to_string())
    }
}

/// Driver-specific execution options.
///
/// Bind type values are type names (`VarChar`) or `${token}`s naming a driver constant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecDriverOptions {
    #[serde(default)]
    pub input_bind_types: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub output_bind_types: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecOptions {
    pub binds: BTreeMap<String, RowValues>,
    pub transaction_id: Option<String>,
    /// Commit right after a successful execution inside a transaction.
    pub auto_commit: bool,
    /// Execute through the call site's prepared statement.
    pub prepare_statement: bool,
    pub driver_options: ExecDriverOptions,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            binds: BTreeMap::new(),
            transaction_id: None,
            auto_commit: true,
            prepare_statement: false,
            driver_options: ExecDriverOptions::default(),
        }
    }
}

impl ExecOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_bind(mut self, name: impl Into<String>, value: impl Into<RowValues>) -> Self {
        self.binds.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    #[must_use]
    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    #[must_use]
    pub fn with_prepare_statement(mut self, prepare_statement: bool) -> Self {
        self.prepare_statement = prepare_statement;
        self
    }

    #[must_use]
    pub fn with_input_type(mut self, name: impl Into<String>, bind_type: impl Into<String>) -> Self {
        self.driver_options
            .input_bind_types
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), bind_type.into());
        self
    }

    #[must_use]
    pub fn with_output_type(mut self, name: impl Into<String>, bind_type: impl Into<String>) -> Self {
        self.driver_options
            .output_bind_types
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), bind_type.into());
        self
    }
}

/// Identifies the call site behind an `exec`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecMeta {
    pub name: String,
    /// Unique call-site path; the prepared-statement key.
    pub path: String,
}

impl ExecMeta {
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

pub type ErrorHandler = Arc<dyn Fn(&SqlDialectError) + Send + Sync>;

/// Per-call error reporting.
#[derive(Clone, Default)]
pub struct ErrorOptions {
    /// Called with the annotated error before `exec` returns it.
    pub handler: Option<ErrorHandler>,
}

impl fmt::Debug for ErrorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorOptions")
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl ErrorOptions {
    #[must_use]
    pub fn with_handler(handler: impl Fn(&SqlDialectError) + Send + Sync + 'static) -> Self {
        Self {
            handler: Some(Arc::new(handler)),
        }
    }
}
