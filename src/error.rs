use std::collections::BTreeMap;

use thiserror::Error;

use crate::types::BindType;

#[derive(Debug, Error)]
pub enum SqlDialectError {
    #[cfg(feature = "mssql")]
    #[error(transparent)]
    MssqlError(#[from] tiberius::error::Error),

    #[cfg(feature = "mssql")]
    #[error(transparent)]
    PoolErrorMssql(#[from] bb8::RunError<bb8_tiberius::Error>),

    /// The native pool could not be created or could not reach the server.
    ///
    /// `config` is the merged pool configuration with the password removed.
    #[error("{source}\nconnection pool \"{pool_id}\" could not be created for {config}")]
    PoolCreation {
        pool_id: String,
        config: serde_json::Value,
        #[source]
        source: Box<SqlDialectError>,
    },

    #[error(
        "Prepared statement \"{path}\" is already prepared within transaction \"{prepared_tx}\". \
         Either include the \"transaction_id\" along with \"prepare_statement = true\" or call \
         \"unprepare\" on the previous execution result before calling \"{path}\" without a transaction"
    )]
    TransactionInProgress { path: String, prepared_tx: String },

    #[error(
        "Prepared statement \"{path}\" is already prepared OUTSIDE of a transaction, yet is \
         currently being called within transaction \"{requested_tx}\". Either include the \
         \"transaction_id\" along with the original \"prepare_statement = true\" or call \
         \"unprepare\", \"commit\" or \"rollback\" on the previous execution result before calling \
         \"{path}\" with transaction \"{requested_tx}\""
    )]
    TransactionNotInProgress { path: String, requested_tx: String },

    #[error(
        "Prepared statement \"{path}\" is already prepared using transaction \"{prepared_tx}\", yet \
         is currently being called with transaction \"{requested_tx}\". Either use the same \
         \"transaction_id\" for every call using \"prepare_statement = true\" or call \"unprepare\", \
         \"commit\" or \"rollback\" on the previous execution result first"
    )]
    TransactionMismatch {
        path: String,
        prepared_tx: String,
        requested_tx: String,
    },

    /// Interpolation, placeholder rewriting or native execution failed for one `exec` call.
    #[error("Failed to execute SQL at {path}: {source}\n{sql}")]
    Execution {
        path: String,
        sql: String,
        input_bind_types: BTreeMap<String, BindType>,
        output_bind_types: BTreeMap<String, BindType>,
        #[source]
        source: Box<SqlDialectError>,
    },

    #[error("Failed to close connection pool \"{pool_id}\" (uncommitted transactions: {pending}): {source}")]
    Close {
        pool_id: String,
        pending: usize,
        #[source]
        source: Box<SqlDialectError>,
    },

    #[error("Transaction \"{0}\" is not open")]
    TransactionNotFound(String),

    #[error("Connection pool \"{0}\" is already initialized")]
    AlreadyInitialized(String),

    #[error("Connection pool \"{0}\" has not been initialized")]
    NotInitialized(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl SqlDialectError {
    /// `true` for the three prepared-statement/transaction affinity violations.
    #[must_use]
    pub fn is_affinity_error(&self) -> bool {
        matches!(
            self,
            Self::TransactionInProgress { .. }
                | Self::TransactionNotInProgress { .. }
                | Self::TransactionMismatch { .. }
        )
    }

    /// The resolved SQL text attached to an execution failure.
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Execution { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Strip diagnostic wrappers and return the underlying failure.
    #[must_use]
    pub fn root(&self) -> &SqlDialectError {
        match self {
            Self::Execution { source, .. }
            | Self::PoolCreation { source, .. }
            | Self::Close { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_errors_name_both_transactions() {
        let err = SqlDialectError::TransactionMismatch {
            path: "update.table1.rows".into(),
            prepared_tx: "tx-a".into(),
            requested_tx: "tx-b".into(),
        };
        let msg = err.to_string();
        assert!(err.is_affinity_error());
        assert!(msg.contains("update.table1.rows"));
        assert!(msg.contains("tx-a"));
        assert!(msg.contains("tx-b"));
    }

    #[test]
    fn root_unwraps_execution_context() {
        let err = SqlDialectError::Execution {
            path: "read.rows".into(),
            sql: "SELECT @P1".into(),
            input_bind_types: BTreeMap::new(),
            output_bind_types: BTreeMap::new(),
            source: Box::new(SqlDialectError::ExecutionError("boom".into())),
        };
        assert_eq!(err.sql(), Some("SELECT @P1"));
        assert!(matches!(err.root(), SqlDialectError::ExecutionError(m) if m == "boom"));
        assert!(!err.is_affinity_error());
    }
}
