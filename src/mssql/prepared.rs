use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bb8::Pool;

use super::config::TiberiusManager;
use super::query::run_query;
use super::transaction::PinnedConnection;
use crate::driver::{BoundParam, NativeStatement, OutputParam, ParamDeclarations, Request};
use crate::error::SqlDialectError;
use crate::helpers::lock;
use crate::results::RawResult;
use crate::types::BindType;

/// Prepared statement wrapper for SQL Server that holds onto a single connection.
///
/// **Tiberius does not expose a real prepared statement type**, so this keeps the
/// SQL text and the declared parameter types and re-binds on each execution
/// against the same connection. A statement prepared inside a transaction shares
/// the transaction's connection; otherwise it checks out its own and returns it on
/// unprepare.
pub struct MssqlStatement {
    conn: PinnedConnection,
    owns_connection: bool,
    sql: String,
    declared: Mutex<BTreeMap<String, BindType>>,
}

impl std::fmt::Debug for MssqlStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlStatement")
            .field("conn", &"<MssqlClient>")
            .field("owns_connection", &self.owns_connection)
            .field("sql", &self.sql)
            .finish()
    }
}

impl MssqlStatement {
    /// Prepare on a connection checked out for this statement alone.
    ///
    /// # Errors
    /// `Unimplemented` for output declarations, otherwise the checkout failure.
    pub async fn on_pool(
        pool: &Pool<TiberiusManager>,
        sql: &str,
        declarations: &ParamDeclarations,
    ) -> Result<Self, SqlDialectError> {
        let declared = declared_inputs(declarations)?;
        let conn = pool.get_owned().await?;
        Ok(Self {
            conn: Arc::new(tokio::sync::Mutex::new(Some(conn))),
            owns_connection: true,
            sql: sql.to_owned(),
            declared: Mutex::new(declared),
        })
    }

    /// Prepare on a transaction's connection.
    ///
    /// # Errors
    /// `Unimplemented` for output declarations.
    pub(crate) fn on_transaction(
        conn: PinnedConnection,
        sql: &str,
        declarations: &ParamDeclarations,
    ) -> Result<Self, SqlDialectError> {
        Ok(Self {
            conn,
            owns_connection: false,
            sql: sql.to_owned(),
            declared: Mutex::new(declared_inputs(declarations)?),
        })
    }

    /// Access the SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

fn declared_inputs(
    declarations: &ParamDeclarations,
) -> Result<BTreeMap<String, BindType>, SqlDialectError> {
    if !declarations.outputs.is_empty() {
        return Err(SqlDialectError::Unimplemented(
            "output parameters are not supported by the tiberius driver".to_string(),
        ));
    }
    Ok(declarations.inputs.iter().cloned().collect())
}

#[async_trait]
impl NativeStatement for MssqlStatement {
    async fn declare(&self, declarations: &ParamDeclarations) -> Result<(), SqlDialectError> {
        let fresh = declared_inputs(declarations)?;
        lock(&self.declared).extend(fresh);
        Ok(())
    }

    async fn execute(
        &self,
        inputs: Vec<BoundParam>,
        outputs: Vec<OutputParam>,
    ) -> Result<RawResult, SqlDialectError> {
        let declared = lock(&self.declared).clone();
        let request = Request {
            sql: self.sql.clone(),
            inputs,
            outputs,
        };
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| {
            SqlDialectError::ExecutionError(
                "MSSQL prepared statement connection was released".to_string(),
            )
        })?;
        run_query(&mut conn.client, &request, Some(&declared)).await
    }

    async fn unprepare(&self) -> Result<(), SqlDialectError> {
        if self.owns_connection {
            self.conn.lock().await.take();
        }
        Ok(())
    }
}
