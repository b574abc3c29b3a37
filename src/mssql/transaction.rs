use std::sync::Arc;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tokio::sync::Mutex;

use super::config::TiberiusManager;
use super::prepared::MssqlStatement;
use super::query::run_query;
use crate::driver::{NativeStatement, NativeTransaction, ParamDeclarations, Request};
use crate::error::SqlDialectError;
use crate::results::RawResult;
use crate::types::IsolationLevel;

/// A pooled connection held outside the pool; `None` once released.
pub(crate) type PinnedConnection = Arc<Mutex<Option<PooledConnection<'static, TiberiusManager>>>>;

/// SQL Server transaction pinned to one pooled connection.
///
/// The connection goes back to the pool after a successful commit or rollback.
/// Dropping an unfinished transaction discards its connection instead.
pub struct MssqlTransaction {
    conn: PinnedConnection,
    isolation: Option<IsolationLevel>,
}

impl std::fmt::Debug for MssqlTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlTransaction")
            .field("conn", &"<MssqlClient>")
            .field("isolation", &self.isolation)
            .finish()
    }
}

impl MssqlTransaction {
    /// Check out a connection and begin a transaction on it.
    ///
    /// # Errors
    /// Pool checkout or `BEGIN TRANSACTION` failures.
    pub async fn begin(
        pool: &Pool<TiberiusManager>,
        isolation: Option<IsolationLevel>,
    ) -> Result<Self, SqlDialectError> {
        let mut conn = pool.get_owned().await?;
        conn.client
            .simple_query(begin_sql(isolation))
            .await?
            .into_results()
            .await?;
        conn.in_transaction = true;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            isolation,
        })
    }

    async fn end(&self, statement: &str) -> Result<(), SqlDialectError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| {
            SqlDialectError::ExecutionError("MSSQL transaction already finished".to_string())
        })?;
        let mut sql = statement.to_string();
        if self.isolation.is_some() {
            // the level sticks to the session; reset it before the pool reuses it
            sql.push_str("; SET TRANSACTION ISOLATION LEVEL READ COMMITTED");
        }
        conn.client.simple_query(sql).await?.into_results().await?;
        conn.in_transaction = false;
        guard.take();
        Ok(())
    }
}

pub(crate) fn begin_sql(isolation: Option<IsolationLevel>) -> String {
    match isolation {
        Some(level) => format!(
            "SET TRANSACTION ISOLATION LEVEL {}; BEGIN TRANSACTION",
            level.as_sql()
        ),
        None => "BEGIN TRANSACTION".to_string(),
    }
}

#[async_trait]
impl NativeTransaction for MssqlTransaction {
    async fn query(&self, request: Request) -> Result<RawResult, SqlDialectError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| {
            SqlDialectError::ExecutionError("MSSQL transaction already finished".to_string())
        })?;
        run_query(&mut conn.client, &request, None).await
    }

    async fn prepare(
        &self,
        sql: &str,
        declarations: &ParamDeclarations,
    ) -> Result<Arc<dyn NativeStatement>, SqlDialectError> {
        let statement = MssqlStatement::on_transaction(Arc::clone(&self.conn), sql, declarations)?;
        Ok(Arc::new(statement))
    }

    async fn commit(&self) -> Result<(), SqlDialectError> {
        self.end("COMMIT TRANSACTION").await
    }

    async fn rollback(&self) -> Result<(), SqlDialectError> {
        self.end("ROLLBACK TRANSACTION").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_sets_isolation_only_when_requested() {
        assert_eq!(begin_sql(None), "BEGIN TRANSACTION");
        assert_eq!(
            begin_sql(Some(IsolationLevel::RepeatableRead)),
            "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ; BEGIN TRANSACTION"
        );
    }
}
