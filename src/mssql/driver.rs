use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bb8::Pool;

use super::config::{TiberiusManager, build_pool};
use super::prepared::MssqlStatement;
use super::query::run_query;
use super::transaction::MssqlTransaction;
use crate::config::NativePoolConfig;
use crate::driver::{
    Driver, NativePool, NativeStatement, NativeTransaction, ParamDeclarations, PoolStatus, Request,
    standard_constants,
};
use crate::error::SqlDialectError;
use crate::helpers::lock;
use crate::interpolation::{DriverConstants, PlaceholderStyle};
use crate::results::RawResult;
use crate::types::IsolationLevel;

/// SQL Server driver backed by tiberius.
#[derive(Debug, Clone)]
pub struct MssqlDriver {
    constants: DriverConstants,
}

impl Default for MssqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MssqlDriver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            constants: standard_constants(),
        }
    }
}

#[async_trait]
impl Driver for MssqlDriver {
    fn name(&self) -> &str {
        "mssql"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Positional
    }

    fn constants(&self) -> &DriverConstants {
        &self.constants
    }

    async fn create_pool(
        &self,
        pool_id: &str,
        config: &NativePoolConfig,
    ) -> Result<Arc<dyn NativePool>, SqlDialectError> {
        tracing::debug!(pool_id = %pool_id, server = %config.server, "configuring tiberius pool");
        Ok(Arc::new(MssqlPool {
            pool: Mutex::new(Some(build_pool(config))),
        }))
    }
}

/// bb8 pool of tiberius connections.
pub struct MssqlPool {
    pool: Mutex<Option<Pool<TiberiusManager>>>,
}

impl std::fmt::Debug for MssqlPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlPool")
            .field("status", &self.status())
            .finish()
    }
}

impl MssqlPool {
    fn pool(&self) -> Result<Pool<TiberiusManager>, SqlDialectError> {
        lock(&self.pool)
            .clone()
            .ok_or_else(|| SqlDialectError::ConnectionError("MSSQL pool is closed".to_string()))
    }
}

#[async_trait]
impl NativePool for MssqlPool {
    async fn verify(&self) -> Result<(), SqlDialectError> {
        let pool = self.pool()?;
        let conn = pool.get().await?;
        drop(conn);
        Ok(())
    }

    async fn begin(
        &self,
        isolation: Option<IsolationLevel>,
    ) -> Result<Arc<dyn NativeTransaction>, SqlDialectError> {
        let pool = self.pool()?;
        Ok(Arc::new(MssqlTransaction::begin(&pool, isolation).await?))
    }

    async fn query(&self, request: Request) -> Result<RawResult, SqlDialectError> {
        let pool = self.pool()?;
        let mut conn = pool.get().await?;
        run_query(&mut conn.client, &request, None).await
    }

    async fn prepare(
        &self,
        sql: &str,
        declarations: &ParamDeclarations,
    ) -> Result<Arc<dyn NativeStatement>, SqlDialectError> {
        let pool = self.pool()?;
        Ok(Arc::new(MssqlStatement::on_pool(&pool, sql, declarations).await?))
    }

    fn status(&self) -> PoolStatus {
        lock(&self.pool)
            .as_ref()
            .map(|pool| {
                let state = pool.state();
                PoolStatus {
                    count: state.connections,
                    in_use: state.connections.saturating_sub(state.idle_connections),
                }
            })
            .unwrap_or_default()
    }

    async fn close(&self) -> Result<(), SqlDialectError> {
        // connections close once the last pool handle is dropped
        drop(lock(&self.pool).take());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exposes_type_and_isolation_constants() {
        let driver = MssqlDriver::new();
        assert_eq!(driver.placeholder_style(), PlaceholderStyle::Positional);
        assert_eq!(driver.constants().values()["VarChar"], json!("VarChar"));
        assert_eq!(
            driver.constants().isolation_levels()["SERIALIZABLE"],
            json!("SERIALIZABLE")
        );
    }

    #[tokio::test]
    async fn closed_pool_reports_no_connections() {
        let config = NativePoolConfig {
            server: "127.0.0.1".into(),
            ..NativePoolConfig::default()
        };
        let pool = MssqlDriver::new().create_pool("p", &config).await.unwrap();
        assert_eq!(pool.status(), PoolStatus::default());
        pool.close().await.unwrap();
        assert!(matches!(
            pool.query(Request::default()).await,
            Err(SqlDialectError::ConnectionError(_))
        ));
    }
}
