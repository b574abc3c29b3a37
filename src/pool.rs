//! Connection pool adapter: owns the single native pool of a dialect.

use std::sync::{Arc, Mutex};

use crate::config::NativePoolConfig;
use crate::driver::{Driver, NativePool, PoolStatus};
use crate::error::SqlDialectError;
use crate::helpers::lock;
use tracing::warn;

/// Holds at most one live native pool.
pub struct PoolAdapter {
    id: String,
    handle: Mutex<Option<Arc<dyn NativePool>>>,
}

impl std::fmt::Debug for PoolAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolAdapter")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}

impl PoolAdapter {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handle: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        lock(&self.handle).is_some()
    }

    /// Create the native pool and prove it can hand out a connection.
    ///
    /// # Errors
    /// `AlreadyInitialized` when a pool is live; `PoolCreation` (carrying the
    /// redacted configuration) when the driver fails to create or reach the pool.
    pub async fn init(
        &self,
        driver: &dyn Driver,
        config: &NativePoolConfig,
    ) -> Result<Arc<dyn NativePool>, SqlDialectError> {
        if self.is_live() {
            return Err(SqlDialectError::AlreadyInitialized(self.id.clone()));
        }

        let pool = driver
            .create_pool(&self.id, config)
            .await
            .map_err(|e| self.creation_error(config, e))?;

        if let Err(e) = pool.verify().await {
            self.discard(pool.as_ref(), "unverified").await;
            return Err(self.creation_error(config, e));
        }

        let installed = {
            let mut handle = lock(&self.handle);
            if handle.is_some() {
                false
            } else {
                *handle = Some(Arc::clone(&pool));
                true
            }
        };
        if !installed {
            // lost a race with a concurrent init; the winner's pool stays
            self.discard(pool.as_ref(), "superseded").await;
            return Err(SqlDialectError::AlreadyInitialized(self.id.clone()));
        }
        Ok(pool)
    }

    /// Close a pool that never became live; failures are only logged.
    async fn discard(&self, pool: &dyn NativePool, reason: &str) {
        if let Err(e) = pool.close().await {
            warn!(pool_id = %self.id, reason, error = %e, "failed to close discarded pool");
        }
    }

    /// The live pool.
    ///
    /// # Errors
    /// `NotInitialized` before `init` or after `close`.
    pub fn handle(&self) -> Result<Arc<dyn NativePool>, SqlDialectError> {
        lock(&self.handle)
            .clone()
            .ok_or_else(|| SqlDialectError::NotInitialized(self.id.clone()))
    }

    /// Detach the live pool so it can be closed.
    pub fn take(&self) -> Option<Arc<dyn NativePool>> {
        lock(&self.handle).take()
    }

    /// Utilization of the live pool; zeroes when there is none.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        lock(&self.handle)
            .as_ref()
            .map(|pool| pool.status())
            .unwrap_or_default()
    }

    fn creation_error(&self, config: &NativePoolConfig, source: SqlDialectError) -> SqlDialectError {
        SqlDialectError::PoolCreation {
            pool_id: self.id.clone(),
            config: config.redacted(),
            source: Box::new(source),
        }
    }
}
