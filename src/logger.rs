//! Dialect logging: `tracing` events plus optional host callbacks.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::SqlDialectError;

pub type InfoCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str, Option<&SqlDialectError>) + Send + Sync>;

/// Logger handed to a dialect.
///
/// Every message becomes a `tracing` event carrying the pool id. When the host
/// supplies callbacks they receive the same message, prefixed with the pool id.
#[derive(Clone, Default)]
pub struct DialectLogger {
    info: Option<InfoCallback>,
    error: Option<ErrorCallback>,
    debug: bool,
}

impl fmt::Debug for DialectLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialectLogger")
            .field("info", &self.info.is_some())
            .field("error", &self.error.is_some())
            .field("debug", &self.debug)
            .finish()
    }
}

impl DialectLogger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_info(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.info = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn with_error(
        mut self,
        callback: impl Fn(&str, Option<&SqlDialectError>) + Send + Sync + 'static,
    ) -> Self {
        self.error = Some(Arc::new(callback));
        self
    }

    /// Emit per-statement debug events.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn info(&self, pool_id: &str, message: &str) {
        info!(pool_id = %pool_id, "{message}");
        if let Some(callback) = &self.info {
            callback(&format!("[{pool_id}] {message}"));
        }
    }

    pub fn error(&self, pool_id: &str, message: &str, err: Option<&SqlDialectError>) {
        match err {
            Some(e) => error!(pool_id = %pool_id, error = %e, "{message}"),
            None => error!(pool_id = %pool_id, "{message}"),
        }
        if let Some(callback) = &self.error {
            callback(&format!("[{pool_id}] {message}"), err);
        }
    }

    /// Debug output is only produced when the logger was built with `with_debug(true)`.
    pub fn debug(&self, pool_id: &str, message: &str) {
        if self.debug {
            debug!(pool_id = %pool_id, "{message}");
            if let Some(callback) = &self.info {
                callback(&format!("[{pool_id}] {message}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn callbacks_receive_prefixed_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let info_seen = Arc::clone(&seen);
        let error_seen = Arc::clone(&seen);
        let logger = DialectLogger::new()
            .with_info(move |m| info_seen.lock().unwrap().push(m.to_string()))
            .with_error(move |m, e| {
                error_seen
                    .lock()
                    .unwrap()
                    .push(format!("{m} ({})", e.map(ToString::to_string).unwrap_or_default()));
            });

        logger.info("pool1", "ready");
        logger.debug("pool1", "hidden");
        logger.error(
            "pool1",
            "failed",
            Some(&SqlDialectError::Other("x".into())),
        );

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "[pool1] ready".to_string(),
                "[pool1] failed (Other database error: x)".to_string()
            ]
        );
    }

    #[test]
    fn debug_messages_need_debug_flag() {
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let logger = DialectLogger::new()
            .with_debug(true)
            .with_info(move |_| *counter.lock().unwrap() += 1);
        logger.debug("pool1", "SELECT 1");
        assert!(logger.is_debug());
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
