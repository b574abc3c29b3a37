use std::fmt;
use std::time::Duration;

use bb8::{ManageConnection, Pool};
use bb8_tiberius::{ConnectionManager, rt};
use serde_json::Value;
use tiberius::{AuthMethod, Config as TiberiusConfig, EncryptionLevel};

use crate::config::NativePoolConfig;

/// Type alias for SQL Server client
pub type MssqlClient = rt::Client;

pub const DEFAULT_PORT: u16 = 1433;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// A pooled SQL Server connection.
///
/// A connection handed back while `in_transaction` is set is discarded by the pool
/// instead of being reused mid-transaction.
pub struct MssqlConnection {
    pub client: MssqlClient,
    pub(crate) in_transaction: bool,
}

/// bb8 manager over [`bb8_tiberius::ConnectionManager`] that also tracks
/// whether a connection was checked in mid-transaction.
pub struct TiberiusManager {
    inner: ConnectionManager,
    addr: String,
}

impl fmt::Debug for TiberiusManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TiberiusManager")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl TiberiusManager {
    #[must_use]
    pub fn new(config: &NativePoolConfig) -> Self {
        let config = build_tiberius_config(config);
        Self {
            addr: config.get_addr(),
            inner: ConnectionManager::new(config),
        }
    }
}

impl ManageConnection for TiberiusManager {
    type Connection = MssqlConnection;
    type Error = bb8_tiberius::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let client = self.inner.connect().await?;
        Ok(MssqlConnection {
            client,
            in_transaction: false,
        })
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        self.inner.is_valid(&mut conn.client).await
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.in_transaction || self.inner.has_broken(&mut conn.client)
    }
}

/// Build the bb8 pool; connections are opened lazily.
#[must_use]
pub fn build_pool(config: &NativePoolConfig) -> Pool<TiberiusManager> {
    let max = config.pool.max.unwrap_or(DEFAULT_MAX_CONNECTIONS).max(1);
    let mut builder = Pool::builder()
        .max_size(max)
        .min_idle(config.pool.min.map(|min| min.min(max)));
    if let Some(idle) = config.pool.idle_timeout_millis {
        builder = builder.idle_timeout(Some(Duration::from_millis(idle)));
    }
    if let Some(timeout) = config.pool.connection_timeout_millis {
        builder = builder.connection_timeout(Duration::from_millis(timeout));
    }
    builder.build_unchecked(TiberiusManager::new(config))
}

pub(crate) fn build_tiberius_config(opts: &NativePoolConfig) -> TiberiusConfig {
    let mut config = TiberiusConfig::new();
    config.host(&opts.server);
    config.port(opts.port.unwrap_or(DEFAULT_PORT));
    if let Some(database) = &opts.database {
        config.database(database);
    }
    if let Some(user) = &opts.user {
        config.authentication(AuthMethod::sql_server(
            user,
            opts.password.as_deref().unwrap_or_default(),
        ));
    }
    if let Some(instance) = driver_option(opts, "instanceName").and_then(Value::as_str) {
        config.instance_name(instance);
    }
    if let Some(app) = driver_option(opts, "appName").and_then(Value::as_str) {
        config.application_name(app);
    }
    if driver_option(opts, "encrypt").and_then(Value::as_bool) == Some(false) {
        config.encryption(EncryptionLevel::NotSupported);
    }
    if driver_option(opts, "trustServerCertificate").and_then(Value::as_bool) != Some(false) {
        config.trust_cert();
    }
    config
}

/// Driver option `key`, looked up in a nested `options` object first.
fn driver_option<'a>(config: &'a NativePoolConfig, key: &str) -> Option<&'a Value> {
    config
        .options
        .get("options")
        .and_then(|nested| nested.get(key))
        .or_else(|| config.options.get(key))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_nested_and_flat_driver_options() {
        let mut config = NativePoolConfig {
            server: "db".into(),
            ..NativePoolConfig::default()
        };
        config
            .options
            .insert("options".into(), json!({"instanceName": "SQLEXPRESS"}));
        config.options.insert("appName".into(), json!("ledger"));

        assert_eq!(driver_option(&config, "instanceName"), Some(&json!("SQLEXPRESS")));
        assert_eq!(driver_option(&config, "appName"), Some(&json!("ledger")));
        assert_eq!(
            build_tiberius_config(&config).get_addr(),
            TiberiusManager::new(&config).addr
        );
    }

    #[test]
    fn default_port_is_used() {
        let config = NativePoolConfig {
            server: "db.internal".into(),
            ..NativePoolConfig::default()
        };
        assert_eq!(build_tiberius_config(&config).get_addr(), "db.internal:1433");
    }
}
