//! Dialect configuration: private credentials, generic connection/pool options and
//! the merged driver-native pool configuration.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SqlDialectError;
use crate::interpolation::{DriverConstants, Interpolator};

/// Server used when neither the private options nor the driver options name one.
pub const DEFAULT_HOST: &str = "localhost";

/// Credentials and host details kept out of shared configuration files.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct PrivateOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Any other private values available to `${token}` interpolation.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl fmt::Debug for PrivateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PrivateOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }
}

/// Generic pool sizing; `idle` and `timeout` are milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSizing {
    #[serde(default)]
    pub min: Option<u32>,
    #[serde(default)]
    pub max: Option<u32>,
    #[serde(default)]
    pub idle: Option<u64>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Driver-specific options; `connection` holds raw connection parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverOptions {
    #[serde(default)]
    pub connection: Map<String, Value>,
}

/// Connection configuration handed to a dialect by its host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub pool: Option<PoolSizing>,
    #[serde(default)]
    pub driver_options: DriverOptions,
    /// Remaining connection properties (name, dir, service, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConnectionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON connection configuration.
    ///
    /// # Errors
    /// Returns `SqlDialectError::ConfigError` when the JSON does not describe a connection.
    pub fn from_json_str(json: &str) -> Result<Self, SqlDialectError> {
        serde_json::from_str(json)
            .map_err(|e| SqlDialectError::ConfigError(format!("invalid connection configuration: {e}")))
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: PoolSizing) -> Self {
        self.pool = Some(pool);
        self
    }

    #[must_use]
    pub fn with_connection_option(mut self, name: impl Into<String>, value: Value) -> Self {
        self.driver_options.connection.insert(name.into(), value);
        self
    }
}

/// Driver-native pool sizing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativePoolSizing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_millis: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_timeout_millis: Option<u64>,
}

/// Interpolated driver connection options merged with private options and pool sizing.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativePoolConfig {
    #[serde(default)]
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub pool: NativePoolSizing,
    /// Driver parameters this crate does not interpret.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl fmt::Debug for NativePoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativePoolConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pool", &self.pool)
            .field("options", &self.options)
            .finish()
    }
}

impl NativePoolConfig {
    /// Build the native configuration for a dialect.
    ///
    /// `${token}` values in `driver_options.connection` resolve against the private
    /// options, then the connection configuration, then driver constants. Private
    /// host/port/credentials and generic pool sizing override the driver options.
    ///
    /// # Errors
    /// Returns `SqlDialectError::ConfigError` if the interpolated options have the wrong shape.
    pub fn resolve(
        private: &PrivateOptions,
        conn: &ConnectionConfig,
        interpolator: &dyn Interpolator,
        constants: &DriverConstants,
    ) -> Result<Self, SqlDialectError> {
        let local = local_scope(private, conn)?;
        let connection =
            interpolator.interpolate_map(&conn.driver_options.connection, &local, constants.values());
        let mut config: NativePoolConfig = serde_json::from_value(Value::Object(connection))
            .map_err(|e| {
                SqlDialectError::ConfigError(format!("invalid driver connection options: {e}"))
            })?;

        if let Some(host) = &private.host {
            config.server.clone_from(host);
        }
        if config.server.is_empty() {
            config.server = DEFAULT_HOST.to_string();
        }
        if private.port.is_some() {
            config.port = private.port;
        }
        if private.username.is_some() {
            config.user.clone_from(&private.username);
        }
        if private.password.is_some() {
            config.password.clone_from(&private.password);
        }

        if let Some(pool) = &conn.pool {
            if pool.min.is_some() {
                config.pool.min = pool.min;
            }
            if pool.max.is_some() {
                config.pool.max = pool.max;
            }
            if pool.idle.is_some() {
                config.pool.idle_timeout_millis = pool.idle;
            }
            if pool.timeout.is_some() {
                config.pool.connection_timeout_millis = pool.timeout;
            }
        }
        Ok(config)
    }

    /// The configuration as JSON with the password removed, for diagnostics.
    #[must_use]
    pub fn redacted(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("password");
        }
        value
    }
}

fn local_scope(
    private: &PrivateOptions,
    conn: &ConnectionConfig,
) -> Result<Map<String, Value>, SqlDialectError> {
    let mut local = match serde_json::to_value(private) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => {
            return Err(SqlDialectError::ConfigError(format!(
                "private options are not serializable: {e}"
            )));
        }
    };
    if let Some(id) = &conn.id {
        local.entry("id").or_insert_with(|| Value::String(id.clone()));
    }
    for (key, value) in &conn.extra {
        local.entry(key.clone()).or_insert_with(|| value.clone());
    }
    Ok(local)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::interpolation::TokenInterpolator;

    fn constants() -> DriverConstants {
        DriverConstants::new().with_value("MAX_POOL", json!(25))
    }

    #[test]
    fn merges_private_options_and_pool_sizing() {
        let private = PrivateOptions::new()
            .with_host("db.internal")
            .with_port(14330)
            .with_credentials("sa", "s3cret");
        let conn = ConnectionConfig::new()
            .with_id("conn-1")
            .with_pool(PoolSizing {
                min: Some(1),
                max: Some(10),
                idle: Some(1000),
                timeout: Some(5000),
            })
            .with_connection_option("database", json!("${dbname}"))
            .with_connection_option("pool", json!({"max": 20, "min": 2}))
            .with_connection_option("requestTimeout", json!(10000));
        let conn = ConnectionConfig {
            extra: json!({"dbname": "sqlerdb"}).as_object().unwrap().clone(),
            ..conn
        };

        let cfg = NativePoolConfig::resolve(&private, &conn, &TokenInterpolator, &constants()).unwrap();
        assert_eq!(cfg.server, "db.internal");
        assert_eq!(cfg.port, Some(14330));
        assert_eq!(cfg.database.as_deref(), Some("sqlerdb"));
        assert_eq!(cfg.user.as_deref(), Some("sa"));
        assert_eq!(cfg.pool.min, Some(1));
        assert_eq!(cfg.pool.max, Some(10));
        assert_eq!(cfg.pool.idle_timeout_millis, Some(1000));
        assert_eq!(cfg.pool.connection_timeout_millis, Some(5000));
        assert_eq!(cfg.options["requestTimeout"], json!(10000));
    }

    #[test]
    fn defaults_host_and_resolves_constants() {
        let conn = ConnectionConfig::new().with_connection_option("pool", json!({"max": "${MAX_POOL}"}));
        let cfg = NativePoolConfig::resolve(&PrivateOptions::new(), &conn, &TokenInterpolator, &constants())
            .unwrap();
        assert_eq!(cfg.server, DEFAULT_HOST);
        assert_eq!(cfg.pool.max, Some(25));
    }

    #[test]
    fn private_values_win_over_connection_values() {
        let private = PrivateOptions::new().with_value("database", json!("private-db"));
        let conn = ConnectionConfig {
            extra: json!({"database": "conn-db"}).as_object().unwrap().clone(),
            ..ConnectionConfig::new().with_connection_option("database", json!("${database}"))
        };
        let cfg = NativePoolConfig::resolve(&private, &conn, &TokenInterpolator, &constants()).unwrap();
        assert_eq!(cfg.database.as_deref(), Some("private-db"));
    }

    #[test]
    fn redaction_strips_password_everywhere() {
        let private = PrivateOptions::new().with_credentials("sa", "hunter2");
        let cfg = NativePoolConfig::resolve(
            &private,
            &ConnectionConfig::new(),
            &TokenInterpolator,
            &constants(),
        )
        .unwrap();
        assert!(!cfg.redacted().to_string().contains("hunter2"));
        assert!(!format!("{cfg:?}").contains("hunter2"));
        assert!(!format!("{private:?}").contains("hunter2"));
    }

    #[test]
    fn parses_json_connection_config() {
        let conn = ConnectionConfig::from_json_str(
            r#"{"id":"mssql","name":"fin","pool":{"min":0,"max":4},"driverOptions":{"connection":{"database":"fin"}}}"#,
        )
        .unwrap();
        assert_eq!(conn.id.as_deref(), Some("mssql"));
        assert_eq!(conn.pool.unwrap().max, Some(4));
        assert_eq!(conn.extra["name"], json!("fin"));
        assert_eq!(conn.driver_options.connection["database"], json!("fin"));
    }
}
