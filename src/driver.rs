//! The contract between a dialect and a database driver.
//!
//! A [`Driver`] creates one [`NativePool`]. Everything the dialect runs goes through
//! the pool, a [`NativeTransaction`] begun from it, or a [`NativeStatement`] prepared
//! on either.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::NativePoolConfig;
use crate::error::SqlDialectError;
use crate::interpolation::{DriverConstants, PlaceholderStyle};
use crate::results::RawResult;
use crate::types::{BindType, IsolationLevel, RowValues};

/// An input value bound to a rewritten statement.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    pub name: String,
    pub value: RowValues,
    pub bind_type: Option<BindType>,
}

impl BoundParam {
    #[must_use]
    pub fn new(name: impl Into<String>, value: RowValues) -> Self {
        Self {
            name: name.into(),
            value,
            bind_type: None,
        }
    }

    #[must_use]
    pub fn with_bind_type(mut self, bind_type: Option<BindType>) -> Self {
        self.bind_type = bind_type;
        self
    }
}

/// An output parameter requested from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputParam {
    pub name: String,
    pub bind_type: BindType,
}

/// SQL in the driver's placeholder syntax plus its parameters.
///
/// `inputs` follow the first-occurrence order of the binds in `sql`, so positional
/// drivers can bind them in sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub sql: String,
    pub inputs: Vec<BoundParam>,
    pub outputs: Vec<OutputParam>,
}

/// Parameter types declared against a prepared statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamDeclarations {
    pub inputs: Vec<(String, BindType)>,
    pub outputs: Vec<(String, BindType)>,
}

impl ParamDeclarations {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }
}

/// Point-in-time pool utilization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Open connections, idle or not.
    pub count: u32,
    /// Connections currently checked out.
    pub in_use: u32,
}

/// A database driver: constants, placeholder syntax and pool construction.
#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    fn placeholder_style(&self) -> PlaceholderStyle;

    /// Constant namespace used for `${token}` resolution.
    fn constants(&self) -> &DriverConstants;

    /// Create the native pool.
    ///
    /// # Errors
    /// Returns the driver's error when the pool cannot be configured.
    async fn create_pool(
        &self,
        pool_id: &str,
        config: &NativePoolConfig,
    ) -> Result<Arc<dyn NativePool>, SqlDialectError>;
}

#[async_trait]
pub trait NativePool: Send + Sync {
    /// Acquire and release one connection to prove the server is reachable.
    async fn verify(&self) -> Result<(), SqlDialectError>;

    /// Begin a transaction on a dedicated connection; `None` uses the server default.
    async fn begin(
        &self,
        isolation: Option<IsolationLevel>,
    ) -> Result<Arc<dyn NativeTransaction>, SqlDialectError>;

    async fn query(&self, request: Request) -> Result<RawResult, SqlDialectError>;

    async fn prepare(
        &self,
        sql: &str,
        declarations: &ParamDeclarations,
    ) -> Result<Arc<dyn NativeStatement>, SqlDialectError>;

    /// Utilization read from pool bookkeeping, without touching the network.
    fn status(&self) -> PoolStatus;

    async fn close(&self) -> Result<(), SqlDialectError>;
}

#[async_trait]
pub trait NativeTransaction: Send + Sync {
    async fn query(&self, request: Request) -> Result<RawResult, SqlDialectError>;

    async fn prepare(
        &self,
        sql: &str,
        declarations: &ParamDeclarations,
    ) -> Result<Arc<dyn NativeStatement>, SqlDialectError>;

    async fn commit(&self) -> Result<(), SqlDialectError>;

    async fn rollback(&self) -> Result<(), SqlDialectError>;
}

#[async_trait]
pub trait NativeStatement: Send + Sync {
    /// Declare parameters first seen after preparation.
    async fn declare(&self, declarations: &ParamDeclarations) -> Result<(), SqlDialectError>;

    async fn execute(
        &self,
        inputs: Vec<BoundParam>,
        outputs: Vec<OutputParam>,
    ) -> Result<RawResult, SqlDialectError>;

    async fn unprepare(&self) -> Result<(), SqlDialectError>;
}

/// Constant namespace shared by SQL Server style drivers: every [`BindType`] name
/// and, under `ISOLATION_LEVEL`, every [`IsolationLevel`] name.
#[must_use]
pub fn standard_constants() -> DriverConstants {
    let constants = BindType::names().fold(DriverConstants::new(), |constants, name| {
        constants.with_value(name.clone(), Value::String(name))
    });
    IsolationLevel::names().fold(constants, |constants, name| {
        constants.with_isolation_level(name.clone(), Value::String(name))
    })
}
