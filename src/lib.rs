//! Execution-plan manager for one pooled SQL connection pool.
//!
//! A [`Dialect`] owns a single connection pool and multiplexes ad-hoc queries,
//! explicit transactions and prepared statements over it. Statements issued
//! against the same transaction reach the engine one at a time in submission
//! order; prepared statements stay bound to the transaction (or the absence of
//! one) they were first prepared in.
//!
//! Drivers plug in through the traits in [`driver`]. The `mssql` feature
//! (on by default) provides a SQL Server driver built on tiberius and bb8.

pub mod prelude;

pub mod config;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod interpolation;
pub mod logger;
pub mod options;
pub mod planner;
pub mod pool;
pub mod prepared;
pub mod results;
pub mod run_queue;
pub mod transaction;
pub mod types;

mod helpers;

#[cfg(feature = "mssql")]
pub mod mssql;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use config::{ConnectionConfig, NativePoolConfig, PoolSizing, PrivateOptions};
pub use dialect::{Dialect, DialectBuilder, DialectState, ExecHandle, ExecResult};
pub use error::SqlDialectError;
pub use options::{ErrorOptions, ExecMeta, ExecOptions, InitOptions, TransactionOptions};
pub use results::{Columns, CustomDbRow, RawResult, ResultSet};
pub use types::{BindType, IsolationLevel, RowValues};
