//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::config::{ConnectionConfig, DriverOptions, PoolSizing, PrivateOptions};
pub use crate::dialect::{Dialect, DialectBuilder, DialectState, ExecHandle, ExecResult};
pub use crate::driver::{Driver, PoolStatus};
pub use crate::error::SqlDialectError;
pub use crate::interpolation::{
    Interpolator, PlaceholderStyle, TokenInterpolator, rewrite_named_binds,
};
pub use crate::logger::DialectLogger;
pub use crate::options::{
    ErrorOptions, ExecDriverOptions, ExecMeta, ExecOptions, InitOptions, TransactionOptions,
};
pub use crate::results::{Columns, CustomDbRow, RawResult, ResultSet};
pub use crate::types::{BindType, IsolationLevel, RowValues};

#[cfg(feature = "mssql")]
pub use crate::mssql::MssqlDriver;
