// MSSQL module - SQL Server backend built on tiberius and bb8
//
// - config: tiberius configuration and the bb8 connection manager
// - params: bind values converted per declared bind type
// - query: request binding and result collection
// - transaction: transactions pinned to one pooled connection
// - prepared: prepared statements pinned to a connection
// - driver: `Driver`/`NativePool` implementations

pub mod config;
pub mod driver;
pub mod params;
pub mod prepared;
pub mod query;
pub mod transaction;

pub use config::{MssqlClient, MssqlConnection, TiberiusManager};
pub use driver::{MssqlDriver, MssqlPool};
pub use params::MssqlParam;
pub use prepared::MssqlStatement;
pub use transaction::MssqlTransaction;
