#![allow(dead_code)]

use std::sync::Arc;

use sql_dialect::prelude::*;
use sql_dialect::test_utils::{NativeCall, SimulatedDriver};
use tracing_subscriber::EnvFilter;

pub const USER: &str = "tester";
pub const PASSWORD: &str = "pa55word";

/// Route dialect log events to the test output; `RUST_LOG=sql_dialect=debug` to see them.
pub fn trace() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn build(driver: &SimulatedDriver, password: &str) -> Dialect {
    trace();
    Dialect::builder(Arc::new(driver.clone()))
        .private_options(PrivateOptions::new().with_credentials(USER, password))
        .connection(ConnectionConfig::new().with_id("sim"))
        .build()
}

pub async fn init(driver: &SimulatedDriver) -> Result<Dialect, SqlDialectError> {
    let dialect = build(driver, PASSWORD);
    dialect.init(&InitOptions::new(2)).await?;
    Ok(dialect)
}

pub fn meta(path: &str) -> ExecMeta {
    ExecMeta::new(path.rsplit('.').next().unwrap_or(path), path)
}

pub fn position(calls: &[NativeCall], wanted: &NativeCall) -> usize {
    calls
        .iter()
        .position(|call| call == wanted)
        .unwrap_or_else(|| panic!("{wanted:?} not found in {calls:?}"))
}

pub fn count(calls: &[NativeCall], pred: impl Fn(&NativeCall) -> bool) -> usize {
    calls.iter().filter(|call| pred(call)).count()
}
