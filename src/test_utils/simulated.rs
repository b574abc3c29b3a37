//! Simulated SQL engine that records every native call in order.
//!
//! Statements may carry a `/* sleep <ms> */` comment to delay their completion and
//! fail when they contain `RAISERROR`. Results echo the bound parameters as a
//! single row whose columns are the parameter names.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::config::NativePoolConfig;
use crate::driver::{
    BoundParam, Driver, NativePool, NativeStatement, NativeTransaction, OutputParam,
    ParamDeclarations, PoolStatus, Request, standard_constants,
};
use crate::error::SqlDialectError;
use crate::helpers::lock;
use crate::interpolation::{DriverConstants, PlaceholderStyle};
use crate::results::{RawResult, ResultSet};
use crate::types::{IsolationLevel, RowValues};

static SLEEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*\s*sleep\s+(\d+)\s*\*/").expect("sleep pattern is valid"));

/// Where a native call ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Pool,
    Transaction(u32),
}

/// One call that reached the simulated engine.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCall {
    Connect {
        server: String,
        user: Option<String>,
    },
    Begin {
        tx: u32,
        isolation: Option<IsolationLevel>,
    },
    Query {
        scope: Scope,
        sql: String,
        params: Vec<(String, RowValues)>,
    },
    /// A query or statement execution finished.
    Completed {
        sql: String,
    },
    Prepare {
        statement: u32,
        scope: Scope,
        sql: String,
        declared: Vec<String>,
    },
    Declare {
        statement: u32,
        names: Vec<String>,
    },
    Execute {
        statement: u32,
        params: Vec<(String, RowValues)>,
    },
    Unprepare {
        statement: u32,
    },
    Commit {
        tx: u32,
    },
    Rollback {
        tx: u32,
    },
    Close,
}

#[derive(Debug, Default)]
struct Engine {
    calls: Mutex<Vec<NativeCall>>,
    password: Option<String>,
    begin_delay: Duration,
    fail_commit: AtomicBool,
    fail_close: bool,
    next_tx: AtomicU32,
    next_statement: AtomicU32,
    open_transactions: AtomicU32,
}

impl Engine {
    fn record(&self, call: NativeCall) {
        lock(&self.calls).push(call);
    }

    async fn respond(&self, sql: &str, params: &[BoundParam]) -> Result<RawResult, SqlDialectError> {
        if let Some(ms) = SLEEP
            .captures(sql)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
        {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        self.record(NativeCall::Completed {
            sql: sql.to_owned(),
        });
        if sql.contains("RAISERROR") {
            return Err(SqlDialectError::ExecutionError(
                "simulated engine error".to_string(),
            ));
        }

        let mut result_set = ResultSet::with_capacity(1);
        result_set.set_column_names(params.iter().map(|p| p.name.clone()).collect());
        result_set.add_row_values(params.iter().map(|p| p.value.clone()).collect());
        Ok(RawResult {
            recordsets: vec![result_set],
            rows_affected: vec![1],
            ..RawResult::default()
        })
    }
}

fn named_values(params: &[BoundParam]) -> Vec<(String, RowValues)> {
    params
        .iter()
        .map(|p| (p.name.clone(), p.value.clone()))
        .collect()
}

/// Driver over the simulated engine; uses `@name` placeholders.
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    engine: Arc<Engine>,
    constants: DriverConstants,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDriver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            engine: Arc::new(Engine::default()),
            constants: standard_constants(),
        }
    }

    /// Only accept connections using `password`.
    #[must_use]
    pub fn with_password(self, password: impl Into<String>) -> Self {
        self.reconfigure(|engine| engine.password = Some(password.into()))
    }

    /// Delay every native begin.
    #[must_use]
    pub fn with_begin_delay(self, delay: Duration) -> Self {
        self.reconfigure(|engine| engine.begin_delay = delay)
    }

    /// Make closing the pool fail.
    #[must_use]
    pub fn with_failing_close(self) -> Self {
        self.reconfigure(|engine| engine.fail_close = true)
    }

    #[must_use]
    pub fn with_constant(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.constants = self.constants.with_value(name, value);
        self
    }

    fn reconfigure(mut self, apply: impl FnOnce(&mut Engine)) -> Self {
        let mut engine = Engine::default();
        engine.password.clone_from(&self.engine.password);
        engine.begin_delay = self.engine.begin_delay;
        engine.fail_close = self.engine.fail_close;
        apply(&mut engine);
        self.engine = Arc::new(engine);
        self
    }

    /// The next native commit fails once.
    pub fn fail_next_commit(&self) {
        self.engine.fail_commit.store(true, Ordering::Release);
    }

    /// Every native call so far, in the order it reached the engine.
    #[must_use]
    pub fn calls(&self) -> Vec<NativeCall> {
        lock(&self.engine.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.engine.calls).clear();
    }
}

#[async_trait]
impl Driver for SimulatedDriver {
    fn name(&self) -> &str {
        "simulated"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Named
    }

    fn constants(&self) -> &DriverConstants {
        &self.constants
    }

    async fn create_pool(
        &self,
        _pool_id: &str,
        config: &NativePoolConfig,
    ) -> Result<Arc<dyn NativePool>, SqlDialectError> {
        Ok(Arc::new(SimulatedPool {
            engine: Arc::clone(&self.engine),
            server: config.server.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct SimulatedPool {
    engine: Arc<Engine>,
    server: String,
    user: Option<String>,
    password: Option<String>,
    closed: AtomicBool,
}

impl SimulatedPool {
    fn ensure_open(&self) -> Result<(), SqlDialectError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SqlDialectError::ConnectionError("pool is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NativePool for SimulatedPool {
    async fn verify(&self) -> Result<(), SqlDialectError> {
        self.ensure_open()?;
        if let Some(expected) = &self.engine.password {
            if self.password.as_ref() != Some(expected) {
                return Err(SqlDialectError::ConnectionError(format!(
                    "Login failed for user '{}'",
                    self.user.as_deref().unwrap_or_default()
                )));
            }
        }
        self.engine.record(NativeCall::Connect {
            server: self.server.clone(),
            user: self.user.clone(),
        });
        Ok(())
    }

    async fn begin(
        &self,
        isolation: Option<IsolationLevel>,
    ) -> Result<Arc<dyn NativeTransaction>, SqlDialectError> {
        self.ensure_open()?;
        if !self.engine.begin_delay.is_zero() {
            tokio::time::sleep(self.engine.begin_delay).await;
        }
        let tx = self.engine.next_tx.fetch_add(1, Ordering::AcqRel) + 1;
        self.engine.open_transactions.fetch_add(1, Ordering::AcqRel);
        self.engine.record(NativeCall::Begin { tx, isolation });
        Ok(Arc::new(SimulatedTransaction {
            engine: Arc::clone(&self.engine),
            tx,
            finished: AtomicBool::new(false),
        }))
    }

    async fn query(&self, request: Request) -> Result<RawResult, SqlDialectError> {
        self.ensure_open()?;
        self.engine.record(NativeCall::Query {
            scope: Scope::Pool,
            sql: request.sql.clone(),
            params: named_values(&request.inputs),
        });
        self.engine.respond(&request.sql, &request.inputs).await
    }

    async fn prepare(
        &self,
        sql: &str,
        declarations: &ParamDeclarations,
    ) -> Result<Arc<dyn NativeStatement>, SqlDialectError> {
        self.ensure_open()?;
        Ok(prepare(&self.engine, Scope::Pool, sql, declarations))
    }

    fn status(&self) -> PoolStatus {
        let in_use = self.engine.open_transactions.load(Ordering::Acquire);
        PoolStatus {
            count: in_use + 1,
            in_use,
        }
    }

    async fn close(&self) -> Result<(), SqlDialectError> {
        self.closed.store(true, Ordering::Release);
        self.engine.record(NativeCall::Close);
        if self.engine.fail_close {
            return Err(SqlDialectError::ConnectionError(
                "simulated close failure".to_string(),
            ));
        }
        Ok(())
    }
}

fn prepare(
    engine: &Arc<Engine>,
    scope: Scope,
    sql: &str,
    declarations: &ParamDeclarations,
) -> Arc<dyn NativeStatement> {
    let statement = engine.next_statement.fetch_add(1, Ordering::AcqRel) + 1;
    engine.record(NativeCall::Prepare {
        statement,
        scope,
        sql: sql.to_owned(),
        declared: declarations.inputs.iter().map(|(n, _)| n.clone()).collect(),
    });
    Arc::new(SimulatedStatement {
        engine: Arc::clone(engine),
        statement,
        sql: sql.to_owned(),
    })
}

struct SimulatedTransaction {
    engine: Arc<Engine>,
    tx: u32,
    finished: AtomicBool,
}

impl SimulatedTransaction {
    fn ensure_open(&self) -> Result<(), SqlDialectError> {
        if self.finished.load(Ordering::Acquire) {
            return Err(SqlDialectError::ExecutionError(format!(
                "simulated transaction {} already finished",
                self.tx
            )));
        }
        Ok(())
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
        self.engine.open_transactions.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl NativeTransaction for SimulatedTransaction {
    async fn query(&self, request: Request) -> Result<RawResult, SqlDialectError> {
        self.ensure_open()?;
        self.engine.record(NativeCall::Query {
            scope: Scope::Transaction(self.tx),
            sql: request.sql.clone(),
            params: named_values(&request.inputs),
        });
        self.engine.respond(&request.sql, &request.inputs).await
    }

    async fn prepare(
        &self,
        sql: &str,
        declarations: &ParamDeclarations,
    ) -> Result<Arc<dyn NativeStatement>, SqlDialectError> {
        self.ensure_open()?;
        Ok(prepare(&self.engine, Scope::Transaction(self.tx), sql, declarations))
    }

    async fn commit(&self) -> Result<(), SqlDialectError> {
        self.ensure_open()?;
        if self.engine.fail_commit.swap(false, Ordering::AcqRel) {
            return Err(SqlDialectError::ExecutionError(
                "simulated commit failure".to_string(),
            ));
        }
        self.engine.record(NativeCall::Commit { tx: self.tx });
        self.finish();
        Ok(())
    }

    async fn rollback(&self) -> Result<(), SqlDialectError> {
        self.ensure_open()?;
        self.engine.record(NativeCall::Rollback { tx: self.tx });
        self.finish();
        Ok(())
    }
}

struct SimulatedStatement {
    engine: Arc<Engine>,
    statement: u32,
    sql: String,
}

#[async_trait]
impl NativeStatement for SimulatedStatement {
    async fn declare(&self, declarations: &ParamDeclarations) -> Result<(), SqlDialectError> {
        self.engine.record(NativeCall::Declare {
            statement: self.statement,
            names: declarations
                .inputs
                .iter()
                .chain(&declarations.outputs)
                .map(|(n, _)| n.clone())
                .collect(),
        });
        Ok(())
    }

    async fn execute(
        &self,
        inputs: Vec<BoundParam>,
        _outputs: Vec<OutputParam>,
    ) -> Result<RawResult, SqlDialectError> {
        self.engine.record(NativeCall::Execute {
            statement: self.statement,
            params: named_values(&inputs),
        });
        self.engine.respond(&self.sql, &inputs).await
    }

    async fn unprepare(&self) -> Result<(), SqlDialectError> {
        self.engine.record(NativeCall::Unprepare {
            statement: self.statement,
        });
        Ok(())
    }
}
