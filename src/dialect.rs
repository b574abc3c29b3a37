//! The dialect: one pool, its transactions and prepared statements, and `exec`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info_span};

use crate::config::{ConnectionConfig, NativePoolConfig, PrivateOptions};
use crate::driver::{BoundParam, Driver, OutputParam, PoolStatus, Request};
use crate::error::SqlDialectError;
use crate::interpolation::{Interpolator, TokenInterpolator, rewrite_named_binds, token_name};
use crate::logger::DialectLogger;
use crate::options::{ErrorOptions, ExecMeta, ExecOptions, InitOptions, TransactionOptions};
use crate::planner::Planner;
use crate::pool::PoolAdapter;
use crate::prepared::PreparedRegistry;
use crate::results::{RawResult, ResultSet};
use crate::transaction::{Outcome, TransactionRegistry};
use crate::types::{BindType, IsolationLevel, RowValues};

static GENERATED_POOL_IDS: AtomicUsize = AtomicUsize::new(0);

/// Follow-up operation returned by `exec`, resolved with [`Dialect::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecHandle {
    Commit(String),
    Rollback(String),
    Unprepare(String),
}

/// Rows and handles produced by one `exec` call.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    /// First record set of `raw`.
    pub rows: ResultSet,
    pub raw: RawResult,
    pub commit: Option<ExecHandle>,
    pub rollback: Option<ExecHandle>,
    pub unprepare: Option<ExecHandle>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DialectState {
    pub connection: PoolStatus,
    /// Executions waiting on an explicit commit or rollback.
    pub pending: usize,
}

/// What `exec` knew when it failed, for the error annotation.
struct ExecContext {
    sql: String,
    input_bind_types: BTreeMap<String, BindType>,
    output_bind_types: BTreeMap<String, BindType>,
}

/// Execution-plan manager over a single connection pool.
///
/// ```rust,no_run
/// # async fn demo(driver: std::sync::Arc<dyn sql_dialect::driver::Driver>) -> Result<(), sql_dialect::SqlDialectError> {
/// use sql_dialect::prelude::*;
///
/// let dialect = Dialect::builder(driver)
///     .private_options(PrivateOptions::new().with_credentials("sa", "secret"))
///     .connection(ConnectionConfig::new().with_id("finance"))
///     .build();
/// dialect.init(&InitOptions::default()).await?;
///
/// let opts = ExecOptions::new().with_bind("id", 1).with_transaction("tx1").with_auto_commit(false);
/// let res = dialect
///     .exec("SELECT * FROM t WHERE id = :id", &opts, &[], &ExecMeta::new("read", "read.t"), None)
///     .await?;
/// if let Some(commit) = &res.commit {
///     dialect.resolve(commit).await?;
/// }
/// dialect.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Dialect {
    id: String,
    driver: Arc<dyn Driver>,
    interpolator: Arc<dyn Interpolator>,
    private: PrivateOptions,
    connection: ConnectionConfig,
    pool: PoolAdapter,
    transactions: TransactionRegistry,
    statements: PreparedRegistry,
    logger: DialectLogger,
}

impl std::fmt::Debug for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialect")
            .field("id", &self.id)
            .field("driver", &self.driver.name())
            .field("private", &self.private)
            .field("pool", &self.pool)
            .field("transactions", &self.transactions)
            .field("statements", &self.statements)
            .finish_non_exhaustive()
    }
}

/// Fluent construction for [`Dialect`].
pub struct DialectBuilder {
    driver: Arc<dyn Driver>,
    private: PrivateOptions,
    connection: ConnectionConfig,
    interpolator: Arc<dyn Interpolator>,
    logger: DialectLogger,
    debug: bool,
}

impl DialectBuilder {
    #[must_use]
    pub fn private_options(mut self, private: PrivateOptions) -> Self {
        self.private = private;
        self
    }

    #[must_use]
    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    #[must_use]
    pub fn interpolator(mut self, interpolator: Arc<dyn Interpolator>) -> Self {
        self.interpolator = interpolator;
        self
    }

    #[must_use]
    pub fn logger(mut self, logger: DialectLogger) -> Self {
        self.logger = logger;
        self
    }

    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn build(self) -> Dialect {
        Dialect::new(
            self.driver,
            self.private,
            self.connection,
            self.interpolator,
            self.logger,
            self.debug,
        )
    }
}

impl Dialect {
    #[must_use]
    pub fn new(
        driver: Arc<dyn Driver>,
        private: PrivateOptions,
        connection: ConnectionConfig,
        interpolator: Arc<dyn Interpolator>,
        logger: DialectLogger,
        debug: bool,
    ) -> Self {
        let id = connection.id.clone().unwrap_or_else(|| {
            format!(
                "sqlDialectGen{}",
                GENERATED_POOL_IDS.fetch_add(1, Ordering::Relaxed) + 1
            )
        });
        Self {
            pool: PoolAdapter::new(id.clone()),
            id,
            driver,
            interpolator,
            private,
            connection,
            transactions: TransactionRegistry::new(),
            statements: PreparedRegistry::new(),
            logger: logger.with_debug(debug),
        }
    }

    #[must_use]
    pub fn builder(driver: Arc<dyn Driver>) -> DialectBuilder {
        DialectBuilder {
            driver,
            private: PrivateOptions::default(),
            connection: ConnectionConfig::default(),
            interpolator: Arc::new(TokenInterpolator),
            logger: DialectLogger::default(),
            debug: false,
        }
    }

    /// Pool identifier used in every log line and error.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.pool.is_live()
    }

    /// Create and verify the connection pool.
    ///
    /// # Errors
    /// `AlreadyInitialized` if a pool is live, `ConfigError` for malformed driver
    /// options, `PoolCreation` when the pool cannot be created or reached.
    pub async fn init(&self, options: &InitOptions) -> Result<(), SqlDialectError> {
        let config = NativePoolConfig::resolve(
            &self.private,
            &self.connection,
            self.interpolator.as_ref(),
            self.driver.constants(),
        )
        .inspect_err(|e| self.logger.error(&self.id, "Invalid pool configuration", Some(e)))?;

        if let Err(e) = self.pool.init(self.driver.as_ref(), &config).await {
            self.logger
                .error(&self.id, "Unable to create connection pool", Some(&e));
            return Err(e);
        }

        let show = |v: Option<u64>| v.map_or_else(|| "default".to_string(), |v| v.to_string());
        self.logger.info(
            &self.id,
            &format!(
                "Created {} connection pool for {} prepared functions (min: {}, max: {}, idle: {}ms, timeout: {}ms)",
                self.driver.name(),
                options.num_of_prepared_funcs,
                show(config.pool.min.map(u64::from)),
                show(config.pool.max.map(u64::from)),
                show(config.pool.idle_timeout_millis),
                show(config.pool.connection_timeout_millis),
            ),
        );
        Ok(())
    }

    /// Open `transaction_id` unless it is already open.
    ///
    /// # Errors
    /// `NotInitialized`, an unknown isolation level, or the driver's begin failure.
    pub async fn begin_transaction(
        &self,
        transaction_id: &str,
        options: &TransactionOptions,
    ) -> Result<(), SqlDialectError> {
        let pool = self.pool.handle()?;
        let isolation = self.resolve_isolation(options.isolation_level.as_deref())?;
        let begun = self
            .transactions
            .begin(pool.as_ref(), transaction_id, isolation)
            .await;
        let _span = info_span!("transaction", tx_id = %transaction_id).entered();
        match begun {
            Ok((_, created)) => {
                if created {
                    let level = isolation.map_or_else(|| "default".to_string(), |l| l.to_string());
                    self.logger.info(
                        &self.id,
                        &format!(
                            "Beginning transaction \"{transaction_id}\" with isolation level {level}"
                        ),
                    );
                }
                Ok(())
            }
            Err(e) => {
                self.logger.error(
                    &self.id,
                    &format!("Unable to begin transaction \"{transaction_id}\""),
                    Some(&e),
                );
                Err(e)
            }
        }
    }

    /// Execute `sql` with `:name` binds.
    ///
    /// Only binds referenced by `sql` are sent. Inside a transaction the statement is
    /// queued behind earlier statements of that transaction; with `auto_commit` it is
    /// committed right after, otherwise the result carries commit/rollback handles.
    /// Prepared executions return an unprepare handle unless the transaction they
    /// belong to was auto-committed.
    ///
    /// # Errors
    /// Prepared-statement affinity errors are returned as is. Every other failure is
    /// wrapped in `SqlDialectError::Execution` with the resolved SQL and bind types.
    /// Errors are logged and passed to the `ErrorOptions` handler first.
    pub async fn exec(
        &self,
        sql: &str,
        options: &ExecOptions,
        fragments: &[&str],
        meta: &ExecMeta,
        errors: Option<&ErrorOptions>,
    ) -> Result<ExecResult, SqlDialectError> {
        let mut ctx = ExecContext {
            sql: sql.to_owned(),
            input_bind_types: BTreeMap::new(),
            output_bind_types: BTreeMap::new(),
        };
        match self.exec_with(&mut ctx, sql, options, fragments, meta).await {
            Ok(result) => Ok(result),
            Err(e) => Err(self.report(e, ctx, meta, errors)),
        }
    }

    async fn exec_with(
        &self,
        ctx: &mut ExecContext,
        sql: &str,
        options: &ExecOptions,
        fragments: &[&str],
        meta: &ExecMeta,
    ) -> Result<ExecResult, SqlDialectError> {
        let pool = self.pool.handle()?;
        ctx.input_bind_types =
            self.resolve_bind_types(options.driver_options.input_bind_types.as_ref())?;
        ctx.output_bind_types =
            self.resolve_bind_types(options.driver_options.output_bind_types.as_ref())?;

        let request = self.build_request(
            sql,
            &options.binds,
            &ctx.input_bind_types,
            &ctx.output_bind_types,
        )?;
        ctx.sql.clone_from(&request.sql);
        if self.logger.is_debug() {
            self.logger.debug(
                &self.id,
                &format!(
                    "Executing \"{}\" ({}) fragments [{}]:\n{}",
                    meta.path,
                    meta.name,
                    fragments.join(", "),
                    request.sql
                ),
            );
        }

        let planner = Planner {
            pool_id: &self.id,
            pool: &pool,
            transactions: &self.transactions,
            statements: &self.statements,
            logger: &self.logger,
        };
        let plan = planner
            .plan(
                options.transaction_id.as_deref(),
                options.prepare_statement.then_some(meta.path.as_str()),
            )
            .await?;
        let raw = plan.run(request).await?;

        let mut result = ExecResult {
            rows: raw.first_recordset(),
            raw,
            ..ExecResult::default()
        };
        let mut committed = false;
        if let Some(tx) = &plan.transaction {
            if options.auto_commit {
                let finished = self
                    .transactions
                    .finish_entry(tx, Outcome::Commit, &self.statements)
                    .await;
                self.log_finish(tx.id(), Outcome::Commit, finished)?;
                committed = true;
            } else {
                tx.add_pending();
                result.commit = Some(ExecHandle::Commit(tx.id().to_owned()));
                result.rollback = Some(ExecHandle::Rollback(tx.id().to_owned()));
            }
        }
        if let Some(statement) = &plan.statement {
            if !committed {
                result.unprepare = Some(ExecHandle::Unprepare(statement.key().to_owned()));
            }
        }
        Ok(result)
    }

    fn report(
        &self,
        err: SqlDialectError,
        ctx: ExecContext,
        meta: &ExecMeta,
        errors: Option<&ErrorOptions>,
    ) -> SqlDialectError {
        let err = if err.is_affinity_error() {
            err
        } else {
            SqlDialectError::Execution {
                path: meta.path.clone(),
                sql: ctx.sql,
                input_bind_types: ctx.input_bind_types,
                output_bind_types: ctx.output_bind_types,
                source: Box::new(err),
            }
        };
        let _span = info_span!("exec", path = %meta.path).entered();
        self.logger.error(
            &self.id,
            &format!("Failed to execute \"{}\" ({})", meta.path, meta.name),
            Some(&err),
        );
        if let Some(handler) = errors.and_then(|e| e.handler.as_ref()) {
            handler(&err);
        }
        err
    }

    /// # Errors
    /// `TransactionNotFound`, an unprepare failure or the native commit failure; the
    /// transaction stays open on failure.
    pub async fn commit(&self, transaction_id: &str) -> Result<(), SqlDialectError> {
        self.finish(transaction_id, Outcome::Commit).await
    }

    /// # Errors
    /// Same as [`commit`](Self::commit).
    pub async fn rollback(&self, transaction_id: &str) -> Result<(), SqlDialectError> {
        self.finish(transaction_id, Outcome::Rollback).await
    }

    async fn finish(&self, transaction_id: &str, outcome: Outcome) -> Result<(), SqlDialectError> {
        let finished = self
            .transactions
            .finish(transaction_id, outcome, &self.statements)
            .await
            .map(|()| true);
        self.log_finish(transaction_id, outcome, finished)
    }

    /// `finished` is `Ok(false)` when a sibling execution already ended the transaction.
    fn log_finish(
        &self,
        transaction_id: &str,
        outcome: Outcome,
        finished: Result<bool, SqlDialectError>,
    ) -> Result<(), SqlDialectError> {
        let _span = info_span!("transaction", tx_id = %transaction_id).entered();
        match finished {
            Ok(false) => {
                debug!(%outcome, "transaction already finished by a sibling execution");
                Ok(())
            }
            Ok(true) => {
                let done = match outcome {
                    Outcome::Commit => "committed",
                    Outcome::Rollback => "rolled back",
                };
                self.logger
                    .info(&self.id, &format!("Transaction \"{transaction_id}\" {done}"));
                Ok(())
            }
            Err(e) => {
                self.logger.error(
                    &self.id,
                    &format!("Unable to {outcome} transaction \"{transaction_id}\""),
                    Some(&e),
                );
                Err(e)
            }
        }
    }

    /// Unprepare the statement registered under `key`; `false` when there was none.
    ///
    /// # Errors
    /// The native unprepare failure.
    pub async fn unprepare(&self, key: &str) -> Result<bool, SqlDialectError> {
        match self.statements.unprepare(key).await {
            Ok(true) => {
                self.logger
                    .debug(&self.id, &format!("Unprepared statement \"{key}\""));
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                self.logger.error(
                    &self.id,
                    &format!("Unable to unprepare statement \"{key}\""),
                    Some(&e),
                );
                Err(e)
            }
        }
    }

    /// Run a handle returned by `exec`.
    ///
    /// Commit/rollback handles whose transaction was already finished (through a
    /// sibling handle) and unprepare handles for unknown statements are no-ops.
    ///
    /// # Errors
    /// Native commit, rollback or unprepare failures.
    pub async fn resolve(&self, handle: &ExecHandle) -> Result<(), SqlDialectError> {
        let finished = match handle {
            ExecHandle::Commit(id) => self.commit(id).await,
            ExecHandle::Rollback(id) => self.rollback(id).await,
            ExecHandle::Unprepare(key) => return self.unprepare(key).await.map(|_| ()),
        };
        match finished {
            Err(SqlDialectError::TransactionNotFound(_)) | Ok(()) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Close the pool and forget every transaction and prepared statement.
    ///
    /// Returns the number of executions that were still waiting on a commit or
    /// rollback.
    ///
    /// # Errors
    /// `SqlDialectError::Close` when the native close fails; the registries are
    /// cleared regardless.
    pub async fn close(&self) -> Result<usize, SqlDialectError> {
        let pending = self.transactions.pending();
        let pool = self.pool.take();
        drop(self.transactions.clear());
        self.statements.clear();

        let Some(pool) = pool else {
            return Ok(pending);
        };
        match pool.close().await {
            Ok(()) => {
                self.logger.info(
                    &self.id,
                    &format!("Closed connection pool with {pending} pending executions"),
                );
                Ok(pending)
            }
            Err(e) => {
                let err = SqlDialectError::Close {
                    pool_id: self.id.clone(),
                    pending,
                    source: Box::new(e),
                };
                self.logger
                    .error(&self.id, "Unable to close connection pool", Some(&err));
                Err(err)
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> DialectState {
        DialectState {
            connection: self.pool.status(),
            pending: self.transactions.pending(),
        }
    }

    fn resolve_isolation(&self, raw: Option<&str>) -> Result<Option<IsolationLevel>, SqlDialectError> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let levels = self.driver.constants().isolation_levels();
        let resolved = match token_name(raw) {
            Some(token) => self
                .interpolator
                .resolve(token, &Map::new(), levels)
                .ok_or_else(|| {
                    SqlDialectError::ConfigError(format!(
                        "unknown transaction isolation level \"{raw}\""
                    ))
                })?,
            None => levels
                .get(raw)
                .cloned()
                .unwrap_or_else(|| Value::String(raw.to_owned())),
        };
        match resolved {
            Value::String(name) => name.parse().map(Some),
            other => Err(SqlDialectError::ConfigError(format!(
                "transaction isolation level \"{raw}\" resolved to {other}"
            ))),
        }
    }

    fn resolve_bind_types(
        &self,
        raw: Option<&BTreeMap<String, String>>,
    ) -> Result<BTreeMap<String, BindType>, SqlDialectError> {
        let mut resolved = BTreeMap::new();
        let Some(raw) = raw else {
            return Ok(resolved);
        };
        let local = Map::new();
        for (name, type_name) in raw {
            let value = self.interpolator.interpolate_value(
                &Value::String(type_name.clone()),
                &local,
                self.driver.constants().values(),
            );
            let bind_type = match value {
                Value::String(s) => s.parse::<BindType>()?,
                other => {
                    return Err(SqlDialectError::ParameterError(format!(
                        "bind type for \":{name}\" resolved to {other}"
                    )));
                }
            };
            resolved.insert(name.clone(), bind_type);
        }
        Ok(resolved)
    }

    fn build_request(
        &self,
        sql: &str,
        binds: &BTreeMap<String, RowValues>,
        input_bind_types: &BTreeMap<String, BindType>,
        output_bind_types: &BTreeMap<String, BindType>,
    ) -> Result<Request, SqlDialectError> {
        let rewritten = rewrite_named_binds(sql, self.driver.placeholder_style());
        let mut inputs = Vec::with_capacity(rewritten.names.len());
        let mut outputs = Vec::new();

        for name in &rewritten.names {
            if let Some(bind_type) = output_bind_types.get(name) {
                outputs.push(OutputParam {
                    name: name.clone(),
                    bind_type: *bind_type,
                });
                continue;
            }
            let value = binds.get(name).ok_or_else(|| {
                SqlDialectError::ParameterError(format!("missing bind value for \":{name}\""))
            })?;
            inputs.push(
                BoundParam::new(name.clone(), self.resolve_bind_value(value))
                    .with_bind_type(input_bind_types.get(name).copied()),
            );
        }
        for (name, bind_type) in output_bind_types {
            if !rewritten.references(name) {
                outputs.push(OutputParam {
                    name: name.clone(),
                    bind_type: *bind_type,
                });
            }
        }

        Ok(Request {
            sql: rewritten.sql.into_owned(),
            inputs,
            outputs,
        })
    }

    /// Text binds that are exactly `${CONSTANT}` take the driver constant's value.
    fn resolve_bind_value(&self, value: &RowValues) -> RowValues {
        value
            .as_text()
            .and_then(token_name)
            .and_then(|token| {
                self.interpolator
                    .resolve(token, &Map::new(), self.driver.constants().values())
            })
            .map_or_else(|| value.clone(), RowValues::from_json)
    }
}
