//! Execution planner: decides which handle runs a statement and in which queue.

use std::sync::Arc;

use crate::driver::{NativePool, NativeStatement, NativeTransaction, ParamDeclarations, Request};
use crate::error::SqlDialectError;
use crate::logger::DialectLogger;
use crate::prepared::{PreparedRegistry, PreparedStatementEntry};
use crate::results::RawResult;
use crate::transaction::{TransactionEntry, TransactionRegistry};

/// Scope a plain request or a preparation runs in.
#[derive(Clone)]
pub enum RequestHandle {
    Pool(Arc<dyn NativePool>),
    Transaction(Arc<dyn NativeTransaction>),
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestHandle::Pool(_) => f.write_str("RequestHandle::Pool"),
            RequestHandle::Transaction(_) => f.write_str("RequestHandle::Transaction"),
        }
    }
}

impl RequestHandle {
    /// # Errors
    /// Propagates the driver failure.
    pub async fn query(&self, request: Request) -> Result<RawResult, SqlDialectError> {
        match self {
            RequestHandle::Pool(pool) => pool.query(request).await,
            RequestHandle::Transaction(tx) => tx.query(request).await,
        }
    }

    /// # Errors
    /// Propagates the driver failure.
    pub async fn prepare(
        &self,
        sql: &str,
        declarations: &ParamDeclarations,
    ) -> Result<Arc<dyn NativeStatement>, SqlDialectError> {
        match self {
            RequestHandle::Pool(pool) => pool.prepare(sql, declarations).await,
            RequestHandle::Transaction(tx) => tx.prepare(sql, declarations).await,
        }
    }
}

/// The handles one `exec` call runs against.
#[derive(Debug)]
pub struct ExecutionPlan {
    /// Open transaction, when the call names one.
    pub transaction: Option<Arc<TransactionEntry>>,
    /// Prepared statement, when the call asked for one.
    pub statement: Option<Arc<PreparedStatementEntry>>,
    /// Transaction-scoped when `transaction` is set, pool-scoped otherwise.
    pub request: RequestHandle,
}

impl ExecutionPlan {
    /// Run `request` on the planned handle.
    ///
    /// Inside a transaction the call takes its place on the transaction's queue
    /// immediately, so statements reach the engine in the order `run` was called.
    /// Pool-scoped plain requests run without queueing.
    ///
    /// # Errors
    /// Propagates preparation and execution failures.
    pub async fn run(&self, request: Request) -> Result<RawResult, SqlDialectError> {
        let execute = async move {
            match &self.statement {
                Some(statement) => statement.run(&self.request, request).await,
                None => self.request.query(request).await,
            }
        };
        match &self.transaction {
            Some(tx) => tx.queue().submit(|| execute).await,
            None => execute.await,
        }
    }

    #[must_use]
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction.as_deref().map(TransactionEntry::id)
    }
}

/// Builds [`ExecutionPlan`]s against one pool and its registries.
pub struct Planner<'a> {
    pub pool_id: &'a str,
    pub pool: &'a Arc<dyn NativePool>,
    pub transactions: &'a TransactionRegistry,
    pub statements: &'a PreparedRegistry,
    pub logger: &'a DialectLogger,
}

impl Planner<'_> {
    /// Plan one execution.
    ///
    /// A named transaction that is not open yet is begun with the server's default
    /// isolation level. `statement_key` selects (or creates) the call site's
    /// prepared statement.
    ///
    /// # Errors
    /// Begin failures and the prepared-statement affinity errors.
    pub async fn plan(
        &self,
        transaction_id: Option<&str>,
        statement_key: Option<&str>,
    ) -> Result<ExecutionPlan, SqlDialectError> {
        let transaction = match transaction_id {
            Some(id) => {
                let (entry, created) = self.transactions.begin(&**self.pool, id, None).await?;
                if created {
                    self.logger.info(
                        self.pool_id,
                        &format!("Beginning transaction \"{id}\" with isolation level default"),
                    );
                }
                Some(entry)
            }
            None => None,
        };

        let statement = match statement_key {
            Some(key) => {
                let (entry, created) = self
                    .statements
                    .get_or_create(key, transaction.as_deref())?;
                if created {
                    self.logger.debug(
                        self.pool_id,
                        &format!(
                            "Registered prepared statement \"{key}\"{}",
                            transaction_id
                                .map(|id| format!(" in transaction \"{id}\""))
                                .unwrap_or_default()
                        ),
                    );
                }
                Some(entry)
            }
            None => None,
        };

        let request = match &transaction {
            Some(tx) => RequestHandle::Transaction(Arc::clone(tx.native())),
            None => RequestHandle::Pool(Arc::clone(self.pool)),
        };

        Ok(ExecutionPlan {
            transaction,
            statement,
            request,
        })
    }
}
