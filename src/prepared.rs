//! Prepared-statement registry keyed by call-site path.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::driver::{NativeStatement, ParamDeclarations, Request};
use crate::error::SqlDialectError;
use crate::helpers::lock;
use crate::planner::RequestHandle;
use crate::results::RawResult;
use crate::run_queue::RunQueue;
use crate::transaction::TransactionEntry;
use crate::types::BindType;

/// Parameter names already declared against one prepared statement.
///
/// Grows while the statement lives and is cleared when it is unprepared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindTypeCache {
    inputs: BTreeMap<String, BindType>,
    outputs: BTreeMap<String, BindType>,
}

impl BindTypeCache {
    /// The part of `declarations` not declared yet.
    #[must_use]
    pub fn undeclared(&self, declarations: &ParamDeclarations) -> ParamDeclarations {
        ParamDeclarations {
            inputs: declarations
                .inputs
                .iter()
                .filter(|(name, _)| !self.inputs.contains_key(name))
                .cloned()
                .collect(),
            outputs: declarations
                .outputs
                .iter()
                .filter(|(name, _)| !self.outputs.contains_key(name))
                .cloned()
                .collect(),
        }
    }

    pub fn record(&mut self, declarations: &ParamDeclarations) {
        for (name, bind_type) in &declarations.inputs {
            self.inputs.entry(name.clone()).or_insert(*bind_type);
        }
        for (name, bind_type) in &declarations.outputs {
            self.outputs.entry(name.clone()).or_insert(*bind_type);
        }
    }

    #[must_use]
    pub fn inputs(&self) -> &BTreeMap<String, BindType> {
        &self.inputs
    }

    #[must_use]
    pub fn outputs(&self) -> &BTreeMap<String, BindType> {
        &self.outputs
    }

    pub fn clear(&mut self) {
        self.inputs.clear();
        self.outputs.clear();
    }
}

/// A call site's prepared statement and the transaction it belongs to, if any.
pub struct PreparedStatementEntry {
    key: String,
    owner: Option<String>,
    statement: OnceCell<Arc<dyn NativeStatement>>,
    declared: Mutex<BindTypeCache>,
    retired: AtomicBool,
    queue: RunQueue,
}

impl fmt::Debug for PreparedStatementEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStatementEntry")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("prepared", &self.is_prepared())
            .field("declared", &*lock(&self.declared))
            .finish_non_exhaustive()
    }
}

impl PreparedStatementEntry {
    fn new(key: &str, owner: Option<&str>) -> Self {
        Self {
            key: key.to_owned(),
            owner: owner.map(str::to_owned),
            statement: OnceCell::new(),
            declared: Mutex::new(BindTypeCache::default()),
            retired: AtomicBool::new(false),
            queue: RunQueue::new(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Transaction the statement is bound to for its whole life.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.statement.initialized()
    }

    #[must_use]
    pub fn declared(&self) -> BindTypeCache {
        lock(&self.declared).clone()
    }

    /// Execute `request` on this statement, preparing it on `scope` first if needed.
    ///
    /// Executions of one statement run one at a time in call order. Concurrent
    /// first executions share a single preparation.
    ///
    /// # Errors
    /// `ParameterError` when an input has no bind type, `ExecutionError` when the
    /// statement was unprepared while this call waited, otherwise the driver failure.
    pub async fn run(
        &self,
        scope: &RequestHandle,
        request: Request,
    ) -> Result<RawResult, SqlDialectError> {
        let declarations = self.declarations_for(&request)?;
        self.queue
            .submit(|| async move {
                if self.retired.load(Ordering::Acquire) {
                    return Err(SqlDialectError::ExecutionError(format!(
                        "prepared statement \"{}\" was unprepared",
                        self.key
                    )));
                }
                let statement = self
                    .statement
                    .get_or_try_init(|| async {
                        let statement = scope.prepare(&request.sql, &declarations).await?;
                        lock(&self.declared).record(&declarations);
                        Ok::<_, SqlDialectError>(statement)
                    })
                    .await?;

                let fresh = lock(&self.declared).undeclared(&declarations);
                if !fresh.is_empty() {
                    statement.declare(&fresh).await?;
                    lock(&self.declared).record(&fresh);
                }
                statement.execute(request.inputs, request.outputs).await
            })
            .await
    }

    fn declarations_for(&self, request: &Request) -> Result<ParamDeclarations, SqlDialectError> {
        let mut inputs = Vec::with_capacity(request.inputs.len());
        for param in &request.inputs {
            let bind_type = param.bind_type.ok_or_else(|| {
                SqlDialectError::ParameterError(format!(
                    "missing input bind type for \":{}\" on prepared statement \"{}\"",
                    param.name, self.key
                ))
            })?;
            inputs.push((param.name.clone(), bind_type));
        }
        let outputs = request
            .outputs
            .iter()
            .map(|out| (out.name.clone(), out.bind_type))
            .collect();
        Ok(ParamDeclarations { inputs, outputs })
    }

    async fn unprepare_native(&self) -> Result<(), SqlDialectError> {
        self.queue
            .submit(|| async {
                self.retired.store(true, Ordering::Release);
                if let Some(statement) = self.statement.get() {
                    statement.unprepare().await?;
                }
                lock(&self.declared).clear();
                Ok(())
            })
            .await
    }
}

/// Statement key to prepared entry, with exclusive transaction affinity.
#[derive(Default)]
pub struct PreparedRegistry {
    entries: Mutex<HashMap<String, Arc<PreparedStatementEntry>>>,
}

impl fmt::Debug for PreparedRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = lock(&self.entries).keys().cloned().collect();
        f.debug_struct("PreparedRegistry").field("keys", &keys).finish()
    }
}

impl PreparedRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key` for use within `tx` (or outside any transaction), creating it
    /// when absent. The flag is `true` when the entry was created by this call.
    ///
    /// An entry created inside a transaction is registered on it as a pending
    /// unprepare, so it goes away when the transaction ends.
    ///
    /// # Errors
    /// `TransactionInProgress`, `TransactionNotInProgress` or `TransactionMismatch`
    /// when the entry belongs to a different transaction context than `tx`.
    pub fn get_or_create(
        &self,
        key: &str,
        tx: Option<&TransactionEntry>,
    ) -> Result<(Arc<PreparedStatementEntry>, bool), SqlDialectError> {
        let mut entries = lock(&self.entries);
        let Some(existing) = entries.get(key).cloned() else {
            let entry = Arc::new(PreparedStatementEntry::new(key, tx.map(TransactionEntry::id)));
            entries.insert(key.to_owned(), Arc::clone(&entry));
            if let Some(tx) = tx {
                tx.register_unprepare(key);
            }
            return Ok((entry, true));
        };

        match (existing.owner(), tx.map(TransactionEntry::id)) {
            (Some(prepared_tx), None) => Err(SqlDialectError::TransactionInProgress {
                path: key.to_owned(),
                prepared_tx: prepared_tx.to_owned(),
            }),
            (None, Some(requested_tx)) => Err(SqlDialectError::TransactionNotInProgress {
                path: key.to_owned(),
                requested_tx: requested_tx.to_owned(),
            }),
            (Some(prepared_tx), Some(requested_tx)) if prepared_tx != requested_tx => {
                Err(SqlDialectError::TransactionMismatch {
                    path: key.to_owned(),
                    prepared_tx: prepared_tx.to_owned(),
                    requested_tx: requested_tx.to_owned(),
                })
            }
            _ => Ok((Arc::clone(&existing), false)),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<PreparedStatementEntry>> {
        lock(&self.entries).get(key).cloned()
    }

    /// Remove `key` and release its native statement.
    ///
    /// Returns `false` (and makes no native call) when `key` is not registered.
    ///
    /// # Errors
    /// Propagates the native unprepare failure; the key is removed either way.
    pub async fn unprepare(&self, key: &str) -> Result<bool, SqlDialectError> {
        let removed = lock(&self.entries).remove(key);
        match removed {
            Some(entry) => {
                entry.unprepare_native().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Like [`unprepare`](Self::unprepare), but only when `key` still belongs to
    /// transaction `tx_id`. A statement re-created under the same key outside
    /// that transaction is left alone.
    ///
    /// # Errors
    /// Propagates the native unprepare failure.
    pub async fn unprepare_owned(&self, key: &str, tx_id: &str) -> Result<bool, SqlDialectError> {
        let removed = {
            let mut entries = lock(&self.entries);
            if entries.get(key).is_some_and(|entry| entry.owner() == Some(tx_id)) {
                entries.remove(key)
            } else {
                None
            }
        };
        match removed {
            Some(entry) => {
                entry.unprepare_native().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every statement without native calls; used when the pool closes.
    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_reports_only_new_names() {
        let mut cache = BindTypeCache::default();
        let first = ParamDeclarations {
            inputs: vec![("id".into(), BindType::Int)],
            outputs: vec![],
        };
        cache.record(&first);

        let next = ParamDeclarations {
            inputs: vec![("id".into(), BindType::Int), ("name".into(), BindType::VarChar)],
            outputs: vec![("total".into(), BindType::BigInt)],
        };
        let fresh = cache.undeclared(&next);
        assert_eq!(fresh.inputs, vec![("name".to_string(), BindType::VarChar)]);
        assert_eq!(fresh.outputs, vec![("total".to_string(), BindType::BigInt)]);

        cache.record(&fresh);
        assert!(cache.undeclared(&next).is_empty());
        cache.clear();
        assert!(cache.inputs().is_empty());
    }

    #[tokio::test]
    async fn owned_unprepare_skips_statements_of_other_owners() {
        let registry = PreparedRegistry::new();
        registry.get_or_create("read.rows", None).unwrap();
        assert!(!registry.unprepare_owned("read.rows", "1").await.unwrap());
        assert!(!registry.unprepare_owned("missing", "1").await.unwrap());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn entries_without_transactions_are_reused() {
        let registry = PreparedRegistry::new();
        let (first, created) = registry.get_or_create("read.rows", None).unwrap();
        assert!(created);
        let (second, created) = registry.get_or_create("read.rows", None).unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.owner(), None);
        assert!(!first.is_prepared());
    }

    #[tokio::test]
    async fn unprepare_without_native_statement_is_idempotent() {
        let registry = PreparedRegistry::new();
        registry.get_or_create("read.rows", None).unwrap();
        assert!(registry.unprepare("read.rows").await.unwrap());
        assert!(!registry.unprepare("read.rows").await.unwrap());
        assert!(registry.is_empty());
    }
}
