//! Transaction registry: one open native transaction per transaction id.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::driver::{NativePool, NativeTransaction};
use crate::error::SqlDialectError;
use crate::helpers::lock;
use crate::prepared::PreparedRegistry;
use crate::run_queue::RunQueue;
use crate::types::IsolationLevel;

/// How a transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Commit,
    Rollback,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Commit => f.write_str("commit"),
            Outcome::Rollback => f.write_str("rollback"),
        }
    }
}

/// An open transaction and everything scoped to it.
pub struct TransactionEntry {
    id: String,
    native: Arc<dyn NativeTransaction>,
    isolation: Option<IsolationLevel>,
    pending_unprepares: Mutex<Vec<String>>,
    queue: RunQueue,
    pending: AtomicUsize,
}

impl fmt::Debug for TransactionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionEntry")
            .field("id", &self.id)
            .field("isolation", &self.isolation)
            .field("pending_unprepares", &*lock(&self.pending_unprepares))
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl TransactionEntry {
    fn new(
        id: String,
        native: Arc<dyn NativeTransaction>,
        isolation: Option<IsolationLevel>,
    ) -> Self {
        Self {
            id,
            native,
            isolation,
            pending_unprepares: Mutex::new(Vec::new()),
            queue: RunQueue::new(),
            pending: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn native(&self) -> &Arc<dyn NativeTransaction> {
        &self.native
    }

    #[must_use]
    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.isolation
    }

    /// Serial run queue every statement of this transaction goes through.
    #[must_use]
    pub fn queue(&self) -> &RunQueue {
        &self.queue
    }

    /// Executions awaiting an explicit commit or rollback.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn add_pending(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Statement keys that must be unprepared before this transaction ends.
    #[must_use]
    pub fn pending_unprepares(&self) -> Vec<String> {
        lock(&self.pending_unprepares).clone()
    }

    pub(crate) fn register_unprepare(&self, key: &str) {
        let mut keys = lock(&self.pending_unprepares);
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_owned());
        }
    }
}

type Slot = Arc<OnceCell<Arc<TransactionEntry>>>;

/// Transaction id to open transaction.
///
/// Each id moves `absent -> open -> absent`. Concurrent begins for one id share a
/// single native transaction.
#[derive(Default)]
pub struct TransactionRegistry {
    entries: Mutex<HashMap<String, Slot>>,
}

impl fmt::Debug for TransactionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = lock(&self.entries).keys().cloned().collect();
        f.debug_struct("TransactionRegistry").field("ids", &ids).finish()
    }
}

impl TransactionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `id` on `pool`, or return the transaction already open under `id`.
    ///
    /// The flag is `true` only for the caller whose begin created the native
    /// transaction.
    ///
    /// # Errors
    /// Propagates the driver's begin failure; the id stays absent.
    pub async fn begin(
        &self,
        pool: &dyn NativePool,
        id: &str,
        isolation: Option<IsolationLevel>,
    ) -> Result<(Arc<TransactionEntry>, bool), SqlDialectError> {
        let slot: Slot = Arc::clone(lock(&self.entries).entry(id.to_owned()).or_default());

        let created = AtomicBool::new(false);
        let created_flag = &created;
        let result = slot
            .get_or_try_init(|| async move {
                let native = pool.begin(isolation).await?;
                created_flag.store(true, Ordering::Release);
                Ok::<_, SqlDialectError>(Arc::new(TransactionEntry::new(
                    id.to_owned(),
                    native,
                    isolation,
                )))
            })
            .await;

        match result {
            Ok(entry) => {
                let entry = Arc::clone(entry);
                lock(&self.entries)
                    .entry(id.to_owned())
                    .or_insert_with(|| Arc::clone(&slot));
                Ok((entry, created.load(Ordering::Acquire)))
            }
            Err(e) => {
                let mut entries = lock(&self.entries);
                if entries
                    .get(id)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot) && !slot.initialized())
                {
                    entries.remove(id);
                }
                Err(e)
            }
        }
    }

    /// The open transaction for `id`, if any.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<TransactionEntry>> {
        lock(&self.entries).get(id).and_then(|slot| slot.get().cloned())
    }

    /// # Errors
    /// `TransactionNotFound` when `id` is not open.
    pub fn require(&self, id: &str) -> Result<Arc<TransactionEntry>, SqlDialectError> {
        self.get(id)
            .ok_or_else(|| SqlDialectError::TransactionNotFound(id.to_owned()))
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Commit or roll back `id`.
    ///
    /// Runs behind every statement already queued on the transaction. Pending
    /// unprepares still owned by the transaction run first, then the entry is
    /// removed. On failure the entry stays open so the caller can retry or roll back.
    ///
    /// # Errors
    /// `TransactionNotFound` when `id` is not open (or was finished while this call
    /// waited), otherwise the unprepare or native failure.
    pub async fn finish(
        &self,
        id: &str,
        outcome: Outcome,
        statements: &PreparedRegistry,
    ) -> Result<(), SqlDialectError> {
        let entry = self.require(id)?;
        if self.finish_entry(&entry, outcome, statements).await? {
            Ok(())
        } else {
            Err(SqlDialectError::TransactionNotFound(id.to_owned()))
        }
    }

    /// Commit or roll back the transaction `entry` holds.
    ///
    /// Returns `false` without native calls when `entry` was already finished,
    /// e.g. by a sibling execution that auto-committed first.
    ///
    /// # Errors
    /// The unprepare or native failure; the entry stays open.
    pub async fn finish_entry(
        &self,
        entry: &Arc<TransactionEntry>,
        outcome: Outcome,
        statements: &PreparedRegistry,
    ) -> Result<bool, SqlDialectError> {
        let queued = Arc::clone(entry);
        entry
            .queue()
            .submit(|| async move {
                let id = queued.id();
                if !self.is_current(id, &queued) {
                    return Ok(false);
                }
                let keys = queued.pending_unprepares();
                for key in &keys {
                    statements.unprepare_owned(key, id).await?;
                }
                lock(&queued.pending_unprepares).retain(|k| !keys.contains(k));

                match outcome {
                    Outcome::Commit => queued.native().commit().await?,
                    Outcome::Rollback => queued.native().rollback().await?,
                }
                self.remove(id, &queued);
                Ok(true)
            })
            .await
    }

    /// Sum of pending executions across open transactions.
    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.entries)
            .values()
            .filter_map(|slot| slot.get())
            .map(|entry| entry.pending())
            .sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries)
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every transaction, returning the ones that were open.
    pub fn clear(&self) -> Vec<Arc<TransactionEntry>> {
        lock(&self.entries)
            .drain()
            .filter_map(|(_, slot)| slot.get().cloned())
            .collect()
    }

    fn is_current(&self, id: &str, entry: &Arc<TransactionEntry>) -> bool {
        lock(&self.entries)
            .get(id)
            .and_then(|slot| slot.get())
            .is_some_and(|current| Arc::ptr_eq(current, entry))
    }

    fn remove(&self, id: &str, entry: &Arc<TransactionEntry>) {
        let mut entries = lock(&self.entries);
        let matches = entries
            .get(id)
            .and_then(|slot| slot.get())
            .is_some_and(|current| Arc::ptr_eq(current, entry));
        if matches {
            entries.remove(id);
        }
    }
}
