//! FIFO admission gate for work that must reach the engine one item at a time.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::helpers::lock;

#[derive(Debug)]
struct Slot {
    id: u64,
    settled: watch::Receiver<bool>,
}

/// Ordered set of in-flight executions.
///
/// [`submit`](RunQueue::submit) takes its place in line as soon as it is called, waits
/// for every earlier entry to settle (success or failure), then runs its producer.
/// Entries leave the queue when they settle, in whatever order that happens.
#[derive(Debug, Default)]
pub struct RunQueue {
    slots: Mutex<VecDeque<Slot>>,
    next_id: AtomicU64,
}

impl RunQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries that have not settled yet.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `producer` behind everything submitted before it.
    ///
    /// The position is claimed when this method is called, not when the returned
    /// future is first polled. Dropping the future settles the entry.
    pub fn submit<'a, F, Fut, T>(&'a self, producer: F) -> impl Future<Output = T> + Send + 'a
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = T> + Send + 'a,
        T: Send + 'a,
    {
        let (guard, predecessors) = self.enqueue();
        async move {
            for mut settled in predecessors {
                // a closed channel means the predecessor is gone, which is settled too
                let _ = settled.wait_for(|done| *done).await;
            }
            let output = producer().await;
            drop(guard);
            output
        }
    }

    fn enqueue(&self) -> (SettleGuard<'_>, Vec<watch::Receiver<bool>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(false);
        let mut slots = lock(&self.slots);
        let predecessors = slots.iter().map(|slot| slot.settled.clone()).collect();
        slots.push_back(Slot {
            id,
            settled: receiver,
        });
        (
            SettleGuard {
                queue: self,
                id,
                sender,
            },
            predecessors,
        )
    }
}

struct SettleGuard<'q> {
    queue: &'q RunQueue,
    id: u64,
    sender: watch::Sender<bool>,
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        self.sender.send_replace(true);
        let mut slots = lock(&self.queue.slots);
        if let Some(pos) = slots.iter().position(|slot| slot.id == self.id) {
            slots.remove(pos);
        }
    }
}
