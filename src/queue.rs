//! Bounded work queue with a drain barrier.
//!
//! Producers [`put`](WorkQueue::put) items, any number of workers
//! [`get`](WorkQueue::get) them, and [`join`](WorkQueue::join) waits until every
//! item put so far has been taken *and* acknowledged.
//!
//! Acknowledgment is tied to the [`Claim`] returned by `get`: calling
//! [`Claim::done`] or simply dropping the claim marks the item finished. A
//! worker therefore cannot leave the barrier hanging on an early return, a `?`,
//! or a panic.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, watch};

/// Counters shared between the queue and outstanding claims.
#[derive(Debug)]
struct Ledger {
    /// Items put but not yet acknowledged.
    unfinished: watch::Sender<usize>,
    enqueued: AtomicU64,
    acknowledged: AtomicU64,
}

impl Ledger {
    fn ack(&self) {
        self.acknowledged.fetch_add(1, Ordering::SeqCst);
        self.unfinished.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Multi-consumer queue whose [`join`](WorkQueue::join) waits for every put
/// item to be acknowledged.
#[derive(Debug)]
pub struct WorkQueue<T> {
    tx: StdMutex<Option<mpsc::Sender<T>>>,
    rx: Mutex<mpsc::Receiver<T>>,
    ledger: Arc<Ledger>,
}

/// Error returned by [`WorkQueue::put`] once the queue has been closed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("work queue is closed")]
pub struct QueueClosed;

impl<T: Send> WorkQueue<T> {
    /// Create a queue that holds at most `capacity` waiting items (at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (unfinished, _) = watch::channel(0usize);
        Self {
            tx: StdMutex::new(Some(tx)),
            rx: Mutex::new(rx),
            ledger: Arc::new(Ledger {
                unfinished,
                enqueued: AtomicU64::new(0),
                acknowledged: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueue an item, waiting for capacity if the queue is full.
    pub async fn put(&self, item: T) -> Result<(), QueueClosed> {
        let tx = self
            .tx
            .lock()
            .map_err(|_| QueueClosed)?
            .as_ref()
            .cloned()
            .ok_or(QueueClosed)?;

        // Count before sending so a fast worker can never ack below zero.
        self.ledger.unfinished.send_modify(|n| *n += 1);
        if tx.send(item).await.is_err() {
            self.ledger.unfinished.send_modify(|n| *n = n.saturating_sub(1));
            return Err(QueueClosed);
        }
        self.ledger.enqueued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Take the next item, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and fully emptied.
    pub async fn get(&self) -> Option<Claim<T>> {
        let item = self.rx.lock().await.recv().await?;
        Some(Claim {
            item,
            ledger: Arc::clone(&self.ledger),
            acked: false,
        })
    }

    /// Wait until every item put so far has been acknowledged.
    pub async fn join(&self) {
        let mut rx = self.ledger.unfinished.subscribe();
        // The ledger owns the sender, so this cannot fail while `self` lives.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Refuse further puts. Workers drain what is left, then `get` yields `None`.
    pub fn close(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
    }

    /// Items put but not yet acknowledged.
    pub fn unfinished(&self) -> usize {
        *self.ledger.unfinished.borrow()
    }

    /// Items put since the queue was created.
    pub fn enqueued(&self) -> u64 {
        self.ledger.enqueued.load(Ordering::SeqCst)
    }

    /// Items acknowledged since the queue was created.
    pub fn acknowledged(&self) -> u64 {
        self.ledger.acknowledged.load(Ordering::SeqCst)
    }
}

/// An item taken from the queue. Acknowledged exactly once, on `done` or drop.
#[derive(Debug)]
pub struct Claim<T> {
    item: T,
    ledger: Arc<Ledger>,
    acked: bool,
}

impl<T> Claim<T> {
    /// The claimed item.
    pub fn item(&self) -> &T {
        &self.item
    }

    /// Mark the item finished.
    pub fn done(mut self) {
        self.acknowledge();
    }

    fn acknowledge(&mut self) {
        if !self.acked {
            self.acked = true;
            self.ledger.ack();
        }
    }
}

impl<T> Drop for Claim<T> {
    fn drop(&mut self) {
        self.acknowledge();
    }
}
