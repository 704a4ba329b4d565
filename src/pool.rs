//! Fixed-size worker pool over a shared [`WorkQueue`].
//!
//! The pool is started once per invocation and reused for every round: the
//! dispatcher submits a round's items, calls [`WorkerPool::drain`] to wait for
//! all of them to be acknowledged, and repeats. Workers are tokio tasks that
//! block on the queue between rounds.

use crate::models::WorkItem;
use crate::queue::{QueueClosed, WorkQueue};
use crate::worker::Outcome;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::join_all;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Per-item processing run by every worker.
#[async_trait]
pub trait ItemHandler: Send + Sync + 'static {
    async fn handle(&self, item: &WorkItem) -> Outcome;
}

/// Outcome counters for the round in progress.
#[derive(Debug, Default)]
pub struct RoundTally {
    succeeded: AtomicUsize,
    rejected: AtomicUsize,
    transport_failed: AtomicUsize,
    store_failed: AtomicUsize,
    panicked: AtomicUsize,
}

/// Counts for one finished round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TallySnapshot {
    pub succeeded: usize,
    pub rejected: usize,
    pub transport_failed: usize,
    pub store_failed: usize,
    pub panicked: usize,
}

impl TallySnapshot {
    /// Items that ended in anything other than a persisted annotation.
    pub fn failed(&self) -> usize {
        self.rejected + self.transport_failed + self.store_failed + self.panicked
    }

    /// Every acknowledged item, which after a drain equals the items submitted.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed()
    }
}

impl RoundTally {
    /// Count one finished item under its outcome.
    pub fn record(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Geocoded { .. } => &self.succeeded,
            Outcome::Rejected { .. } => &self.rejected,
            Outcome::TransportFailed => &self.transport_failed,
            Outcome::StoreFailed => &self.store_failed,
            Outcome::Panicked => &self.panicked,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Read and reset the counters.
    pub fn take(&self) -> TallySnapshot {
        TallySnapshot {
            succeeded: self.succeeded.swap(0, Ordering::SeqCst),
            rejected: self.rejected.swap(0, Ordering::SeqCst),
            transport_failed: self.transport_failed.swap(0, Ordering::SeqCst),
            store_failed: self.store_failed.swap(0, Ordering::SeqCst),
            panicked: self.panicked.swap(0, Ordering::SeqCst),
        }
    }
}

/// Long-lived workers sharing one [`WorkQueue`].
pub struct WorkerPool {
    queue: Arc<WorkQueue<WorkItem>>,
    tally: Arc<RoundTally>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers sharing one queue of the given capacity.
    ///
    /// # Arguments
    ///
    /// * `size` - number of workers (`geocoder.workers`)
    /// * `capacity` - queue bound; `submit` waits while the queue is full
    /// * `handler` - processing run by every worker for each item
    ///
    /// # Example
    ///
    /// ```ignore
    /// let pool = WorkerPool::start(15, 5, Arc::new(worker));
    /// pool.submit(item).await?;
    /// let tally = pool.drain().await;
    /// pool.shutdown().await;
    /// ```
    pub fn start(size: usize, capacity: usize, handler: Arc<dyn ItemHandler>) -> Self {
        let queue = Arc::new(WorkQueue::new(capacity));
        let tally = Arc::new(RoundTally::default());
        let handles = (0..size)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&queue),
                    Arc::clone(&handler),
                    Arc::clone(&tally),
                ))
            })
            .collect();
        info!(workers = size, capacity, "Worker pool started");
        Self {
            queue,
            tally,
            handles,
        }
    }

    /// Number of worker tasks.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Queue one item for the workers, waiting for room if the queue is full.
    ///
    /// # Returns
    ///
    /// [`QueueClosed`] once [`WorkerPool::shutdown`] has started.
    pub async fn submit(&self, item: WorkItem) -> Result<(), QueueClosed> {
        self.queue.put(item).await
    }

    /// Wait for every submitted item to be acknowledged, then return and
    /// reset this round's counts.
    pub async fn drain(&self) -> TallySnapshot {
        debug!(unfinished = self.queue.unfinished(), "Waiting for round to drain");
        self.queue.join().await;
        self.tally.take()
    }

    /// Total acknowledgments since the pool started.
    pub fn acknowledged(&self) -> u64 {
        self.queue.acknowledged()
    }

    /// Close the queue and wait for every worker to exit.
    pub async fn shutdown(self) {
        debug!(
            workers = self.size(),
            enqueued = self.queue.enqueued(),
            acknowledged = self.queue.acknowledged(),
            "Stopping worker pool"
        );
        self.queue.close();
        for res in join_all(self.handles).await {
            if let Err(e) = res {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        debug!("Worker pool stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    queue: Arc<WorkQueue<WorkItem>>,
    handler: Arc<dyn ItemHandler>,
    tally: Arc<RoundTally>,
) {
    debug!(worker_id, "Worker waiting for stories");
    while let Some(claim) = queue.get().await {
        let story_id = claim.item().story_id;
        let outcome = AssertUnwindSafe(handler.handle(claim.item()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(worker_id, story_id, "Worker panicked while processing story");
                Outcome::Panicked
            });
        tally.record(&outcome);
        claim.done();
    }
    debug!(worker_id, "Worker exiting");
}
