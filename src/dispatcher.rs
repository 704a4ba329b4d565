//! Round-by-round geocoding dispatcher.
//!
//! One invocation runs this loop until nothing is pending:
//!
//! 1. **Check pending**: count stories without an annotation result; stop at 0
//! 2. **Fetch batch**: read the next `batch_size` pending stories, backfilling
//!    any missing text from the source archive (saved before queueing)
//! 3. **Dispatch**: queue `(story id, text)` items for the worker pool, which
//!    is started on the first round and reused afterwards
//! 4. **Drain**: wait until every queued item has been acknowledged, log the
//!    round timing, and go back to 1
//!
//! Failed stories are not retried inside a round. They stay pending and come
//! back in a later round or a later scheduled invocation. Only an unavailable
//! store ends the invocation early.

use crate::config::GeocoderConfig;
use crate::error::GeocodeError;
use crate::models::{Story, WorkItem};
use crate::pool::{ItemHandler, TallySnapshot, WorkerPool};
use crate::source::StoryTextSource;
use crate::store::StoryStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Result of one fetch/dispatch/drain cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundReport {
    /// Pending stories read from the store.
    pub fetched: usize,
    /// Items handed to the workers.
    pub dispatched: usize,
    /// Stories left out because their text could not be fetched.
    pub skipped: usize,
    pub tally: TallySnapshot,
    pub elapsed: Duration,
}

impl RoundReport {
    pub fn secs_per_story(&self) -> f64 {
        if self.dispatched == 0 {
            0.0
        } else {
            self.elapsed.as_secs_f64() / self.dispatched as f64
        }
    }
}

/// Totals for a whole invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rounds: u32,
    pub dispatched: usize,
    pub geocoded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Queue acknowledgments across all rounds.
    pub acknowledged: u64,
    /// Pending count at the last check.
    pub remaining: u64,
}

impl RunSummary {
    /// Whether the invocation ended with nothing left pending.
    pub fn is_drained(&self) -> bool {
        self.remaining == 0
    }

    fn absorb(&mut self, report: &RoundReport) {
        self.rounds += 1;
        self.dispatched += report.dispatched;
        self.geocoded += report.tally.succeeded;
        self.failed += report.tally.failed();
        self.skipped += report.skipped;
    }
}

pub struct Dispatcher {
    store: Arc<dyn StoryStore>,
    source: Arc<dyn StoryTextSource>,
    handler: Arc<dyn ItemHandler>,
    settings: GeocoderConfig,
    pool: Option<WorkerPool>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn StoryStore>,
        source: Arc<dyn StoryTextSource>,
        handler: Arc<dyn ItemHandler>,
        settings: &GeocoderConfig,
    ) -> Self {
        Self {
            store,
            source,
            handler,
            settings: settings.clone(),
            pool: None,
        }
    }

    /// Run rounds until nothing is pending, `max_rounds` is reached, or the
    /// store becomes unavailable. The worker pool is shut down on every path.
    #[instrument(level = "info", skip_all, fields(workers = self.settings.workers, batch_size = self.settings.batch_size))]
    pub async fn run(mut self) -> Result<RunSummary, GeocodeError> {
        let mut summary = RunSummary::default();
        let result = self.run_rounds(&mut summary).await;

        if let Some(pool) = self.pool.take() {
            summary.acknowledged = pool.acknowledged();
            pool.shutdown().await;
        }
        result.map(|()| summary)
    }

    async fn run_rounds(&mut self, summary: &mut RunSummary) -> Result<(), GeocodeError> {
        loop {
            let pending = self.store.count_pending().await?;
            summary.remaining = pending;
            info!(pending, "Stories left without annotation");
            if pending == 0 {
                return Ok(());
            }

            if let Some(max) = self.settings.max_rounds {
                if summary.rounds >= max {
                    warn!(rounds = summary.rounds, pending, "Round limit reached; leaving the rest for the next run");
                    return Ok(());
                }
            }

            let report = self.run_round().await?;
            summary.absorb(&report);

            if report.fetched == 0 {
                warn!(pending, "Store reports pending stories but returned none; ending run");
                return Ok(());
            }
            if report.dispatched == 0 {
                // The next fetch would return the same undispatchable batch.
                warn!(
                    pending,
                    skipped = report.skipped,
                    "No story in this batch could be queued; ending run"
                );
                return Ok(());
            }
        }
    }

    /// One fetch, dispatch and drain cycle.
    pub async fn run_round(&mut self) -> Result<RoundReport, GeocodeError> {
        let started = Instant::now();

        let stories = self.store.fetch_pending(self.settings.batch_size).await?;
        let fetched = stories.len();
        let mut items = Vec::with_capacity(fetched);
        let mut skipped = 0usize;
        for story in stories {
            let story_id = story.id;
            match self.prepare(story).await {
                Ok(item) => items.push(item),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(story_id, error = %e, "Skipping story this round");
                    skipped += 1;
                }
            }
        }

        let dispatched = items.len();
        info!(queued = dispatched, skipped, "Queued stories");

        let pool = self.pool();
        for item in items {
            pool.submit(item).await?;
        }
        let tally = pool.drain().await;

        let report = RoundReport {
            fetched,
            dispatched,
            skipped,
            tally,
            elapsed: started.elapsed(),
        };
        info!(
            dispatched,
            acknowledged = tally.total(),
            succeeded = tally.succeeded,
            failed = tally.failed(),
            elapsed_secs = report.elapsed.as_secs_f64(),
            secs_per_story = report.secs_per_story(),
            "Done with one round"
        );
        Ok(report)
    }

    fn pool(&mut self) -> &WorkerPool {
        let (workers, capacity) = (self.settings.workers, self.settings.batch_size);
        let handler = &self.handler;
        self.pool
            .get_or_insert_with(|| WorkerPool::start(workers, capacity, Arc::clone(handler)))
    }

    /// Turn a pending story into a work item, backfilling its text first if
    /// needed. Backfilled text is saved whether or not annotation later works.
    async fn prepare(&self, story: Story) -> Result<WorkItem, GeocodeError> {
        let story_id = story.id;
        let text = match &story.text {
            Some(text) => {
                debug!(story_id, "Queueing story");
                text.clone()
            }
            None => {
                debug!(story_id, "Need to fetch story text");
                let text = self.source.fetch_full_text(story_id).await?;
                let mut story = story;
                story.text = Some(text.clone());
                self.store.update(&story).await?;
                text
            }
        };

        Ok(WorkItem {
            story_id,
            text: self.sendable_text(text),
        })
    }

    /// Blank text makes the annotation service fail, so send the placeholder.
    fn sendable_text(&self, text: String) -> String {
        if text.trim().is_empty() {
            self.settings.placeholder_text.clone()
        } else {
            text
        }
    }
}
