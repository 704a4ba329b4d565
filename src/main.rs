//! # Story Geocoder
//!
//! A scheduled batch job that finds stored news stories with no geographic
//! annotation, sends their text to a CLIFF-style entity extraction service
//! through a fixed pool of concurrent workers, and writes the result and the
//! story's focus countries back into MongoDB.
//!
//! ## Usage
//!
//! ```sh
//! story_geocoder -c mc-client.yaml -l geocoder.log
//! ```
//!
//! ## Architecture
//!
//! Each invocation loops over rounds until nothing is pending:
//! 1. **Check pending**: count stories without an annotation result
//! 2. **Fetch batch**: read up to `batch_size` of them, backfilling missing text
//! 3. **Dispatch**: queue the stories for the worker pool
//! 4. **Drain**: wait until every queued story has been acknowledged
//!
//! Stories that fail stay pending and are picked up again later.

use clap::Parser;
use std::error::Error;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod annotation;
mod cli;
mod config;
mod dispatcher;
mod error;
mod models;
mod pool;
mod queue;
mod source;
mod store;
#[cfg(test)]
mod testing;
mod utils;
mod worker;

use annotation::CliffClient;
use cli::Cli;
use config::AppConfig;
use dispatcher::Dispatcher;
use source::{MediaCloudClient, RetryFetch};
use store::StoryStore;
use store::mongo::MongoStoryStore;
use utils::open_log_file;
use worker::GeocodeWorker;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = Cli::parse();

    // --- Tracing init ---
    let log_file = open_log_file(&args.log_file)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(Mutex::new(log_file))
        .init();

    info!("---------------------------------------------------------------------------");
    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), config = %args.config.display(), "story_geocoder starting up");

    let mut config = AppConfig::load(&args.config).inspect_err(|e| {
        error!(error = %e, "Failed to load configuration");
    })?;
    if let Some(key) = args.api_key {
        config.api.key = key;
    }
    if config.api.key.is_empty() {
        warn!("No source API key configured; stories without text cannot be backfilled");
    }

    // --- Collaborators ---
    let store: Arc<dyn StoryStore> = Arc::new(
        MongoStoryStore::connect(&config.db)
            .await
            .inspect_err(|e| error!(error = %e, "Cannot reach story store"))?,
    );
    let annotator = CliffClient::new(&config.cliff)?;
    info!(endpoint = %annotator.endpoint(), "Annotation service configured");
    let source = RetryFetch::new(
        MediaCloudClient::new(&config.api)?,
        config.api.max_retries,
        config.api.base_delay(),
    );
    let worker = GeocodeWorker::new(Arc::clone(&store), Arc::new(annotator));

    // --- Rounds ---
    let dispatcher = Dispatcher::new(store, Arc::new(source), Arc::new(worker), &config.geocoder);
    let summary = dispatcher.run().await.inspect_err(|e| {
        error!(error = %e, "Geocoding run aborted");
    })?;

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        rounds = summary.rounds,
        dispatched = summary.dispatched,
        acknowledged = summary.acknowledged,
        geocoded = summary.geocoded,
        failed = summary.failed,
        skipped = summary.skipped,
        remaining = summary.remaining,
        "Execution complete"
    );

    if summary.is_drained() {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(remaining = summary.remaining, "Stories still pending at exit");
        Ok(ExitCode::FAILURE)
    }
}
