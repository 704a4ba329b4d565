//! Command-line interface definitions for the story geocoder.
//!
//! The job is meant to be started by a scheduler, so everything has a default
//! and can also come from the environment.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for one geocoder invocation.
///
/// # Examples
///
/// ```sh
/// # Use ./mc-client.yaml and append to ./geocoder.log
/// story_geocoder
///
/// # Explicit config and log locations, key from the environment
/// MC_API_KEY=... story_geocoder -c /etc/geostudy/mc-client.yaml -l /var/log/geocoder.log
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the shared YAML config file
    #[arg(short, long, env = "GEOCODER_CONFIG", default_value = "mc-client.yaml")]
    pub config: PathBuf,

    /// Append-only log file
    #[arg(short, long, env = "GEOCODER_LOG_FILE", default_value = "geocoder.log")]
    pub log_file: PathBuf,

    /// Source archive API key (overrides `api.key` from the config file)
    #[arg(long, env = "MC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}
