//! Configuration for a geocoder invocation.
//!
//! The job reads one YAML file shared with the other story tools. Every
//! section has defaults, so a minimal file only needs the API key and the
//! annotation service host:
//!
//! ```yaml
//! db:
//!   uri: mongodb://localhost:27017
//!   name: mc_geostudy
//! cliff:
//!   host: localhost
//!   port: 8080
//! api:
//!   key: YOUR_KEY
//! geocoder:
//!   workers: 15
//!   batch_size: 5
//! ```
//!
//! The loaded [`AppConfig`] is built once in `main` and handed to the store,
//! the clients and the dispatcher.

use crate::error::GeocodeError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub db: DbConfig,
    pub cliff: CliffConfig,
    pub api: ApiConfig,
    pub geocoder: GeocoderConfig,
}

/// Story store connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub uri: String,
    pub name: String,
    pub collection: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            name: "mc_geostudy".to_string(),
            collection: "stories".to_string(),
        }
    }
}

/// Annotation service endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CliffConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Upper bound on a single annotation call.
    pub timeout_secs: u64,
}

impl Default for CliffConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            path: "/cliff-2.6.1/parse/text".to_string(),
            timeout_secs: 120,
        }
    }
}

impl CliffConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Source archive API used to backfill missing story text.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub base_delay_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            base_url: "https://api.mediacloud.org/".to_string(),
            timeout_secs: 60,
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Dispatcher sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    /// Number of concurrent workers (N).
    pub workers: usize,
    /// Stories fetched per round (K).
    pub batch_size: usize,
    /// Sent instead of empty story text, which the service rejects.
    pub placeholder_text: String,
    /// Stop after this many rounds even if stories remain pending.
    pub max_rounds: Option<u32>,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            workers: 15,
            batch_size: 5,
            placeholder_text: "the".to_string(),
            max_rounds: None,
        }
    }
}

impl AppConfig {
    /// Read and validate a YAML config file.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GeocodeError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GeocodeError::Config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        let config = Self::from_yaml(&raw)?;
        debug!(?config.geocoder, "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, GeocodeError> {
        let config: AppConfig =
            serde_yaml::from_str(raw).map_err(|e| GeocodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GeocodeError> {
        if self.geocoder.workers == 0 {
            return Err(GeocodeError::Config("geocoder.workers must be at least 1".into()));
        }
        if self.geocoder.batch_size == 0 {
            return Err(GeocodeError::Config(
                "geocoder.batch_size must be at least 1".into(),
            ));
        }
        if self.geocoder.placeholder_text.is_empty() {
            return Err(GeocodeError::Config(
                "geocoder.placeholder_text must not be empty".into(),
            ));
        }
        if self.cliff.host.trim().is_empty() {
            return Err(GeocodeError::Config("cliff.host must not be empty".into()));
        }
        if self.db.name.trim().is_empty() {
            return Err(GeocodeError::Config("db.name must not be empty".into()));
        }
        Ok(())
    }
}
