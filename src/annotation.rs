//! Client for the entity extraction (CLIFF) service.
//!
//! The service takes raw text and answers with a JSON document carrying a
//! `status` plus the people, organizations and places it found. A non-`ok`
//! status comes back as a normal [`AnnotationResponse`]; only failures to get
//! a readable reply at all (connection errors, timeouts, non-2xx responses,
//! undecodable bodies) become [`GeocodeError::AnnotationTransport`].
//!
//! Calls are not retried here. A story whose call fails stays pending and is
//! picked up by a later round or invocation.

use crate::config::CliffConfig;
use crate::error::GeocodeError;
use crate::models::AnnotationResponse;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

/// Something that can annotate a piece of story text.
///
/// Implemented by [`CliffClient`] in production and by scripted fakes in tests.
#[async_trait]
pub trait Annotator: Send + Sync {
    /// Send `text` for entity extraction.
    ///
    /// # Returns
    ///
    /// The parsed reply whatever its `status`, or
    /// [`GeocodeError::AnnotationTransport`] if no readable reply came back.
    async fn annotate(&self, text: &str) -> Result<AnnotationResponse, GeocodeError>;
}

/// HTTP client for a CLIFF `parse/text` endpoint.
#[derive(Debug, Clone)]
pub struct CliffClient {
    /// Shared connection pool, configured with the call timeout.
    http: reqwest::Client,
    /// Full URL that text is POSTed to.
    endpoint: Url,
}

impl CliffClient {
    /// Build a client for `http://{host}:{port}{path}`.
    ///
    /// # Arguments
    ///
    /// * `config` - service location and per-call timeout (`cliff.timeout_secs`)
    ///
    /// # Returns
    ///
    /// [`GeocodeError::Config`] if the host, port and path do not form a valid
    /// URL or the HTTP client cannot be built.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client = CliffClient::new(&CliffConfig::default())?;
    /// assert_eq!(client.endpoint().as_str(), "http://localhost:8080/cliff-2.6.1/parse/text");
    /// ```
    pub fn new(config: &CliffConfig) -> Result<Self, GeocodeError> {
        let endpoint = Url::parse(&format!("http://{}:{}", config.host, config.port))
            .and_then(|base| base.join(&config.path))
            .map_err(|e| GeocodeError::Config(format!("bad annotation endpoint: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GeocodeError::Config(format!("http client: {e}")))?;
        Ok(Self { http, endpoint })
    }

    /// The URL annotation requests are sent to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Annotator for CliffClient {
    #[instrument(level = "debug", skip_all, fields(bytes = text.len()))]
    async fn annotate(&self, text: &str) -> Result<AnnotationResponse, GeocodeError> {
        let t0 = Instant::now();
        let res = self
            .http
            .post(self.endpoint.clone())
            .form(&[("q", text)])
            .send()
            .await
            .and_then(|r| r.error_for_status());

        let response = match res {
            Ok(r) => r,
            Err(e) => {
                warn!(elapsed_ms = t0.elapsed().as_millis() as u64, error = %e, "Annotation request failed");
                return Err(e.into());
            }
        };

        let body: Value = response.json().await?;
        debug!(elapsed_ms = t0.elapsed().as_millis() as u64, "Annotation response received");
        Ok(AnnotationResponse::new(body))
    }
}
