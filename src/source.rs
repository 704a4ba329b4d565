//! Source archive API access with exponential backoff retry logic.
//!
//! Stories are stored by the fetcher before their text is always available.
//! When the dispatcher finds a pending story without `story_text`, it asks the
//! archive for the full text through a [`StoryTextSource`].
//!
//! # Architecture
//!
//! - [`StoryTextSource`]: trait for fetching one story's full text
//! - [`MediaCloudClient`]: HTTP implementation against the archive API
//! - [`RetryFetch`]: decorator that adds retry logic to any source
//!
//! # Retry Strategy
//!
//! - Only transient failures are retried (timeouts, connection errors, 429, 5xx)
//! - Bounded number of retries (`api.max_retries`)
//! - Exponential backoff starting at `api.base_delay_ms`
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd

use crate::config::ApiConfig;
use crate::error::GeocodeError;
use async_trait::async_trait;
use rand::{Rng, rng};
use serde_json::Value;
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};
use url::Url;

/// Where missing story text comes from.
#[async_trait]
pub trait StoryTextSource: Send + Sync {
    /// Full text of the story with the given id.
    async fn fetch_full_text(&self, story_id: i64) -> Result<String, GeocodeError>;
}

/// Client for the archive's `stories/single` endpoint.
#[derive(Clone)]
pub struct MediaCloudClient {
    http: reqwest::Client,
    /// API root, always ending in `/`.
    base_url: Url,
    /// API key sent as the `key` query parameter. Kept out of `Debug`.
    key: String,
}

impl fmt::Debug for MediaCloudClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaCloudClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl MediaCloudClient {
    /// Build a client from the `api` config section.
    ///
    /// # Arguments
    ///
    /// * `config` - base URL, API key and request timeout
    ///
    /// # Returns
    ///
    /// [`GeocodeError::Config`] if `base_url` does not parse or the HTTP client
    /// cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self, GeocodeError> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| GeocodeError::Config(format!("bad api.base_url: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GeocodeError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            key: config.key.clone(),
        })
    }

    fn story_url(&self, story_id: i64) -> Result<Url, GeocodeError> {
        self.base_url
            .join(&format!("api/v2/stories/single/{story_id}"))
            .map_err(|e| GeocodeError::Config(format!("bad story url: {e}")))
    }
}

#[async_trait]
impl StoryTextSource for MediaCloudClient {
    /// Fetch one story's text from `api/v2/stories/single/{id}`.
    ///
    /// # Returns
    ///
    /// * `Ok(text)` - the story's `story_text`; a JSON `null` comes back as `""`
    /// * `Err(GeocodeError::TextFetchFailed)` - request failed, or the reply
    ///   has no story or no `story_text`. Only timeouts, connection errors,
    ///   429 and 5xx replies are marked transient.
    #[instrument(level = "debug", skip(self))]
    async fn fetch_full_text(&self, story_id: i64) -> Result<String, GeocodeError> {
        let failed = |e: reqwest::Error| GeocodeError::TextFetchFailed {
            story_id,
            reason: e.to_string(),
            transient: is_transient(&e),
        };
        let rejected = |reason: String| GeocodeError::TextFetchFailed {
            story_id,
            reason,
            transient: false,
        };

        let url = self.story_url(story_id)?;
        let stories: Vec<Value> = self
            .http
            .get(url)
            .query(&[("key", self.key.as_str()), ("text", "true")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(failed)?
            .json()
            .await
            .map_err(failed)?;

        let story = stories
            .into_iter()
            .next()
            .ok_or_else(|| rejected("archive returned no story".into()))?;
        match story.get("story_text") {
            Some(Value::String(text)) => Ok(text.clone()),
            Some(Value::Null) => Ok(String::new()),
            Some(other) => Err(rejected(format!("unexpected story_text: {other}"))),
            None => Err(rejected("story_text missing from response".into())),
        }
    }
}

/// Whether a failed archive request is worth repeating.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout()
        || e.is_connect()
        || e.status().is_some_and(|status| {
            status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        })
}

/// Wrapper that adds exponential backoff retry logic to any [`StoryTextSource`].
///
/// # Backoff Strategy
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryFetch<T> {
    /// The source being wrapped.
    inner: T,
    /// Retries after the first attempt before giving up.
    max_retries: usize,
    /// Delay before the first retry (doubles with each attempt).
    base_delay: StdDuration,
    /// Upper bound for any single delay.
    max_delay: StdDuration,
}

impl<T> RetryFetch<T>
where
    T: StoryTextSource,
{
    /// Wrap `inner` with retry logic.
    ///
    /// # Arguments
    ///
    /// * `inner` - the source to wrap
    /// * `max_retries` - retries after the first attempt (`api.max_retries`)
    /// * `base_delay` - delay before the first retry (`api.base_delay_ms`)
    ///
    /// # Example
    ///
    /// ```ignore
    /// let source = RetryFetch::new(MediaCloudClient::new(&config.api)?, 3, Duration::from_secs(1));
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    fn delay_for(&self, attempt: usize) -> StdDuration {
        let shift = attempt.saturating_sub(1).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1u32 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + StdDuration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

#[async_trait]
impl<T> StoryTextSource for RetryFetch<T>
where
    T: StoryTextSource,
{
    #[instrument(level = "debug", skip(self))]
    async fn fetch_full_text(&self, story_id: i64) -> Result<String, GeocodeError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.fetch_full_text(story_id).await {
                Ok(text) => return Ok(text),
                Err(e) if !e.is_retryable() => {
                    warn!(error = %e, "Story text fetch failed permanently; not retrying");
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "Story text fetch exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "Story text fetch failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> MediaCloudClient {
        MediaCloudClient::new(&ApiConfig {
            key: "secret".into(),
            base_url: server.uri(),
            timeout_secs: 5,
            ..ApiConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_full_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/stories/single/42"))
            .and(query_param("key", "secret"))
            .and(query_param("text", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "stories_id": 42, "story_text": "Floods in Dhaka" }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server).fetch_full_text(42).await.unwrap();
        assert_eq!(text, "Floods in Dhaka");
    }

    #[tokio::test]
    async fn test_null_text_is_empty_string() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{ "stories_id": 1, "story_text": null }])),
            )
            .mount(&server)
            .await;

        assert_eq!(client_for(&server).fetch_full_text(1).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_empty_array_is_text_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_full_text(9).await.unwrap_err();
        assert!(matches!(err, GeocodeError::TextFetchFailed { story_id: 9, .. }));
    }

    #[tokio::test]
    async fn test_not_found_is_text_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_full_text(9).await.unwrap_err();
        assert!(matches!(
            err,
            GeocodeError::TextFetchFailed {
                transient: false,
                ..
            }
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_and_throttling_are_transient() {
        for status in [503, 429] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let err = client_for(&server).fetch_full_text(9).await.unwrap_err();
            assert!(err.is_retryable(), "status {status} should be retried");
        }
    }

    #[tokio::test]
    async fn test_missing_story_text_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "stories_id": 3 }])))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_full_text(3).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    struct Flaky {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StoryTextSource for Flaky {
        async fn fetch_full_text(&self, story_id: i64) -> Result<String, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(GeocodeError::TextFetchFailed {
                    story_id,
                    reason: "503".into(),
                    transient: true,
                });
            }
            Ok(format!("text {story_id}"))
        }
    }

    /// Archive that no longer has any story.
    #[derive(Default)]
    struct Gone {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StoryTextSource for Gone {
        async fn fetch_full_text(&self, story_id: i64) -> Result<String, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(GeocodeError::TextFetchFailed {
                story_id,
                reason: "404 Not Found".into(),
                transient: false,
            })
        }
    }

    #[tokio::test]
    async fn test_retry_skips_permanent_failures() {
        let retry = RetryFetch::new(Gone::default(), 3, StdDuration::from_secs(5));

        let started = Instant::now();
        let err = retry.fetch_full_text(7).await.unwrap_err();

        assert!(matches!(err, GeocodeError::TextFetchFailed { story_id: 7, .. }));
        assert_eq!(retry.inner.calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < StdDuration::from_secs(1));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let retry = RetryFetch::new(
            Flaky {
                failures_left: AtomicUsize::new(2),
                calls: AtomicUsize::new(0),
            },
            3,
            StdDuration::from_millis(1),
        );
        assert_eq!(retry.fetch_full_text(5).await.unwrap(), "text 5");
        assert_eq!(retry.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let retry = RetryFetch::new(
            Flaky {
                failures_left: AtomicUsize::new(10),
                calls: AtomicUsize::new(0),
            },
            2,
            StdDuration::from_millis(1),
        );
        assert!(retry.fetch_full_text(5).await.is_err());
        assert_eq!(retry.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_is_capped() {
        let retry = RetryFetch::new(
            Flaky {
                failures_left: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            },
            50,
            StdDuration::from_secs(1),
        );
        let delay = retry.delay_for(40);
        assert!(delay <= StdDuration::from_millis(30_250));
        assert!(delay >= StdDuration::from_secs(30));
    }
}
