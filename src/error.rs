//! Error kinds raised by the geocoder.
//!
//! Only store, configuration, log file and work queue failures end an
//! invocation (see [`GeocodeError::is_fatal`]). Everything else is scoped to a
//! single story: it gets logged, the story stays pending, and the next
//! scheduled run picks it up again.

use crate::queue::QueueClosed;
use thiserror::Error;

/// Everything that can go wrong while geocoding stories.
///
/// Variants map onto how far the failure reaches:
///
/// * store, configuration, log file and queue errors end the invocation
/// * text fetch and annotation errors leave one story pending for a later round
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// The story store could not be reached, or a document could not be
    /// converted to or from BSON.
    #[error("story store unavailable: {0}")]
    StoreUnavailable(String),

    /// No story with this id exists in the store.
    #[error("story {0} not found in store")]
    StoryNotFound(i64),

    /// The source archive did not give us the story's text.
    ///
    /// `transient` is set for failures worth repeating (timeouts, connection
    /// errors, 429 and 5xx replies). A 404 or a reply without `story_text`
    /// will not get better by asking again.
    #[error("could not fetch text for story {story_id}: {reason}")]
    TextFetchFailed {
        story_id: i64,
        reason: String,
        transient: bool,
    },

    /// The annotation service answered with a status other than `ok`.
    #[error("annotation service returned status {status:?}")]
    AnnotationService { status: String },

    /// The annotation service could not be reached or sent an unreadable reply.
    #[error("annotation service transport error: {0}")]
    AnnotationTransport(String),

    /// The config file is missing, malformed, or fails validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Local I/O failure, such as opening the log file.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Work was submitted after the worker pool shut down.
    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),
}

impl From<mongodb::error::Error> for GeocodeError {
    fn from(e: mongodb::error::Error) -> Self {
        GeocodeError::StoreUnavailable(e.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for GeocodeError {
    fn from(e: mongodb::bson::ser::Error) -> Self {
        GeocodeError::StoreUnavailable(format!("bson encode: {e}"))
    }
}

impl From<mongodb::bson::de::Error> for GeocodeError {
    fn from(e: mongodb::bson::de::Error) -> Self {
        GeocodeError::StoreUnavailable(format!("bson decode: {e}"))
    }
}

impl From<reqwest::Error> for GeocodeError {
    fn from(e: reqwest::Error) -> Self {
        GeocodeError::AnnotationTransport(e.to_string())
    }
}

impl GeocodeError {
    /// Whether repeating the same request might succeed.
    ///
    /// # Returns
    ///
    /// `true` only for a [`GeocodeError::TextFetchFailed`] marked transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GeocodeError::TextFetchFailed {
                transient: true,
                ..
            }
        )
    }

    /// Whether this error should stop the whole invocation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GeocodeError::StoreUnavailable(_)
                | GeocodeError::Config(_)
                | GeocodeError::Io(_)
                | GeocodeError::QueueClosed(_)
        )
    }
}
