//! Per-story geocoding step.
//!
//! For one queued story a worker sends the text to the annotation service,
//! and on an `ok` reply re-reads the story from the store, merges in the
//! result and its country focus, and writes it back. Any other reply leaves
//! the story pending for a later round.

use crate::annotation::Annotator;
use crate::error::GeocodeError;
use crate::models::{AnnotationResponse, WorkItem};
use crate::pool::ItemHandler;
use crate::store::StoryStore;
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use itertools::Itertools;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// What happened to one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Annotation persisted.
    Geocoded { countries: usize },
    /// Service answered with a non-ok status.
    Rejected { status: String },
    /// Service could not be reached or answered unreadably.
    TransportFailed,
    /// Annotation succeeded but the store read or write failed.
    StoreFailed,
    /// Processing panicked.
    Panicked,
}

/// The [`ItemHandler`] that geocodes one story.
pub struct GeocodeWorker {
    store: Arc<dyn StoryStore>,
    annotator: Arc<dyn Annotator>,
}

impl GeocodeWorker {
    /// # Arguments
    ///
    /// * `store` - where annotated stories are re-read and written back
    /// * `annotator` - the entity extraction service
    pub fn new(store: Arc<dyn StoryStore>, annotator: Arc<dyn Annotator>) -> Self {
        Self { store, annotator }
    }

    /// Fresh read-modify-write of the story so fields written since the item
    /// was queued are kept.
    ///
    /// # Returns
    ///
    /// The number of focus countries saved with the story.
    async fn persist(
        &self,
        story_id: i64,
        response: &AnnotationResponse,
    ) -> Result<usize, GeocodeError> {
        debug!(story_id, "Loading story");
        let mut story = self.store.fetch_by_id(story_id).await?;
        story.apply_annotation(response);
        self.store.update(&story).await?;
        Ok(story.country_focus.len())
    }
}

#[async_trait]
impl ItemHandler for GeocodeWorker {
    /// Annotate the item's text and persist the result on an `ok` reply.
    ///
    /// Never fails: every problem is logged and reported as an [`Outcome`],
    /// leaving the story pending.
    #[instrument(level = "debug", skip_all, fields(story_id = item.story_id))]
    async fn handle(&self, item: &WorkItem) -> Outcome {
        let response = match self.annotator.annotate(&item.text).await {
            Ok(response) => response,
            Err(e) => {
                warn!(story_id = item.story_id, error = %e, "Annotation call failed; story stays pending");
                return Outcome::TransportFailed;
            }
        };

        let status = response.status();
        if !status.is_ok() {
            let err = GeocodeError::AnnotationService {
                status: status.to_string(),
            };
            error!(
                story_id = item.story_id,
                error = %err,
                response_preview = %truncate_for_log(&response.raw.to_string(), 300),
                "Annotation service rejected story; story stays pending"
            );
            return Outcome::Rejected {
                status: status.to_string(),
            };
        }

        match self.persist(item.story_id, &response).await {
            Ok(countries) => {
                info!(
                    story_id = item.story_id,
                    countries = %response.country_focus().iter().join(","),
                    "Updated story"
                );
                Outcome::Geocoded { countries }
            }
            Err(e) => {
                error!(story_id = item.story_id, error = %e, "Failed to save annotation; story stays pending");
                Outcome::StoreFailed
            }
        }
    }
}
