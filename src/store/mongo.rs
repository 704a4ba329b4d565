//! MongoDB-backed story store.
//!
//! Stories live in one collection (default `stories`) keyed by `stories_id`.
//! A story is pending while its `cliff_results` field is missing or null.

use super::StoryStore;
use crate::config::DbConfig;
use crate::error::GeocodeError;
use crate::models::Story;
use async_trait::async_trait;
use mongodb::bson::{doc, from_document, to_bson, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use tracing::{debug, info, instrument};

const ID_FIELD: &str = "stories_id";
const TEXT_FIELD: &str = "story_text";
const RESULTS_FIELD: &str = "cliff_results";
const FOCUS_FIELD: &str = "cliff_countries_focus";

pub struct MongoStoryStore {
    stories: Collection<Document>,
}

impl MongoStoryStore {
    /// Connect and ping the database so an unreachable store fails fast.
    #[instrument(level = "info", skip_all, fields(db = %config.name, collection = %config.collection))]
    pub async fn connect(config: &DbConfig) -> Result<Self, GeocodeError> {
        let mut options = ClientOptions::parse(&config.uri).await?;
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        let client = Client::with_options(options)?;

        let db = client.database(&config.name);
        db.run_command(doc! { "ping": 1 }).await?;
        info!("Connected to story store");

        Ok(Self {
            stories: db.collection::<Document>(&config.collection),
        })
    }

    fn pending_filter() -> Document {
        doc! { RESULTS_FIELD: null }
    }

    /// Build the `$set`/`$unset` document for [`StoryStore::update`].
    ///
    /// Text is only ever written, never cleared.
    fn update_document(story: &Story) -> Result<Document, GeocodeError> {
        let mut set = doc! { FOCUS_FIELD: to_bson(&story.country_focus)? };
        let mut unset = Document::new();

        if let Some(text) = &story.text {
            set.insert(TEXT_FIELD, text.as_str());
        }
        match &story.annotation {
            Some(result) => {
                set.insert(RESULTS_FIELD, to_bson(result)?);
            }
            None => {
                unset.insert(RESULTS_FIELD, "");
            }
        }

        let mut update = doc! { "$set": set };
        if !unset.is_empty() {
            update.insert("$unset", unset);
        }
        Ok(update)
    }
}

#[async_trait]
impl StoryStore for MongoStoryStore {
    async fn count_pending(&self) -> Result<u64, GeocodeError> {
        Ok(self.stories.count_documents(Self::pending_filter()).await?)
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Story>, GeocodeError> {
        let mut cursor = self
            .stories
            .find(Self::pending_filter())
            .limit(limit as i64)
            .await?;

        let mut stories = Vec::with_capacity(limit);
        while cursor.advance().await? {
            let document = cursor.deserialize_current()?;
            stories.push(from_document::<Story>(document)?);
        }
        debug!(count = stories.len(), limit, "Fetched pending stories");
        Ok(stories)
    }

    async fn fetch_by_id(&self, id: i64) -> Result<Story, GeocodeError> {
        match self.stories.find_one(doc! { ID_FIELD: id }).await? {
            Some(document) => Ok(from_document::<Story>(document)?),
            None => Err(GeocodeError::StoryNotFound(id)),
        }
    }

    async fn update(&self, story: &Story) -> Result<(), GeocodeError> {
        let update = Self::update_document(story)?;
        let result = self
            .stories
            .update_one(doc! { ID_FIELD: story.id }, update)
            .await?;
        if result.matched_count == 0 {
            return Err(GeocodeError::StoryNotFound(story.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnnotationResponse;
    use serde_json::json;

    #[test]
    fn test_pending_filter_matches_missing_or_null_results() {
        let filter = MongoStoryStore::pending_filter();
        assert_eq!(filter.get(RESULTS_FIELD), Some(&mongodb::bson::Bson::Null));
    }

    #[test]
    fn test_update_document_for_backfilled_text() {
        let story = Story::new(3, Some("Body".into()));
        let update = MongoStoryStore::update_document(&story).unwrap();

        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str(TEXT_FIELD).unwrap(), "Body");
        assert!(set.get(RESULTS_FIELD).is_none());
        assert!(update.get_document("$unset").unwrap().contains_key(RESULTS_FIELD));
    }

    #[test]
    fn test_update_document_for_annotated_story() {
        let mut story = Story::new(3, None);
        story.apply_annotation(&AnnotationResponse::new(json!({
            "status": "ok",
            "results": { "places": { "focus": { "countries": [{ "countryCode": "BR" }] } } }
        })));
        let update = MongoStoryStore::update_document(&story).unwrap();

        let set = update.get_document("$set").unwrap();
        assert!(set.get_document(RESULTS_FIELD).is_ok());
        assert!(set.get(TEXT_FIELD).is_none());
        let focus = set.get_array(FOCUS_FIELD).unwrap();
        assert_eq!(focus.len(), 1);
        assert!(update.get("$unset").is_none());
    }
}
