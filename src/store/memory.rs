//! In-memory story store for tests.

use super::StoryStore;
use crate::error::GeocodeError;
use crate::models::Story;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct MemoryStore {
    stories: Mutex<BTreeMap<i64, Story>>,
    unavailable: AtomicBool,
    updates: AtomicUsize,
}

impl MemoryStore {
    pub fn with_stories(stories: impl IntoIterator<Item = Story>) -> Self {
        let store = Self::default();
        {
            let mut map = store.stories.lock().unwrap();
            for story in stories {
                map.insert(story.id, story);
            }
        }
        store
    }

    /// Make every subsequent call fail with `StoreUnavailable`.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn get(&self, id: i64) -> Option<Story> {
        self.stories.lock().unwrap().get(&id).cloned()
    }

    /// Direct write that bypasses update counting.
    pub fn put(&self, story: Story) {
        self.stories.lock().unwrap().insert(story.id, story);
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), GeocodeError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(GeocodeError::StoreUnavailable("memory store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StoryStore for MemoryStore {
    async fn count_pending(&self) -> Result<u64, GeocodeError> {
        self.check()?;
        let map = self.stories.lock().unwrap();
        Ok(map.values().filter(|s| s.is_pending()).count() as u64)
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Story>, GeocodeError> {
        self.check()?;
        let map = self.stories.lock().unwrap();
        Ok(map
            .values()
            .filter(|s| s.is_pending())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_by_id(&self, id: i64) -> Result<Story, GeocodeError> {
        self.check()?;
        self.get(id).ok_or(GeocodeError::StoryNotFound(id))
    }

    async fn update(&self, story: &Story) -> Result<(), GeocodeError> {
        self.check()?;
        let mut map = self.stories.lock().unwrap();
        let existing = map
            .get_mut(&story.id)
            .ok_or(GeocodeError::StoryNotFound(story.id))?;
        if story.text.is_some() {
            existing.text = story.text.clone();
        }
        existing.annotation = story.annotation.clone();
        existing.country_focus = story.country_focus.clone();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnnotationResponse;
    use serde_json::json;

    #[tokio::test]
    async fn test_update_twice_is_idempotent() {
        let store = MemoryStore::with_stories([Story::new(1, Some("text".into()))]);
        let mut story = store.fetch_by_id(1).await.unwrap();
        story.apply_annotation(&AnnotationResponse::new(json!({
            "status": "ok",
            "results": { "places": { "focus": { "countries": [{ "countryCode": "KE" }] } } }
        })));

        store.update(&story).await.unwrap();
        let first = store.get(1).unwrap();
        store.update(&story).await.unwrap();
        let second = store.get(1).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fetch_by_id_missing() {
        let store = MemoryStore::default();
        let err = store.fetch_by_id(99).await.unwrap_err();
        assert!(matches!(err, GeocodeError::StoryNotFound(99)));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::with_stories([Story::new(1, None)]);
        store.set_unavailable(true);
        assert!(matches!(
            store.count_pending().await,
            Err(GeocodeError::StoreUnavailable(_))
        ));
        assert!(store.fetch_pending(5).await.is_err());
    }
}
