//! Story persistence.
//!
//! The dispatcher and its workers only see the [`StoryStore`] trait. The
//! production backend is [`mongo::MongoStoryStore`]; tests use an in-memory
//! store.
//!
//! Implementations must tolerate concurrent reads and concurrent writes to
//! different ids. No multi-document transactions are needed.

pub mod mongo;

#[cfg(test)]
pub mod memory;

use crate::error::GeocodeError;
use crate::models::Story;
use async_trait::async_trait;

#[async_trait]
pub trait StoryStore: Send + Sync {
    /// Number of stories without an annotation result.
    async fn count_pending(&self) -> Result<u64, GeocodeError>;

    /// Up to `limit` pending stories, in no particular order.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Story>, GeocodeError>;

    /// Fails with [`GeocodeError::StoryNotFound`] when the id is unknown.
    async fn fetch_by_id(&self, id: i64) -> Result<Story, GeocodeError>;

    /// Replace the mutable fields of the story with the same id.
    ///
    /// Writing the same story twice leaves the store in the same state.
    async fn update(&self, story: &Story) -> Result<(), GeocodeError>;
}
