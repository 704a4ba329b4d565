//! Data models for stories and the annotation payloads attached to them.
//!
//! This module defines the records the geocoder moves around:
//! - [`Story`]: one news article as persisted in the story store
//! - [`WorkItem`]: the `(story id, text)` pair handed to a worker for one round
//! - [`AnnotationResponse`]: the parsed reply of the entity extraction service
//!
//! Field names on [`Story`] follow the document layout written by the story
//! fetcher (`stories_id`, `story_text`, ...), hence the serde renames.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A news story as stored in the document database.
///
/// A story is *pending* until `annotation` is set. Everything the store holds
/// beyond the geocoder's own fields (title, url, media type, ...) is carried
/// along untouched in `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    /// Identifier assigned by the source archive; never changes.
    #[serde(rename = "stories_id")]
    pub id: i64,
    /// Article body. Absent until backfilled from the source API.
    #[serde(rename = "story_text", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Raw annotation service payload. Absent means pending.
    #[serde(rename = "cliff_results", default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<Value>,
    /// Country codes the service judged the story to be about.
    #[serde(rename = "cliff_countries_focus", default)]
    pub country_focus: Vec<String>,
    /// Remaining fields written by other tools.
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Story {
    pub fn new(id: i64, text: Option<String>) -> Self {
        Self {
            id,
            text,
            annotation: None,
            country_focus: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.annotation.is_none()
    }

    /// Merge a successful annotation into this story.
    pub fn apply_annotation(&mut self, response: &AnnotationResponse) {
        self.country_focus = response.country_focus();
        self.annotation = Some(response.raw.clone());
    }
}

/// One unit of work for a single round. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub story_id: i64,
    pub text: String,
}

/// Outcome status reported inside an annotation payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationStatus {
    Ok,
    /// Anything other than `"ok"`, carrying the reported value.
    Error(String),
}

impl AnnotationStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, AnnotationStatus::Ok)
    }
}

impl std::fmt::Display for AnnotationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnnotationStatus::Ok => f.write_str("ok"),
            AnnotationStatus::Error(s) => f.write_str(s),
        }
    }
}

/// Parsed reply from the annotation service.
///
/// The payload is kept as raw JSON because it is persisted verbatim; the
/// accessors below only read the parts the geocoder needs.
///
/// # Shape
///
/// ```text
/// { "status": "ok",
///   "results": { "places": { "focus": { "countries": [ { "countryCode": "FR", ... } ] } } } }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationResponse {
    pub raw: Value,
}

impl AnnotationResponse {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    pub fn status(&self) -> AnnotationStatus {
        match self.raw.get("status").and_then(Value::as_str) {
            Some(s) if s.eq_ignore_ascii_case("ok") => AnnotationStatus::Ok,
            Some(s) => AnnotationStatus::Error(s.to_string()),
            None => AnnotationStatus::Error("missing".to_string()),
        }
    }

    /// Country codes under `results.places.focus.countries`.
    ///
    /// Empty when any level of that path is missing. Entries without a
    /// `countryCode` string are ignored.
    pub fn country_focus(&self) -> Vec<String> {
        self.raw
            .pointer("/results/places/focus/countries")
            .and_then(Value::as_array)
            .map(|countries| {
                countries
                    .iter()
                    .filter_map(|c| c.get("countryCode").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
