//! Test doubles for the annotation service and the source archive.

use crate::annotation::Annotator;
use crate::error::GeocodeError;
use crate::models::AnnotationResponse;
use crate::source::StoryTextSource;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;

type Reply = Box<dyn Fn(&str) -> Result<Value, String> + Send + Sync>;

/// Annotator whose reply is computed from the submitted text.
pub struct ScriptedAnnotator {
    reply: Reply,
    calls: Mutex<Vec<String>>,
}

impl ScriptedAnnotator {
    pub fn new(reply: impl Fn(&str) -> Result<Value, String> + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Same reply for every call. `Err` becomes a transport error.
    pub fn always(reply: Result<Value, &str>) -> Self {
        let reply = reply.map_err(str::to_string);
        Self::new(move |_| reply.clone())
    }

    /// Always `ok`, focused on the given countries.
    pub fn countries(codes: &[&str]) -> Self {
        Self::always(Ok(ok_payload(codes)))
    }

    /// Texts submitted so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

pub fn ok_payload(codes: &[&str]) -> Value {
    let countries: Vec<Value> = codes
        .iter()
        .map(|code| json!({ "countryCode": code, "score": 1 }))
        .collect();
    json!({
        "status": "ok",
        "results": { "places": { "focus": { "countries": countries } } }
    })
}

#[async_trait]
impl Annotator for ScriptedAnnotator {
    async fn annotate(&self, text: &str) -> Result<AnnotationResponse, GeocodeError> {
        self.calls.lock().unwrap().push(text.to_string());
        (self.reply)(text)
            .map(AnnotationResponse::new)
            .map_err(GeocodeError::AnnotationTransport)
    }
}

/// Text source backed by a fixed map; unknown ids fail.
#[derive(Default)]
pub struct ScriptedSource {
    texts: HashMap<i64, String>,
    calls: Mutex<Vec<i64>>,
}

impl ScriptedSource {
    pub fn with_texts(texts: impl IntoIterator<Item = (i64, &'static str)>) -> Self {
        Self {
            texts: texts
                .into_iter()
                .map(|(id, text)| (id, text.to_string()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StoryTextSource for ScriptedSource {
    async fn fetch_full_text(&self, story_id: i64) -> Result<String, GeocodeError> {
        self.calls.lock().unwrap().push(story_id);
        self.texts
            .get(&story_id)
            .cloned()
            .ok_or_else(|| GeocodeError::TextFetchFailed {
                story_id,
                reason: "not in archive".into(),
                transient: false,
            })
    }
}
