//! # Test Helpers
//!
//! Scripted stand-ins for the pipeline's external capabilities, shared by the
//! unit tests and the integration tests under `tests/`. The broker and job
//! store doubles live next to their real implementations
//! ([`InMemoryBroker`](crate::messaging::InMemoryBroker),
//! [`InMemoryJobStore`](crate::jobs::InMemoryJobStore)).

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::constants::fields;
use crate::downstream::{AnnotationError, DocumentSink, Entity, EntityAnnotator};
use crate::error::{CrawlerError, Result};
use crate::source::{ArticleSource, SourceError, SourcePage};

/// Article source answering from a per-page script. Unscripted pages are empty.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    total: u64,
    pages: HashMap<u64, usize>,
    malformed: HashSet<u64>,
    failures: Mutex<HashMap<u64, u32>>,
    calls: Mutex<Vec<u64>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = total;
        self
    }

    /// Page `page` returns `items` articles
    pub fn with_page(mut self, page: u64, items: usize) -> Self {
        self.pages.insert(page, items);
        self
    }

    pub fn with_pages(mut self, pages: impl IntoIterator<Item = u64>, items: usize) -> Self {
        for page in pages {
            self.pages.insert(page, items);
        }
        self
    }

    pub fn with_empty_page(mut self, page: u64) -> Self {
        self.pages.insert(page, 0);
        self
    }

    pub fn with_malformed_page(mut self, page: u64) -> Self {
        self.malformed.insert(page);
        self
    }

    /// The first `times` requests for `page` fail transiently
    pub fn with_failures(self, page: u64, times: u32) -> Self {
        self.failures.lock().insert(page, times);
        self
    }

    pub fn always_failing(self, page: u64) -> Self {
        self.with_failures(page, u32::MAX)
    }

    /// Pages requested so far, in request order
    pub fn calls(&self) -> Vec<u64> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, page: u64) -> usize {
        self.calls.lock().iter().filter(|p| **p == page).count()
    }

    /// The article a scripted page returns at `index`
    pub fn article(page: u64, index: usize) -> Value {
        json!({
            "rel_doi": format!("10.1101/{page}.{index}"),
            "rel_title": format!("Article {index} of page {page}"),
            "rel_abs": format!("Abstract {page} {index}"),
            "category": "molecular biology",
            "rel_date": "2020-03-05",
        })
    }
}

#[async_trait]
impl ArticleSource for ScriptedSource {
    async fn total_count(&self) -> u64 {
        self.total
    }

    async fn fetch_page(&self, page: u64) -> std::result::Result<SourcePage, SourceError> {
        self.calls.lock().push(page);

        {
            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(&page) {
                if *remaining > 0 {
                    *remaining = remaining.saturating_sub(1);
                    let reason = format!("page {page} is scripted to fail");
                    return Err(SourceError::Unavailable(reason));
                }
            }
        }

        if self.malformed.contains(&page) {
            return Err(SourceError::malformed(page, "scripted malformed page"));
        }

        let items = self.pages.get(&page).copied().unwrap_or(0);
        if items == 0 {
            return Ok(SourcePage::default());
        }
        let collection = (0..items).map(|i| Self::article(page, i)).collect();
        let messages = vec![json!({"status": "ok", "count": items, "total": self.total})];
        Ok(SourcePage::new(messages, collection))
    }
}

/// Annotator tagging the first word of every text, recording what it was asked
#[derive(Debug, Default)]
pub struct RecordingAnnotator {
    calls: Mutex<Vec<String>>,
    failing: bool,
}

impl RecordingAnnotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl EntityAnnotator for RecordingAnnotator {
    async fn annotate(&self, text: &str) -> std::result::Result<Vec<Entity>, AnnotationError> {
        self.calls.lock().push(text.to_string());
        if self.failing {
            return Err(AnnotationError::Status { status: 503 });
        }
        Ok(text
            .split_whitespace()
            .next()
            .map(|word| vec![Entity::new(word, "TERM")])
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct SinkState {
    by_doi: BTreeMap<String, Map<String, Value>>,
    without_doi: Vec<Value>,
    upsert_calls: usize,
    fail_files: HashSet<String>,
}

/// Document sink with the same merge-by-DOI semantics as the Postgres sink
#[derive(Debug, Default)]
pub struct MemoryDocumentSink {
    state: Mutex<SinkState>,
}

impl MemoryDocumentSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts from `source_file` fail
    pub fn fail_for(&self, source_file: &str) {
        self.state.lock().fail_files.insert(source_file.to_string());
    }

    pub fn get(&self, doi: &str) -> Option<Value> {
        self.state
            .lock()
            .by_doi
            .get(doi)
            .cloned()
            .map(Value::Object)
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.by_doi.len() + state.without_doi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn upsert_calls(&self) -> usize {
        self.state.lock().upsert_calls
    }
}

#[async_trait]
impl DocumentSink for MemoryDocumentSink {
    async fn upsert(&self, source_file: &str, documents: &[Value]) -> Result<usize> {
        let mut state = self.state.lock();
        state.upsert_calls += 1;
        if state.fail_files.contains(source_file) {
            return Err(CrawlerError::DocumentSink(format!("{source_file} is scripted to fail")));
        }

        for document in documents {
            let doi = document
                .get(fields::REL_DOI)
                .and_then(Value::as_str)
                .filter(|d| !d.trim().is_empty())
                .map(str::to_string);
            match (doi, document.as_object()) {
                (Some(doi), Some(fields_map)) => {
                    let stored = state.by_doi.entry(doi).or_default();
                    for (key, value) in fields_map {
                        stored.insert(key.clone(), value.clone());
                    }
                }
                _ => state.without_doi.push(document.clone()),
            }
        }
        Ok(documents.len())
    }
}
