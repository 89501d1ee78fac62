//! # Document Loader
//!
//! One pass over the augmented directory. Files already named in the ledger
//! are skipped; every other artifact is normalized and upserted, and the names
//! that loaded cleanly are committed to the ledger at the end of the pass. A
//! failed file stays out of the ledger and is retried by the next pass.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

use super::document_sink::DocumentSink;
use super::transform::ArticleNormalizer;
use crate::constants::{fields, storage};
use crate::error::{CrawlerError, Result};
use crate::storage::ProcessedLedger;

/// Counts for one loader pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub candidates: usize,
    pub skipped: usize,
    pub processed: usize,
    pub failed: usize,
    pub documents: usize,
}

pub struct DocumentLoader {
    augmented_dir: PathBuf,
    ledger: ProcessedLedger,
    sink: Arc<dyn DocumentSink>,
    normalizer: ArticleNormalizer,
}

impl std::fmt::Debug for DocumentLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentLoader")
            .field("augmented_dir", &self.augmented_dir)
            .field("ledger", &self.ledger)
            .finish()
    }
}

impl DocumentLoader {
    pub fn new(
        augmented_dir: impl Into<PathBuf>,
        ledger: ProcessedLedger,
        sink: Arc<dyn DocumentSink>,
    ) -> Self {
        Self {
            augmented_dir: augmented_dir.into(),
            ledger,
            sink,
            normalizer: ArticleNormalizer::new(),
        }
    }

    #[instrument(skip(self), fields(dir = %self.augmented_dir.display()))]
    pub async fn run_once(&self) -> Result<LoadReport> {
        let candidates = self.candidate_files().await?;
        let already = self.ledger.load().await;
        let mut report = LoadReport {
            candidates: candidates.len(),
            ..LoadReport::default()
        };
        let mut loaded = BTreeSet::new();

        for name in candidates {
            if already.contains(&name) {
                report.skipped += 1;
                continue;
            }
            match self.load_file(&name).await {
                Ok(documents) => {
                    report.processed += 1;
                    report.documents += documents;
                    loaded.insert(name);
                }
                Err(e) => {
                    report.failed += 1;
                    error!(file = %name, error = %e, "Failed to load artifact");
                }
            }
        }

        self.ledger.commit(&loaded).await?;
        info!(
            candidates = report.candidates,
            skipped = report.skipped,
            processed = report.processed,
            failed = report.failed,
            documents = report.documents,
            "📦 Loader pass finished"
        );
        Ok(report)
    }

    /// Non-hidden `*.json` file names in the augmented directory, sorted
    async fn candidate_files(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.augmented_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Augmented directory does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(CrawlerError::storage(&self.augmented_dir, e)),
        };

        let ledger_name = self
            .ledger
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CrawlerError::storage(&self.augmented_dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_artifact = Path::new(&name)
                .extension()
                .is_some_and(|ext| ext == storage::ARTIFACT_EXTENSION);
            let is_ledger = ledger_name.as_deref() == Some(name.as_str());
            if !is_artifact || is_ledger || name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    async fn load_file(&self, name: &str) -> Result<usize> {
        let path = self.augmented_dir.join(name);
        let bytes = fs::read(&path)
            .await
            .map_err(|e| CrawlerError::storage(&path, e))?;
        let artifact: Value = serde_json::from_slice(&bytes)?;

        let documents: Vec<Value> = artifact
            .get(fields::COLLECTION)
            .and_then(Value::as_array)
            .map(|records| {
                records
                    .iter()
                    .cloned()
                    .map(|r| self.normalizer.normalize(r))
                    .collect()
            })
            .unwrap_or_default();

        if documents.is_empty() {
            debug!(file = name, "Artifact has no records");
            return Ok(0);
        }
        self.sink.upsert(name, &documents).await
    }
}
