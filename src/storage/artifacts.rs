//! Split artifacts: `{jobId}_{splitNumber}.json` (combined pages) and
//! `{jobId}_summary_{splitNumber}.json` (what the split actually covered)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::debug;

use super::write_json_atomic;
use crate::constants::storage::ARTIFACT_EXTENSION;
use crate::error::{CrawlerError, Result};

/// Every page's items in page order, plus the first page's metadata block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombinedArtifact {
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub collection: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitSummary {
    pub job_id: String,
    pub split_number: u32,
    pub start_page: u64,
    pub end_page: u64,
    pub pages_processed: u64,
    pub total_articles_downloaded: u64,
}

pub fn combined_file_name(job_id: &str, split_number: u32) -> String {
    format!("{job_id}_{split_number}.{ARTIFACT_EXTENSION}")
}

pub fn summary_file_name(job_id: &str, split_number: u32) -> String {
    format!("{job_id}_summary_{split_number}.{ARTIFACT_EXTENSION}")
}

/// One artifact root directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn combined_path(&self, job_id: &str, split_number: u32) -> PathBuf {
        self.root.join(combined_file_name(job_id, split_number))
    }

    pub fn summary_path(&self, job_id: &str, split_number: u32) -> PathBuf {
        self.root.join(summary_file_name(job_id, split_number))
    }

    pub async fn write_combined(
        &self,
        job_id: &str,
        split_number: u32,
        artifact: &CombinedArtifact,
    ) -> Result<PathBuf> {
        let path = self.combined_path(job_id, split_number);
        write_json_atomic(&path, artifact).await?;
        debug!(
            path = %path.display(),
            items = artifact.collection.len(),
            "Wrote combined artifact"
        );
        Ok(path)
    }

    pub async fn write_summary(&self, summary: &SplitSummary) -> Result<PathBuf> {
        let path = self.summary_path(&summary.job_id, summary.split_number);
        write_json_atomic(&path, summary).await?;
        Ok(path)
    }

    /// The combined artifact of a split, `None` when the split downloaded nothing
    pub async fn read_combined(
        &self,
        job_id: &str,
        split_number: u32,
    ) -> Result<Option<CombinedArtifact>> {
        let path = self.combined_path(job_id, split_number);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CrawlerError::storage(path, e)),
        }
    }

    pub async fn read_summary(
        &self,
        job_id: &str,
        split_number: u32,
    ) -> Result<Option<SplitSummary>> {
        let path = self.summary_path(job_id, split_number);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CrawlerError::storage(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_file_names() {
        assert_eq!(combined_file_name("job-1", 4), "job-1_4.json");
        assert_eq!(summary_file_name("job-1", 4), "job-1_summary_4.json");
    }

    #[test]
    fn test_summary_wire_format() {
        let summary = SplitSummary {
            job_id: "job-1".into(),
            split_number: 2,
            start_page: 20,
            end_page: 24,
            pages_processed: 5,
            total_articles_downloaded: 150,
        };
        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            json!({
                "jobId": "job-1",
                "splitNumber": 2,
                "startPage": 20,
                "endPage": 24,
                "pagesProcessed": 5,
                "totalArticlesDownloaded": 150
            })
        );
    }

    #[tokio::test]
    async fn test_missing_combined_artifact_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.read_combined("job-1", 0).await.unwrap().is_none());

        let artifact = CombinedArtifact {
            messages: vec![json!({"count": 1})],
            collection: vec![json!({"rel_doi": "10.1/a"})],
        };
        store.write_combined("job-1", 0, &artifact).await.unwrap();
        assert_eq!(store.read_combined("job-1", 0).await.unwrap(), Some(artifact));
    }
}
