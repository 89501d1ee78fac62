//! # Processed-File Ledger
//!
//! A JSON array of artifact file names a downstream stage has fully handled.
//! Read once at the start of a run, replaced atomically at the end. One writer
//! per ledger file; concurrent runs against the same file can lose entries.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use super::write_json_atomic;
use crate::error::Result;

/// ```rust
/// use std::collections::BTreeSet;
/// use split_crawler::storage::ProcessedLedger;
///
/// # tokio_test::block_on(async {
/// let dir = tempfile::tempdir().unwrap();
/// let ledger = ProcessedLedger::new(dir.path().join(".processed_files.json"));
///
/// let handled: BTreeSet<String> = ["job-a_0.json".to_string()].into();
/// ledger.commit(&handled).await.unwrap();
/// assert!(ledger.load().await.contains("job-a_0.json"));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct ProcessedLedger {
    path: PathBuf,
}

impl ProcessedLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names already processed; empty when the file is missing or unreadable
    pub async fn load(&self) -> BTreeSet<String> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No ledger yet");
                return BTreeSet::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ledger unreadable, starting empty");
                return BTreeSet::new();
            }
        };

        match serde_json::from_slice::<Vec<String>>(&bytes) {
            Ok(names) => names.into_iter().collect(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ledger corrupt, starting empty");
                BTreeSet::new()
            }
        }
    }

    /// Union `newly_processed` into the ledger and replace the file
    pub async fn commit(&self, newly_processed: &BTreeSet<String>) -> Result<()> {
        if newly_processed.is_empty() {
            return Ok(());
        }

        let mut all = self.load().await;
        all.extend(newly_processed.iter().cloned());
        let names: Vec<&String> = all.iter().collect();
        write_json_atomic(&self.path, &names).await?;

        info!(
            path = %self.path.display(),
            added = newly_processed.len(),
            total = all.len(),
            "Ledger updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_missing_ledger_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ProcessedLedger::new(dir.path().join(".processed_files.json"));
        assert!(ledger.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_ledger_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".processed_files.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(ProcessedLedger::new(path).load().await.is_empty());
    }

    #[tokio::test]
    async fn test_commit_unions_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".processed_files.json");
        let ledger = ProcessedLedger::new(&path);

        ledger.commit(&names(&["b_1.json", "a_0.json"])).await.unwrap();
        ledger.commit(&names(&["c_2.json", "a_0.json"])).await.unwrap();

        let raw: Vec<String> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw, vec!["a_0.json", "b_1.json", "c_2.json"]);
        assert_eq!(ledger.load().await.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_commit_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".processed_files.json");
        let ledger = ProcessedLedger::new(&path);

        ledger.commit(&BTreeSet::new()).await.unwrap();
        assert!(!path.exists());

        ledger.commit(&names(&["a_0.json"])).await.unwrap();
        let before = std::fs::read(&path).unwrap();
        ledger.commit(&BTreeSet::new()).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }
}
