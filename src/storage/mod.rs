//! # Shared Storage
//!
//! Split artifacts on the raw and augmented roots, and the processed-file ledger
//! the loader keeps next to the augmented artifacts. Every file is replaced
//! atomically, so readers only ever see complete JSON documents.

pub mod artifacts;
pub mod ledger;

use std::path::Path;

use serde::Serialize;
use tokio::fs;

use crate::error::{CrawlerError, Result};

pub use artifacts::{ArtifactStore, CombinedArtifact, SplitSummary};
pub use ledger::ProcessedLedger;

/// Write pretty JSON to a hidden temp file beside `path`, then rename over it
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .map_err(|e| CrawlerError::storage(parent, e))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CrawlerError::validation(format!("{} has no file name", path.display())))?;
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(&temp_path, &bytes)
        .await
        .map_err(|e| CrawlerError::storage(&temp_path, e))?;

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(CrawlerError::storage(path, e));
    }
    Ok(())
}
