//! # Orchestration Types
//!
//! Results of planning and executing splits.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::storage::{CombinedArtifact, SplitSummary};

/// What one planner pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOutcome {
    /// Job that was claimed, if any
    pub job_id: Option<String>,
    /// Split messages published
    pub published: u32,
    /// Nothing was published: no job, no items, or an unplannable job
    pub skipped: bool,
}

impl PlanOutcome {
    pub fn idle() -> Self {
        Self {
            job_id: None,
            published: 0,
            skipped: true,
        }
    }

    pub fn skipped(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            published: 0,
            skipped: true,
        }
    }

    pub fn published(job_id: impl Into<String>, published: u32) -> Self {
        Self {
            job_id: Some(job_id.into()),
            published,
            skipped: false,
        }
    }
}

/// Inclusive page range covered by one split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRange {
    pub start_page: u64,
    pub end_page: u64,
}

impl SplitRange {
    /// Pages `[split * pages_per_split, split * pages_per_split + pages_per_split - 1]`
    pub fn for_split(split_number: u32, pages_per_split: u32) -> Self {
        let pages = u64::from(pages_per_split.max(1));
        let start_page = u64::from(split_number) * pages;
        Self {
            start_page,
            end_page: start_page + pages - 1,
        }
    }

    pub fn pages(&self) -> RangeInclusive<u64> {
        self.start_page..=self.end_page
    }

    /// Last page actually covered: the planned end when nothing was processed
    pub fn effective_end(&self, pages_processed: u64) -> u64 {
        if pages_processed == 0 {
            self.end_page
        } else {
            self.start_page + pages_processed - 1
        }
    }
}

/// Result of crawling a split's page range
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombinedPages {
    pub artifact: CombinedArtifact,
    /// Pages that contributed at least one item
    pub pages_processed: u64,
    pub articles_downloaded: u64,
}

/// Files written for one split
#[derive(Debug, Clone, PartialEq)]
pub struct SplitOutcome {
    pub summary: SplitSummary,
    pub summary_path: PathBuf,
    /// Absent when the split downloaded nothing
    pub combined_path: Option<PathBuf>,
}

impl SplitOutcome {
    /// The combined artifact when there is one, else the summary
    pub fn artifact_path(&self) -> &Path {
        self.combined_path.as_deref().unwrap_or(&self.summary_path)
    }
}
