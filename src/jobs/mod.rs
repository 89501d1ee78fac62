//! # Job Store
//!
//! Where crawl jobs wait until a planner claims them. The planner claims one
//! job, records the computed plan on it, keeps the claim alive while it
//! publishes, and deletes the job once every split is published (or gives it
//! back after a failed attempt).
//!
//! Every claim carries a fresh token. Renewing, recording, releasing and
//! deleting only act while the token still matches, so a planner whose claim
//! expired and was taken over cannot touch the job any more.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CrawlerError, Result};
use crate::messaging::message::validate_job_id;

pub use in_memory::InMemoryJobStore;
pub use postgres::PgJobStore;

/// A claimed crawl job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Store-internal row identifier
    pub id: i64,
    /// Logical job id carried by every split; the row id when the record has none
    pub job_id: String,
    /// Pages per split as stored; not guaranteed positive
    pub page_size: i64,
    /// Delay between split publishes, in milliseconds
    pub sleep_ms: u64,
    /// Identity of the claim this record was handed out under
    #[serde(skip)]
    pub claim_token: Option<Uuid>,
}

impl JobRecord {
    pub fn new(id: i64, job_id: Option<String>, page_size: i64, sleep_ms: u64) -> Self {
        let job_id = job_id
            .filter(|j| !j.trim().is_empty())
            .unwrap_or_else(|| id.to_string());
        Self {
            id,
            job_id,
            page_size,
            sleep_ms,
            claim_token: None,
        }
    }

    pub fn with_claim_token(mut self, token: Uuid) -> Self {
        self.claim_token = Some(token);
        self
    }

    /// Page size usable for planning, `None` when it is zero, negative or too large
    pub fn valid_page_size(&self) -> Option<u32> {
        u32::try_from(self.page_size).ok().filter(|p| *p > 0)
    }

    /// Why the job id cannot name split artifacts, if it cannot
    pub fn job_id_problem(&self) -> Option<String> {
        validate_job_id(&self.job_id).err()
    }

    /// Error for an operation attempted after the claim was taken over
    pub fn claim_lost(&self) -> CrawlerError {
        CrawlerError::JobStore(format!(
            "claim on job {} (row {}) is no longer held",
            self.job_id, self.id
        ))
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically claim one unclaimed (or abandoned) job
    async fn claim_next(&self) -> Result<Option<JobRecord>>;

    /// Store the split count and item total before any split is published
    async fn record_plan(
        &self,
        job: &JobRecord,
        split_count: u32,
        total_articles: u64,
    ) -> Result<()>;

    /// Restart the claim timeout; fails once the claim is no longer held
    async fn renew_claim(&self, job: &JobRecord) -> Result<()>;

    /// Give the claim back so a later poll can re-plan the job from scratch
    async fn release(&self, job: &JobRecord) -> Result<()>;

    /// Remove the job; fails once the claim is no longer held
    async fn delete(&self, job: &JobRecord) -> Result<()>;
}
