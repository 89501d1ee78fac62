//! In-memory job store for tests and local runs

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{JobRecord, JobStore};
use crate::error::{CrawlerError, Result};

/// A stored job with everything the planner wrote onto it
#[derive(Debug, Clone)]
pub struct StoredJob {
    pub record: JobRecord,
    pub split_count: Option<u32>,
    pub total_articles: Option<u64>,
    pub claimed_at: Option<Instant>,
    pub claim_token: Option<Uuid>,
}

impl StoredJob {
    fn held_by(&self, job: &JobRecord) -> bool {
        self.claim_token.is_some() && self.claim_token == job.claim_token
    }
}

#[derive(Debug, Default)]
struct State {
    jobs: Vec<StoredJob>,
    next_id: i64,
    fail_next_record_plan: bool,
}

#[derive(Debug)]
pub struct InMemoryJobStore {
    state: Mutex<State>,
    claim_timeout: Duration,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::constants::planner::CLAIM_TIMEOUT_SECONDS))
    }
}

impl InMemoryJobStore {
    pub fn new(claim_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            claim_timeout,
        }
    }

    /// Add an unclaimed job and return its row id
    pub fn insert(&self, job_id: Option<&str>, page_size: i64, sleep_ms: u64) -> i64 {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.jobs.push(StoredJob {
            record: JobRecord::new(id, job_id.map(str::to_string), page_size, sleep_ms),
            split_count: None,
            total_articles: None,
            claimed_at: None,
            claim_token: None,
        });
        id
    }

    pub fn get(&self, id: i64) -> Option<StoredJob> {
        self.state
            .lock()
            .jobs
            .iter()
            .find(|j| j.record.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next `record_plan` call fail
    pub fn fail_next_record_plan(&self) {
        self.state.lock().fail_next_record_plan = true;
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn claim_next(&self) -> Result<Option<JobRecord>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let claimable = state.jobs.iter_mut().find(|j| match j.claimed_at {
            None => true,
            Some(at) => now.duration_since(at) > self.claim_timeout,
        });
        Ok(claimable.map(|job| {
            let token = Uuid::new_v4();
            job.claimed_at = Some(now);
            job.claim_token = Some(token);
            job.record.clone().with_claim_token(token)
        }))
    }

    async fn record_plan(
        &self,
        job: &JobRecord,
        split_count: u32,
        total_articles: u64,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_record_plan) {
            return Err(CrawlerError::JobStore("simulated record_plan failure".to_string()));
        }
        let stored = state
            .jobs
            .iter_mut()
            .find(|j| j.record.id == job.id && j.held_by(job))
            .ok_or_else(|| job.claim_lost())?;
        stored.split_count = Some(split_count);
        stored.total_articles = Some(total_articles);
        Ok(())
    }

    async fn renew_claim(&self, job: &JobRecord) -> Result<()> {
        let mut state = self.state.lock();
        let stored = state
            .jobs
            .iter_mut()
            .find(|j| j.record.id == job.id && j.held_by(job))
            .ok_or_else(|| job.claim_lost())?;
        stored.claimed_at = Some(Instant::now());
        Ok(())
    }

    async fn release(&self, job: &JobRecord) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(stored) = state
            .jobs
            .iter_mut()
            .find(|j| j.record.id == job.id && j.held_by(job))
        {
            stored.claimed_at = None;
            stored.claim_token = None;
        }
        Ok(())
    }

    async fn delete(&self, job: &JobRecord) -> Result<()> {
        let mut state = self.state.lock();
        let before = state.jobs.len();
        state.jobs.retain(|j| !(j.record.id == job.id && j.held_by(job)));
        if state.jobs.len() == before {
            return Err(job.claim_lost());
        }
        Ok(())
    }
}
