//! # Split Planner
//!
//! Turns one crawl job into `ceil(total / pageSize)` split messages.
//!
//! A pass claims one job, asks the source for the total item count, records the
//! plan on the job, publishes every split through a publish session and deletes
//! the job. A job with no items is deleted without publishing. Any failure
//! releases the claim so a later poll re-plans the job from scratch; splits
//! already published by the failed pass are published again and absorbed by the
//! idempotent stages downstream.
//!
//! The claim is renewed before every publish and at least every
//! `claim_renewal_interval` while throttling, so a slow job is never picked up
//! by a second planner mid-publish. A pass that finds its claim taken over
//! stops publishing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use super::sleep_or_shutdown;
use super::types::PlanOutcome;
use crate::config::PlannerConfig;
use crate::error::{CrawlerError, Result};
use crate::jobs::{JobRecord, JobStore};
use crate::messaging::{ConnectionManager, Session, SessionPurpose, SplitMessage};
use crate::source::ArticleSource;

/// `ceil(total_items / page_size)` in integer arithmetic
pub fn split_count(total_items: u64, page_size: u32) -> u64 {
    let page_size = u64::from(page_size);
    if page_size == 0 {
        return 0;
    }
    let mut splits = total_items / page_size;
    if total_items % page_size > 0 {
        splits += 1;
    }
    splits
}

pub struct SplitPlanner {
    jobs: Arc<dyn JobStore>,
    source: Arc<dyn ArticleSource>,
    connections: Arc<ConnectionManager>,
    config: PlannerConfig,
}

impl std::fmt::Debug for SplitPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitPlanner")
            .field("connections", &self.connections)
            .field("config", &self.config)
            .finish()
    }
}

impl SplitPlanner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        source: Arc<dyn ArticleSource>,
        connections: Arc<ConnectionManager>,
        config: PlannerConfig,
    ) -> Self {
        Self {
            jobs,
            source,
            connections,
            config,
        }
    }

    /// Poll for jobs until shutdown, pausing `poll_interval` after every pass
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            "🚀 Split planner started, watching for jobs"
        );

        loop {
            match self.plan_next_job().await {
                Ok(outcome) if outcome.job_id.is_some() => {
                    debug!(?outcome, "Planner pass finished");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Planner pass failed"),
            }

            if sleep_or_shutdown(self.config.poll_interval(), &mut shutdown).await {
                break;
            }
        }

        info!("Split planner stopped");
    }

    /// Claim and plan at most one job
    #[instrument(skip(self))]
    pub async fn plan_next_job(&self) -> Result<PlanOutcome> {
        let Some(job) = self.jobs.claim_next().await? else {
            return Ok(PlanOutcome::idle());
        };

        info!(
            job_id = %job.job_id,
            page_size = job.page_size,
            sleep_ms = job.sleep_ms,
            "Processing job"
        );

        match self.plan_job(&job).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(
                    job_id = %job.job_id,
                    error = %e,
                    "Error when processing job, leaving it for a later poll"
                );
                if let Err(release_error) = self.jobs.release(&job).await {
                    warn!(
                        job_id = %job.job_id,
                        error = %release_error,
                        "Failed to release job claim"
                    );
                }
                Err(e)
            }
        }
    }

    async fn plan_job(&self, job: &JobRecord) -> Result<PlanOutcome> {
        let Some(page_size) = job.valid_page_size() else {
            warn!(
                job_id = %job.job_id,
                page_size = job.page_size,
                "Job has no usable pageSize, deleting it"
            );
            self.jobs.delete(job).await?;
            return Ok(PlanOutcome::skipped(&job.job_id));
        };

        if let Some(problem) = job.job_id_problem() {
            warn!(
                job_id = %job.job_id,
                %problem,
                "Job id cannot name split artifacts, deleting it"
            );
            self.jobs.delete(job).await?;
            return Ok(PlanOutcome::skipped(&job.job_id));
        }

        let total = self.source.total_count().await;
        if total == 0 {
            info!(job_id = %job.job_id, "No articles found, deleting job");
            self.jobs.delete(job).await?;
            return Ok(PlanOutcome::skipped(&job.job_id));
        }

        let splits = u32::try_from(split_count(total, page_size)).map_err(|_| {
            CrawlerError::validation(format!(
                "job {} would need more than {} splits",
                job.job_id,
                u32::MAX
            ))
        })?;
        info!(job_id = %job.job_id, total_articles = total, splits = splits, "Computed split plan");

        self.jobs.record_plan(job, splits, total).await?;

        let session = self.connections.acquire(SessionPurpose::Publish).await?;
        let published = self.publish_splits(&session, job, page_size, splits).await;
        session.close().await;
        let published = published?;

        self.jobs.delete(job).await?;
        info!(job_id = %job.job_id, published = published, "✅ Job processed successfully");

        Ok(PlanOutcome::published(&job.job_id, published))
    }

    async fn publish_splits(
        &self,
        session: &Session,
        job: &JobRecord,
        page_size: u32,
        splits: u32,
    ) -> Result<u32> {
        session.declare(&self.connections.work_queue()).await?;
        let queue = &self.connections.config().work_queue;
        let throttle = Duration::from_millis(job.sleep_ms);

        for split_number in 0..splits {
            self.jobs.renew_claim(job).await?;
            let message = SplitMessage::new(&job.job_id, page_size, job.sleep_ms, split_number);
            session.publish_message(queue, &message).await?;
            debug!(job_id = %job.job_id, "Published split {}/{}", split_number + 1, splits);

            self.throttle(job, throttle).await?;
        }

        Ok(splits)
    }

    /// Sleep between publishes, renewing the claim whenever a renewal interval passes
    async fn throttle(&self, job: &JobRecord, throttle: Duration) -> Result<()> {
        let renewal = self.config.claim_renewal_interval();
        let mut remaining = throttle;
        while !remaining.is_zero() {
            let step = remaining.min(renewal);
            sleep(step).await;
            remaining -= step;
            if !remaining.is_zero() {
                self.jobs.renew_claim(job).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::jobs::InMemoryJobStore;
    use crate::messaging::InMemoryBroker;
    use crate::test_helpers::ScriptedSource;
    use tokio::time::Instant;

    struct Harness {
        broker: InMemoryBroker,
        jobs: Arc<InMemoryJobStore>,
        planner: SplitPlanner,
    }

    fn planner_on(
        broker: &InMemoryBroker,
        jobs: Arc<InMemoryJobStore>,
        total: u64,
    ) -> SplitPlanner {
        let source = Arc::new(ScriptedSource::new().with_total(total));
        let connections = Arc::new(ConnectionManager::new(
            Arc::new(broker.clone()),
            BrokerConfig::default(),
        ));
        SplitPlanner::new(jobs, source, connections, PlannerConfig::default())
    }

    fn harness(total: u64) -> Harness {
        let broker = InMemoryBroker::new();
        let jobs = Arc::new(InMemoryJobStore::default());
        let planner = planner_on(&broker, jobs.clone(), total);
        Harness {
            broker,
            jobs,
            planner,
        }
    }

    #[test]
    fn test_split_count_examples() {
        assert_eq!(split_count(250, 100), 3);
        assert_eq!(split_count(200, 100), 2);
        assert_eq!(split_count(1, 100), 1);
        assert_eq!(split_count(0, 100), 0);
        assert_eq!(split_count(u64::MAX, 1), u64::MAX);
    }

    #[tokio::test]
    async fn test_plan_publishes_every_split_then_deletes_job() {
        let h = harness(250);
        let id = h.jobs.insert(Some("job-a"), 100, 0);

        let outcome = h.planner.plan_next_job().await.unwrap();

        assert_eq!(outcome, PlanOutcome::published("job-a", 3));
        let splits: Vec<SplitMessage> = h.broker.peek("crawl_splits");
        let numbers: Vec<u32> = splits.iter().map(|s| s.split_number).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
        assert!(splits.iter().all(|s| s.job_id == "job-a" && s.page_size == 100));
        assert!(h.broker.all_persistent("crawl_splits"));
        assert!(h.jobs.get(id).is_none());
        assert_eq!(h.broker.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_zero_items_deletes_job_without_publishing() {
        let h = harness(0);
        h.jobs.insert(Some("job-empty"), 100, 0);

        let outcome = h.planner.plan_next_job().await.unwrap();

        assert_eq!(outcome, PlanOutcome::skipped("job-empty"));
        assert_eq!(h.broker.published_count(), 0);
        assert!(h.jobs.is_empty());
    }

    #[tokio::test]
    async fn test_no_job_is_idle() {
        let h = harness(10);
        assert_eq!(h.planner.plan_next_job().await.unwrap(), PlanOutcome::idle());
    }

    #[tokio::test]
    async fn test_invalid_page_size_is_deleted() {
        let h = harness(10);
        h.jobs.insert(Some("job-bad"), 0, 0);

        let outcome = h.planner.plan_next_job().await.unwrap();
        assert!(outcome.skipped);
        assert!(h.jobs.is_empty());
        assert_eq!(h.broker.published_count(), 0);
    }

    #[tokio::test]
    async fn test_job_id_falls_back_to_row_id() {
        let h = harness(5);
        let id = h.jobs.insert(None, 10, 0);

        h.planner.plan_next_job().await.unwrap();
        let splits: Vec<SplitMessage> = h.broker.peek("crawl_splits");
        assert_eq!(splits[0].job_id, id.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_leaves_job_for_retry() {
        let h = harness(30);
        let id = h.jobs.insert(Some("job-a"), 10, 0);
        h.broker.fail_next_publishes(1);

        assert!(h.planner.plan_next_job().await.is_err());

        let stored = h.jobs.get(id).expect("job stays in the store");
        assert_eq!(stored.split_count, Some(3));
        assert_eq!(stored.total_articles, Some(30));
        assert!(stored.claimed_at.is_none());

        // the retry re-plans from scratch
        let outcome = h.planner.plan_next_job().await.unwrap();
        assert_eq!(outcome.published, 3);
        assert!(h.jobs.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_are_throttled_by_sleep() {
        let h = harness(30);
        h.jobs.insert(Some("job-a"), 10, 250);

        let started = Instant::now();
        h.planner.plan_next_job().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(750));
    }

    #[tokio::test]
    async fn test_failed_plan_record_releases_claim() {
        let h = harness(30);
        let id = h.jobs.insert(Some("job-a"), 10, 0);
        h.jobs.fail_next_record_plan();

        assert!(h.planner.plan_next_job().await.is_err());
        assert_eq!(h.broker.published_count(), 0);
        assert!(h.jobs.get(id).unwrap().claimed_at.is_none());
    }

    #[tokio::test]
    async fn test_job_id_that_cannot_name_files_is_deleted() {
        let h = harness(30);
        for bad in ["../escape", "a/b", "a\\b"] {
            h.jobs.insert(Some(bad), 10, 0);
            let outcome = h.planner.plan_next_job().await.unwrap();
            assert_eq!(outcome, PlanOutcome::skipped(bad));
        }
        assert!(h.jobs.is_empty());
        assert_eq!(h.broker.published_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_job_is_not_claimed_twice() {
        let broker = InMemoryBroker::new();
        let jobs = Arc::new(InMemoryJobStore::default());
        jobs.insert(Some("job-slow"), 1, 30_000);
        let first = Arc::new(planner_on(&broker, jobs.clone(), 30));
        let second = planner_on(&broker, jobs.clone(), 30);

        let publishing = tokio::spawn({
            let first = first.clone();
            async move { first.plan_next_job().await }
        });

        // 30 splits x 30s outlast the 600s claim timeout
        sleep(Duration::from_secs(700)).await;
        assert_eq!(second.plan_next_job().await.unwrap(), PlanOutcome::idle());

        let outcome = publishing.await.unwrap().unwrap();
        assert_eq!(outcome, PlanOutcome::published("job-slow", 30));
        assert_eq!(broker.queue_depth("crawl_splits"), 30);
        assert!(jobs.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_is_renewed_during_a_long_throttle() {
        let broker = InMemoryBroker::new();
        let jobs = Arc::new(InMemoryJobStore::default());
        jobs.insert(Some("job-sleepy"), 1, 1_000_000);
        let planner = Arc::new(planner_on(&broker, jobs.clone(), 2));

        let started = Instant::now();
        let publishing = tokio::spawn({
            let planner = planner.clone();
            async move { planner.plan_next_job().await }
        });

        // one throttle of 1000s, renewed at 300s and 600s
        sleep(Duration::from_secs(650)).await;
        assert!(jobs.claim_next().await.unwrap().is_none());

        let outcome = publishing.await.unwrap().unwrap();
        assert_eq!(outcome, PlanOutcome::published("job-sleepy", 2));
        assert_eq!(started.elapsed(), Duration::from_secs(2_000));
        assert!(jobs.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_planner_stops_when_claim_is_taken_over() {
        let broker = InMemoryBroker::new();
        let jobs = Arc::new(InMemoryJobStore::new(Duration::from_secs(60)));
        let id = jobs.insert(Some("job-a"), 1, 90_000);
        let planner = Arc::new(planner_on(&broker, jobs.clone(), 5));

        let publishing = tokio::spawn({
            let planner = planner.clone();
            async move { planner.plan_next_job().await }
        });

        sleep(Duration::from_secs(61)).await;
        let takeover = jobs.claim_next().await.unwrap().expect("claim expired");

        assert!(publishing.await.unwrap().is_err());
        assert_eq!(broker.queue_depth("crawl_splits"), 1);
        let stored = jobs.get(id).expect("job stays with the new claim");
        assert_eq!(stored.claim_token, takeover.claim_token);
    }
}
