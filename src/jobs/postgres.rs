//! # PostgreSQL Job Store
//!
//! Claims rows of `crawl_jobs` with `FOR UPDATE SKIP LOCKED`, so several planners
//! can poll the same table without ever planning one job twice at a time.
//! A claim older than the claim timeout belongs to a planner that died and is
//! claimable again; a live planner renews `claimed_at` while it publishes.
//! Every write after the claim matches on `claimed_by` and `claim_token`.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use super::{JobRecord, JobStore};
use crate::error::{CrawlerError, Result};

#[derive(Debug, FromRow)]
struct JobRow {
    id: i64,
    job_id: Option<String>,
    page_size: i32,
    sleep_ms: i64,
}

impl From<JobRow> for JobRecord {
    fn from(row: JobRow) -> Self {
        JobRecord::new(
            row.id,
            row.job_id,
            i64::from(row.page_size),
            u64::try_from(row.sleep_ms).unwrap_or(0),
        )
    }
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
    claimer_id: String,
    claim_timeout: Duration,
}

impl PgJobStore {
    pub fn new(pool: PgPool, claimer_id: impl Into<String>, claim_timeout: Duration) -> Self {
        Self {
            pool,
            claimer_id: claimer_id.into(),
            claim_timeout,
        }
    }

    pub fn claimer_id(&self) -> &str {
        &self.claimer_id
    }

    fn token(job: &JobRecord) -> Result<Uuid> {
        job.claim_token.ok_or_else(|| job.claim_lost())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self), fields(claimer = %self.claimer_id))]
    async fn claim_next(&self) -> Result<Option<JobRecord>> {
        let query = r#"
            UPDATE crawl_jobs
            SET claimed_by = $1, claim_token = $3, claimed_at = now(), updated_at = now()
            WHERE id = (
                SELECT id FROM crawl_jobs
                WHERE claimed_at IS NULL
                   OR claimed_at < now() - make_interval(secs => $2)
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, job_id, page_size, sleep_ms
        "#;

        let token = Uuid::new_v4();
        let row = sqlx::query_as::<_, JobRow>(query)
            .bind(&self.claimer_id)
            .bind(self.claim_timeout.as_secs_f64())
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to claim crawl job: {}", e);
                CrawlerError::JobStore(format!("Job claiming failed: {e}"))
            })?;

        let job = row.map(|row| JobRecord::from(row).with_claim_token(token));
        if let Some(job) = &job {
            debug!(job_id = %job.job_id, id = job.id, "Claimed crawl job");
        }
        Ok(job)
    }

    async fn record_plan(
        &self,
        job: &JobRecord,
        split_count: u32,
        total_articles: u64,
    ) -> Result<()> {
        let splits = i32::try_from(split_count).map_err(|_| {
            CrawlerError::validation(format!(
                "split count {split_count} does not fit the job table"
            ))
        })?;
        let total = i64::try_from(total_articles).map_err(|_| {
            CrawlerError::validation(format!("total {total_articles} does not fit the job table"))
        })?;

        let updated = sqlx::query(
            "UPDATE crawl_jobs SET split_count = $4, total_articles = $5, updated_at = now() \
             WHERE id = $1 AND claimed_by = $2 AND claim_token = $3",
        )
        .bind(job.id)
        .bind(&self.claimer_id)
        .bind(Self::token(job)?)
        .bind(splits)
        .bind(total)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(job_id = %job.job_id, "Failed to record job plan: {}", e);
            CrawlerError::JobStore(format!("Recording plan failed: {e}"))
        })?;

        if updated.rows_affected() == 0 {
            warn!(job_id = %job.job_id, "Claim lost before the plan was recorded");
            return Err(job.claim_lost());
        }
        Ok(())
    }

    async fn renew_claim(&self, job: &JobRecord) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE crawl_jobs SET claimed_at = now(), updated_at = now() \
             WHERE id = $1 AND claimed_by = $2 AND claim_token = $3",
        )
        .bind(job.id)
        .bind(&self.claimer_id)
        .bind(Self::token(job)?)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(job_id = %job.job_id, "Failed to renew job claim: {}", e);
            CrawlerError::JobStore(format!("Job claim renewal failed: {e}"))
        })?;

        if updated.rows_affected() == 0 {
            warn!(job_id = %job.job_id, "Job claim was taken over");
            return Err(job.claim_lost());
        }
        Ok(())
    }

    async fn release(&self, job: &JobRecord) -> Result<()> {
        sqlx::query(
            "UPDATE crawl_jobs \
             SET claimed_by = NULL, claim_token = NULL, claimed_at = NULL, updated_at = now() \
             WHERE id = $1 AND claimed_by = $2 AND claim_token = $3",
        )
        .bind(job.id)
        .bind(&self.claimer_id)
        .bind(job.claim_token)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(job_id = %job.job_id, "Failed to release job claim: {}", e);
            CrawlerError::JobStore(format!("Job claim release failed: {e}"))
        })?;

        Ok(())
    }

    async fn delete(&self, job: &JobRecord) -> Result<()> {
        let deleted = sqlx::query(
            "DELETE FROM crawl_jobs WHERE id = $1 AND claimed_by = $2 AND claim_token = $3",
        )
        .bind(job.id)
        .bind(&self.claimer_id)
        .bind(Self::token(job)?)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(job_id = %job.job_id, "Failed to delete job: {}", e);
            CrawlerError::JobStore(format!("Job deletion failed: {e}"))
        })?;

        if deleted.rows_affected() == 0 {
            warn!(job_id = %job.job_id, "Claim lost before the job was deleted");
            return Err(job.claim_lost());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    async fn insert_job(pool: &PgPool, job_id: Option<&str>, page_size: i32) -> i64 {
        sqlx::query(
            "INSERT INTO crawl_jobs (job_id, page_size, sleep_ms) VALUES ($1, $2, 0) RETURNING id",
        )
        .bind(job_id)
        .bind(page_size)
        .fetch_one(pool)
        .await
        .unwrap()
        .get("id")
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    #[ignore = "requires PostgreSQL via DATABASE_URL"]
    async fn test_claim_is_exclusive(pool: PgPool) {
        insert_job(&pool, Some("job-a"), 10).await;

        let first = PgJobStore::new(pool.clone(), "planner-1", Duration::from_secs(600));
        let second = PgJobStore::new(pool.clone(), "planner-2", Duration::from_secs(600));

        let claimed = first.claim_next().await.unwrap().expect("job should be claimable");
        assert_eq!(claimed.job_id, "job-a");
        assert!(second.claim_next().await.unwrap().is_none());

        first.release(&claimed).await.unwrap();
        assert!(second.claim_next().await.unwrap().is_some());
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    #[ignore = "requires PostgreSQL via DATABASE_URL"]
    async fn test_record_plan_and_delete(pool: PgPool) {
        let id = insert_job(&pool, None, 100).await;
        let store = PgJobStore::new(pool.clone(), "planner-1", Duration::from_secs(600));

        let job = store.claim_next().await.unwrap().unwrap();
        assert_eq!(job.job_id, id.to_string());

        store.record_plan(&job, 3, 250).await.unwrap();
        let row = sqlx::query("SELECT split_count, total_articles FROM crawl_jobs WHERE id = $1")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<Option<i32>, _>("split_count"), Some(3));
        assert_eq!(row.get::<Option<i64>, _>("total_articles"), Some(250));

        store.delete(&job).await.unwrap();
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    #[ignore = "requires PostgreSQL via DATABASE_URL"]
    async fn test_abandoned_claim_is_reclaimable(pool: PgPool) {
        insert_job(&pool, Some("job-b"), 10).await;
        sqlx::query(
            "UPDATE crawl_jobs SET claimed_by = 'dead', claimed_at = now() - interval '1 hour'",
        )
        .execute(&pool)
        .await
        .unwrap();

        let store = PgJobStore::new(pool, "planner-1", Duration::from_secs(600));
        assert!(store.claim_next().await.unwrap().is_some());
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    #[ignore = "requires PostgreSQL via DATABASE_URL"]
    async fn test_taken_over_claim_cannot_delete(pool: PgPool) {
        let id = insert_job(&pool, Some("job-c"), 10).await;
        let store = PgJobStore::new(pool.clone(), "planner-1", Duration::from_secs(600));
        let stale = store.claim_next().await.unwrap().unwrap();

        sqlx::query("UPDATE crawl_jobs SET claimed_at = now() - interval '1 hour'")
            .execute(&pool)
            .await
            .unwrap();
        let other = PgJobStore::new(pool.clone(), "planner-2", Duration::from_secs(600));
        let current = other.claim_next().await.unwrap().unwrap();

        assert!(store.renew_claim(&stale).await.is_err());
        assert!(store.record_plan(&stale, 1, 10).await.is_err());
        assert!(store.delete(&stale).await.is_err());

        other.renew_claim(&current).await.unwrap();
        other.delete(&current).await.unwrap();
        let remaining: i64 = sqlx::query("SELECT count(*) AS n FROM crawl_jobs WHERE id = $1")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("n");
        assert_eq!(remaining, 0);
    }
}
