//! # Split Executor
//!
//! Consumes split messages one at a time and crawls each split's page range.
//!
//! ## Fetch and combine
//!
//! Pages are requested in increasing order. A malformed page is skipped. An empty
//! page more than `early_stop_after_pages` pages into the split ends the split;
//! an earlier empty page is treated as a gap. Transient failures are retried with
//! a fixed backoff before the page is given up on, never the whole split. The
//! first page that carries a `messages` block supplies the artifact metadata and
//! every `count` in it is patched to the real number of items combined.
//!
//! ## Delivery contract
//!
//! A split is acknowledged only after its artifacts are written and the
//! completion message is confirmed. Undecodable payloads are dead-lettered; a
//! failed split is requeued once and dead-lettered when it fails again.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use super::completion_publisher::CompletionPublisher;
use super::sleep_or_shutdown;
use super::types::{CombinedPages, SplitOutcome, SplitRange};
use crate::config::ExecutorConfig;
use crate::constants::fields;
use crate::error::Result;
use crate::messaging::{
    ConnectionManager, Delivery, QueueMessage, Session, SessionPurpose, SplitMessage,
};
use crate::source::{ArticleSource, IsRetryable, SourceError, SourcePage};
use crate::storage::{ArtifactStore, SplitSummary};

pub struct SplitExecutor {
    source: Arc<dyn ArticleSource>,
    artifacts: ArtifactStore,
    publisher: CompletionPublisher,
    connections: Arc<ConnectionManager>,
    config: ExecutorConfig,
}

impl std::fmt::Debug for SplitExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitExecutor")
            .field("artifacts", &self.artifacts)
            .field("config", &self.config)
            .finish()
    }
}

impl SplitExecutor {
    pub fn new(
        source: Arc<dyn ArticleSource>,
        artifacts: ArtifactStore,
        connections: Arc<ConnectionManager>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            source,
            artifacts,
            publisher: CompletionPublisher::new(connections.clone()),
            connections,
            config,
        }
    }

    /// Consume splits until shutdown, re-acquiring the consume session after failures
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let broker = self.connections.config().clone();
        info!(queue = %broker.work_queue, "🚀 Split executor started");

        loop {
            let session = match self.connections.acquire(SessionPurpose::Consume).await {
                Ok(session) => session,
                Err(e) => {
                    error!(
                        error = %e,
                        retry_in_seconds = broker.reconnect_delay_seconds,
                        "Failed to get broker connection"
                    );
                    let delay = Duration::from_secs(broker.reconnect_delay_seconds);
                    if sleep_or_shutdown(delay, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            info!("Waiting for messages...");
            let result = self.consume(&session, &mut shutdown).await;
            session.close().await;

            match result {
                Ok(()) => break,
                Err(e) => {
                    error!(error = %e, "Error consuming messages");
                    if sleep_or_shutdown(
                        Duration::from_secs(broker.consume_retry_delay_seconds),
                        &mut shutdown,
                    )
                    .await
                    {
                        break;
                    }
                }
            }
        }

        info!("Split executor stopped");
    }

    async fn consume(&self, session: &Session, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let wait = self.connections.config().poll_wait();
        while !*shutdown.borrow() {
            self.process_next(session, wait).await?;
        }
        Ok(())
    }

    /// Handle at most one delivery from the work queue; `false` when none arrived in time
    pub async fn process_next(&self, session: &Session, wait: Duration) -> Result<bool> {
        let queue = &self.connections.config().work_queue;
        let Some(delivery) = session.next_delivery(queue, wait).await? else {
            return Ok(false);
        };
        self.handle_delivery(session, &delivery).await?;
        Ok(true)
    }

    async fn handle_delivery(&self, session: &Session, delivery: &Delivery) -> Result<()> {
        let split = match SplitMessage::from_bytes(&delivery.payload)
            .map_err(|e| e.to_string())
            .and_then(|split| split.validate().map(|()| split))
        {
            Ok(split) => split,
            Err(reason) => {
                error!(
                    delivery_tag = delivery.delivery_tag,
                    reason = %reason,
                    "Rejecting invalid split message"
                );
                session.nack(delivery, false).await?;
                return Ok(());
            }
        };

        info!(
            job_id = %split.job_id,
            split_number = split.split_number,
            page_size = split.page_size,
            redelivered = delivery.redelivered,
            "Received split"
        );

        match self.handle_split(&split).await {
            Ok(outcome) => {
                session.ack(delivery).await?;
                info!(
                    job_id = %split.job_id,
                    split_number = split.split_number,
                    artifact = %outcome.artifact_path().display(),
                    "Split acknowledged"
                );
            }
            Err(e) => {
                let requeue = !delivery.redelivered;
                error!(
                    job_id = %split.job_id,
                    split_number = split.split_number,
                    error = %e,
                    requeue = requeue,
                    "Split failed"
                );
                session.nack(delivery, requeue).await?;
            }
        }
        Ok(())
    }

    /// Execute a split and announce it downstream
    pub async fn handle_split(&self, split: &SplitMessage) -> Result<SplitOutcome> {
        let outcome = self
            .execute_split(&split.job_id, split.split_number, split.page_size)
            .await?;
        self.publisher.announce(split).await?;
        Ok(outcome)
    }

    /// Crawl the split's pages and write its artifacts
    #[instrument(skip(self))]
    pub async fn execute_split(
        &self,
        job_id: &str,
        split_number: u32,
        page_size: u32,
    ) -> Result<SplitOutcome> {
        let range = SplitRange::for_split(split_number, page_size);
        info!(
            start_page = range.start_page,
            end_page = range.end_page,
            "Processing split pages"
        );

        let CombinedPages {
            artifact,
            pages_processed,
            articles_downloaded,
        } = self.fetch_and_combine(range).await;

        let combined_path = if articles_downloaded > 0 {
            let path = self
                .artifacts
                .write_combined(job_id, split_number, &artifact)
                .await?;
            info!(
                articles = articles_downloaded,
                pages = pages_processed,
                "Saved combined split file"
            );
            Some(path)
        } else {
            warn!("No articles were downloaded for split");
            None
        };

        let summary = SplitSummary {
            job_id: job_id.to_string(),
            split_number,
            start_page: range.start_page,
            end_page: range.effective_end(pages_processed),
            pages_processed,
            total_articles_downloaded: articles_downloaded,
        };
        let summary_path = self.artifacts.write_summary(&summary).await?;

        info!(
            articles = articles_downloaded,
            pages = pages_processed,
            "Split completed"
        );

        Ok(SplitOutcome {
            summary,
            summary_path,
            combined_path,
        })
    }

    /// The fetch-and-combine loop over one page range
    pub async fn fetch_and_combine(&self, range: SplitRange) -> CombinedPages {
        let mut combined = CombinedPages::default();

        for page in range.pages() {
            let page_data = match self.fetch_page_with_retry(page).await {
                Ok(page_data) => page_data,
                Err(SourceError::Malformed { reason, .. }) => {
                    warn!(
                        page = page,
                        reason = %reason,
                        "Page response is not in the expected format"
                    );
                    continue;
                }
                Err(e) => {
                    error!(page = page, error = %e, "Giving up on page");
                    continue;
                }
            };

            if page_data.is_empty() {
                warn!(page = page, "No articles found on page");
                if page - range.start_page > self.config.early_stop_after_pages {
                    info!(page = page, "Reached end of collection");
                    break;
                }
                continue;
            }

            let SourcePage {
                messages,
                collection,
            } = page_data;
            if combined.artifact.messages.is_empty() && !messages.is_empty() {
                combined.artifact.messages = messages;
            }

            let items = collection.len() as u64;
            combined.artifact.collection.extend(collection);
            combined.articles_downloaded += items;
            combined.pages_processed += 1;
            debug!(
                page = page,
                items = items,
                total_so_far = combined.articles_downloaded,
                "Added page articles"
            );

            let delay = self.config.page_delay();
            if !delay.is_zero() {
                sleep(delay).await;
            }
        }

        if combined.articles_downloaded > 0 {
            let actual = combined.artifact.collection.len();
            patch_counts(&mut combined.artifact.messages, actual);
        }

        combined
    }

    async fn fetch_page_with_retry(
        &self,
        page: u64,
    ) -> std::result::Result<SourcePage, SourceError> {
        let max_retries = self.config.page_retry_attempts;
        let mut retries = 0;

        loop {
            match self.source.fetch_page(page).await {
                Ok(page_data) => return Ok(page_data),
                Err(e) if e.is_retryable() && retries < max_retries => {
                    retries += 1;
                    warn!(
                        page = page,
                        attempt = retries,
                        max_retries = max_retries,
                        error = %e,
                        "Retrying page"
                    );
                    sleep(self.config.page_retry_backoff()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Replace every `count` in the metadata block with the real item count
fn patch_counts(messages: &mut [Value], actual: usize) {
    for message in messages.iter_mut() {
        if let Some(count) = message
            .as_object_mut()
            .and_then(|m| m.get_mut(fields::COUNT))
        {
            *count = Value::from(actual);
        }
    }
}
