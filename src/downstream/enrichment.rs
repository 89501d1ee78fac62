//! # Entity Enrichment
//!
//! Consumes completion messages, annotates every record of the split's raw
//! artifact and writes the result under the same file name in the augmented
//! directory. Acknowledgement follows the split executor: ack after the write,
//! dead-letter undecodable payloads, requeue a failure once.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::annotator::EntityAnnotator;
use crate::constants::fields;
use crate::error::Result;
use crate::messaging::{
    CompletionMessage, ConnectionManager, Delivery, QueueMessage, Session, SessionPurpose,
};
use crate::orchestration::sleep_or_shutdown;
use crate::storage::{ArtifactStore, CombinedArtifact};

pub struct EntityEnrichmentWorker {
    annotator: Arc<dyn EntityAnnotator>,
    raw: ArtifactStore,
    augmented: ArtifactStore,
    connections: Arc<ConnectionManager>,
    text_field: String,
}

impl std::fmt::Debug for EntityEnrichmentWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityEnrichmentWorker")
            .field("raw", &self.raw)
            .field("augmented", &self.augmented)
            .field("text_field", &self.text_field)
            .finish()
    }
}

impl EntityEnrichmentWorker {
    pub fn new(
        annotator: Arc<dyn EntityAnnotator>,
        raw: ArtifactStore,
        augmented: ArtifactStore,
        connections: Arc<ConnectionManager>,
        text_field: impl Into<String>,
    ) -> Self {
        Self {
            annotator,
            raw,
            augmented,
            connections,
            text_field: text_field.into(),
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let broker = self.connections.config().clone();
        info!(queue = %broker.completion_queue, "🚀 Enrichment worker started");

        loop {
            let session = match self.connections.acquire(SessionPurpose::Consume).await {
                Ok(session) => session,
                Err(e) => {
                    error!(error = %e, "Failed to get broker connection");
                    let delay = Duration::from_secs(broker.reconnect_delay_seconds);
                    if sleep_or_shutdown(delay, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            let result = self.consume(&session, &mut shutdown).await;
            session.close().await;

            match result {
                Ok(()) => break,
                Err(e) => {
                    error!(error = %e, "Error consuming completion messages");
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

        info!("Enrichment worker stopped");
    }

    async fn consume(&self, session: &Session, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let wait = self.connections.config().poll_wait();
        while !*shutdown.borrow() {
            self.process_next(session, wait).await?;
        }
        Ok(())
    }

    /// Handle at most one completion message; `false` when none arrived in time
    pub async fn process_next(&self, session: &Session, wait: Duration) -> Result<bool> {
        let queue = &self.connections.config().completion_queue;
        let Some(delivery) = session.next_delivery(queue, wait).await? else {
            return Ok(false);
        };
        self.handle_delivery(session, &delivery).await?;
        Ok(true)
    }

    async fn handle_delivery(&self, session: &Session, delivery: &Delivery) -> Result<()> {
        let completion = match CompletionMessage::from_bytes(&delivery.payload)
            .map_err(|e| e.to_string())
            .and_then(|c| c.validate().map(|()| c))
        {
            Ok(completion) => completion,
            Err(reason) => {
                error!(
                    delivery_tag = delivery.delivery_tag,
                    reason = %reason,
                    "Rejecting invalid completion message"
                );
                session.nack(delivery, false).await?;
                return Ok(());
            }
        };

        match self
            .enrich_split(&completion.job_id, completion.split_number)
            .await
        {
            Ok(_) => session.ack(delivery).await?,
            Err(e) => {
                let requeue = !delivery.redelivered;
                error!(
                    job_id = %completion.job_id,
                    split_number = completion.split_number,
                    error = %e,
                    requeue = requeue,
                    "Enrichment failed"
                );
                session.nack(delivery, requeue).await?;
            }
        }
        Ok(())
    }

    /// Annotate one split's raw artifact; `None` when the split has no raw artifact
    #[instrument(skip(self))]
    pub async fn enrich_split(&self, job_id: &str, split_number: u32) -> Result<Option<PathBuf>> {
        let Some(mut artifact) = self.raw.read_combined(job_id, split_number).await? else {
            warn!("No raw artifact for split, nothing to enrich");
            return Ok(None);
        };

        self.annotate_artifact(&mut artifact).await?;
        let path = self
            .augmented
            .write_combined(job_id, split_number, &artifact)
            .await?;
        info!(records = artifact.collection.len(), path = %path.display(), "✅ Split enriched");
        Ok(Some(path))
    }

    /// Set `entities` on every record from its text field
    pub async fn annotate_artifact(&self, artifact: &mut CombinedArtifact) -> Result<()> {
        for record in artifact.collection.iter_mut() {
            let Some(fields_map) = record.as_object_mut() else {
                debug!("Skipping non-object record");
                continue;
            };
            let text = fields_map
                .get(&self.text_field)
                .and_then(Value::as_str)
                .unwrap_or_default();
            let entities = if text.is_empty() {
                Vec::new()
            } else {
                self.annotator.annotate(text).await?
            };
            fields_map.insert(fields::ENTITIES.to_string(), serde_json::to_value(entities)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::messaging::{InMemoryBroker, SplitMessage};
    use crate::test_helpers::RecordingAnnotator;
    use serde_json::json;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        broker: InMemoryBroker,
        raw: ArtifactStore,
        augmented: ArtifactStore,
        annotator: Arc<RecordingAnnotator>,
        worker: EntityEnrichmentWorker,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let raw = ArtifactStore::new(dir.path().join("raw"));
        let augmented = ArtifactStore::new(dir.path().join("augmented"));
        let broker = InMemoryBroker::new();
        let connections = Arc::new(ConnectionManager::new(
            Arc::new(broker.clone()),
            BrokerConfig::default(),
        ));
        let annotator = Arc::new(RecordingAnnotator::new());
        let worker = EntityEnrichmentWorker::new(
            annotator.clone(),
            raw.clone(),
            augmented.clone(),
            connections,
            "rel_abs",
        );
        Harness {
            _dir: dir,
            broker,
            raw,
            augmented,
            annotator,
            worker,
        }
    }

    fn artifact() -> CombinedArtifact {
        CombinedArtifact {
            messages: vec![json!({"status": "ok", "count": 2})],
            collection: vec![
                json!({"rel_doi": "10.1/a", "rel_abs": "Protein folding in yeast"}),
                json!({"rel_doi": "10.1/b"}),
            ],
        }
    }

    #[tokio::test]
    async fn test_enrich_split_writes_augmented_file() {
        let h = harness();
        h.raw.write_combined("job-a", 0, &artifact()).await.unwrap();

        let path = h.worker.enrich_split("job-a", 0).await.unwrap().unwrap();
        assert!(path.ends_with("job-a_0.json"));

        let enriched = h.augmented.read_combined("job-a", 0).await.unwrap().unwrap();
        assert_eq!(enriched.messages, artifact().messages);
        assert_eq!(enriched.collection[0]["entities"][0]["text"], "Protein");
        assert_eq!(enriched.collection[1]["entities"], json!([]));
        // empty text never reaches the annotator
        assert_eq!(h.annotator.calls(), vec!["Protein folding in yeast".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_raw_artifact_is_acknowledged() {
        let h = harness();
        let session = h.worker.connections.acquire(SessionPurpose::Consume).await.unwrap();
        let split = SplitMessage::new("job-empty", 10, 0, 4);
        session
            .publish_message("crawl_splits_downloaded", &CompletionMessage::downloaded(&split))
            .await
            .unwrap();

        assert!(h.worker.process_next(&session, Duration::from_millis(10)).await.unwrap());
        assert_eq!(h.broker.queue_depth("crawl_splits_downloaded"), 0);
        assert_eq!(h.broker.unacked_count(), 0);
        assert!(h.augmented.read_combined("job-empty", 4).await.unwrap().is_none());
        session.close().await;
    }

    #[tokio::test]
    async fn test_invalid_completion_is_dead_lettered() {
        let h = harness();
        let session = h.worker.connections.acquire(SessionPurpose::Consume).await.unwrap();
        h.broker.push_raw("crawl_splits_downloaded", b"{not json".to_vec());

        assert!(h.worker.process_next(&session, Duration::from_millis(10)).await.unwrap());
        assert_eq!(h.broker.queue_depth("crawl_splits_downloaded"), 0);
        assert_eq!(h.broker.unacked_count(), 0);
        session.close().await;
    }
}
