//! # Completion Publisher
//!
//! Announces that a split's artifacts are on shared storage. Every announcement
//! acquires its own publish session, so a slow crawl never keeps a publishing
//! connection idle, and waits for the broker's confirm before returning.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::error::Result;
use crate::messaging::{
    CompletionMessage, ConnectionManager, QueueMessage, SessionPurpose, SplitMessage,
};

#[derive(Debug, Clone)]
pub struct CompletionPublisher {
    connections: Arc<ConnectionManager>,
}

impl CompletionPublisher {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// Publish `DOWNLOADED` for a finished split
    #[instrument(
        skip(self, split),
        fields(job_id = %split.job_id, split_number = split.split_number)
    )]
    pub async fn announce(&self, split: &SplitMessage) -> Result<CompletionMessage> {
        let message = CompletionMessage::downloaded(split);
        let queue = self.connections.config().completion_queue.clone();
        self.publish(&queue, &message).await?;
        info!(queue = %queue, "📣 Published completion message");
        Ok(message)
    }

    /// Publish any message on a fresh publish session, closing it afterwards
    pub async fn publish<M: QueueMessage>(&self, queue_name: &str, message: &M) -> Result<()> {
        let session = self.connections.acquire(SessionPurpose::Publish).await?;
        let result = session.publish_message(queue_name, message).await;
        session.close().await;
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::messaging::{CompletionStatus, InMemoryBroker, MessagingError};
    use crate::error::CrawlerError;

    fn publisher(broker: &InMemoryBroker) -> CompletionPublisher {
        let manager = ConnectionManager::new(Arc::new(broker.clone()), BrokerConfig::default());
        CompletionPublisher::new(Arc::new(manager))
    }

    #[tokio::test]
    async fn test_announce_publishes_downloaded_status() {
        let broker = InMemoryBroker::new();
        let publisher = publisher(&broker);

        let split = SplitMessage::new("job-1", 10, 100, 2);
        publisher.announce(&split).await.unwrap();

        let published: Vec<CompletionMessage> = broker.peek("crawl_splits_downloaded");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].split_number, 2);
        assert_eq!(published[0].status, CompletionStatus::Downloaded);
        assert!(broker.all_persistent("crawl_splits_downloaded"));
        assert_eq!(broker.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_rejected_publish_is_an_error() {
        let broker = InMemoryBroker::new();
        broker.fail_next_publishes(1);
        let publisher = publisher(&broker);

        let result = publisher.announce(&SplitMessage::new("job-1", 10, 0, 0)).await;
        assert!(matches!(
            result,
            Err(CrawlerError::Messaging(MessagingError::PublishNacked { .. }))
        ));
        assert_eq!(broker.open_sessions(), 0);
    }
}
