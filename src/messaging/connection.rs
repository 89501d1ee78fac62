//! # Connection Manager
//!
//! Acquires purpose-scoped broker sessions with capped exponential backoff.
//!
//! Consume sessions declare both pipeline queues and set the prefetch window so a
//! worker never holds more than one unacknowledged unit. Publish sessions only
//! declare the completion queue; a publisher that targets another queue declares
//! it on its own session.
//!
//! A [`Session`] is released on every exit path: `close().await` on the happy
//! path, or a background close spawned from `Drop` when the owner bails out early.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use super::errors::{MessagingError, MessagingResult};
use super::message::QueueMessage;
use super::service::{
    BrokerConnector, BrokerSession, Delivery, QueueTopology, SessionParams, SessionPurpose,
};
use crate::config::BrokerConfig;

/// Wait before retry number `attempt + 1`: `min(2^attempt, cap)` seconds
pub fn backoff_delay(attempt: u32, cap_seconds: u64) -> Duration {
    let seconds = 2u64.checked_pow(attempt).unwrap_or(u64::MAX).min(cap_seconds);
    Duration::from_secs(seconds)
}

pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    config: BrokerConfig,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("provider", &self.connector.provider_name())
            .field("work_queue", &self.config.work_queue)
            .field("completion_queue", &self.config.completion_queue)
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn BrokerConnector>, config: BrokerConfig) -> Self {
        Self { connector, config }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn work_queue(&self) -> QueueTopology {
        let topology = if self.config.dead_letter {
            QueueTopology::with_dead_letter(&self.config.work_queue)
        } else {
            QueueTopology::durable(&self.config.work_queue)
        };
        topology.with_consumer_timeout(self.config.work_queue_consumer_timeout())
    }

    pub fn completion_queue(&self) -> QueueTopology {
        QueueTopology::durable(&self.config.completion_queue)
    }

    /// Acquire with the configured retry count and heartbeat
    pub async fn acquire(&self, purpose: SessionPurpose) -> MessagingResult<Session> {
        self.acquire_with(purpose, self.config.retry_count, self.config.heartbeat_seconds)
            .await
    }

    /// Try up to `retry_count` times, sleeping `min(2^attempt, max_backoff)`
    /// seconds between attempts. Exhaustion yields [`MessagingError::Unavailable`].
    #[instrument(skip(self), fields(provider = self.connector.provider_name()))]
    pub async fn acquire_with(
        &self,
        purpose: SessionPurpose,
        retry_count: u32,
        heartbeat_seconds: u16,
    ) -> MessagingResult<Session> {
        let params = SessionParams {
            purpose,
            heartbeat_seconds,
            tuning: self.config.tuning(purpose),
        };

        for attempt in 0..retry_count {
            match self.open_session(&params).await {
                Ok(session) => {
                    info!(purpose = %purpose, attempt = attempt + 1, "Connected to broker");
                    return Ok(session);
                }
                Err(e) => {
                    error!(
                        purpose = %purpose,
                        attempt = attempt + 1,
                        retry_count = retry_count,
                        error = %e,
                        "Error connecting to broker"
                    );
                    if attempt + 1 < retry_count {
                        let wait = backoff_delay(attempt, self.config.max_backoff_seconds);
                        info!(wait_seconds = wait.as_secs(), "Retrying broker connection");
                        sleep(wait).await;
                    }
                }
            }
        }

        error!(
            severity = "FATAL",
            purpose = %purpose,
            attempts = retry_count,
            "Failed to connect to broker"
        );
        Err(MessagingError::unavailable(purpose, retry_count))
    }

    async fn open_session(&self, params: &SessionParams) -> MessagingResult<Session> {
        let raw = self.connector.open(params).await?;
        let session = Session::new(params.purpose, raw);

        match params.purpose {
            SessionPurpose::Consume => {
                session.declare(&self.work_queue()).await?;
                session.declare(&self.completion_queue()).await?;
                if let Some(prefetch) = params.tuning.prefetch {
                    session.set_prefetch(prefetch).await?;
                }
            }
            SessionPurpose::Publish => {
                session.declare(&self.completion_queue()).await?;
            }
        }

        Ok(session)
    }
}

/// A purpose-scoped broker session
pub struct Session {
    purpose: SessionPurpose,
    inner: Option<Box<dyn BrokerSession>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("purpose", &self.purpose)
            .field("open", &self.inner.is_some())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(purpose: SessionPurpose, inner: Box<dyn BrokerSession>) -> Self {
        Self {
            purpose,
            inner: Some(inner),
        }
    }

    pub fn purpose(&self) -> SessionPurpose {
        self.purpose
    }

    fn inner(&self) -> MessagingResult<&dyn BrokerSession> {
        self.inner.as_deref().ok_or(MessagingError::SessionClosed)
    }

    pub async fn declare(&self, topology: &QueueTopology) -> MessagingResult<()> {
        self.inner()?.declare_queue(topology).await
    }

    pub async fn set_prefetch(&self, count: u16) -> MessagingResult<()> {
        self.inner()?.set_prefetch(count).await
    }

    /// Serialize and publish persistently, waiting for the broker's confirm
    pub async fn publish_message<M: QueueMessage>(
        &self,
        queue_name: &str,
        message: &M,
    ) -> MessagingResult<()> {
        let bytes = message.to_bytes()?;
        self.inner()?.publish(queue_name, &bytes).await
    }

    pub async fn next_delivery(
        &self,
        queue_name: &str,
        wait: Duration,
    ) -> MessagingResult<Option<Delivery>> {
        self.inner()?.next_delivery(queue_name, wait).await
    }

    pub async fn ack(&self, delivery: &Delivery) -> MessagingResult<()> {
        self.inner()?.ack(delivery.delivery_tag).await
    }

    pub async fn nack(&self, delivery: &Delivery, requeue: bool) -> MessagingResult<()> {
        self.inner()?.nack(delivery.delivery_tag, requeue).await
    }

    pub async fn close(mut self) {
        if let Some(inner) = self.inner.take() {
            match inner.close().await {
                Ok(()) => debug!(purpose = %self.purpose, "Broker session closed"),
                Err(e) => {
                    warn!(purpose = %self.purpose, error = %e, "Error closing broker session")
                }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        let purpose = self.purpose;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = inner.close().await {
                        warn!(
                            purpose = %purpose,
                            error = %e,
                            "Error closing dropped broker session"
                        );
                    }
                });
            }
            Err(_) => {
                warn!(purpose = %purpose, "Broker session dropped outside a runtime");
            }
        }
    }
}
