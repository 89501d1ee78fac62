//! # Broker Service Traits
//!
//! Provider-agnostic seams between the Connection Manager and a concrete broker.
//! A [`BrokerConnector`] opens raw sessions; a [`BrokerSession`] is one
//! connection + channel pair with the handful of AMQP-style operations the
//! pipeline needs.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::errors::MessagingResult;
use crate::constants::queues::{DEAD_LETTER_EXCHANGE_SUFFIX, DEAD_LETTER_QUEUE_SUFFIX};

/// What a session will be used for; selects tuning and queue declarations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPurpose {
    Consume,
    Publish,
}

impl fmt::Display for SessionPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPurpose::Consume => write!(f, "consume"),
            SessionPurpose::Publish => write!(f, "publish"),
        }
    }
}

/// Per-purpose connection tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTuning {
    /// Upper bound on any single broker round-trip (publish confirm, declare)
    pub blocked_timeout: Duration,
    /// Connection attempts inside one acquire
    pub connection_attempts: u32,
    /// Unacknowledged deliveries allowed in flight; `None` leaves QoS untouched
    pub prefetch: Option<u16>,
}

/// Everything a connector needs to open one session
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub purpose: SessionPurpose,
    pub heartbeat_seconds: u16,
    pub tuning: SessionTuning,
}

/// Durable queue declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub name: String,
    /// Route rejected deliveries to `{name}_dlq` through `{name}_dlx`
    pub dead_letter: bool,
    /// How long the broker lets a delivery stay unacknowledged before it closes
    /// the consuming channel; `None` keeps the broker-wide `consumer_timeout`
    pub consumer_timeout: Option<Duration>,
}

impl QueueTopology {
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dead_letter: false,
            consumer_timeout: None,
        }
    }

    pub fn with_dead_letter(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dead_letter: true,
            consumer_timeout: None,
        }
    }

    pub fn with_consumer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.consumer_timeout = timeout;
        self
    }

    pub fn dead_letter_exchange(&self) -> String {
        format!("{}{}", self.name, DEAD_LETTER_EXCHANGE_SUFFIX)
    }

    pub fn dead_letter_queue(&self) -> String {
        format!("{}{}", self.name, DEAD_LETTER_QUEUE_SUFFIX)
    }
}

/// A message handed to a consumer and not yet acknowledged
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub queue: String,
    pub payload: Vec<u8>,
    /// The broker delivered this message before and it was not acknowledged
    pub redelivered: bool,
}

#[async_trait]
pub trait BrokerSession: Send + Sync + 'static {
    /// Declare a durable queue (idempotent)
    async fn declare_queue(&self, topology: &QueueTopology) -> MessagingResult<()>;

    /// Limit unacknowledged deliveries on this session
    async fn set_prefetch(&self, count: u16) -> MessagingResult<()>;

    /// Publish a persistent JSON message and wait for the broker to confirm it
    async fn publish(&self, queue_name: &str, payload: &[u8]) -> MessagingResult<()>;

    /// Wait up to `wait` for the next delivery from `queue_name`
    async fn next_delivery(
        &self,
        queue_name: &str,
        wait: Duration,
    ) -> MessagingResult<Option<Delivery>>;

    async fn ack(&self, delivery_tag: u64) -> MessagingResult<()>;

    /// Reject a delivery; `requeue = false` dead-letters it when configured
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> MessagingResult<()>;

    /// Close channel and connection; unacknowledged deliveries return to the queue
    async fn close(&self) -> MessagingResult<()>;

    fn provider_name(&self) -> &'static str;
}

#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    /// Open one session; the Connection Manager owns retries across calls
    async fn open(&self, params: &SessionParams) -> MessagingResult<Box<dyn BrokerSession>>;

    fn provider_name(&self) -> &'static str;
}
