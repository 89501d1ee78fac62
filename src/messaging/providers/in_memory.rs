//! # In-Memory Broker
//!
//! Thread-safe stand-in for RabbitMQ used by tests and local runs.
//!
//! ## Semantics
//!
//! - **Prefetch**: a session never holds more unacknowledged deliveries than its QoS allows
//! - **Redelivery**: nack-with-requeue and closed sessions return messages to the head
//!   of their queue flagged `redelivered`
//! - **Dead letters**: nack-without-requeue moves the message to `{queue}_dlq` when the
//!   queue was declared with a dead-letter exchange, otherwise it is discarded
//! - **Strict routing**: publishing to an undeclared queue is an error rather than a
//!   silent drop, so a missing declaration shows up in tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::message::QueueMessage;
use crate::messaging::service::{
    BrokerConnector, BrokerSession, Delivery, QueueTopology, SessionParams,
};

const UNKNOWN_DELIVERY_TAG: &str = "PRECONDITION_FAILED - unknown delivery tag";

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    persistent: bool,
    redelivered: bool,
}

#[derive(Debug)]
struct Unacked {
    session_id: u64,
    queue: String,
    message: StoredMessage,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    topologies: HashMap<String, QueueTopology>,
    unacked: HashMap<u64, Unacked>,
    prefetch: HashMap<u64, u16>,
    open_sessions: HashSet<u64>,
    next_delivery_tag: u64,
    next_session_id: u64,
    connection_attempts: u32,
    fail_next_connections: u32,
    fail_next_publishes: u32,
    published: u64,
}

impl BrokerState {
    fn declare(&mut self, topology: &QueueTopology) -> MessagingResult<()> {
        if let Some(existing) = self.topologies.get(&topology.name) {
            if existing != topology {
                return Err(MessagingError::queue_declare(
                    &topology.name,
                    "PRECONDITION_FAILED - inequivalent arguments",
                ));
            }
            return Ok(());
        }

        self.topologies
            .insert(topology.name.clone(), topology.clone());
        self.queues.entry(topology.name.clone()).or_default();
        if topology.dead_letter {
            let dlq = QueueTopology::durable(topology.dead_letter_queue());
            self.queues.entry(dlq.name.clone()).or_default();
            self.topologies.entry(dlq.name.clone()).or_insert(dlq);
        }
        Ok(())
    }

    fn in_flight(&self, session_id: u64) -> usize {
        self.unacked
            .values()
            .filter(|u| u.session_id == session_id)
            .count()
    }

    fn take_next(
        &mut self,
        session_id: u64,
        queue_name: &str,
    ) -> MessagingResult<Option<Delivery>> {
        let limit = self.prefetch.get(&session_id).copied().unwrap_or(0);
        if limit > 0 && self.in_flight(session_id) >= usize::from(limit) {
            return Ok(None);
        }

        let queue = self
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::consume(queue_name, "NOT_FOUND - no queue"))?;
        let Some(message) = queue.pop_front() else {
            return Ok(None);
        };

        self.next_delivery_tag += 1;
        let delivery_tag = self.next_delivery_tag;
        let delivery = Delivery {
            delivery_tag,
            queue: queue_name.to_string(),
            payload: message.payload.clone(),
            redelivered: message.redelivered,
        };
        self.unacked.insert(
            delivery_tag,
            Unacked {
                session_id,
                queue: queue_name.to_string(),
                message,
            },
        );
        Ok(Some(delivery))
    }

    fn requeue(&mut self, unacked: Unacked) {
        let mut message = unacked.message;
        message.redelivered = true;
        self.queues
            .entry(unacked.queue)
            .or_default()
            .push_front(message);
    }

    fn dead_letter(&mut self, unacked: Unacked) {
        let topology = self.topologies.get(&unacked.queue).cloned();
        if let Some(topology) = topology.filter(|t| t.dead_letter) {
            self.queues
                .entry(topology.dead_letter_queue())
                .or_default()
                .push_back(unacked.message);
        }
    }

    fn release_session(&mut self, session_id: u64) {
        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.session_id == session_id)
            .map(|(tag, _)| *tag)
            .collect();
        // push_front in reverse keeps the original delivery order
        tags.sort_unstable_by(|a, b| b.cmp(a));
        for tag in tags {
            if let Some(unacked) = self.unacked.remove(&tag) {
                self.requeue(unacked);
            }
        }
        self.prefetch.remove(&session_id);
        self.open_sessions.remove(&session_id);
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
}

/// In-memory broker; clones share the same queues
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connection attempts fail
    pub fn fail_next_connections(&self, n: u32) {
        self.shared.state.lock().fail_next_connections = n;
    }

    /// Make the next `n` publishes fail after the message was serialized
    pub fn fail_next_publishes(&self, n: u32) {
        self.shared.state.lock().fail_next_publishes = n;
    }

    pub fn connection_attempts(&self) -> u32 {
        self.shared.state.lock().connection_attempts
    }

    pub fn open_sessions(&self) -> usize {
        self.shared.state.lock().open_sessions.len()
    }

    pub fn is_declared(&self, queue_name: &str) -> bool {
        self.shared.state.lock().topologies.contains_key(queue_name)
    }

    /// Ready (not in-flight) messages in a queue
    pub fn queue_depth(&self, queue_name: &str) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(queue_name)
            .map_or(0, VecDeque::len)
    }

    /// Deliveries handed out and not yet acknowledged, across all sessions
    pub fn unacked_count(&self) -> usize {
        self.shared.state.lock().unacked.len()
    }

    /// Successful publishes since creation
    pub fn published_count(&self) -> u64 {
        self.shared.state.lock().published
    }

    /// Whether every ready message in the queue was published persistently
    pub fn all_persistent(&self, queue_name: &str) -> bool {
        self.shared
            .state
            .lock()
            .queues
            .get(queue_name)
            .is_some_and(|q| q.iter().all(|m| m.persistent))
    }

    /// Decode ready messages without consuming them
    pub fn peek<M: QueueMessage>(&self, queue_name: &str) -> Vec<M> {
        self.shared
            .state
            .lock()
            .queues
            .get(queue_name)
            .map(|q| {
                q.iter()
                    .filter_map(|m| M::from_bytes(&m.payload).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Enqueue raw bytes, bypassing serialization (declares the queue if needed)
    pub fn push_raw(&self, queue_name: &str, payload: impl Into<Vec<u8>>) {
        {
            let mut state = self.shared.state.lock();
            if !state.topologies.contains_key(queue_name) {
                let _ = state.declare(&QueueTopology::durable(queue_name));
            }
            state
                .queues
                .entry(queue_name.to_string())
                .or_default()
                .push_back(StoredMessage {
                    payload: payload.into(),
                    persistent: true,
                    redelivered: false,
                });
        }
        self.shared.notify.notify_waiters();
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn open(&self, _params: &SessionParams) -> MessagingResult<Box<dyn BrokerSession>> {
        let mut state = self.shared.state.lock();
        state.connection_attempts += 1;
        if state.fail_next_connections > 0 {
            state.fail_next_connections -= 1;
            return Err(MessagingError::connection("in-memory broker refused connection"));
        }

        state.next_session_id += 1;
        let id = state.next_session_id;
        state.open_sessions.insert(id);

        Ok(Box::new(InMemorySession {
            id,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

struct InMemorySession {
    id: u64,
    shared: Arc<Shared>,
}

impl InMemorySession {
    fn ensure_open(&self, state: &BrokerState) -> MessagingResult<()> {
        if state.open_sessions.contains(&self.id) {
            Ok(())
        } else {
            Err(MessagingError::SessionClosed)
        }
    }

    fn take_owned(&self, delivery_tag: u64) -> MessagingResult<Unacked> {
        let mut state = self.shared.state.lock();
        self.ensure_open(&state)?;
        let owned = state
            .unacked
            .get(&delivery_tag)
            .is_some_and(|u| u.session_id == self.id);
        match state.unacked.remove(&delivery_tag) {
            Some(unacked) if owned => Ok(unacked),
            Some(unacked) => {
                state.unacked.insert(delivery_tag, unacked);
                Err(MessagingError::ack(delivery_tag, UNKNOWN_DELIVERY_TAG))
            }
            None => Err(MessagingError::ack(delivery_tag, UNKNOWN_DELIVERY_TAG)),
        }
    }
}

#[async_trait]
impl BrokerSession for InMemorySession {
    async fn declare_queue(&self, topology: &QueueTopology) -> MessagingResult<()> {
        let mut state = self.shared.state.lock();
        self.ensure_open(&state)?;
        state.declare(topology)
    }

    async fn set_prefetch(&self, count: u16) -> MessagingResult<()> {
        let mut state = self.shared.state.lock();
        self.ensure_open(&state)?;
        state.prefetch.insert(self.id, count);
        Ok(())
    }

    async fn publish(&self, queue_name: &str, payload: &[u8]) -> MessagingResult<()> {
        {
            let mut state = self.shared.state.lock();
            self.ensure_open(&state)?;
            if state.fail_next_publishes > 0 {
                state.fail_next_publishes -= 1;
                return Err(MessagingError::PublishNacked {
                    queue_name: queue_name.to_string(),
                });
            }
            let queue = state
                .queues
                .get_mut(queue_name)
                .ok_or_else(|| {
                    MessagingError::publish(queue_name, "NOT_FOUND - queue not declared")
                })?;
            queue.push_back(StoredMessage {
                payload: payload.to_vec(),
                persistent: true,
                redelivered: false,
            });
            state.published += 1;
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn next_delivery(
        &self,
        queue_name: &str,
        wait: Duration,
    ) -> MessagingResult<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock();
                self.ensure_open(&state)?;
                if let Some(delivery) = state.take_next(self.id, queue_name)? {
                    return Ok(Some(delivery));
                }
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery_tag: u64) -> MessagingResult<()> {
        self.take_owned(delivery_tag)?;
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> MessagingResult<()> {
        let unacked = self.take_owned(delivery_tag)?;
        {
            let mut state = self.shared.state.lock();
            if requeue {
                state.requeue(unacked);
            } else {
                state.dead_letter(unacked);
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> MessagingResult<()> {
        self.shared.state.lock().release_session(self.id);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
