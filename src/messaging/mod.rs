//! # Messaging Module
//!
//! Broker-backed queues that connect the pipeline stages. The planner publishes
//! [`SplitMessage`]s to the work queue, the executor consumes them and announces
//! finished splits with [`CompletionMessage`]s on the completion queue.
//!
//! Sessions come from the [`ConnectionManager`]; the broker itself sits behind
//! [`BrokerConnector`] so RabbitMQ and the in-memory broker are interchangeable.

pub mod connection;
pub mod errors;
pub mod message;
pub mod providers;
pub mod service;

pub use connection::{backoff_delay, ConnectionManager, Session};
pub use errors::{MessagingError, MessagingResult};
pub use message::{CompletionMessage, CompletionStatus, QueueMessage, SplitMessage};
pub use providers::{InMemoryBroker, RabbitMqConnector};
pub use service::{
    BrokerConnector, BrokerSession, Delivery, QueueTopology, SessionParams, SessionPurpose,
    SessionTuning,
};
