//! Broker providers behind [`super::BrokerConnector`]

pub mod in_memory;
pub mod rabbitmq;

pub use in_memory::InMemoryBroker;
pub use rabbitmq::RabbitMqConnector;
