//! # RabbitMQ Broker
//!
//! AMQP 0.9.1 sessions through `lapin`. Each session is one connection and one
//! channel in confirm mode, so every publish resolves only after the broker has
//! taken responsibility for the message.
//!
//! Consumers are registered lazily per queue and kept for the life of the session;
//! `basic_qos` bounds how many deliveries the broker pushes ahead of acks.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::loader::mask_url_credentials;
use crate::constants::broker::CONNECTION_ATTEMPT_DELAY_SECONDS;
use crate::constants::{JSON_CONTENT_TYPE, PERSISTENT_DELIVERY_MODE};
use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::service::{
    BrokerConnector, BrokerSession, Delivery, QueueTopology, SessionParams,
};

/// Opens lapin-backed sessions against one broker URL
#[derive(Debug, Clone)]
pub struct RabbitMqConnector {
    url: String,
    connection_name: String,
}

impl RabbitMqConnector {
    pub fn new(url: impl Into<String>, connection_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_name: connection_name.into(),
        }
    }

    pub fn url_redacted(&self) -> String {
        mask_url_credentials(&self.url)
    }

    /// Broker URL with heartbeat and connection timeout applied as URI query options
    pub fn session_uri(&self, params: &SessionParams) -> String {
        let timeout_ms = params.tuning.blocked_timeout.as_millis();
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}heartbeat={}&connection_timeout={}",
            self.url, separator, params.heartbeat_seconds, timeout_ms
        )
    }

    async fn connect_once(&self, params: &SessionParams) -> MessagingResult<(Connection, Channel)> {
        let uri = self.session_uri(params);
        let properties = ConnectionProperties::default()
            .with_connection_name(format!("{}-{}", self.connection_name, params.purpose).into());

        let blocked_timeout = params.tuning.blocked_timeout;
        let connection = timeout(blocked_timeout, Connection::connect(&uri, properties))
            .await
            .map_err(|_| MessagingError::timeout("connect", blocked_timeout.as_secs()))?
            .map_err(|e| MessagingError::connection(format!("RabbitMQ connection failed: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| {
                MessagingError::connection(format!("RabbitMQ channel creation failed: {e}"))
            })?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| {
                MessagingError::configuration("rabbitmq", format!("confirm_select failed: {e}"))
            })?;

        Ok((connection, channel))
    }
}

#[async_trait]
impl BrokerConnector for RabbitMqConnector {
    async fn open(&self, params: &SessionParams) -> MessagingResult<Box<dyn BrokerSession>> {
        let attempts = params.tuning.connection_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.connect_once(params).await {
                Ok((connection, channel)) => {
                    debug!(
                        url = %self.url_redacted(),
                        purpose = %params.purpose,
                        attempt = attempt,
                        "RabbitMQ session opened"
                    );
                    return Ok(Box::new(RabbitMqSession {
                        connection,
                        channel,
                        blocked_timeout: params.tuning.blocked_timeout,
                        consumers: Mutex::new(HashMap::new()),
                    }));
                }
                Err(e) => {
                    debug!(attempt = attempt, error = %e, "RabbitMQ connection attempt failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        sleep(Duration::from_secs(CONNECTION_ATTEMPT_DELAY_SECONDS)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| MessagingError::connection("no connection attempt made")))
    }

    fn provider_name(&self) -> &'static str {
        "rabbitmq"
    }
}

struct RabbitMqSession {
    connection: Connection,
    channel: Channel,
    blocked_timeout: Duration,
    consumers: Mutex<HashMap<String, Consumer>>,
}

impl RabbitMqSession {
    /// Dead-letter exchange plus its queue, bound with the source queue name as key
    async fn setup_dead_letter(&self, topology: &QueueTopology) -> MessagingResult<()> {
        let dlx_name = topology.dead_letter_exchange();
        let dlq_name = topology.dead_letter_queue();

        self.channel
            .exchange_declare(
                &dlx_name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MessagingError::queue_declare(&dlx_name, format!("DLX creation failed: {e}"))
            })?;

        self.channel
            .queue_declare(
                &dlq_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MessagingError::queue_declare(&dlq_name, format!("DLQ creation failed: {e}"))
            })?;

        self.channel
            .queue_bind(
                &dlq_name,
                &dlx_name,
                &topology.name,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MessagingError::queue_declare(&dlq_name, format!("DLQ binding failed: {e}"))
            })?;

        Ok(())
    }

    async fn consumer_delivery(
        &self,
        queue_name: &str,
        wait: Duration,
    ) -> MessagingResult<Option<Delivery>> {
        let mut consumers = self.consumers.lock().await;
        if !consumers.contains_key(queue_name) {
            let consumer = self
                .channel
                .basic_consume(
                    queue_name,
                    &format!("split-crawler-{}", uuid::Uuid::new_v4()),
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    MessagingError::consume(queue_name, format!("basic_consume failed: {e}"))
                })?;
            consumers.insert(queue_name.to_string(), consumer);
        }
        let Some(consumer) = consumers.get_mut(queue_name) else {
            return Ok(None);
        };

        match timeout(wait, consumer.next()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(MessagingError::consume(queue_name, "consumer cancelled")),
            Ok(Some(Err(e))) => Err(MessagingError::consume(queue_name, e.to_string())),
            Ok(Some(Ok(delivery))) => Ok(Some(Delivery {
                delivery_tag: delivery.delivery_tag,
                queue: queue_name.to_string(),
                payload: delivery.data,
                redelivered: delivery.redelivered,
            })),
        }
    }
}

/// `x-` arguments for a queue declaration; both sides of a queue must agree on them
fn queue_arguments(topology: &QueueTopology) -> FieldTable {
    let mut args = FieldTable::default();
    if topology.dead_letter {
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(topology.dead_letter_exchange().into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(topology.name.clone().into()),
        );
    }
    if let Some(consumer_timeout) = topology.consumer_timeout {
        let millis = i64::try_from(consumer_timeout.as_millis()).unwrap_or(i64::MAX);
        args.insert("x-consumer-timeout".into(), AMQPValue::LongLongInt(millis));
    }
    args
}

#[async_trait]
impl BrokerSession for RabbitMqSession {
    async fn declare_queue(&self, topology: &QueueTopology) -> MessagingResult<()> {
        if topology.dead_letter {
            self.setup_dead_letter(topology).await?;
        }
        let args = queue_arguments(topology);

        self.channel
            .queue_declare(
                &topology.name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(|e| MessagingError::queue_declare(&topology.name, e.to_string()))?;

        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> MessagingResult<()> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| {
                MessagingError::configuration("rabbitmq", format!("Failed to set QoS: {e}"))
            })
    }

    async fn publish(&self, queue_name: &str, payload: &[u8]) -> MessagingResult<()> {
        let publish = async {
            let confirm = self
                .channel
                .basic_publish(
                    "",
                    queue_name,
                    BasicPublishOptions::default(),
                    payload,
                    BasicProperties::default()
                        .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
                        .with_content_type(JSON_CONTENT_TYPE.into()),
                )
                .await
                .map_err(|e| MessagingError::publish(queue_name, format!("Publish failed: {e}")))?;

            let confirmation = confirm.await.map_err(|e| {
                MessagingError::publish(queue_name, format!("Publish confirmation failed: {e}"))
            })?;
            if confirmation.is_nack() {
                return Err(MessagingError::PublishNacked {
                    queue_name: queue_name.to_string(),
                });
            }
            Ok(())
        };

        timeout(self.blocked_timeout, publish)
            .await
            .map_err(|_| {
                MessagingError::timeout("publish_confirm", self.blocked_timeout.as_secs())
            })?
    }

    async fn next_delivery(
        &self,
        queue_name: &str,
        wait: Duration,
    ) -> MessagingResult<Option<Delivery>> {
        self.consumer_delivery(queue_name, wait).await
    }

    async fn ack(&self, delivery_tag: u64) -> MessagingResult<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| MessagingError::ack(delivery_tag, format!("ack failed: {e}")))
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> MessagingResult<()> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MessagingError::ack(delivery_tag, format!("nack failed: {e}")))
    }

    async fn close(&self) -> MessagingResult<()> {
        if let Err(e) = self.channel.close(200, "OK").await {
            warn!(error = %e, "RabbitMQ channel close failed");
        }
        self.connection
            .close(200, "OK")
            .await
            .map_err(|e| MessagingError::connection(format!("RabbitMQ close failed: {e}")))
    }

    fn provider_name(&self) -> &'static str {
        "rabbitmq"
    }
}
