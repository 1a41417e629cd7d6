//! Herald Broker Gateway
//!
//! AMQP publishing for the notification fan-out:
//! - Durable topic exchange `notifications`
//! - Durable per-channel queues (`email_queue`, `push_queue`) bound with
//!   `notification.email` / `notification.push`
//! - Optional wildcard-bound observability queue
//! - Persistent messages with correlation metadata and awaited publisher
//!   confirms; a negative confirm surfaces as a publish error

use async_trait::async_trait;
use chrono::Utc;
use lapin::{
    options::*,
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use herald_common::EnrichedNotification;
use herald_config::RabbitMqConfig;

mod memory;

pub use memory::InMemoryChannelPublisher;

/// Broker error types
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("AMQP connection failed: {0}")]
    Connect(String),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Topology declaration failed: {0}")]
    Topology(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Broker rejected message (negative confirm)")]
    Nacked,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Publishes one durable, channel-routed message per enriched notification.
#[async_trait]
pub trait ChannelPublisher: Send + Sync {
    /// Publish to `notification.<channel>`; resolves once the broker has
    /// confirmed the message. Returns the broker message id
    /// (= notification id).
    async fn publish(&self, notification: &EnrichedNotification) -> Result<String>;
}

/// AMQP implementation of [`ChannelPublisher`].
///
/// Safe for concurrent publishers: the channel sits behind an async RwLock
/// and lapin channels are internally thread-safe. Topology is declared once
/// on connect and re-declared (idempotently) after a reconnect.
pub struct AmqpBrokerGateway {
    config: RabbitMqConfig,
    connection: Arc<RwLock<Option<Connection>>>,
    channel: Arc<RwLock<Option<Channel>>>,
}

impl AmqpBrokerGateway {
    /// Connect and declare the topology.
    pub async fn connect(config: RabbitMqConfig) -> Result<Self> {
        let gateway = Self {
            config,
            connection: Arc::new(RwLock::new(None)),
            channel: Arc::new(RwLock::new(None)),
        };

        gateway.establish().await?;
        Ok(gateway)
    }

    async fn establish(&self) -> Result<()> {
        info!(
            url = %self.config.url,
            exchange = %self.config.exchange_name,
            "Connecting to AMQP broker"
        );

        let connection = Connection::connect(
            &self.config.url,
            ConnectionProperties::default().with_connection_name("herald-orchestrator".into()),
        )
        .await
        .map_err(|e| BrokerError::Connect(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connect(format!("Failed to create channel: {e}")))?;

        // Publisher confirms: every publish is awaited to an ack/nack.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Connect(format!("Failed to enable confirms: {e}")))?;

        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Connect(format!("Failed to set QoS: {e}")))?;

        self.declare_topology(&channel).await?;

        *self.connection.write().await = Some(connection);
        *self.channel.write().await = Some(channel);

        info!(exchange = %self.config.exchange_name, "Connected to AMQP broker");
        Ok(())
    }

    /// Idempotent topology declaration: exchange, per-channel queues and
    /// bindings, plus the optional wildcard observability queue.
    async fn declare_topology(&self, channel: &Channel) -> Result<()> {
        let exchange_kind = match self.config.exchange_type.as_str() {
            "topic" => ExchangeKind::Topic,
            "direct" => ExchangeKind::Direct,
            "fanout" => ExchangeKind::Fanout,
            other => ExchangeKind::Custom(other.to_string()),
        };

        channel
            .exchange_declare(
                &self.config.exchange_name,
                exchange_kind,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Topology(format!("exchange declare: {e}")))?;

        for delivery_channel in herald_common::Channel::ALL {
            let queue = delivery_channel.queue_name();
            let routing_key = delivery_channel.routing_key();

            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::Topology(format!("queue declare {queue}: {e}")))?;

            channel
                .queue_bind(
                    queue,
                    &self.config.exchange_name,
                    &routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::Topology(format!("queue bind {queue}: {e}")))?;

            debug!(queue = %queue, routing_key = %routing_key, "Declared channel queue");
        }

        // Wildcard-bound queue for observability; empty name disables it.
        if !self.config.queue_name.is_empty() {
            channel
                .queue_declare(
                    &self.config.queue_name,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::Topology(format!("queue declare: {e}")))?;

            channel
                .queue_bind(
                    &self.config.queue_name,
                    &self.config.exchange_name,
                    &self.config.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::Topology(format!("queue bind: {e}")))?;
        }

        Ok(())
    }

    /// Re-establish connection, channel, and topology.
    async fn reconnect(&self) -> Result<()> {
        warn!(exchange = %self.config.exchange_name, "Reconnecting to AMQP broker");

        *self.channel.write().await = None;
        *self.connection.write().await = None;

        self.establish().await
    }

    /// Close channel and connection; pending confirms are abandoned.
    pub async fn close(&self) {
        if let Some(channel) = self.channel.write().await.take() {
            let _ = channel.close(200, "Shutdown").await;
        }
        if let Some(connection) = self.connection.write().await.take() {
            let _ = connection.close(200, "Shutdown").await;
        }
        info!(exchange = %self.config.exchange_name, "AMQP broker gateway closed");
    }

    pub async fn is_connected(&self) -> bool {
        match self.connection.read().await.as_ref() {
            Some(connection) => connection.status().connected(),
            None => false,
        }
    }

    fn message_headers(notification: &EnrichedNotification) -> FieldTable {
        let mut headers = FieldTable::default();
        headers.insert(
            "channel".into(),
            AMQPValue::LongString(notification.channel.as_str().into()),
        );
        headers.insert(
            "priority".into(),
            AMQPValue::LongString(notification.priority.as_str().into()),
        );
        headers
    }
}

#[async_trait]
impl ChannelPublisher for AmqpBrokerGateway {
    async fn publish(&self, notification: &EnrichedNotification) -> Result<String> {
        if !self.is_connected().await {
            self.reconnect().await?;
        }

        let channel_guard = self.channel.read().await;
        let channel = channel_guard.as_ref().ok_or(BrokerError::NotConnected)?;

        let body = serde_json::to_vec(notification)?;
        let message_id = notification.notification_id.to_string();
        let routing_key = notification.channel.routing_key();

        let confirm = channel
            .basic_publish(
                &self.config.exchange_name,
                &routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_message_id(message_id.clone().into())
                    .with_correlation_id(notification.correlation_id.clone().into())
                    .with_timestamp(Utc::now().timestamp() as u64)
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2) // Persistent
                    .with_headers(Self::message_headers(notification)),
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(format!("confirm failed: {e}")))?;

        if let Confirmation::Nack(_) = confirm {
            return Err(BrokerError::Nacked);
        }

        debug!(
            message_id = %message_id,
            routing_key = %routing_key,
            exchange = %self.config.exchange_name,
            "Published notification message"
        );

        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_queues_match_routing_keys() {
        assert_eq!(herald_common::Channel::Email.queue_name(), "email_queue");
        assert_eq!(herald_common::Channel::Push.queue_name(), "push_queue");
        assert_eq!(
            herald_common::Channel::Push.routing_key(),
            "notification.push"
        );
    }
}
