//! Dispatch publisher: hands resolved notifications to the broker.
//!
//! A single connection/channel pair is shared by every request. It is
//! established lazily on first use and re-established when found closed.
//! Channel acquisition is serialized behind a mutex; publishing on the
//! acquired channel is not.

use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{
    BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use thiserror::Error;
use tokio::sync::Mutex;

use notigate_common::types::{DispatchMessage, NotificationType};

use crate::topology::{DEAD_LETTER_EXCHANGE, EXCHANGE, PERSISTENT, clamp_priority, queue_arguments};

/// Upper bound on any single broker round-trip.
const BROKER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("could not encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("broker did not confirm message on '{0}'")]
    Nacked(String),

    #[error("broker {0} timed out")]
    Timeout(&'static str),

    #[error("{0}")]
    Rejected(String),
}

/// Publishes dispatch messages to the delivery queues.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `message` on `routing_key` with the given priority (clamped to
    /// the queue ceiling) and correlation id.
    async fn publish(
        &self,
        routing_key: &str,
        message: &DispatchMessage,
        priority: u8,
        correlation_id: &str,
    ) -> Result<(), DispatchError>;

    /// Whether the broker is currently reachable.
    async fn is_healthy(&self) -> bool;
}

/// AMQP 0.9.1 publisher with a lazily established, shared channel.
pub struct AmqpPublisher {
    amqp_url: String,
    session: Mutex<Option<Session>>,
}

struct Session {
    // Held so the connection outlives the channel
    connection: Connection,
    channel: Channel,
}

impl Session {
    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

impl AmqpPublisher {
    pub fn new(amqp_url: impl Into<String>) -> Self {
        Self {
            amqp_url: amqp_url.into(),
            session: Mutex::new(None),
        }
    }

    /// Return an open channel, connecting and declaring topology if needed.
    async fn channel(&self) -> Result<Channel, DispatchError> {
        let mut session = self.session.lock().await;

        if let Some(existing) = session.as_ref()
            && existing.is_open()
        {
            return Ok(existing.channel.clone());
        }

        if session.is_some() {
            tracing::warn!("Broker channel closed, reconnecting");
        }

        let fresh = tokio::time::timeout(BROKER_TIMEOUT, self.connect())
            .await
            .map_err(|_| DispatchError::Timeout("connect"))??;
        let channel = fresh.channel.clone();
        *session = Some(fresh);
        Ok(channel)
    }

    async fn connect(&self) -> Result<Session, DispatchError> {
        let connection = Connection::connect(&self.amqp_url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        declare_topology(&channel).await?;

        tracing::info!("Connected to broker and declared notification topology");
        Ok(Session {
            connection,
            channel,
        })
    }
}

/// Declare exchanges, per-type queues and their salvage queues.
async fn declare_topology(channel: &Channel) -> Result<(), DispatchError> {
    channel
        .exchange_declare(
            EXCHANGE,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    channel
        .exchange_declare(
            DEAD_LETTER_EXCHANGE,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    for notification_type in NotificationType::ALL {
        let queue = notification_type.routing_key();
        let dead_letter = notification_type.dead_letter_routing_key();

        channel
            .queue_declare(&queue, durable_queue(), queue_arguments(notification_type))
            .await?;
        channel
            .queue_bind(
                &queue,
                EXCHANGE,
                &queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_declare(&dead_letter, durable_queue(), FieldTable::default())
            .await?;
        channel
            .queue_bind(
                &dead_letter,
                DEAD_LETTER_EXCHANGE,
                &dead_letter,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
    }

    Ok(())
}

fn durable_queue() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        ..Default::default()
    }
}

#[async_trait]
impl Publisher for AmqpPublisher {
    async fn publish(
        &self,
        routing_key: &str,
        message: &DispatchMessage,
        priority: u8,
        correlation_id: &str,
    ) -> Result<(), DispatchError> {
        let body = serde_json::to_vec(message)?;
        let channel = self.channel().await?;

        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_priority(clamp_priority(priority))
            .with_correlation_id(correlation_id.into())
            .with_content_type("application/json".into());

        let publish = async {
            let confirm = channel
                .basic_publish(
                    EXCHANGE,
                    routing_key,
                    BasicPublishOptions::default(),
                    &body,
                    properties,
                )
                .await?;
            Ok::<_, DispatchError>(confirm.await?)
        };

        let confirmation = tokio::time::timeout(BROKER_TIMEOUT, publish)
            .await
            .map_err(|_| DispatchError::Timeout("publish"))??;

        if confirmation.is_nack() {
            tracing::error!(routing_key, correlation_id, "Broker nacked notification");
            return Err(DispatchError::Nacked(routing_key.to_string()));
        }

        tracing::debug!(
            routing_key,
            correlation_id,
            notification_id = %message.notification_id,
            priority = clamp_priority(priority),
            "Published to queue"
        );
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        match self.channel().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Broker health check failed");
                false
            }
        }
    }
}
