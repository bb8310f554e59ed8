//! Broker primitives used by the publisher.
//!
//! The publisher only needs connect, open-channel, declare, publish and close.
//! They are expressed as traits so the lifecycle logic in
//! [`Publisher`](super::Publisher) can run against RabbitMQ through `lapin`
//! or against an in-memory broker in tests.

use std::ops::Deref;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::time::timeout;
use tracing::warn;

use super::types::QueueSettings;

/// Something that holds a broker-side resource and must be closed.
#[async_trait]
pub trait Closeable: Send + Sync + 'static {
    async fn close(&self) -> Result<()>;
}

/// Entry point to a broker: opens connections.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Connection: BrokerConnection;

    async fn connect(&self, url: &str) -> Result<Self::Connection>;
}

/// An open broker connection.
#[async_trait]
pub trait BrokerConnection: Closeable {
    type Channel: BrokerChannel;

    async fn open_channel(&self) -> Result<Self::Channel>;

    /// Whether the connection is still usable.
    fn is_connected(&self) -> bool;
}

/// A channel multiplexed over a connection.
#[async_trait]
pub trait BrokerChannel: Closeable {
    /// Declare the queue. Must be idempotent for identical settings.
    async fn declare_queue(&self, settings: &QueueSettings) -> Result<()>;

    /// Publish `payload` to `queue` through the default exchange.
    async fn publish(&self, queue: &str, payload: &[u8], content_type: &str) -> Result<()>;
}

// =============================================================================
// Scoped release
// =============================================================================

/// Owns a [`Closeable`] resource and guarantees it gets closed.
///
/// Normal paths call [`Scoped::release`], which awaits the close. If the
/// owning future is dropped first (request deadline, client disconnect), the
/// `Drop` impl hands the resource to a background task that closes it.
/// Either way the close is abandoned after `close_timeout`.
pub struct Scoped<T: Closeable> {
    resource: Option<T>,
    label: &'static str,
    close_timeout: Duration,
}

impl<T: Closeable> Scoped<T> {
    pub fn new(resource: T, label: &'static str, close_timeout: Duration) -> Self {
        Self {
            resource: Some(resource),
            label,
            close_timeout,
        }
    }

    /// Close the resource now, logging (not returning) any close error.
    pub async fn release(mut self) {
        if let Some(resource) = self.resource.take() {
            close_within(&resource, self.label, self.close_timeout).await;
        }
    }
}

impl<T: Closeable> Deref for Scoped<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `release` takes the resource, and it consumes `self`.
        match self.resource.as_ref() {
            Some(resource) => resource,
            None => unreachable!("scoped resource used after release"),
        }
    }
}

impl<T: Closeable> Drop for Scoped<T> {
    fn drop(&mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        let label = self.label;
        let limit = self.close_timeout;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    close_within(&resource, label, limit).await;
                });
            }
            Err(_) => {
                warn!(resource = label, "rabbitmq_release_without_runtime");
            }
        }
    }
}

/// Close `resource`, giving up after `limit`. Errors and timeouts are logged.
///
/// An unresponsive broker never answers the close handshake, so the wait
/// must be bounded.
pub async fn close_within<T: Closeable>(resource: &T, label: &'static str, limit: Duration) {
    match timeout(limit, resource.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(resource = label, error = %e, "rabbitmq_close_error"),
        Err(_) => warn!(
            resource = label,
            timeout_ms = limit.as_millis() as u64,
            "rabbitmq_close_timed_out"
        ),
    }
}

// =============================================================================
// lapin implementation
// =============================================================================

/// RabbitMQ over AMQP 0.9.1, backed by `lapin`.
#[derive(Debug, Clone, Default)]
pub struct AmqpBroker {
    connection_name: Option<String>,
}

impl AmqpBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name shown for our connections in the RabbitMQ management UI.
    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    type Connection = Connection;

    async fn connect(&self, url: &str) -> Result<Connection> {
        let mut properties = ConnectionProperties::default();
        if let Some(name) = &self.connection_name {
            properties = properties.with_connection_name(name.clone().into());
        }

        Connection::connect(url, properties)
            .await
            .context("Failed to connect to RabbitMQ")
    }
}

#[async_trait]
impl Closeable for Connection {
    async fn close(&self) -> Result<()> {
        if !self.status().connected() {
            return Ok(());
        }
        Connection::close(self, 200, "Normal shutdown")
            .await
            .context("Failed to close connection")
    }
}

#[async_trait]
impl BrokerConnection for Connection {
    type Channel = Channel;

    async fn open_channel(&self) -> Result<Channel> {
        self.create_channel()
            .await
            .context("Failed to create channel")
    }

    fn is_connected(&self) -> bool {
        self.status().connected()
    }
}

#[async_trait]
impl Closeable for Channel {
    async fn close(&self) -> Result<()> {
        if !self.status().connected() {
            return Ok(());
        }
        Channel::close(self, 200, "Normal shutdown")
            .await
            .context("Failed to close channel")
    }
}

#[async_trait]
impl BrokerChannel for Channel {
    async fn declare_queue(&self, settings: &QueueSettings) -> Result<()> {
        self.queue_declare(
            &settings.name,
            QueueDeclareOptions {
                durable: settings.durable,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare queue")?;

        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8], content_type: &str) -> Result<()> {
        self.basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            payload,
            BasicProperties::default().with_content_type(content_type.into()),
        )
        .await
        .context("Failed to publish to queue")?
        .await
        .context("Failed to confirm publish")?;

        Ok(())
    }
}
