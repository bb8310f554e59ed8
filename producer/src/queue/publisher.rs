//! Async RabbitMQ publisher for comment text.
//!
//! Every publish runs the same sequence: obtain a connection, open a channel,
//! declare the queue, publish with a time bound, then release the channel and
//! (in per-request mode) the connection on every exit path.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::broker::{close_within, AmqpBroker, Broker, BrokerChannel, BrokerConnection, Scoped};
use super::error::{PublishError, PublishResult, Stage};
use super::types::{QueueSettings, TEXT_CONTENT_TYPE};
use crate::config::{Config, ConnectionMode};

/// Tunables for a [`Publisher`].
#[derive(Debug, Clone)]
pub struct PublisherOptions {
    pub queue: QueueSettings,
    pub mode: ConnectionMode,
    /// Bound on the publish call alone.
    pub publish_timeout: Duration,
    /// Bound on each of connect, channel open and queue declare.
    pub broker_timeout: Duration,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            queue: QueueSettings::default(),
            mode: ConnectionMode::PerRequest,
            publish_timeout: Duration::from_secs(5),
            broker_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&Config> for PublisherOptions {
    fn from(config: &Config) -> Self {
        Self {
            queue: config.queue_settings(),
            mode: config.connection_mode,
            publish_timeout: config.publish_timeout(),
            broker_timeout: config.broker_timeout(),
        }
    }
}

/// Publishes comment text onto the configured queue.
///
/// Cheap to clone; clones share the same broker handle and, in
/// [`ConnectionMode::Shared`], the same long-lived connection.
pub struct Publisher<B: Broker = AmqpBroker> {
    inner: Arc<PublisherInner<B>>,
}

impl<B: Broker> Clone for Publisher<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PublisherInner<B: Broker> {
    broker: B,
    url: String,
    options: PublisherOptions,
    shared: RwLock<Option<Arc<B::Connection>>>,
}

impl Publisher<AmqpBroker> {
    /// Create a RabbitMQ publisher from application configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::with_broker(
            AmqpBroker::new().with_connection_name("comment-producer"),
            config.rabbit_mq_url.clone(),
            PublisherOptions::from(config),
        )
    }
}

impl<B: Broker> Publisher<B> {
    /// Create a publisher over an arbitrary broker implementation.
    pub fn with_broker(broker: B, url: String, options: PublisherOptions) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                broker,
                url,
                options,
                shared: RwLock::new(None),
            }),
        }
    }

    /// Publish `text` onto the queue.
    ///
    /// Failures are returned, never raised: a broken broker fails this call
    /// and leaves the publisher usable for the next one.
    pub async fn publish(&self, text: &str) -> PublishResult {
        let result = match self.inner.options.mode {
            ConnectionMode::PerRequest => self.publish_per_request(text).await,
            ConnectionMode::Shared => self.publish_shared(text).await,
        };

        match &result {
            Ok(()) => info!(
                queue = %self.inner.options.queue.name,
                body_length = text.len(),
                "rabbitmq_comment_published"
            ),
            Err(e) => warn!(
                queue = %self.inner.options.queue.name,
                kind = ?e.kind(),
                error = %e,
                "rabbitmq_comment_publish_failed"
            ),
        }

        result
    }

    async fn publish_per_request(&self, text: &str) -> PublishResult {
        let connection = Scoped::new(
            self.connect().await?,
            "connection",
            self.inner.options.broker_timeout,
        );
        let result = self.publish_on(&connection, text).await;
        connection.release().await;
        result
    }

    async fn publish_shared(&self, text: &str) -> PublishResult {
        let connection = self.shared_connection().await?;
        let result = self.publish_on(&connection, text).await;

        if result.is_err() && !connection.is_connected() {
            self.forget_shared(&connection).await;
        }

        result
    }

    /// Channel, declare and publish over an already-open connection.
    async fn publish_on(&self, connection: &B::Connection, text: &str) -> PublishResult {
        let options = &self.inner.options;

        let channel = bounded(Stage::Channel, options.broker_timeout, connection.open_channel())
            .await?
            .map_err(|e| PublishError::Channel {
                detail: format!("{:#}", e),
            })?;
        let channel = Scoped::new(channel, "channel", options.broker_timeout);

        let result = self.declare_and_publish(&channel, text).await;
        channel.release().await;
        result
    }

    async fn declare_and_publish(
        &self,
        channel: &<B::Connection as BrokerConnection>::Channel,
        text: &str,
    ) -> PublishResult {
        let options = &self.inner.options;
        let queue = &options.queue;

        bounded(Stage::QueueSetup, options.broker_timeout, channel.declare_queue(queue))
            .await?
            .map_err(|e| PublishError::QueueSetup {
                queue: queue.name.clone(),
                detail: format!("{:#}", e),
            })?;

        debug!(queue = %queue.name, durable = queue.durable, "rabbitmq_queue_declared");

        bounded(
            Stage::Publish,
            options.publish_timeout,
            channel.publish(&queue.name, text.as_bytes(), TEXT_CONTENT_TYPE),
        )
        .await?
        .map_err(|e| PublishError::Publish {
            queue: queue.name.clone(),
            detail: format!("{:#}", e),
        })
    }

    async fn connect(&self) -> Result<B::Connection, PublishError> {
        debug!("rabbitmq_publisher_connecting");

        let connection = bounded(
            Stage::Connect,
            self.inner.options.broker_timeout,
            self.inner.broker.connect(&self.inner.url),
        )
        .await?
        .map_err(|e| PublishError::Connect {
            detail: format!("{:#}", e),
        })?;

        debug!("rabbitmq_publisher_connected");
        Ok(connection)
    }

    /// Return the long-lived connection, opening it if absent or broken.
    ///
    /// The connect runs without holding the lock, so an outage fails each
    /// caller after its own connect bound instead of queueing them.
    async fn shared_connection(&self) -> Result<Arc<B::Connection>, PublishError> {
        {
            let shared = self.inner.shared.read().await;
            if let Some(conn) = shared.as_ref() {
                if conn.is_connected() {
                    return Ok(Arc::clone(conn));
                }
            }
        }

        let fresh = Arc::new(self.connect().await?);

        let (winner, discarded) = {
            let mut shared = self.inner.shared.write().await;
            let current = shared.as_ref().filter(|c| c.is_connected()).cloned();
            match current {
                // Another request reconnected first; keep theirs.
                Some(conn) => (conn, Some(fresh)),
                None => {
                    let stale = shared.replace(Arc::clone(&fresh));
                    info!("rabbitmq_shared_connection_opened");
                    (fresh, stale)
                }
            }
        };

        if let Some(conn) = discarded {
            self.close_connection(conn.as_ref()).await;
        }

        Ok(winner)
    }

    /// Drop the cached connection if it is still the one that failed.
    async fn forget_shared(&self, failed: &Arc<B::Connection>) {
        let mut shared = self.inner.shared.write().await;
        if shared.as_ref().is_some_and(|c| Arc::ptr_eq(c, failed)) {
            shared.take();
            warn!("rabbitmq_shared_connection_lost");
        }
    }

    async fn close_connection(&self, conn: &B::Connection) {
        close_within(conn, "connection", self.inner.options.broker_timeout).await;
    }

    /// Close the shared connection, if any. Safe to call in per-request mode.
    pub async fn close(&self) {
        let conn = self.inner.shared.write().await.take();
        if let Some(conn) = conn {
            self.close_connection(conn.as_ref()).await;
        }

        info!("rabbitmq_publisher_closed");
    }
}

/// Run a broker step under `limit`, turning an elapsed timer into a timeout error.
async fn bounded<F, T>(stage: Stage, limit: Duration, step: F) -> Result<T, PublishError>
where
    F: Future<Output = T>,
{
    timeout(limit, step)
        .await
        .map_err(|_| PublishError::Timeout {
            stage,
            after: limit,
        })
}
