//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - The comment payload and queue declaration settings
//! - Broker primitives with a `lapin` implementation
//! - The publisher that runs one bounded publish per call
//!
//! ## Flow
//!
//! ```text
//! POST /api/v1/comments → Publisher::publish → connect → channel → declare → publish → release
//! ```

pub mod broker;
pub mod error;
pub mod publisher;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use broker::{AmqpBroker, Broker, BrokerChannel, BrokerConnection, Closeable, Scoped};
pub use error::{FailureKind, PublishError, PublishResult, Stage};
pub use publisher::{Publisher, PublisherOptions};
pub use types::{Comment, QueueSettings, DEFAULT_QUEUE, TEXT_CONTENT_TYPE};
