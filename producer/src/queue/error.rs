//! Failure taxonomy for a single publish attempt.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Broker interaction step, used to report where a timeout happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    Channel,
    QueueSetup,
    Publish,
    /// The overall request deadline, spanning every step.
    Request,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Connect => "connect",
            Stage::Channel => "channel",
            Stage::QueueSetup => "queue_setup",
            Stage::Publish => "publish",
            Stage::Request => "request",
        };
        f.write_str(name)
    }
}

/// Coarse classification of why a comment could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The request body did not decode into a comment.
    Validation,
    /// The broker could not be reached or refused the connection.
    Connect,
    /// The connection was up but no channel could be opened.
    Channel,
    /// Declaring the destination queue failed.
    QueueSetup,
    /// The broker rejected the publish.
    Publish,
    /// A step did not finish within its time bound.
    Timeout,
}

/// Error returned by [`Publisher::publish`](super::Publisher::publish).
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to connect to RabbitMQ: {detail}")]
    Connect { detail: String },

    #[error("Failed to open a channel: {detail}")]
    Channel { detail: String },

    #[error("Failed to declare queue {queue}: {detail}")]
    QueueSetup { queue: String, detail: String },

    #[error("Failed to publish a message to queue {queue}: {detail}")]
    Publish { queue: String, detail: String },

    #[error("{stage} step timed out after {}ms", .after.as_millis())]
    Timeout { stage: Stage, after: Duration },
}

impl PublishError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PublishError::Connect { .. } => FailureKind::Connect,
            PublishError::Channel { .. } => FailureKind::Channel,
            PublishError::QueueSetup { .. } => FailureKind::QueueSetup,
            PublishError::Publish { .. } => FailureKind::Publish,
            PublishError::Timeout { .. } => FailureKind::Timeout,
        }
    }

    /// Transient failures are safe for the caller to resubmit.
    pub fn is_transient(&self) -> bool {
        !matches!(self, PublishError::QueueSetup { .. })
    }
}

/// Outcome of one publish attempt.
pub type PublishResult = Result<(), PublishError>;
