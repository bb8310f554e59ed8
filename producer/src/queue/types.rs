//! Message types for the comments queue.

use serde::{Deserialize, Serialize};

/// Queue name used when none is configured.
pub const DEFAULT_QUEUE: &str = "hello";

/// Content type attached to every published comment.
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

/// A submitted comment.
///
/// Only the text travels onto the queue; the struct itself is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub text: String,
}

impl Comment {
    /// True when the text has no visible characters.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Declaration parameters for the destination queue.
///
/// The queue is always declared non-exclusive, without auto-delete and
/// without extra arguments; only durability is configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub name: String,
    pub durable: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_QUEUE.to_string(),
            durable: false,
        }
    }
}
