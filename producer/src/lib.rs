//! Comment Producer - pushes submitted comment text onto RabbitMQ.
//!
//! This library backs the `comment-producer` binary, the producer half of a
//! producer/consumer pipeline.
//!
//! ## Architecture
//!
//! ```text
//! POST /api/v1/comments → web::create_comment → queue::Publisher → RabbitMQ queue
//! ```

pub mod config;
pub mod queue;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConnectionMode};
pub use queue::{Comment, FailureKind, PublishError, Publisher, PublisherOptions, DEFAULT_QUEUE};
pub use web::{router, AppState};
