//! Web server module for accepting comments.
//!
//! This module provides a thin web server that:
//! - Receives comments on `POST /api/v1/comments`
//! - Pushes the text onto RabbitMQ through the shared publisher
//! - Reports the outcome with a `{status, message}` body

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::queue::Broker;

pub use handlers::{
    create_comment, failure_response, health, ApiResponse, AppState, HealthResponse,
    INVALID_MESSAGE, SUCCESS_MESSAGE,
};

/// Build the application router.
pub fn router<B: Broker>(state: AppState<B>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/comments", post(create_comment::<B>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
