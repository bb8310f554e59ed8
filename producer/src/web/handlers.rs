//! HTTP endpoint handlers.
//!
//! The comment handler only decodes the body, hands the text to the
//! publisher and maps the outcome to a status code. It never retries.

use std::sync::Arc;

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::queue::{AmqpBroker, Broker, Comment, FailureKind, PublishError, Publisher, Stage};
use crate::Config;

/// Body returned when the comment was queued.
pub const SUCCESS_MESSAGE: &str = "Text successfully pushed to queue";

/// Body returned for undecodable requests (and, in legacy mode, every failure).
pub const INVALID_MESSAGE: &str = "Invalid or empty fields supplied";

/// Shared application state.
pub struct AppState<B: Broker = AmqpBroker> {
    pub config: Arc<Config>,
    pub publisher: Publisher<B>,
}

impl<B: Broker> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            publisher: self.publisher.clone(),
        }
    }
}

impl<B: Broker> AppState<B> {
    pub fn new(config: Config, publisher: Publisher<B>) -> Self {
        Self {
            config: Arc::new(config),
            publisher,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Comments
// =============================================================================

/// Response body for the comments endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub status: bool,
    pub message: &'static str,
}

impl ApiResponse {
    fn ok() -> Self {
        Self {
            status: true,
            message: SUCCESS_MESSAGE,
        }
    }

    fn failed(message: &'static str) -> Self {
        Self {
            status: false,
            message,
        }
    }
}

/// Status code and message for a failure kind.
///
/// With `legacy` set, every failure collapses into the generic 400 response.
pub fn failure_response(kind: FailureKind, legacy: bool) -> (StatusCode, &'static str) {
    if legacy {
        return (StatusCode::BAD_REQUEST, INVALID_MESSAGE);
    }

    match kind {
        FailureKind::Validation => (StatusCode::BAD_REQUEST, INVALID_MESSAGE),
        FailureKind::Connect | FailureKind::Channel => {
            (StatusCode::SERVICE_UNAVAILABLE, "Message queue unavailable")
        }
        FailureKind::QueueSetup => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Message queue rejected queue setup",
        ),
        FailureKind::Publish => (StatusCode::BAD_GATEWAY, "Failed to push text to queue"),
        FailureKind::Timeout => (
            StatusCode::GATEWAY_TIMEOUT,
            "Timed out pushing text to queue, safe to retry",
        ),
    }
}

fn reject(kind: FailureKind, legacy: bool) -> (StatusCode, Json<ApiResponse>) {
    let (status, message) = failure_response(kind, legacy);
    (status, Json(ApiResponse::failed(message)))
}

/// `POST /api/v1/comments`
///
/// Decodes `{"text": "..."}` from the raw body (any content type) and
/// publishes the text. Exactly one publish attempt per accepted request.
pub async fn create_comment<B: Broker>(
    State(state): State<AppState<B>>,
    body: Bytes,
) -> (StatusCode, Json<ApiResponse>) {
    let legacy = state.config.legacy_error_responses;

    let comment: Comment = match serde_json::from_slice(&body) {
        Ok(comment) => comment,
        Err(e) => {
            warn!(error = %e, body_length = body.len(), "comment_decode_failed");
            return reject(FailureKind::Validation, legacy);
        }
    };

    if state.config.reject_empty_text && comment.is_blank() {
        warn!("comment_text_empty");
        return reject(FailureKind::Validation, legacy);
    }

    info!(text_length = comment.text.len(), "comment_received");

    let deadline = state.config.request_timeout();
    let publish = state.publisher.publish(&comment.text);
    let outcome = match tokio::time::timeout(deadline, publish).await {
        Ok(result) => result,
        Err(_) => Err(PublishError::Timeout {
            stage: Stage::Request,
            after: deadline,
        }),
    };

    match outcome {
        Ok(()) => {
            info!(text_length = comment.text.len(), "comment_enqueued");
            (StatusCode::OK, Json(ApiResponse::ok()))
        }
        Err(e) => {
            error!(
                kind = ?e.kind(),
                transient = e.is_transient(),
                error = %e,
                "comment_publish_failed"
            );
            reject(e.kind(), legacy)
        }
    }
}
