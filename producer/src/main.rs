//! Comment Producer - accepts comment text over HTTP and queues it on RabbitMQ.
//!
//! The server validates each request, publishes the text with a bounded
//! publish step, and reports the outcome. Broker failures fail the request,
//! never the process.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use comment_producer::config::{load_dotenv, redact_url};
use comment_producer::{router, AppState, Config, Publisher};

#[tokio::main]
async fn main() -> Result<()> {
    // Before logging, so RUST_LOG may come from the file
    let env_file = load_dotenv();

    init_tracing();
    info!(env_file = ?env_file, "comment_producer_starting");

    let config = Config::from_env();
    info!(
        port = config.port,
        rabbit_mq_url = %redact_url(&config.rabbit_mq_url),
        queue = %config.queue_name,
        queue_durable = config.queue_durable,
        connection_mode = %config.connection_mode,
        publish_timeout_ms = config.publish_timeout_ms,
        broker_timeout_ms = config.broker_timeout_ms,
        request_timeout_ms = config.request_timeout_ms,
        reject_empty_text = config.reject_empty_text,
        legacy_error_responses = config.legacy_error_responses,
        "config_loaded"
    );

    let publisher = Publisher::from_config(&config);
    let app = router(AppState::new(config.clone(), publisher.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind comments API to {}", addr))?;

    info!(address = %addr, route = "/api/v1/comments", "comments_api_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_stop())
        .await
        .context("Comments API server error")?;

    // In-flight requests are done; drop the shared broker connection, if any
    publisher.close().await;

    info!("comment_producer_stopped");

    Ok(())
}

/// Structured JSON logs, filtered by `RUST_LOG` (default `info`).
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();
}

/// Resolve on SIGINT or SIGTERM so axum can drain in-flight comments.
async fn wait_for_stop() {
    let interrupt = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        "SIGINT"
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
        "SIGTERM"
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    let received = tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    };

    info!(signal = received, "comment_producer_draining");
}
