mod bootstrap;
mod dataworld;
mod health;
mod routes;
mod slack_api;

use std::time::Duration;

use anyhow::Context;
use dwslack_core::config::{AppConfig, LoadOptions, LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG`, when set, replaces `logging.level` as the filter.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.trim().to_ascii_lowercase()));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match logging.format {
        LogFormat::Compact => subscriber.compact().init(),
        LogFormat::Pretty => subscriber.pretty().init(),
        LogFormat::Json => subscriber.json().flatten_event(true).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(LoadOptions::default()).context("loading configuration")?;
    init_logging(&config.logging);
    serve(config).await
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let app = bootstrap::bootstrap_with_config(config).await?;
    let server = &app.config.server;
    let address = format!("{}:{}", server.bind_address, server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;

    let service = routes::router(app.state.clone()).merge(health::router(app.db_pool.clone()));
    tracing::info!(
        event_name = "system.server.listening",
        correlation_id = "bootstrap",
        bind_address = %address,
        "dwslack-server accepting requests"
    );
    axum::serve(listener, service).with_graceful_shutdown(shutdown_signal()).await?;

    let grace = Duration::from_secs(server.graceful_shutdown_secs);
    tracing::info!(
        event_name = "system.server.draining",
        correlation_id = "shutdown",
        grace_secs = grace.as_secs(),
        "waiting for in-flight notification deliveries"
    );
    if !app.state.deliveries.drain(grace).await {
        tracing::warn!(
            event_name = "system.server.drain_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "notification deliveries abandoned at shutdown"
        );
    }
    app.db_pool.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        // Without a signal handler the server runs until killed.
        tracing::error!(
            event_name = "system.server.signal_unavailable",
            correlation_id = "shutdown",
            error = %error,
            "ctrl-c handler could not be installed"
        );
        std::future::pending::<()>().await;
    }
}
