use activation_store::{
    connector_for, Config, ConfigurationResolver, ConnectionManager, EventDispatcher,
    EventEnvelope, EventRecorder, IngestSource, ModelRegistry, QueueConsumer,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        backend = ?config.database.backend,
        source = ?config.ingest.source,
        "Starting activation store"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let registry = Arc::new(ModelRegistry::builtin().context("Invalid model registry")?);
    let manager = ConnectionManager::new(connector_for(&config.database), registry);

    let connection = manager
        .connection()
        .await
        .context("Failed to connect to document store")?;

    let recorder = Arc::new(
        EventRecorder::new(connection, ConfigurationResolver::from_config(&config.fingerprint))
            .context("Failed to bind event recorder")?,
    );
    let dispatcher = Arc::new(
        EventDispatcher::new(recorder, config.ingest.concurrency)
            .context("Invalid ingest configuration")?,
    );

    let outcome = match config.ingest.source {
        IngestSource::Redis => {
            let consumer = QueueConsumer::new(&config.queue, dispatcher.clone())
                .await
                .context("Failed to initialize queue consumer")?;

            info!(concurrency = config.ingest.concurrency, "Activation store started");

            tokio::select! {
                result = consumer.run() => result.context("Queue consumer stopped"),
                _ = shutdown_signal() => Ok(()),
            }
        }
        IngestSource::Stdin => {
            info!(
                concurrency = config.ingest.concurrency,
                "Activation store started, reading events from stdin"
            );

            tokio::select! {
                result = read_stdin(&dispatcher) => {
                    info!("Event stream closed");
                    result.context("Failed to read events")
                }
                _ = shutdown_signal() => Ok(()),
            }
        }
    };

    // Events already handed to the recorder finish before exit
    dispatcher
        .drain()
        .await
        .context("Failed to wait for in-flight events")?;

    info!("Activation store stopped");

    outcome
}

/// Dispatch every line from stdin
async fn read_stdin(dispatcher: &EventDispatcher) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match EventEnvelope::parse(&line) {
            Ok(event) => dispatcher.dispatch(event).await?,
            Err(e) => warn!(error = %e, "Skipping malformed event"),
        }
    }

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
