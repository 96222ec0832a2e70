use anyhow::{Context, Result};
use archive_service::{start_api_server, AppState, Config, PgRecordingStore, RecordingArchive, S3Uploader};
use std::future::Future;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(service = %config.service.name, "Starting recording archive service");

    init_metrics(config.service.metrics_port)?;

    let store = PgRecordingStore::new(&config.database)
        .await
        .context("Failed to initialize recording store")?;

    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let uploader = S3Uploader::new(&config.s3)
        .await
        .context("Failed to initialize S3 uploader")?;

    let api_state = AppState {
        archive: RecordingArchive::new(Arc::new(store), Arc::new(uploader)),
    };

    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move { start_api_server(api_state, &api_config).await });

    run_until_shutdown(api_handle, shutdown_signal()).await
}

/// Wait for the API server or a shutdown signal, whichever comes first.
/// The server is the only workload, so its exit ends the process with an error.
async fn run_until_shutdown(
    mut api_handle: JoinHandle<Result<()>>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    tokio::select! {
        result = &mut api_handle => {
            let error = match result {
                Ok(Ok(())) => anyhow::anyhow!("API server exited unexpectedly"),
                Ok(Err(e)) => e,
                Err(e) => anyhow::Error::new(e).context("API server task failed"),
            };
            error!(error = %format!("{error:#}"), "API server stopped");
            Err(error)
        }
        _ = shutdown => {
            info!("Shutting down recording archive service");
            api_handle.abort();
            Ok(())
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for SIGINT or SIGTERM
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
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}
