//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mfetch_api::{create_router, metrics, ApiConfig, AppState};
use mfetch_jobs::{JobsConfig, Sweeper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing()?;

    info!("Starting mfetch-api");

    let config = ApiConfig::from_env();
    let jobs_config = JobsConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);
    info!(
        work_dir = %jobs_config.work_dir.display(),
        ttl_secs = jobs_config.job_ttl.as_secs(),
        max_concurrent_jobs = jobs_config.max_concurrent_jobs,
        extractor = %jobs_config.extractor_program,
        "Jobs config"
    );
    if config.access_key.is_none() {
        warn!("ACCESS_KEY is not set; job and download requests will be refused");
    }

    let metrics_enabled = std::env::var("METRICS_ENABLED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(true);

    let metrics_handle = if metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("Failed to install Prometheus recorder")?)
    } else {
        None
    };

    let state = AppState::new(config.clone(), jobs_config.clone());
    let registry = Arc::clone(state.jobs.registry());

    // Background eviction of expired jobs
    let shutdown = CancellationToken::new();
    let sweeper = Sweeper::new(Arc::clone(&registry), &jobs_config);
    let sweeper_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { sweeper.run(shutdown).await }
    });

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid bind address")?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = sweeper_task.await {
        error!("Sweeper task failed: {}", e);
    }

    let cleaned = registry.cleanup_all().await;
    info!("Server shutdown complete ({} jobs cleaned up)", cleaned);

    Ok(())
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("mfetch=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
