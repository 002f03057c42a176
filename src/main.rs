use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use feed_monitor::config::Config;
use feed_monitor::db::Database;
use feed_monitor::monitor::{self, BatchRunner, FeedFetcher};
use feed_monitor::web;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting feed-monitor");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        mirrors = config.mirror_urls.len(),
        interval_secs = config.poll_interval.as_secs(),
        "Configuration loaded"
    );

    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    info!("Database initialized");

    let fetcher = Arc::new(FeedFetcher::new(&config).context("Failed to build feed fetcher")?);

    // One runner per process: the scheduled loop and the cron endpoint must
    // never run a batch concurrently.
    let runner = Arc::new(BatchRunner::new(
        Arc::clone(&fetcher),
        db.clone(),
        config.batch_deadline,
    ));

    // Start web server in background
    let web_config = config.clone();
    let web_runner = Arc::clone(&runner);
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web::serve(web_config, db, fetcher, web_runner).await {
            error!("Web server error: {e:#}");
        }
    });

    // Start scheduled batch checks
    let check_handle = tokio::spawn(async move {
        monitor::check_loop(runner, config.poll_interval).await;
    });
    info!("Scheduled check loop started");

    shutdown_signal().await;

    info!("Shutting down...");

    web_handle.abort();
    check_handle.abort();

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,feed_monitor=debug"));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
