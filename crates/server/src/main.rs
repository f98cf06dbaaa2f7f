mod api;
mod auth;
mod bootstrap;
mod health;
mod ops;

use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::watch;

use flowops_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use flowops_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (dispatcher, watchdog) = bootstrap::build_workers(&app.config, &app.state);
    let dispatcher_handle = {
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { dispatcher.run(shutdown_rx).await })
    };
    let watchdog_handle = tokio::spawn(async move { watchdog.run(shutdown_rx).await });

    let router = api::router(app.state.clone())
        .merge(ops::router(app.state.clone()))
        .merge(health::router(app.db_pool.clone()));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = TcpListener::bind(&address).await?;
    tracing::info!(address = %address, "flowops-server started");

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!("flowops-server stopping");
    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    for (name, handle) in [("outbox dispatcher", dispatcher_handle), ("sla watchdog", watchdog_handle)]
    {
        if tokio::time::timeout(grace, handle).await.is_err() {
            tracing::warn!(worker = name, "worker did not stop within the grace period");
        }
    }

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "failed to listen for shutdown signal");
    }
}
