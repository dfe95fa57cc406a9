//! hostalloc allocator
//!
//! Tracks per-host CPU and memory capacity, answers scoped capacity queries
//! and selects hosts for resource demands through pluggable strategies.

use anyhow::{Context, Result};
use hostalloc_allocator::{
    api,
    capacity::StaticTopology,
    config,
    db::Database,
    dispatcher::RequestWorkerPool,
    service::{self, Backends},
    state::AppState,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to HOSTALLOC_LOG_LEVEL.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting hostalloc allocator");
    info!(
        listen_addr = %config.listen_addr,
        dev_mode = config.dev_mode,
        workers = config.allocator.workers,
        strategy_timeout = ?config.allocator.strategy_timeout,
        "Configuration loaded"
    );

    let (backends, db) = if config.dev_mode {
        info!("Dev mode: using the in-memory capacity ledger");
        (Backends::in_memory(StaticTopology::new()), None)
    } else {
        let db = match Database::connect(&config.database).await {
            Ok(db) => db,
            Err(e) => {
                error!(error = %e, "Failed to connect to database");
                return Err(e.into());
            }
        };
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
        (Backends::postgres(&db), Some(db))
    };

    let dispatcher = service::build_dispatcher(backends, &config.allocator)
        .context("failed to populate allocator strategy registry")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (handle, workers) = RequestWorkerPool::new(
        dispatcher,
        config.allocator.workers,
        config.allocator.queue_depth,
    )
    .start(shutdown_rx.clone());

    let state = AppState::new(handle, db);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for allocator workers to shut down...");
    if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(10), workers).await {
        warn!(error = %e, "Allocator workers did not shut down in time");
    }

    info!("Allocator shutdown complete");
    Ok(())
}
