//! Shard Cache host
//!
//! Hosts one named cache behind an admin HTTP surface and keeps it
//! maintained in the background.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shard_cache::api::create_router;
use shard_cache::cache::{EntryLimitAdvisor, MemoryCache, NeverTrim, TrimAdvisor};
use shard_cache::{spawn_maintenance_task, AppState, Config};

/// Main entry point for the cache host.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the hosted cache with configured options
/// 4. Start the background maintenance task
/// 5. Create Axum router with all endpoints
/// 6. Start HTTP server on configured port
/// 7. On SIGINT/SIGTERM, stop maintenance and dispose the cache
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber with env filter
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shard_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Shard Cache host");

    let config = Config::from_env();
    info!(
        "Configuration loaded: cache={}, shards={}, polling_interval={}s, entry_limit={}, port={}",
        config.cache_name,
        config.shard_count,
        config.polling_interval,
        config.entry_limit,
        config.server_port
    );

    let state = AppState::from_config(&config).context("failed to create cache")?;
    info!(
        "Cache '{}' initialized with {} shards",
        state.cache.name(),
        state.cache.shard_count()
    );

    let advisor: Arc<dyn TrimAdvisor> = if config.entry_limit > 0 {
        Arc::new(EntryLimitAdvisor::new(config.entry_limit))
    } else {
        Arc::new(NeverTrim)
    };
    let maintenance = spawn_maintenance_task(
        state.cache.clone(),
        state.cache.polling_interval(),
        advisor,
    );
    info!("Background maintenance task started");

    let cache = state.cache.clone();
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(maintenance, cache))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the maintenance task and disposes the cache,
/// which releases every entry through its removal callback.
async fn shutdown_signal(maintenance: JoinHandle<()>, cache: MemoryCache<String>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    maintenance.abort();
    warn!("Maintenance task aborted");

    cache.dispose();
}
