//! Local Cache server
//!
//! Serves a registered `LocalCache<String>` over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use localcache::api::{create_router, AppState};
use localcache::{CacheRegistry, Config};

const DEFAULT_CACHE: &str = "default";

/// # Startup Sequence
/// 1. Initialize tracing
/// 2. Load configuration from environment variables
/// 3. Register the default cache
/// 4. Serve until SIGINT/SIGTERM, then close every cache
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info", overridable with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "localcache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Local Cache Server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: max_entries={}, default_ttl={}s, expire_delay={}s, port={}",
        config.max_entries, config.default_ttl, config.expire_delay, config.server_port
    );

    let registry = Arc::new(CacheRegistry::<String>::new());
    let cache = registry
        .register(DEFAULT_CACHE, config.cache_builder())
        .context("failed to start cache")?;
    let state = AppState::new(cache, Duration::from_secs(config.default_ttl));

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    registry.close_all();
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", err);
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
                tracing::error!("failed to install SIGTERM handler: {}", err);
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
}
