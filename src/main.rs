//! ==============================================================================
//! main.rs - sensor relay entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the relay together and runs it until ctrl+c / sigterm.
//!
//! responsibilities:
//!     - initialize logging (RUST_LOG, else logging.level from the config)
//!     - load configuration (first cli argument, else config/relay.toml)
//!     - pick the reading store (http service or seeded in-memory map)
//!     - run the broadcaster polling loop
//!     - serve the websocket endpoint
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                    relay (this file)                         │
//!     │  ┌─────────────┐  ┌─────────────┐                            │
//!     │  │ broadcaster │  │ web server  │                            │
//!     │  │ (3s cycle)  │  │ (port 8080) │                            │
//!     │  └──────┬──────┘  └──────┬──────┘                            │
//!     │         │                │                                   │
//!     │         └──────┬─────────┘                                   │
//!     │          ┌─────┴─────┐       ┌──────────────┐                │
//!     │          │  gateway  │ ────> │   registry   │                │
//!     │          └─────┬─────┘       └──────────────┘                │
//!     └────────────────┼────────────────────────────────────────────┘
//!                      │ latest(sensor)
//!               ┌──────┴───────┐
//!               │ reading store│
//!               └──────────────┘
//!
//! ==============================================================================

use anyhow::{Context, Result};
use sensor_relay::{
    create_router, Broadcaster, Gateway, HttpStore, MemoryStore, ReadingStore, RelayConfig,
    SubscriptionRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: logging. RUST_LOG wins; otherwise the config level is applied below
    let env_filter = EnvFilter::try_from_default_env().ok();
    let has_env_filter = env_filter.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| EnvFilter::new("info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("===========================================================");
    info!("  Sensor Relay");
    info!("===========================================================");

    // step 2: configuration
    let config = RelayConfig::load_or_default(std::env::args().nth(1).map(PathBuf::from));
    if !has_env_filter {
        match EnvFilter::try_new(&config.logging.level) {
            Ok(level) => {
                if let Err(e) = filter_handle.reload(level) {
                    warn!("[STARTUP] could not apply log level: {}", e);
                }
            }
            Err(e) => warn!("[STARTUP] invalid logging.level {:?}: {}", config.logging.level, e),
        }
    }
    config.log_summary();

    // step 3: reading store
    let store: Arc<dyn ReadingStore> = match &config.store.url {
        Some(url) => Arc::new(HttpStore::new(url, config.store_timeout())?),
        None => {
            warn!("[STARTUP] no store.url configured - serving the in-memory store");
            Arc::new(MemoryStore::with_readings(config.seed_readings()))
        }
    };

    // step 4: core
    let registry = Arc::new(SubscriptionRegistry::new());
    let gateway = Arc::new(Gateway::new(registry, store.clone(), config.gateway_settings()));
    let broadcaster = Broadcaster::new(gateway.clone(), store, config.broadcaster_settings());

    // step 5: broadcaster in background
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let broadcaster_handle = tokio::spawn(async move { broadcaster.run(shutdown_rx).await });

    // step 6: web server until a shutdown signal
    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("[STARTUP] ✓ Listening on ws://{}/ws", addr);

    let served = axum::serve(listener, create_router(gateway))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // step 7: stop the polling loop
    let _ = shutdown_tx.send(true);
    if let Err(e) = broadcaster_handle.await {
        error!("[SHUTDOWN] broadcaster task failed: {}", e);
    }

    served.context("web server error")?;
    info!("[SHUTDOWN] relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for ctrl+c: {}", e);
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
                error!("failed to listen for sigterm: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("[SHUTDOWN] received ctrl+c"),
        _ = terminate => info!("[SHUTDOWN] received terminate signal"),
    }
}
