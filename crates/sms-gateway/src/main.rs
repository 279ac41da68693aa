//! SMS Gateway - Entry point.

use anyhow::Context;
use credit_ledger::spawn_reconciler;
use provider_client::ProviderClient;
use sms_gateway::{
    api::{create_router_with_rate_limit, AppState, RateLimitState},
    Config,
};
use sms_store::{MemoryStore, Store, TimedStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_logging(&config.log.level, config.log.json);

    info!("Starting SMS Gateway");

    // Storage
    let memory = match &config.store.snapshot_path {
        Some(path) => {
            info!(path = %path.display(), "Loading store snapshot");
            MemoryStore::with_snapshot(path.clone())
                .await
                .context("Failed to load store snapshot")?
        }
        None => {
            warn!("No snapshot path configured, state will not survive a restart");
            MemoryStore::new()
        }
    };
    let store: Arc<dyn Store> = Arc::new(TimedStore::new(memory, config.store.timeout));

    // Upstream provider
    let provider = ProviderClient::with_timeout(
        config.provider.base_url.clone(),
        config.provider.api_key.clone(),
        config.provider.timeout,
    )
    .context("Failed to create provider client")?;

    if provider.health_check().await {
        info!("Provider reachable at {}", config.provider.base_url);
    } else {
        warn!("Provider health check failed - will retry on requests");
    }

    let state = AppState::from_config(&config, store, Arc::new(provider))
        .context("Failed to initialise services")?;

    let reconciler = spawn_reconciler(state.ledger.clone(), config.ledger.reconcile_interval);

    let app = create_router_with_rate_limit(
        state,
        RateLimitState::new(config.rate_limit.global_per_minute),
    );

    let addr = config
        .server
        .socket_addr()
        .with_context(|| format!("Invalid listen address {:?}", config.server.listen_addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    reconciler.abort();
    info!("Shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
