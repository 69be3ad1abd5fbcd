//! Agent Hub Server Entry Point
//!
//! Bootstraps configuration, eagerly wires the pipeline, and starts the
//! Axum HTTP server. Exits 0 on clean shutdown and non-zero on fatal init.

use std::net::SocketAddr;
use std::sync::Arc;

use hub_api::{build_gateway, create_api_router, ApiError, ApiResult, AppState, WebhookDispatcher};
use hub_core::HubConfig;
use hub_memory::StaticMemoryStore;
use hub_providers::{AdapterRegistry, CredentialStore};

use hub_api::jobs::{spawn_session_reaper, SessionReaperConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ApiResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = HubConfig::from_env();
    config
        .validate()
        .map_err(|e| ApiError::internal(format!("Invalid configuration: {}", e)))?;

    // Composition root: everything is constructed eagerly and passed by
    // reference; no lazily initialized globals.
    let credentials = CredentialStore::from_config(&config);
    if credentials.providers().is_empty() {
        tracing::warn!("No provider credentials configured; completions will fail");
    }
    let registry = Arc::new(AdapterRegistry::from_credentials(
        &credentials,
        config.adapter_deadline,
    ));
    let memory_store = Arc::new(StaticMemoryStore::new());

    let (gateway, router_metrics, events) =
        build_gateway(&config, registry, memory_store);

    let webhooks = Arc::new(WebhookDispatcher::new(config.webhook.clone()));
    webhooks.start(&events);

    let reaper = spawn_session_reaper(
        SessionReaperConfig {
            timeouts: config.session_timeouts.clone(),
            ..SessionReaperConfig::default()
        },
        gateway.sessions_handle(),
        events.clone(),
    );

    let state = AppState {
        gateway,
        webhooks,
        router_metrics,
        reaper_metrics: reaper.metrics.clone(),
        start_time: std::time::Instant::now(),
    };

    let app = create_api_router(state);

    let addr: SocketAddr = format!("{}:{}", config.bind_host, config.bind_port)
        .parse()
        .map_err(|e| ApiError::internal(format!("Invalid bind address: {}", e)))?;
    tracing::info!(%addr, providers = ?config.provider_chain, "Starting agent-hub");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    reaper.shutdown();
    Ok(())
}
