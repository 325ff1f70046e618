// =============================================================================
// Indicator Engine — Main Entry Point
// =============================================================================
//
// Startup order: environment, logging, settings, config store, realtime
// engine, HTTP surface. If the exchange cannot be reached at startup the
// engine stays disabled but configuration endpoints keep working.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod binance;
mod broadcaster;
mod config_store;
mod engine;
mod error;
mod indicators;
mod market_data;
mod period;
mod settings;
mod snapshot;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::binance::BinanceClient;
use crate::config_store::{ConfigRepository, ConfigStore, JsonFileConfigRepository};
use crate::engine::RealtimeEngine;
use crate::settings::ServiceSettings;

const SETTINGS_PATH: &str = "indicator_engine.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & settings ────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Indicator Engine — starting up");

    let mut settings = ServiceSettings::load(SETTINGS_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load settings, using defaults");
        ServiceSettings::default()
    });
    settings.apply_env_overrides();
    info!(settings = ?settings, "Effective settings");

    // ── 2. Config store ──────────────────────────────────────────────────
    let repository: Option<Arc<dyn ConfigRepository>> = if settings.config_store_path.is_empty() {
        warn!("No config store path set — indicator configs are kept in memory only");
        None
    } else {
        let repo = JsonFileConfigRepository::new(&settings.config_store_path);
        info!(path = %repo.path().display(), "Indicator configs persisted to JSON file");
        Some(Arc::new(repo))
    };
    let configs = Arc::new(ConfigStore::new(repository).with_lookup_retry(settings.config_retry()));

    // ── 3. Exchange client & realtime engine ─────────────────────────────
    let client = match BinanceClient::new(&settings) {
        Ok(client) => Some(client),
        Err(e) => {
            error!(error = %e, "Failed to build exchange client");
            None
        }
    };

    let engine = match &client {
        Some(client) => {
            match RealtimeEngine::start(settings.clone(), client.clone(), configs.clone()).await {
                Ok(engine) => {
                    info!(key = %engine.active_key(), "Realtime engine running");
                    Some(engine)
                }
                Err(e) => {
                    error!(error = %e, "Realtime engine failed to start — serving config endpoints only");
                    None
                }
            }
        }
        None => None,
    };

    // ── 4. API server ────────────────────────────────────────────────────
    let state = Arc::new(AppState::new(&settings, configs, client, engine.clone()));
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {}", settings.bind_addr))?;
    info!(addr = %settings.bind_addr, "API server listening");

    // ── 5. Serve until Ctrl+C ────────────────────────────────────────────
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            warn!("Shutdown signal received — stopping gracefully");
        })
        .await
        .context("API server failed")?;

    if let Some(engine) = engine {
        engine.shutdown().await;
    }

    info!("Indicator Engine shut down complete.");
    Ok(())
}
