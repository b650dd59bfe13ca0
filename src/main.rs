// =============================================================================
// Trailwarden — Main Entry Point
// =============================================================================
//
// Watches every open position on the account once per interval and closes the
// ones that hit the hard stop-loss or retrace from their high after arming.
// Cycle failures are logged and retried on the next tick; the process only
// stops on Ctrl+C.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod broker;
mod cycle;
mod error;
mod exit;
mod runtime_config;
mod store;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::broker::alpaca::AlpacaClient;
use crate::broker::{Broker, DryRunBroker};
use crate::exit::engine::ExitEngine;
use crate::runtime_config::RuntimeConfig;
use crate::store::JsonFileStore;

const DEFAULT_CONFIG_PATH: &str = "trailwarden.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Trailwarden position monitor starting up");

    let config_path =
        std::env::var("TRAILWARDEN_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides(|name| std::env::var(name).ok());

    let rules = config.exit_rules();
    info!(
        stop_loss_pct = rules.equity.stop_loss_pct,
        armed_gain_pct = rules.equity.armed_gain_pct,
        trail_drop_pct = rules.equity.trail_drop_pct,
        "Thresholds: EQUITY"
    );
    info!(
        stop_loss_pct = rules.option.stop_loss_pct,
        armed_gain_pct = rules.option.armed_gain_pct,
        trail_drop_pct = rules.option.trail_drop_pct,
        "Thresholds: OPTION"
    );

    // ── 2. Broker ────────────────────────────────────────────────────────
    let api_key = std::env::var("ALPACA_API_KEY").context("ALPACA_API_KEY missing")?;
    let api_secret = std::env::var("ALPACA_API_SECRET").context("ALPACA_API_SECRET missing")?;
    let alpaca = AlpacaClient::new(api_key, api_secret, config.broker_base_url.clone())
        .context("failed to build Alpaca client")?;
    info!(base_url = %alpaca.base_url(), dry_run = config.dry_run, "Broker configured");

    let broker: Arc<dyn Broker> = if config.dry_run {
        warn!("DRY RUN: close commands will be logged, not sent");
        Arc::new(DryRunBroker::new(alpaca))
    } else {
        Arc::new(alpaca)
    };

    // ── 3. Store ─────────────────────────────────────────────────────────
    let store = JsonFileStore::open(&config.data_dir)
        .await
        .with_context(|| format!("failed to open store at {}", config.data_dir.display()))?;

    // ── 4. Shared state ──────────────────────────────────────────────────
    let state = Arc::new(AppState::new(ExitEngine::new(rules), broker, Arc::new(store)));

    // ── 5. Status API ────────────────────────────────────────────────────
    if config.api_enabled {
        let api_state = state.clone();
        let bind_addr = config.bind_addr.clone();
        tokio::spawn(async move {
            let app = api::rest::router(api_state);
            let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(addr = %bind_addr, error = %e, "Failed to bind status API, continuing without it");
                    return;
                }
            };
            info!(addr = %bind_addr, "Status API listening");
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Status API stopped");
            }
        });
    }

    // ── 6. Exit monitor loop ─────────────────────────────────────────────
    let every = tokio::time::Duration::from_secs(config.poll_interval_secs);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let monitor = tokio::spawn(exit::monitor::run_exit_monitor(state.clone(), every, shutdown_rx));

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Shutdown ──────────────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, finishing the in-flight cycle");
    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor.await {
        error!(error = %e, "Exit monitor task ended abnormally");
    }

    info!(
        cycles_completed = state.cycles_completed(),
        cycles_failed = state.cycles_failed(),
        "Trailwarden shut down complete."
    );
    Ok(())
}
