// =============================================================================
// Exit Monitor Loop — one decision cycle per interval until shutdown
// =============================================================================
//
// Runs as a background Tokio task:
//
//   tokio::spawn(run_exit_monitor(Arc::clone(&state), interval, shutdown_rx));
//
// Cycles never overlap: the next tick is not awaited until the current cycle
// has returned, and late ticks are delayed rather than bunched. A failed
// cycle is logged and recorded. The loop exits only on the shutdown signal,
// and only between cycles.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use crate::app_state::AppState;
use crate::cycle::run_cycle;

/// Run one cycle and record its outcome on `state`.
pub async fn tick(state: &AppState) {
    match run_cycle(&state.engine, state.broker.as_ref(), state.store.as_ref(), Utc::now()).await {
        Ok(summary) => state.record_success(summary),
        Err(e) => {
            error!(error = %e, "decision cycle failed, retrying next interval");
            state.record_failure(e.to_string());
        }
    }
}

/// Run the exit monitor loop until `shutdown` flips (or its sender is
/// dropped). Should be spawned as a background Tokio task.
pub async fn run_exit_monitor(state: Arc<AppState>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    info!(interval_secs = every.as_secs(), "Exit monitor started");

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                info!("Exit monitor stopping");
                return;
            }
        }
        tick(&state).await;
    }
}
