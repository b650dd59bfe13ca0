// =============================================================================
// Central Application State
// =============================================================================
//
// Holds the collaborators the monitor loop drives and the bits of status the
// API reports. The decision engine itself keeps no state between cycles: the
// store is the only place position state lives.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::broker::Broker;
use crate::cycle::CycleSummary;
use crate::exit::engine::ExitEngine;
use crate::store::PositionStore;

/// A cycle-level failure kept for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct CycleFailure {
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Shared across the monitor loop and the API via `Arc<AppState>`.
pub struct AppState {
    pub engine: ExitEngine,
    pub broker: Arc<dyn Broker>,
    pub store: Arc<dyn PositionStore>,

    /// Cycles that ran to completion.
    pub cycles_completed: AtomicU64,
    /// Cycles abandoned on an I/O failure.
    pub cycles_failed: AtomicU64,

    pub last_summary: RwLock<Option<CycleSummary>>,
    pub last_failure: RwLock<Option<CycleFailure>>,
}

impl AppState {
    pub fn new(engine: ExitEngine, broker: Arc<dyn Broker>, store: Arc<dyn PositionStore>) -> Self {
        Self {
            engine,
            broker,
            store,
            cycles_completed: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            last_summary: RwLock::new(None),
            last_failure: RwLock::new(None),
        }
    }

    pub fn record_success(&self, summary: CycleSummary) {
        *self.last_summary.write() = Some(summary);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, message: String) {
        *self.last_failure.write() = Some(CycleFailure {
            message,
            at: Utc::now().to_rfc3339(),
        });
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("engine", &self.engine)
            .field("cycles_completed", &self.cycles_completed())
            .field("cycles_failed", &self.cycles_failed())
            .finish()
    }
}
