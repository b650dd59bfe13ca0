// =============================================================================
// Shared types used across the Trailwarden position monitor
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broad asset class of a position. Options get their own exit thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetClass {
    Equity,
    Option,
}

impl Default for AssetClass {
    fn default() -> Self {
        Self::Equity
    }
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equity => write!(f, "Equity"),
            Self::Option => write!(f, "Option"),
        }
    }
}

/// Rule that caused a position to be liquidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TrailingTakeProfit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "StopLoss"),
            Self::TrailingTakeProfit => write!(f, "TrailingTakeProfit"),
        }
    }
}

/// A live position as reported by the broker for a single cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    /// Signed quantity; negative means short.
    pub quantity: f64,
    /// Average entry price. `None` when the broker omitted or mangled it.
    pub cost_basis: Option<f64>,
    /// Latest market price. `None` when the broker omitted or mangled it.
    pub current_price: Option<f64>,
    #[serde(default)]
    pub asset_class: AssetClass,
}

impl Position {
    /// Convenience constructor for a fully priced equity position.
    #[cfg(test)]
    pub fn new(ticker: impl Into<String>, quantity: f64, cost_basis: f64, current_price: f64) -> Self {
        Self {
            ticker: ticker.into(),
            quantity,
            cost_basis: Some(cost_basis),
            current_price: Some(current_price),
            asset_class: AssetClass::Equity,
        }
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }
}

/// Trailing-performance state carried across cycles for one open ticker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    /// Highest gain percent observed since the position was first seen.
    pub all_time_high_gain_pct: f64,
    /// Sticky flag: once the arming threshold is crossed the trailing
    /// take-profit rule stays active for the life of the position.
    pub armed: bool,
}

impl PositionState {
    /// State for a ticker observed for the first time at `gain_pct`.
    pub fn first_seen(gain_pct: f64) -> Self {
        Self {
            all_time_high_gain_pct: gain_pct,
            armed: false,
        }
    }
}

/// Immutable record appended to the closed-trade log once per sell decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTradeRecord {
    pub ticker: String,
    /// Gain at decision time, not the confirmed fill.
    pub final_gain_pct: f64,
    pub armed_at_close: bool,
    pub closed_at_utc: DateTime<Utc>,
    pub exit_reason: ExitReason,
    #[serde(default)]
    pub asset_class: AssetClass,
}

/// Live columns persisted next to the state so the active table is readable
/// by a human operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub quantity: f64,
    pub cost_basis: f64,
    pub current_price: f64,
    pub gain_pct: f64,
}

/// One row of the persisted active-position table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRow {
    pub ticker: String,
    #[serde(flatten)]
    pub state: PositionState,
    /// Absent when this cycle's live data for the ticker was rejected and the
    /// prior state was carried forward untouched.
    #[serde(default)]
    pub snapshot: Option<PositionSnapshot>,
    pub last_updated: DateTime<Utc>,
}
