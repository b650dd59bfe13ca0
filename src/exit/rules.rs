// =============================================================================
// Exit Rules — thresholds and per-asset-class selection
// =============================================================================
//
// Two rule sets exist: one for equities (the default) and one for options.
// Each option threshold falls back to its equity counterpart when it is not
// configured explicitly.
//
// All thresholds are gain percentages (3.0 means 3 %) and every comparison
// made against them is inclusive.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{AssetClass, Position};

/// Default hard stop-loss (gain percent).
pub const DEFAULT_STOP_LOSS_PCT: f64 = -3.0;
/// Default gain percent at which the trailing take-profit arms.
pub const DEFAULT_ARMED_GAIN_PCT: f64 = 5.0;
/// Default retracement from the all-time-high gain that fires the trailing exit.
pub const DEFAULT_TRAIL_DROP_PCT: f64 = 3.0;

/// Broker asset-class string for listed options.
const OPTION_ASSET_CLASS: &str = "us_option";

/// One set of exit thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitThresholds {
    /// Sell unconditionally when gain is at or below this value.
    pub stop_loss_pct: f64,
    /// Arm the trailing exit when gain is at or above this value.
    pub armed_gain_pct: f64,
    /// Once armed, sell when gain is at or below `ath - trail_drop_pct`.
    pub trail_drop_pct: f64,
}

impl Default for ExitThresholds {
    fn default() -> Self {
        Self {
            stop_loss_pct: DEFAULT_STOP_LOSS_PCT,
            armed_gain_pct: DEFAULT_ARMED_GAIN_PCT,
            trail_drop_pct: DEFAULT_TRAIL_DROP_PCT,
        }
    }
}

/// Thresholds for every asset class the monitor handles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitRules {
    pub equity: ExitThresholds,
    pub option: ExitThresholds,
}

impl Default for ExitRules {
    fn default() -> Self {
        Self::uniform(ExitThresholds::default())
    }
}

impl ExitRules {
    /// Same thresholds for every asset class.
    pub fn uniform(thresholds: ExitThresholds) -> Self {
        Self {
            equity: thresholds,
            option: thresholds,
        }
    }

    /// Thresholds applicable to `position`.
    pub fn for_position(&self, position: &Position) -> &ExitThresholds {
        match position.asset_class {
            AssetClass::Equity => &self.equity,
            AssetClass::Option => &self.option,
        }
    }
}

/// Classify a broker-reported position. A position is an option when the
/// broker says so or when its symbol is OCC-shaped.
pub fn classify_asset(symbol: &str, broker_asset_class: Option<&str>) -> AssetClass {
    let reported_option = broker_asset_class
        .map(|c| c.eq_ignore_ascii_case(OPTION_ASSET_CLASS))
        .unwrap_or(false);

    if reported_option || looks_like_option_symbol(symbol) {
        AssetClass::Option
    } else {
        AssetClass::Equity
    }
}

/// OCC-style option symbol: 1-6 uppercase root letters, a YYMMDD expiry,
/// `C` or `P`, then an 8-digit strike (e.g. `AAPL250117C00150000`).
pub fn looks_like_option_symbol(symbol: &str) -> bool {
    let bytes = symbol.as_bytes();
    // Fixed tail: 6 expiry digits + 1 right + 8 strike digits.
    const TAIL: usize = 15;
    if bytes.len() <= TAIL || bytes.len() > TAIL + 6 {
        return false;
    }

    let (root, tail) = bytes.split_at(bytes.len() - TAIL);
    let (expiry, rest) = tail.split_at(6);
    let (right, strike) = rest.split_at(1);

    root.iter().all(u8::is_ascii_uppercase)
        && expiry.iter().all(u8::is_ascii_digit)
        && matches!(right[0], b'C' | b'P')
        && strike.iter().all(u8::is_ascii_digit)
}
