// =============================================================================
// Runtime Configuration — file defaults + environment overrides
// =============================================================================
//
// Resolution order: built-in defaults, then `trailwarden.json` (if present),
// then environment variables. All fields carry `#[serde(default)]` so adding
// a field never breaks loading an older config file.
//
// Threshold variables keep the names operators already use:
//   STOP_LOSS_PCT, ARMED_GAIN_PCT, TRAIL_DROP_PCT
//   OPTION_STOP_LOSS_PCT, OPTION_ARMED_GAIN_PCT, OPTION_TRAIL_DROP_PCT
// Each name is also accepted in lower case, and the option variables in the
// `Option_` spelling. An unparsable value logs a warning and is ignored.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::broker::alpaca::DEFAULT_BASE_URL;
use crate::exit::rules::{ExitRules, ExitThresholds};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_bind_addr() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_broker_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Option threshold overrides
// =============================================================================

/// Option-specific thresholds. Any value left unset inherits the equity one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct OptionOverrides {
    #[serde(default)]
    pub stop_loss_pct: Option<f64>,
    #[serde(default)]
    pub armed_gain_pct: Option<f64>,
    #[serde(default)]
    pub trail_drop_pct: Option<f64>,
}

impl OptionOverrides {
    fn resolve(&self, base: &ExitThresholds) -> ExitThresholds {
        ExitThresholds {
            stop_loss_pct: self.stop_loss_pct.unwrap_or(base.stop_loss_pct),
            armed_gain_pct: self.armed_gain_pct.unwrap_or(base.armed_gain_pct),
            trail_drop_pct: self.trail_drop_pct.unwrap_or(base.trail_drop_pct),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration for the monitor.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Seconds between decision cycles.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Directory holding the active table and closed-trade log.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Simulate close commands instead of sending them.
    #[serde(default)]
    pub dry_run: bool,

    /// Serve the read-only status API.
    #[serde(default = "default_true")]
    pub api_enabled: bool,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Alpaca endpoint (paper or live).
    #[serde(default = "default_broker_base_url")]
    pub broker_base_url: String,

    /// Equity (default) exit thresholds.
    #[serde(default)]
    pub thresholds: ExitThresholds,

    #[serde(default)]
    pub option_overrides: OptionOverrides,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            data_dir: default_data_dir(),
            dry_run: false,
            api_enabled: true,
            bind_addr: default_bind_addr(),
            broker_base_url: default_broker_base_url(),
            thresholds: ExitThresholds::default(),
            option_overrides: OptionOverrides::default(),
        }
    }
}

/// Look up `name`, falling back to its lower-case spelling.
fn lookup_any<F>(lookup: &F, names: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    names.iter().copied().find_map(|name| {
        lookup(name).or_else(|| {
            let lower = name.to_lowercase();
            if lower == name {
                None
            } else {
                lookup(&lower)
            }
        })
    })
}

fn parse_f64<F>(lookup: &F, names: &[&str]) -> Option<f64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup_any(lookup, names)?;
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => {
            warn!(var = names[0], value = %raw, "invalid numeric env value, ignoring");
            None
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;
        config.sanitize();

        info!(
            path = %path.display(),
            poll_interval_secs = config.poll_interval_secs,
            dry_run = config.dry_run,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Replace values the monitor cannot run with by their defaults.
    fn sanitize(&mut self) {
        if self.poll_interval_secs == 0 {
            warn!(
                fallback = default_poll_interval_secs(),
                "poll_interval_secs must be positive, using default"
            );
            self.poll_interval_secs = default_poll_interval_secs();
        }
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_f64(&lookup, &["STOP_LOSS_PCT"]) {
            self.thresholds.stop_loss_pct = v;
        }
        if let Some(v) = parse_f64(&lookup, &["ARMED_GAIN_PCT"]) {
            self.thresholds.armed_gain_pct = v;
        }
        if let Some(v) = parse_f64(&lookup, &["TRAIL_DROP_PCT"]) {
            self.thresholds.trail_drop_pct = v;
        }

        if let Some(v) = parse_f64(&lookup, &["OPTION_STOP_LOSS_PCT", "Option_STOP_LOSS_PCT"]) {
            self.option_overrides.stop_loss_pct = Some(v);
        }
        if let Some(v) = parse_f64(&lookup, &["OPTION_ARMED_GAIN_PCT", "Option_ARMED_GAIN_PCT"]) {
            self.option_overrides.armed_gain_pct = Some(v);
        }
        if let Some(v) = parse_f64(&lookup, &["OPTION_TRAIL_DROP_PCT", "Option_TRAIL_DROP_PCT"]) {
            self.option_overrides.trail_drop_pct = Some(v);
        }

        if let Some(raw) = lookup("TRAILWARDEN_POLL_INTERVAL_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.poll_interval_secs = secs,
                _ => warn!(value = %raw, "invalid TRAILWARDEN_POLL_INTERVAL_SECS, ignoring"),
            }
        }
        if let Some(raw) = lookup("TRAILWARDEN_DRY_RUN") {
            match parse_bool(&raw) {
                Some(b) => self.dry_run = b,
                None => warn!(value = %raw, "invalid TRAILWARDEN_DRY_RUN, ignoring"),
            }
        }
        if let Some(dir) = lookup("TRAILWARDEN_DATA_DIR").filter(|s| !s.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(addr) = lookup("TRAILWARDEN_BIND_ADDR").filter(|s| !s.trim().is_empty()) {
            self.bind_addr = addr;
        }
        if let Some(url) = lookup("APCA_API_BASE_URL").filter(|s| !s.trim().is_empty()) {
            self.broker_base_url = url;
        }
    }

    /// Effective exit rules for every asset class.
    pub fn exit_rules(&self) -> ExitRules {
        ExitRules {
            equity: self.thresholds,
            option: self.option_overrides.resolve(&self.thresholds),
        }
    }
}
