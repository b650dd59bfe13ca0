// =============================================================================
// Error taxonomy
// =============================================================================
//
// Business outcomes (stop-loss, take-profit) are never errors. Errors here are
// either per-ticker input rejections (the rest of the cycle proceeds) or
// cycle-level I/O failures (the cycle aborts and the loop retries next tick).
// =============================================================================

use thiserror::Error;

/// Per-ticker rejection raised while evaluating a live snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid position {ticker}: {reason}")]
    InvalidPosition { ticker: String, reason: String },

    #[error("ticker {ticker} appears more than once in the live snapshot")]
    DuplicateTicker { ticker: String },
}

impl EngineError {
    pub fn ticker(&self) -> &str {
        match self {
            Self::InvalidPosition { ticker, .. } | Self::DuplicateTicker { ticker } => ticker,
        }
    }
}

/// Failures talking to the broker gateway.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("broker returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed broker response: {0}")]
    Decode(String),
}

/// Failures reading or writing the position store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store (de)serialisation failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Cycle-level failure. The current cycle is abandoned; the next tick retries.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to read prior position state: {0}")]
    ReadState(#[source] StoreError),

    #[error("failed to list open positions: {0}")]
    ListPositions(#[source] BrokerError),

    #[error("failed to write position state: {0}")]
    WriteState(#[source] StoreError),
}
