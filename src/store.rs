// =============================================================================
// Position Store — active-position table + append-only closed-trade log
// =============================================================================
//
// The active table is rewritten in full every cycle. Writes use an atomic
// tmp + rename so a crash mid-write leaves the previous table intact.
//
// The closed-trade log is JSON lines: one immutable record per line, in the
// order the sells were detected.
// =============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::types::{ActiveRow, ClosedTradeRecord, PositionState};

#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Full active-position table. An empty table means no prior history.
    async fn read_rows(&self) -> Result<Vec<ActiveRow>, StoreError>;

    /// Replace the active-position table with `rows`.
    async fn write_all(&self, rows: &[ActiveRow]) -> Result<(), StoreError>;

    /// Append one record to the closed-trade log.
    async fn append_closed_trade(&self, record: &ClosedTradeRecord) -> Result<(), StoreError>;

    /// Every closed-trade record, oldest first.
    async fn read_closed_trades(&self) -> Result<Vec<ClosedTradeRecord>, StoreError>;

    /// Prior state keyed by ticker. Absent keys mean the ticker has no history.
    async fn read_all(&self) -> Result<BTreeMap<String, PositionState>, StoreError> {
        let rows = self.read_rows().await?;
        Ok(rows.into_iter().map(|r| (r.ticker, r.state)).collect())
    }
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// File-backed store: `active_positions.json` and `closed_trades.jsonl` under
/// a data directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    active_path: PathBuf,
    closed_path: PathBuf,
}

impl JsonFileStore {
    pub const ACTIVE_FILE: &'static str = "active_positions.json";
    pub const CLOSED_FILE: &'static str = "closed_trades.jsonl";

    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;

        let store = Self {
            active_path: dir.join(Self::ACTIVE_FILE),
            closed_path: dir.join(Self::CLOSED_FILE),
        };
        info!(
            active = %store.active_path.display(),
            closed = %store.closed_path.display(),
            "position store opened"
        );
        Ok(store)
    }

    async fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PositionStore for JsonFileStore {
    async fn read_rows(&self) -> Result<Vec<ActiveRow>, StoreError> {
        let Some(content) = Self::read_optional(&self.active_path).await? else {
            debug!("no active table on disk yet");
            return Ok(Vec::new());
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn write_all(&self, rows: &[ActiveRow]) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(rows)?;

        // Atomic write: temporary sibling first, then rename over the target.
        let tmp_path = self.active_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &content).await?;
        tokio::fs::rename(&tmp_path, &self.active_path).await?;

        debug!(rows = rows.len(), "active table written (atomic)");
        Ok(())
    }

    async fn append_closed_trade(&self, record: &ClosedTradeRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.closed_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_closed_trades(&self) -> Result<Vec<ClosedTradeRecord>, StoreError> {
        let Some(content) = Self::read_optional(&self.closed_path).await? else {
            return Ok(Vec::new());
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(StoreError::from))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// In-memory store for orchestration tests
// ---------------------------------------------------------------------------


// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::types::{AssetClass, ExitReason, PositionSnapshot};

    fn row(ticker: &str, ath: f64, armed: bool) -> ActiveRow {
        ActiveRow {
            ticker: ticker.to_string(),
            state: PositionState {
                all_time_high_gain_pct: ath,
                armed,
            },
            snapshot: Some(PositionSnapshot {
                quantity: 10.0,
                cost_basis: 100.0,
                current_price: 100.0 + ath,
                gain_pct: ath,
            }),
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn empty_directory_has_no_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        assert!(store.read_all().await.unwrap().is_empty());
        assert!(store.read_closed_trades().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_all_replaces_the_whole_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();

        store.write_all(&[row("AAPL", 4.0, false), row("MSFT", 6.0, true)]).await.unwrap();
        store.write_all(&[row("MSFT", 7.0, true)]).await.unwrap();

        let state = store.read_all().await.unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(state["MSFT"].all_time_high_gain_pct, 7.0);
        assert!(state["MSFT"].armed);
        assert!(!dir.path().join("active_positions.json.tmp").exists());
    }

    #[tokio::test]
    async fn rows_without_snapshot_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let mut r = row("ZERO", 1.0, false);
        r.snapshot = None;

        store.write_all(&[r.clone()]).await.unwrap();
        assert_eq!(store.read_rows().await.unwrap(), vec![r]);
    }

    #[tokio::test]
    async fn closed_trades_append_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();

        for (ticker, gain) in [("AAPL", 2.0), ("MSFT", -3.5)] {
            store
                .append_closed_trade(&ClosedTradeRecord {
                    ticker: ticker.into(),
                    final_gain_pct: gain,
                    armed_at_close: gain > 0.0,
                    closed_at_utc: Utc::now(),
                    exit_reason: ExitReason::StopLoss,
                    asset_class: AssetClass::Equity,
                })
                .await
                .unwrap();
        }

        let trades = store.read_closed_trades().await.unwrap();
        let tickers: Vec<&str> = trades.iter().map(|t| t.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["AAPL", "MSFT"]);
        assert!(trades[0].armed_at_close);
    }

    #[tokio::test]
    async fn corrupt_table_is_an_error_not_an_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join(JsonFileStore::ACTIVE_FILE), "{not json").unwrap();

        assert!(matches!(store.read_all().await, Err(StoreError::Serde(_))));
    }
}
