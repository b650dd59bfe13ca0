// =============================================================================
// Decision Cycle — read state, evaluate, close, persist
// =============================================================================
//
// Strict order within a cycle:
//   1. Read prior state from the store.        (failure aborts, nothing written)
//   2. List live positions from the broker.    (failure aborts, nothing written)
//   3. Evaluate.                               (pure)
//   4. Send one close command per sell.        (failure isolated per ticker)
//   5. Rewrite the active table.               (failure aborts the cycle)
//   6. Append one closed-trade record per successful close.
//
// A crash between 4 and 5 leaves closed positions in the stored table. The
// next cycle no longer sees them live and drops their state; the closed-trade
// record for that sell is lost. This window is accepted so the loop never
// blocks on exactly-once accounting.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::error::CycleError;
use crate::exit::engine::ExitEngine;
use crate::store::PositionStore;
use crate::types::{ActiveRow, ClosedTradeRecord};

/// What happened during one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub decided_at: DateTime<Utc>,
    /// Live positions that passed validation.
    pub evaluated: usize,
    /// Rows written to the active table.
    pub tracked: usize,
    /// Records for positions whose close command was accepted.
    pub sold: Vec<ClosedTradeRecord>,
    /// Tickers whose close command failed; they stay tracked.
    pub close_failures: Vec<String>,
    /// Human-readable per-ticker input rejections.
    pub rejected: Vec<String>,
    /// Stored tickers no longer reported by the broker.
    pub dropped_stale: Vec<String>,
    /// Closed-trade records that could not be appended.
    pub record_failures: usize,
}

/// Run one full decision cycle at decision time `now`.
pub async fn run_cycle(
    engine: &ExitEngine,
    broker: &dyn Broker,
    store: &dyn PositionStore,
    now: DateTime<Utc>,
) -> Result<CycleSummary, CycleError> {
    let cycle_id = Uuid::new_v4();
    debug!(cycle_id = %cycle_id, decided_at = %now, "decision cycle started");

    // -----------------------------------------------------------------
    // 1-2. Inputs
    // -----------------------------------------------------------------
    let prior = store.read_all().await.map_err(CycleError::ReadState)?;
    let live = broker
        .list_open_positions()
        .await
        .map_err(CycleError::ListPositions)?;

    debug!(
        cycle_id = %cycle_id,
        live = live.len(),
        tracked = prior.len(),
        "cycle inputs loaded"
    );

    // -----------------------------------------------------------------
    // 3. Evaluate
    // -----------------------------------------------------------------
    let mut eval = engine.evaluate(&live, &prior, now);

    for rejection in &eval.rejected {
        warn!(
            cycle_id = %cycle_id,
            ticker = rejection.ticker(),
            error = %rejection,
            "position skipped, prior state carried forward"
        );
    }
    for ticker in &eval.dropped {
        info!(
            cycle_id = %cycle_id,
            ticker = %ticker,
            "tracked position no longer open at broker, state dropped without closed-trade record"
        );
    }

    // -----------------------------------------------------------------
    // 4. Close commands
    // -----------------------------------------------------------------
    let mut sold: Vec<ClosedTradeRecord> = Vec::new();
    let mut close_failures: Vec<String> = Vec::new();

    for order in std::mem::take(&mut eval.sells) {
        match broker.close_position(&order.ticker).await {
            Ok(()) => {
                info!(
                    cycle_id = %cycle_id,
                    ticker = %order.ticker,
                    asset_class = %order.record.asset_class,
                    reason = %order.record.exit_reason,
                    gain_pct = format!("{:.2}", order.record.final_gain_pct),
                    ath = format!("{:.2}", order.state.all_time_high_gain_pct),
                    armed = order.record.armed_at_close,
                    "SOLD"
                );
                sold.push(order.record);
            }
            Err(e) => {
                warn!(
                    cycle_id = %cycle_id,
                    ticker = %order.ticker,
                    reason = %order.record.exit_reason,
                    error = %e,
                    "close command failed, position stays tracked for next cycle"
                );
                eval.next_state.insert(order.ticker.clone(), order.state);
                close_failures.push(order.ticker);
            }
        }
    }

    // -----------------------------------------------------------------
    // 5. Persist the active table (full replace)
    // -----------------------------------------------------------------
    let snapshots: HashMap<&str, _> = eval
        .assessments
        .iter()
        .map(|a| (a.ticker.as_str(), a.snapshot.clone()))
        .collect();

    let rows: Vec<ActiveRow> = eval
        .next_state
        .iter()
        .map(|(ticker, state)| ActiveRow {
            ticker: ticker.clone(),
            state: *state,
            snapshot: snapshots.get(ticker.as_str()).cloned(),
            last_updated: now,
        })
        .collect();

    store.write_all(&rows).await.map_err(CycleError::WriteState)?;

    // -----------------------------------------------------------------
    // 6. Closed-trade log
    // -----------------------------------------------------------------
    let mut record_failures = 0usize;
    for record in &sold {
        if let Err(e) = store.append_closed_trade(record).await {
            record_failures += 1;
            error!(
                cycle_id = %cycle_id,
                ticker = %record.ticker,
                error = %e,
                "failed to append closed-trade record"
            );
        }
    }

    let summary = CycleSummary {
        cycle_id,
        decided_at: now,
        evaluated: eval.assessments.len(),
        tracked: rows.len(),
        sold,
        close_failures,
        rejected: eval.rejected.iter().map(ToString::to_string).collect(),
        dropped_stale: eval.dropped,
        record_failures,
    };

    info!(
        cycle_id = %cycle_id,
        evaluated = summary.evaluated,
        tracked = summary.tracked,
        sold = ?summary.sold.iter().map(|r| r.ticker.as_str()).collect::<Vec<_>>(),
        close_failures = summary.close_failures.len(),
        rejected = summary.rejected.len(),
        dropped_stale = summary.dropped_stale.len(),
        "decision cycle completed"
    );

    Ok(summary)
}
