// =============================================================================
// Exit Decision Engine — per-position trailing state + sell/keep decision
// =============================================================================
//
// Per live position, every cycle:
//   1. Validate the snapshot and compute gain %.
//   2. Load prior state, or initialise it (ATH = current gain, disarmed).
//   3. ATH    <- max(prior ATH, gain)
//   4. armed  <- prior armed OR gain >= arm threshold
//   5. Rules, first match wins:
//        a. gain <= stop-loss                  -> sell (StopLoss)
//        b. armed AND gain <= ATH - trail drop -> sell (TrailingTakeProfit)
//        c. otherwise keep, carry {ATH, armed}
//
// The engine does no I/O and reads no clock: the decision timestamp is passed
// in. Positions are independent of one another.
//
// Tickers present in the prior state but missing from the live snapshot are
// dropped without a closed-trade record since no final gain was observed.
// =============================================================================

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::EngineError;
use crate::exit::rules::{ExitRules, ExitThresholds};
use crate::types::{ClosedTradeRecord, ExitReason, Position, PositionSnapshot, PositionState};

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Outcome of the rule evaluation for a single position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Sell(ExitReason),
}

/// Everything the engine worked out about one valid live position.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub ticker: String,
    pub snapshot: PositionSnapshot,
    /// State after this cycle's update, whether or not the position is sold.
    pub state: PositionState,
    pub decision: Decision,
}

/// A close command the orchestrator must issue.
#[derive(Debug, Clone, PartialEq)]
pub struct SellOrder {
    pub ticker: String,
    pub record: ClosedTradeRecord,
    /// Updated state to restore if the close command fails.
    pub state: PositionState,
}

/// Result of evaluating one cycle.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// State to persist for every ticker that stays open (or whose live data
    /// was rejected and keeps its prior state).
    pub next_state: BTreeMap<String, PositionState>,
    /// Valid positions in snapshot order.
    pub assessments: Vec<Assessment>,
    /// Sell decisions in detection order.
    pub sells: Vec<SellOrder>,
    /// Per-ticker input rejections.
    pub rejected: Vec<EngineError>,
    /// Stored tickers no longer reported live.
    pub dropped: Vec<String>,
}

// ---------------------------------------------------------------------------
// Gain computation
// ---------------------------------------------------------------------------

/// Gain percent of `position`, sign-adjusted for shorts.
///
/// Fails with `InvalidPosition` when the cost basis or price is missing,
/// non-finite, or not strictly positive, or when the gain itself overflows.
pub fn gain_pct(position: &Position) -> Result<f64, EngineError> {
    let invalid = |reason: String| EngineError::InvalidPosition {
        ticker: position.ticker.clone(),
        reason,
    };

    if position.ticker.trim().is_empty() {
        return Err(invalid("empty ticker".to_string()));
    }
    if !position.quantity.is_finite() {
        return Err(invalid(format!("non-finite quantity {}", position.quantity)));
    }

    let cost = position
        .cost_basis
        .ok_or_else(|| invalid("missing cost basis".to_string()))?;
    let price = position
        .current_price
        .ok_or_else(|| invalid("missing current price".to_string()))?;

    if !cost.is_finite() || cost <= 0.0 {
        return Err(invalid(format!("non-positive cost basis {cost}")));
    }
    if !price.is_finite() || price <= 0.0 {
        return Err(invalid(format!("non-positive current price {price}")));
    }

    let gain = if position.is_short() {
        (cost - price) / cost * 100.0
    } else {
        (price - cost) / cost * 100.0
    };
    if !gain.is_finite() {
        return Err(invalid(format!("gain overflows for cost {cost} and price {price}")));
    }
    Ok(gain)
}

/// Apply one observation to the prior state (steps 2-4).
pub fn advance_state(prior: Option<&PositionState>, gain: f64, thresholds: &ExitThresholds) -> PositionState {
    let prior = prior.copied().unwrap_or_else(|| PositionState::first_seen(gain));
    PositionState {
        all_time_high_gain_pct: prior.all_time_high_gain_pct.max(gain),
        armed: prior.armed || gain >= thresholds.armed_gain_pct,
    }
}

/// Run the exit rules against an already-advanced state (step 5).
pub fn decide(gain: f64, state: &PositionState, thresholds: &ExitThresholds) -> Decision {
    if gain <= thresholds.stop_loss_pct {
        return Decision::Sell(ExitReason::StopLoss);
    }
    if state.armed && gain <= state.all_time_high_gain_pct - thresholds.trail_drop_pct {
        return Decision::Sell(ExitReason::TrailingTakeProfit);
    }
    Decision::Keep
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Stateless evaluator configured with a set of exit thresholds.
#[derive(Debug, Clone, Default)]
pub struct ExitEngine {
    rules: ExitRules,
}

impl ExitEngine {
    pub fn new(rules: ExitRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ExitRules {
        &self.rules
    }

    /// Assess a single position against its prior state.
    pub fn assess(&self, position: &Position, prior: Option<&PositionState>) -> Result<Assessment, EngineError> {
        let gain = gain_pct(position)?;
        let thresholds = self.rules.for_position(position);
        let state = advance_state(prior, gain, thresholds);
        let decision = decide(gain, &state, thresholds);

        debug!(
            ticker = %position.ticker,
            asset_class = %position.asset_class,
            gain_pct = gain,
            ath = state.all_time_high_gain_pct,
            armed = state.armed,
            first_seen = prior.is_none(),
            decision = ?decision,
            "position assessed"
        );

        Ok(Assessment {
            ticker: position.ticker.clone(),
            snapshot: PositionSnapshot {
                quantity: position.quantity,
                // Validated by `gain_pct` above.
                cost_basis: position.cost_basis.unwrap_or_default(),
                current_price: position.current_price.unwrap_or_default(),
                gain_pct: gain,
            },
            state,
            decision,
        })
    }

    /// Evaluate a full live snapshot against the prior persisted state.
    pub fn evaluate(
        &self,
        live: &[Position],
        prior: &BTreeMap<String, PositionState>,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let mut eval = Evaluation::default();

        let mut occurrences: HashMap<&str, usize> = HashMap::new();
        for pos in live {
            *occurrences.entry(pos.ticker.as_str()).or_default() += 1;
        }
        let mut reported_duplicates: HashSet<&str> = HashSet::new();

        for pos in live {
            let ticker = pos.ticker.as_str();

            let outcome = if occurrences[ticker] > 1 {
                if reported_duplicates.insert(ticker) {
                    eval.rejected.push(EngineError::DuplicateTicker {
                        ticker: ticker.to_string(),
                    });
                }
                None
            } else {
                match self.assess(pos, prior.get(ticker)) {
                    Ok(assessment) => Some(assessment),
                    Err(e) => {
                        eval.rejected.push(e);
                        None
                    }
                }
            };

            let Some(assessment) = outcome else {
                // Rejected input: carry whatever we had before, untouched.
                if let Some(state) = prior.get(ticker) {
                    eval.next_state.insert(ticker.to_string(), *state);
                }
                continue;
            };

            match assessment.decision {
                Decision::Keep => {
                    eval.next_state.insert(assessment.ticker.clone(), assessment.state);
                }
                Decision::Sell(reason) => {
                    eval.sells.push(SellOrder {
                        ticker: assessment.ticker.clone(),
                        record: ClosedTradeRecord {
                            ticker: assessment.ticker.clone(),
                            final_gain_pct: assessment.snapshot.gain_pct,
                            armed_at_close: assessment.state.armed,
                            closed_at_utc: now,
                            exit_reason: reason,
                            asset_class: pos.asset_class,
                        },
                        state: assessment.state,
                    });
                }
            }
            eval.assessments.push(assessment);
        }

        eval.dropped = prior
            .keys()
            .filter(|t| !occurrences.contains_key(t.as_str()))
            .cloned()
            .collect();

        eval
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssetClass;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-02T15:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn state(ath: f64, armed: bool) -> PositionState {
        PositionState {
            all_time_high_gain_pct: ath,
            armed,
        }
    }

    fn prior(entries: &[(&str, PositionState)]) -> BTreeMap<String, PositionState> {
        entries.iter().map(|(t, s)| (t.to_string(), *s)).collect()
    }

    #[test]
    fn first_seen_below_arm_threshold_is_kept_unarmed() {
        let engine = ExitEngine::default();
        let eval = engine.evaluate(&[Position::new("AAPL", 10.0, 100.0, 104.0)], &BTreeMap::new(), now());

        assert!(eval.sells.is_empty());
        assert_eq!(eval.next_state["AAPL"], state(4.0, false));
    }

    #[test]
    fn armed_position_retracing_from_ath_is_sold() {
        let engine = ExitEngine::default();
        let eval = engine.evaluate(
            &[Position::new("AAPL", 10.0, 100.0, 102.0)],
            &prior(&[("AAPL", state(6.0, true))]),
            now(),
        );

        assert!(!eval.next_state.contains_key("AAPL"));
        assert_eq!(eval.sells.len(), 1);
        let record = &eval.sells[0].record;
        assert_eq!(record.ticker, "AAPL");
        assert_eq!(record.final_gain_pct, 2.0);
        assert!(record.armed_at_close);
        assert_eq!(record.closed_at_utc, now());
        assert_eq!(record.exit_reason, ExitReason::TrailingTakeProfit);
    }

    #[test]
    fn first_seen_loss_beyond_stop_is_sold() {
        let engine = ExitEngine::default();
        let eval = engine.evaluate(&[Position::new("MSFT", 5.0, 100.0, 96.5)], &BTreeMap::new(), now());

        assert_eq!(eval.sells.len(), 1);
        assert_eq!(eval.sells[0].record.exit_reason, ExitReason::StopLoss);
        assert!((eval.sells[0].record.final_gain_pct + 3.5).abs() < 1e-9);
        assert!(!eval.sells[0].record.armed_at_close);
        assert!(eval.next_state.is_empty());
    }

    #[test]
    fn gain_equal_to_ath_is_kept() {
        let engine = ExitEngine::default();
        let eval = engine.evaluate(
            &[Position::new("TSLA", 1.0, 100.0, 105.0)],
            &prior(&[("TSLA", state(5.0, true))]),
            now(),
        );

        assert!(eval.sells.is_empty());
        assert_eq!(eval.next_state["TSLA"], state(5.0, true));
    }

    #[test]
    fn zero_cost_basis_is_rejected_and_prior_state_carried() {
        let engine = ExitEngine::default();
        let eval = engine.evaluate(
            &[Position::new("ZERO", 1.0, 0.0, 10.0)],
            &prior(&[("ZERO", state(7.5, true))]),
            now(),
        );

        assert!(eval.sells.is_empty());
        assert!(eval.assessments.is_empty());
        assert_eq!(eval.next_state["ZERO"], state(7.5, true));
        assert!(matches!(
            &eval.rejected[..],
            [EngineError::InvalidPosition { ticker, .. }] if ticker == "ZERO"
        ));
    }

    #[test]
    fn zero_cost_basis_without_prior_leaves_no_state() {
        let engine = ExitEngine::default();
        let eval = engine.evaluate(&[Position::new("ZERO", 1.0, 0.0, 10.0)], &BTreeMap::new(), now());
        assert!(eval.next_state.is_empty());
        assert_eq!(eval.rejected.len(), 1);
        assert!(eval.dropped.is_empty());
    }

    #[test]
    fn missing_or_non_positive_prices_are_rejected() {
        let mut missing_cost = Position::new("A", 1.0, 1.0, 1.0);
        missing_cost.cost_basis = None;
        let mut missing_price = Position::new("B", 1.0, 1.0, 1.0);
        missing_price.current_price = None;
        let negative_price = Position::new("C", 1.0, 10.0, -1.0);
        let nan_cost = Position::new("D", 1.0, f64::NAN, 1.0);

        for pos in [missing_cost, missing_price, negative_price, nan_cost] {
            let err = gain_pct(&pos).unwrap_err();
            assert_eq!(err.ticker(), pos.ticker);
        }
    }

    #[test]
    fn arming_threshold_is_inclusive_on_first_sight() {
        let engine = ExitEngine::default();
        let eval = engine.evaluate(&[Position::new("NVDA", 1.0, 100.0, 105.0)], &BTreeMap::new(), now());
        assert_eq!(eval.next_state["NVDA"], state(5.0, true));
    }

    #[test]
    fn stop_loss_threshold_is_inclusive() {
        let engine = ExitEngine::default();
        let eval = engine.evaluate(&[Position::new("F", 1.0, 100.0, 97.0)], &BTreeMap::new(), now());
        assert_eq!(eval.sells[0].record.exit_reason, ExitReason::StopLoss);

        let eval = engine.evaluate(&[Position::new("F", 1.0, 100.0, 97.01)], &BTreeMap::new(), now());
        assert!(eval.sells.is_empty());
    }

    #[test]
    fn trailing_threshold_is_inclusive() {
        let engine = ExitEngine::default();
        let eval = engine.evaluate(
            &[Position::new("AMD", 1.0, 100.0, 105.0)],
            &prior(&[("AMD", state(8.0, true))]),
            now(),
        );
        assert_eq!(eval.sells[0].record.exit_reason, ExitReason::TrailingTakeProfit);
    }

    #[test]
    fn stop_loss_is_checked_before_trailing_exit() {
        let t = ExitThresholds::default();

        // Both rules fire: stop-loss wins.
        let s = state(10.0, true);
        assert_eq!(decide(-3.0, &s, &t), Decision::Sell(ExitReason::StopLoss));

        // Only the stop-loss condition changes (disarmed): still stop-loss.
        let s = state(10.0, false);
        assert_eq!(decide(-3.0, &s, &t), Decision::Sell(ExitReason::StopLoss));

        // Only the stop-loss condition changes (gain just above stop): trailing.
        let s = state(10.0, true);
        assert_eq!(decide(-2.9, &s, &t), Decision::Sell(ExitReason::TrailingTakeProfit));
    }

    #[test]
    fn unarmed_position_is_not_trailed() {
        let t = ExitThresholds::default();
        assert_eq!(decide(1.0, &state(4.9, false), &t), Decision::Keep);
    }

    #[test]
    fn ath_and_armed_are_monotone_over_a_price_path() {
        let engine = ExitEngine::default();
        // Price path that rises, arms, dips without triggering, then recovers.
        let prices = [101.0, 103.0, 105.5, 104.0, 103.0, 104.5, 106.0, 104.0];
        let mut carried: BTreeMap<String, PositionState> = BTreeMap::new();

        for (i, price) in prices.iter().enumerate() {
            let before = carried.get("QQQ").copied();
            let eval = engine.evaluate(&[Position::new("QQQ", 3.0, 100.0, *price)], &carried, now());
            assert!(eval.sells.is_empty(), "unexpected sell at step {i}");

            let after = eval.next_state["QQQ"];
            let gain = eval.assessments[0].snapshot.gain_pct;
            assert!(after.all_time_high_gain_pct >= gain);
            if let Some(b) = before {
                assert!(after.all_time_high_gain_pct >= b.all_time_high_gain_pct);
                assert!(!b.armed || after.armed, "armed flag reset at step {i}");
            }
            carried = eval.next_state;
        }

        assert_eq!(carried["QQQ"], state(6.0, true));
    }

    #[test]
    fn armed_survives_a_drop_below_zero_that_does_not_trigger() {
        // Wider stop and trail so the dip is kept.
        let engine = ExitEngine::new(ExitRules::uniform(ExitThresholds {
            stop_loss_pct: -10.0,
            armed_gain_pct: 5.0,
            trail_drop_pct: 20.0,
        }));
        let eval = engine.evaluate(
            &[Position::new("IWM", 1.0, 100.0, 99.0)],
            &prior(&[("IWM", state(6.0, true))]),
            now(),
        );
        assert_eq!(eval.next_state["IWM"], state(6.0, true));
    }

    #[test]
    fn keep_path_preserves_every_entry_once() {
        let engine = ExitEngine::default();
        let live = vec![
            Position::new("A", 1.0, 100.0, 101.0),
            Position::new("B", 1.0, 100.0, 102.0),
            Position::new("C", 1.0, 100.0, 100.0),
        ];
        let p = prior(&[("A", state(1.5, false)), ("B", state(2.0, false)), ("C", state(0.0, false))]);

        let eval = engine.evaluate(&live, &p, now());
        assert!(eval.sells.is_empty());
        assert_eq!(eval.next_state, p);

        let again = engine.evaluate(&live, &eval.next_state, now());
        assert_eq!(again.next_state, p);
    }

    #[test]
    fn stale_prior_state_is_dropped_without_a_record() {
        let engine = ExitEngine::default();
        let eval = engine.evaluate(
            &[Position::new("AAPL", 1.0, 100.0, 101.0)],
            &prior(&[("AAPL", state(1.0, false)), ("GONE", state(9.0, true))]),
            now(),
        );
        assert_eq!(eval.dropped, vec!["GONE".to_string()]);
        assert!(!eval.next_state.contains_key("GONE"));
        assert!(eval.sells.is_empty());
    }

    #[test]
    fn duplicate_tickers_are_rejected_once_and_keep_prior_state() {
        let engine = ExitEngine::default();
        let live = vec![
            Position::new("DUP", 1.0, 100.0, 90.0),
            Position::new("OK", 1.0, 100.0, 101.0),
            Position::new("DUP", 1.0, 100.0, 80.0),
        ];
        let eval = engine.evaluate(&live, &prior(&[("DUP", state(2.0, false))]), now());

        assert_eq!(
            eval.rejected,
            vec![EngineError::DuplicateTicker { ticker: "DUP".into() }]
        );
        assert!(eval.sells.is_empty());
        assert_eq!(eval.next_state["DUP"], state(2.0, false));
        assert!(eval.next_state.contains_key("OK"));
        assert!(eval.dropped.is_empty());
    }

    #[test]
    fn sells_keep_snapshot_order() {
        let engine = ExitEngine::default();
        let live = vec![
            Position::new("Z", 1.0, 100.0, 90.0),
            Position::new("A", 1.0, 100.0, 101.0),
            Position::new("M", 1.0, 100.0, 95.0),
        ];
        let eval = engine.evaluate(&live, &BTreeMap::new(), now());
        let sold: Vec<&str> = eval.sells.iter().map(|s| s.ticker.as_str()).collect();
        assert_eq!(sold, vec!["Z", "M"]);
    }

    #[test]
    fn short_gain_is_sign_inverted() {
        let short = Position::new("SHRT", -10.0, 100.0, 96.0);
        assert_eq!(gain_pct(&short).unwrap(), 4.0);

        let engine = ExitEngine::default();
        let eval = engine.evaluate(&[Position::new("SHRT", -10.0, 100.0, 103.0)], &BTreeMap::new(), now());
        assert_eq!(eval.sells[0].record.exit_reason, ExitReason::StopLoss);
    }

    #[test]
    fn overflowing_gain_is_rejected_not_sold() {
        let engine = ExitEngine::default();
        let live = [
            Position::new("HUGE", 1.0, 1e-300, 1e300),
            Position::new("LOSS", 1.0, 100.0, 96.0),
        ];
        let eval = engine.evaluate(&live, &BTreeMap::new(), now());

        let sold: Vec<&str> = eval.sells.iter().map(|s| s.ticker.as_str()).collect();
        assert_eq!(sold, vec!["LOSS"]);
        assert_eq!(eval.rejected.len(), 1);
        assert_eq!(eval.rejected[0].ticker(), "HUGE");
        assert!(!eval.next_state.contains_key("HUGE"));
    }

    #[test]
    fn options_are_judged_by_option_thresholds() {
        let engine = ExitEngine::new(ExitRules {
            equity: ExitThresholds::default(),
            option: ExitThresholds {
                stop_loss_pct: -25.0,
                armed_gain_pct: 40.0,
                trail_drop_pct: 15.0,
            },
        });
        let mut option = Position::new("AAPL250117C00150000", 2.0, 2.0, 1.8);
        option.asset_class = AssetClass::Option;
        let equity = Position::new("AAPL", 2.0, 2.0, 1.8);

        let eval = engine.evaluate(&[option, equity], &BTreeMap::new(), now());
        assert_eq!(eval.sells.len(), 1);
        assert_eq!(eval.sells[0].ticker, "AAPL");
        assert!(eval.next_state.contains_key("AAPL250117C00150000"));
    }

    #[test]
    fn sell_order_carries_the_updated_state() {
        let engine = ExitEngine::default();
        let eval = engine.evaluate(
            &[Position::new("AAPL", 1.0, 100.0, 102.0)],
            &prior(&[("AAPL", state(6.0, true))]),
            now(),
        );
        assert_eq!(eval.sells[0].state, state(6.0, true));
    }
}
