// =============================================================================
// Exit engine — prioritized per-position exit evaluation
// =============================================================================
//
// Rules run in priority order; the first match wins. Percentages are of
// entry premium. P&L math is in premium-percent space so longs and shorts
// share one code path.
//
// Enhanced mode (on when ATR context is available) scales the profit-target
// schedule by the ATR percentile: quiet tape takes profits sooner, fast tape
// lets winners stretch.
// =============================================================================

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::market_data::{GexBundle, OptionQuote};
use crate::runtime_config::ExitParams;
use crate::types::{Direction, MarketRegime, OrderType, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitAction {
    Hold,
    ClosePartial,
    CloseFull,
    TightenStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitUrgency {
    Immediate,
    Soon,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitTrigger {
    None,
    AtrStop,
    ProfitTarget1,
    ProfitTarget2,
    StopLoss,
    TrailingStop,
    DteLimit,
    MaxDaysInTrade,
    DeepItm,
    ThetaDecay,
    IvCrush,
    GexFlip,
    RegimeChange,
}

impl std::fmt::Display for ExitTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::AtrStop => "ATR_STOP",
            Self::ProfitTarget1 => "PROFIT_TARGET_1",
            Self::ProfitTarget2 => "PROFIT_TARGET_2",
            Self::StopLoss => "STOP_LOSS",
            Self::TrailingStop => "TRAILING_STOP",
            Self::DteLimit => "DTE_LIMIT",
            Self::MaxDaysInTrade => "MAX_DAYS_IN_TRADE",
            Self::DeepItm => "DEEP_ITM",
            Self::ThetaDecay => "THETA_DECAY",
            Self::IvCrush => "IV_CRUSH",
            Self::GexFlip => "GEX_FLIP",
            Self::RegimeChange => "REGIME_CHANGE",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExitEvaluation {
    pub action: ExitAction,
    pub urgency: ExitUrgency,
    pub trigger: ExitTrigger,
    /// Contracts to close (0 for HOLD / TIGHTEN_STOP).
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_stop_loss: Option<f64>,
    pub suggested_order_type: OrderType,
    pub reason: String,
}

impl ExitEvaluation {
    pub fn should_exit(&self) -> bool {
        matches!(self.action, ExitAction::ClosePartial | ExitAction::CloseFull)
    }

    fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: ExitAction::Hold,
            urgency: ExitUrgency::Optional,
            trigger: ExitTrigger::None,
            quantity: 0,
            new_stop_loss: None,
            suggested_order_type: OrderType::Limit,
            reason: reason.into(),
        }
    }
}

/// Everything the engine needs to judge one position.
#[derive(Debug, Clone)]
pub struct ExitInputs<'a> {
    pub position: &'a Position,
    pub quote: &'a OptionQuote,
    /// ATR in premium space, when the context has it.
    pub atr: Option<f64>,
    pub atr_percentile: Option<f64>,
    pub gex: Option<&'a GexBundle>,
    pub today: NaiveDate,
}

/// A long call or short put profits from up-moves.
fn position_direction(position: &Position) -> Direction {
    use crate::types::OptionType;
    match (position.option_type, position.is_long()) {
        (OptionType::Call, true) | (OptionType::Put, false) => Direction::Bullish,
        (OptionType::Put, true) | (OptionType::Call, false) => Direction::Bearish,
    }
}

/// Evaluate the exit rules for one position.
pub fn evaluate(inputs: &ExitInputs<'_>, params: &ExitParams) -> ExitEvaluation {
    let position = inputs.position;
    let mid = inputs.quote.mid();
    let entry = position.avg_open_price;
    let abs_qty = position.quantity.unsigned_abs();
    let is_long = position.is_long();

    if entry <= 0.0 || mid <= 0.0 {
        return ExitEvaluation::hold("no usable price; holding");
    }

    // P&L in premium-percent space. Longs gain when premium rises, shorts
    // when it falls.
    let pnl_pct = if is_long {
        (mid - entry) / entry * 100.0
    } else {
        (entry - mid) / entry * 100.0
    };

    // High-water mark as percent of entry premium.
    let notional = entry * 100.0 * abs_qty as f64;
    let hwm_pct = if notional > 0.0 {
        position.high_water_mark / notional * 100.0
    } else {
        0.0
    };

    let enhanced = params.use_enhanced && inputs.atr.is_some();

    // Enhanced mode: scale profit targets by the ATR percentile (quiet tape
    // pays out sooner). Percentile 50 is the neutral point.
    let target_scale = if enhanced {
        match inputs.atr_percentile {
            Some(pct) => 0.75 + (pct / 200.0),
            None => 1.0,
        }
    } else {
        1.0
    };
    let t1 = params.profit_target_1_percent * target_scale;
    let t2 = params.profit_target_2_percent * target_scale;

    // ── 1. ATR stop ─────────────────────────────────────────────────────
    if let Some(atr) = inputs.atr {
        // k shrinks in a quiet tape (low percentile → tighter stop).
        let k = 1.0 + inputs.atr_percentile.unwrap_or(50.0) / 100.0;
        let triggered = if is_long {
            mid <= entry - k * atr
        } else {
            mid >= entry + k * atr
        };
        if triggered {
            return ExitEvaluation {
                action: ExitAction::CloseFull,
                urgency: ExitUrgency::Immediate,
                trigger: ExitTrigger::AtrStop,
                quantity: abs_qty,
                new_stop_loss: None,
                suggested_order_type: OrderType::Market,
                reason: format!(
                    "ATR stop: mid {mid:.2} beyond entry {entry:.2} ∓ {k:.2}×ATR {atr:.2}"
                ),
            };
        }
    }

    // ── 1b. Active position stop (breakeven / tightened) ────────────────
    if let Some(stop) = position.stop_loss {
        let hit = if is_long { mid <= stop } else { mid >= stop };
        if hit {
            return ExitEvaluation {
                action: ExitAction::CloseFull,
                urgency: ExitUrgency::Immediate,
                trigger: ExitTrigger::StopLoss,
                quantity: abs_qty,
                new_stop_loss: None,
                suggested_order_type: OrderType::Market,
                reason: format!("position stop {stop:.2} hit at mid {mid:.2}"),
            };
        }
    }

    // ── 2. Profit targets (partials) ────────────────────────────────────
    if pnl_pct >= t2 && position.partial_exits_taken == 1 {
        let close_qty = ((abs_qty as f64) * 0.5).ceil() as u32;
        return ExitEvaluation {
            action: ExitAction::ClosePartial,
            urgency: ExitUrgency::Soon,
            trigger: ExitTrigger::ProfitTarget2,
            quantity: close_qty.min(abs_qty),
            new_stop_loss: None,
            suggested_order_type: OrderType::Limit,
            reason: format!("T2 hit: +{pnl_pct:.1}% ≥ {t2:.1}%; closing half, trailing remainder"),
        };
    }
    if pnl_pct >= t1 && position.partial_exits_taken == 0 {
        let close_qty = ((abs_qty as f64) * 0.25).ceil() as u32;
        return ExitEvaluation {
            action: ExitAction::ClosePartial,
            urgency: ExitUrgency::Soon,
            trigger: ExitTrigger::ProfitTarget1,
            quantity: close_qty.min(abs_qty),
            new_stop_loss: Some(entry),
            suggested_order_type: OrderType::Limit,
            reason: format!("T1 hit: +{pnl_pct:.1}% ≥ {t1:.1}%; closing quarter, stop to breakeven"),
        };
    }

    // ── 3. Absolute stop loss ───────────────────────────────────────────
    if pnl_pct <= -params.stop_loss_percent {
        return ExitEvaluation {
            action: ExitAction::CloseFull,
            urgency: ExitUrgency::Immediate,
            trigger: ExitTrigger::StopLoss,
            quantity: abs_qty,
            new_stop_loss: None,
            suggested_order_type: OrderType::Market,
            reason: format!(
                "stop loss: {pnl_pct:.1}% ≤ -{:.0}% of entry premium",
                params.stop_loss_percent
            ),
        };
    }

    // ── 4. Trailing stop (armed after the run-up threshold) ─────────────
    if hwm_pct >= params.trailing_arm_percent {
        let drawdown = hwm_pct - pnl_pct;
        if drawdown >= params.trailing_stop_percent {
            return ExitEvaluation {
                action: ExitAction::CloseFull,
                urgency: ExitUrgency::Soon,
                trigger: ExitTrigger::TrailingStop,
                quantity: abs_qty,
                new_stop_loss: None,
                suggested_order_type: OrderType::Market,
                reason: format!(
                    "trailing stop: {drawdown:.1}% off the +{hwm_pct:.1}% high-water mark"
                ),
            };
        }
    }

    // ── 5. DTE limits ───────────────────────────────────────────────────
    let dte = position.days_to_expiration(inputs.today);
    if dte <= params.dte_immediate_close && pnl_pct < 0.0 {
        return ExitEvaluation {
            action: ExitAction::CloseFull,
            urgency: ExitUrgency::Immediate,
            trigger: ExitTrigger::DteLimit,
            quantity: abs_qty,
            new_stop_loss: None,
            suggested_order_type: OrderType::Market,
            reason: format!("DTE {dte} with {pnl_pct:.1}% loss; market close now"),
        };
    }
    if dte <= params.dte_warning_close {
        return ExitEvaluation {
            action: ExitAction::CloseFull,
            urgency: ExitUrgency::Soon,
            trigger: ExitTrigger::DteLimit,
            quantity: abs_qty,
            new_stop_loss: None,
            suggested_order_type: OrderType::Limit,
            reason: format!("DTE {dte} ≤ {}; close by end of day", params.dte_warning_close),
        };
    }

    // ── 6. Max days in trade ────────────────────────────────────────────
    let days_held = (inputs.today - position.opened_at.date_naive()).num_days();
    if days_held >= params.max_days_in_trade {
        return ExitEvaluation {
            action: ExitAction::CloseFull,
            urgency: ExitUrgency::Soon,
            trigger: ExitTrigger::MaxDaysInTrade,
            quantity: abs_qty,
            new_stop_loss: None,
            suggested_order_type: OrderType::Limit,
            reason: format!(
                "{days_held} days in trade ≥ {}; close by end of day",
                params.max_days_in_trade
            ),
        };
    }

    // ── 7. Deep ITM ─────────────────────────────────────────────────────
    if inputs.quote.greeks.delta.abs() >= params.deep_itm_delta {
        return ExitEvaluation {
            action: ExitAction::CloseFull,
            urgency: ExitUrgency::Soon,
            trigger: ExitTrigger::DeepItm,
            quantity: abs_qty,
            new_stop_loss: None,
            suggested_order_type: OrderType::Limit,
            reason: format!(
                "|delta| {:.2} ≥ {:.2}; convexity spent",
                inputs.quote.greeks.delta.abs(),
                params.deep_itm_delta
            ),
        };
    }

    // ── 8. Theta decay ──────────────────────────────────────────────────
    let theta_daily_pct = inputs.quote.greeks.theta.abs() / mid * 100.0;
    if theta_daily_pct >= params.theta_decay_percent {
        return ExitEvaluation {
            action: ExitAction::CloseFull,
            urgency: ExitUrgency::Soon,
            trigger: ExitTrigger::ThetaDecay,
            quantity: abs_qty,
            new_stop_loss: None,
            suggested_order_type: OrderType::Limit,
            reason: format!(
                "theta burn {theta_daily_pct:.1}%/day ≥ {:.1}%",
                params.theta_decay_percent
            ),
        };
    }

    // ── 9. IV crush ─────────────────────────────────────────────────────
    if position.entry_iv > 0.0 && inputs.quote.greeks.iv > 0.0 {
        let iv_drop_pct =
            (position.entry_iv - inputs.quote.greeks.iv) / position.entry_iv * 100.0;
        if iv_drop_pct >= params.iv_crush_percent {
            return ExitEvaluation {
                action: ExitAction::CloseFull,
                urgency: ExitUrgency::Optional,
                trigger: ExitTrigger::IvCrush,
                quantity: abs_qty,
                new_stop_loss: None,
                suggested_order_type: OrderType::Limit,
                reason: format!(
                    "IV crushed {iv_drop_pct:.0}% from entry {:.2}; close next session",
                    position.entry_iv
                ),
            };
        }
    }

    // ── 10. GEX flip against the position with profit ───────────────────
    if let Some(gex) = inputs.gex {
        let dir = position_direction(position);
        if gex.regime.favors(dir) == Some(false) && pnl_pct >= 10.0 {
            return ExitEvaluation {
                action: ExitAction::CloseFull,
                urgency: ExitUrgency::Soon,
                trigger: ExitTrigger::GexFlip,
                quantity: abs_qty,
                new_stop_loss: None,
                suggested_order_type: OrderType::Limit,
                reason: format!(
                    "GEX regime {} turned against {dir} position at +{pnl_pct:.1}%",
                    gex.regime
                ),
            };
        }

        // ── 11. Unfavorable regime change with profit → partial ─────────
        if position.entry_market_regime != MarketRegime::Unknown
            && gex.regime != position.entry_market_regime
            && position.entry_market_regime.favors(dir) == Some(true)
            && gex.regime.favors(dir) != Some(true)
            && pnl_pct > 0.0
        {
            let close_qty = ((abs_qty as f64) * 0.5).ceil() as u32;
            return ExitEvaluation {
                action: ExitAction::ClosePartial,
                urgency: ExitUrgency::Soon,
                trigger: ExitTrigger::RegimeChange,
                quantity: close_qty.min(abs_qty),
                new_stop_loss: None,
                suggested_order_type: OrderType::Limit,
                reason: format!(
                    "regime changed {} → {} against the position; banking half at +{pnl_pct:.1}%",
                    position.entry_market_regime, gex.regime
                ),
            };
        }
    }

    debug!(
        position_id = %position.id,
        pnl_pct = format!("{pnl_pct:.1}"),
        dte,
        "exit engine: hold"
    );
    ExitEvaluation::hold(format!("no exit rule fired at {pnl_pct:+.1}%"))
}

// =============================================================================
// Test fixtures (shared with the orchestrator tests)
// =============================================================================
#[cfg(test)]
pub mod tests_fixtures {
    use super::*;
    use crate::types::{Greeks, OptionType};
    use chrono::Utc;

    pub fn position(entry: f64, qty: i32) -> Position {
        Position {
            id: "p1".into(),
            symbol: "SPY   260320C00500000".into(),
            underlying: "SPY".into(),
            strike: 500.0,
            expiration: NaiveDate::from_ymd_opt(2026, 3, 20).unwrap(),
            option_type: OptionType::Call,
            quantity: qty,
            avg_open_price: entry,
            total_cost: entry * 100.0 * qty.unsigned_abs() as f64,
            current_price: entry,
            market_value: entry * 100.0 * qty.unsigned_abs() as f64,
            unrealized_pnl: 0.0,
            unrealized_pnl_percent: 0.0,
            realized_pnl: 0.0,
            greeks: Greeks::default(),
            entry_iv: 0.30,
            stop_loss: None,
            high_water_mark: 0.0,
            partial_exits_taken: 0,
            entry_market_regime: MarketRegime::TrendingUp,
            is_closed: false,
            opened_at: Utc::now(),
            closed_at: None,
            close_reason: None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::tests_fixtures::position;
    use super::*;
    use crate::types::Greeks;
    use chrono::Utc;

    fn quote(mid: f64) -> OptionQuote {
        OptionQuote {
            symbol: "SPY   260320C00500000".into(),
            bid: mid - 0.02,
            ask: mid + 0.02,
            last: mid,
            volume: 100,
            open_interest: 1000,
            greeks: Greeks {
                delta: 0.45,
                gamma: 0.03,
                theta: -0.02,
                vega: 0.10,
                iv: 0.30,
            },
            as_of: Utc::now(),
        }
    }

    fn far_today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()
    }

    fn inputs<'a>(
        position: &'a Position,
        quote: &'a OptionQuote,
        today: NaiveDate,
    ) -> ExitInputs<'a> {
        ExitInputs {
            position,
            quote,
            atr: None,
            atr_percentile: None,
            gex: None,
            today,
        }
    }

    #[test]
    fn dte_one_with_loss_forces_immediate_market_close() {
        let pos = position(2.00, 2);
        let q = quote(1.20); // −40%
        let today = NaiveDate::from_ymd_opt(2026, 3, 19).unwrap(); // DTE 1
        let eval = evaluate(&inputs(&pos, &q, today), &ExitParams::default());
        assert_eq!(eval.action, ExitAction::CloseFull);
        assert_eq!(eval.urgency, ExitUrgency::Immediate);
        assert_eq!(eval.trigger, ExitTrigger::DteLimit);
        assert_eq!(eval.suggested_order_type, OrderType::Market);
        assert_eq!(eval.quantity, 2);
    }

    #[test]
    fn dte_five_closes_by_eod_with_limit() {
        let pos = position(2.00, 1);
        let q = quote(2.10);
        let today = NaiveDate::from_ymd_opt(2026, 3, 16).unwrap(); // DTE 4
        let eval = evaluate(&inputs(&pos, &q, today), &ExitParams::default());
        assert_eq!(eval.trigger, ExitTrigger::DteLimit);
        assert_eq!(eval.urgency, ExitUrgency::Soon);
        assert_eq!(eval.suggested_order_type, OrderType::Limit);
    }

    #[test]
    fn t1_partial_with_breakeven_stop() {
        let mut pos = position(2.00, 4);
        pos.partial_exits_taken = 0;
        let q = quote(2.65); // +32.5%
        let mut i = inputs(&pos, &q, far_today());
        i.atr = Some(0.30);
        i.atr_percentile = Some(50.0);

        let eval = evaluate(&i, &ExitParams::default());
        assert_eq!(eval.action, ExitAction::ClosePartial);
        assert_eq!(eval.trigger, ExitTrigger::ProfitTarget1);
        assert_eq!(eval.quantity, 1); // ceil(4 × 0.25)
        assert_eq!(eval.new_stop_loss, Some(2.00));
    }

    #[test]
    fn t2_partial_half_of_remaining() {
        let mut pos = position(2.00, 3);
        pos.partial_exits_taken = 1;
        let q = quote(3.30); // +65%
        let eval = evaluate(&inputs(&pos, &q, far_today()), &ExitParams::default());
        assert_eq!(eval.trigger, ExitTrigger::ProfitTarget2);
        assert_eq!(eval.quantity, 2); // ceil(3 × 0.5)
    }

    #[test]
    fn tightened_breakeven_stop_closes_on_pullback() {
        let mut pos = position(2.00, 2);
        pos.partial_exits_taken = 1;
        pos.stop_loss = Some(2.00); // breakeven after the T1 partial
        let q = quote(1.95);
        let eval = evaluate(&inputs(&pos, &q, far_today()), &ExitParams::default());
        assert_eq!(eval.trigger, ExitTrigger::StopLoss);
        assert_eq!(eval.action, ExitAction::CloseFull);
        assert!(eval.reason.contains("position stop"));
    }

    #[test]
    fn absolute_stop_loss_at_seventy_five_percent() {
        let pos = position(2.00, 1);
        let q = quote(0.45); // −77.5%
        let eval = evaluate(&inputs(&pos, &q, far_today()), &ExitParams::default());
        assert_eq!(eval.trigger, ExitTrigger::StopLoss);
        assert_eq!(eval.urgency, ExitUrgency::Immediate);
        assert_eq!(eval.suggested_order_type, OrderType::Market);
    }

    #[test]
    fn atr_stop_fires_first() {
        let pos = position(2.00, 1);
        let q = quote(1.20);
        let mut i = inputs(&pos, &q, far_today());
        // k = 1.5 at percentile 50; stop = 2.00 − 1.5×0.40 = 1.40.
        i.atr = Some(0.40);
        i.atr_percentile = Some(50.0);
        let eval = evaluate(&i, &ExitParams::default());
        assert_eq!(eval.trigger, ExitTrigger::AtrStop);
        assert_eq!(eval.urgency, ExitUrgency::Immediate);
    }

    #[test]
    fn quiet_tape_tightens_atr_stop() {
        let pos = position(2.00, 1);
        let q = quote(1.50);
        let mut i = inputs(&pos, &q, far_today());
        i.atr = Some(0.40);

        // Busy tape: k = 1.9 → stop 1.24; mid 1.50 holds.
        i.atr_percentile = Some(90.0);
        let busy = evaluate(&i, &ExitParams::default());
        assert_ne!(busy.trigger, ExitTrigger::AtrStop);

        // Quiet tape: k = 1.1 → stop 1.56; mid 1.50 stops out.
        i.atr_percentile = Some(10.0);
        let quiet = evaluate(&i, &ExitParams::default());
        assert_eq!(quiet.trigger, ExitTrigger::AtrStop);
    }

    #[test]
    fn trailing_stop_arms_after_runup() {
        let mut pos = position(2.00, 1);
        // HWM of +40% of a $200 notional = $80.
        pos.high_water_mark = 80.0;
        let q = quote(2.30); // +15%, 25 points off the 40% HWM
        let eval = evaluate(&inputs(&pos, &q, far_today()), &ExitParams::default());
        assert_eq!(eval.trigger, ExitTrigger::TrailingStop);

        // Not armed below the 25% run-up threshold.
        pos.high_water_mark = 40.0; // +20%
        let q = quote(1.90);
        let eval = evaluate(&inputs(&pos, &q, far_today()), &ExitParams::default());
        assert_ne!(eval.trigger, ExitTrigger::TrailingStop);
    }

    #[test]
    fn deep_itm_delta_closes() {
        let pos = position(2.00, 1);
        let mut q = quote(2.20);
        q.greeks.delta = 0.85;
        let eval = evaluate(&inputs(&pos, &q, far_today()), &ExitParams::default());
        assert_eq!(eval.trigger, ExitTrigger::DeepItm);
    }

    #[test]
    fn theta_burn_closes() {
        let pos = position(2.00, 1);
        let mut q = quote(2.00);
        q.greeks.theta = -0.10; // 5%/day on a $2.00 mid
        let eval = evaluate(&inputs(&pos, &q, far_today()), &ExitParams::default());
        assert_eq!(eval.trigger, ExitTrigger::ThetaDecay);
    }

    #[test]
    fn iv_crush_closes_next_session() {
        let pos = position(2.00, 1);
        let mut q = quote(2.05);
        q.greeks.iv = 0.20; // 33% below the 0.30 entry IV
        let eval = evaluate(&inputs(&pos, &q, far_today()), &ExitParams::default());
        assert_eq!(eval.trigger, ExitTrigger::IvCrush);
        assert_eq!(eval.urgency, ExitUrgency::Optional);
    }

    #[test]
    fn gex_flip_with_profit_closes_full() {
        let pos = position(2.00, 2);
        let q = quote(2.30); // +15%
        let gex = GexBundle {
            underlying: "SPY".into(),
            regime: MarketRegime::TrendingDown,
            regime_confidence: 0.9,
            dealer_position: crate::market_data::DealerPosition::ShortGamma,
            zero_gamma_level: None,
            max_pain: None,
            net_gex: -2.0e9,
            as_of: Utc::now(),
        };
        let mut i = inputs(&pos, &q, far_today());
        i.gex = Some(&gex);
        let eval = evaluate(&i, &ExitParams::default());
        assert_eq!(eval.trigger, ExitTrigger::GexFlip);
        assert_eq!(eval.action, ExitAction::CloseFull);
    }

    #[test]
    fn regime_change_with_profit_banks_half() {
        let pos = position(2.00, 4);
        let q = quote(2.10); // +5%, below the GEX-flip 10% gate
        let gex = GexBundle {
            underlying: "SPY".into(),
            regime: MarketRegime::RangeBound,
            regime_confidence: 0.9,
            dealer_position: crate::market_data::DealerPosition::Neutral,
            zero_gamma_level: None,
            max_pain: None,
            net_gex: 0.0,
            as_of: Utc::now(),
        };
        let mut i = inputs(&pos, &q, far_today());
        i.gex = Some(&gex);
        let eval = evaluate(&i, &ExitParams::default());
        assert_eq!(eval.trigger, ExitTrigger::RegimeChange);
        assert_eq!(eval.action, ExitAction::ClosePartial);
        assert_eq!(eval.quantity, 2);
    }

    #[test]
    fn healthy_position_holds() {
        let pos = position(2.00, 1);
        let q = quote(2.10);
        let eval = evaluate(&inputs(&pos, &q, far_today()), &ExitParams::default());
        assert_eq!(eval.action, ExitAction::Hold);
        assert!(!eval.should_exit());
    }

    #[test]
    fn short_position_pnl_is_inverted() {
        // Short 1 contract at 2.00; premium collapsing to 0.40 is +80%.
        let pos = position(2.00, -1);
        let q = quote(0.40);
        let eval = evaluate(&inputs(&pos, &q, far_today()), &ExitParams::default());
        // +80% with no partials taken yet → T1 partial.
        assert_eq!(eval.trigger, ExitTrigger::ProfitTarget1);
    }
}
