// =============================================================================
// Position sizer — Kelly, VIX, regime, dealer-gamma, confluence
// =============================================================================
//
// All factors apply multiplicatively to the signal's base quantity, then the
// portfolio risk cap clips the result. Every factor leaves an audit entry so
// a surprising size can be reconstructed from the decision log.
// =============================================================================

use serde::Serialize;
use tracing::debug;

use crate::market_data::DealerPosition;
use crate::runtime_config::SizingParams;
use crate::store::Store;
use crate::types::MarketRegime;

/// Half-Kelly at the cap (0.25 / 2) is the full-size reference point.
const HALF_KELLY_REFERENCE: f64 = 0.125;
const KELLY_FACTOR_MIN: f64 = 0.25;
const KELLY_FACTOR_MAX: f64 = 1.25;

/// One multiplicative factor with its audit trail entry.
#[derive(Debug, Clone, Serialize)]
pub struct SizeAdjustment {
    pub name: String,
    pub factor: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SizingResult {
    pub base_quantity: u32,
    pub adjusted_quantity: u32,
    pub was_limited_by_risk: bool,
    /// Contracts the risk cap allows at this option price.
    pub max_by_risk: u32,
    pub adjustments: Vec<SizeAdjustment>,
}

#[derive(Debug, Clone)]
pub struct SizingInputs {
    pub base_quantity: u32,
    /// Option premium per share; a contract costs `price × 100`.
    pub option_price: f64,
    pub regime: MarketRegime,
    pub dealer_position: DealerPosition,
    pub vix: Option<f64>,
    /// Confluence quality [0, 100].
    pub confluence_score: f64,
    /// Combined quantity multiplier from the context/MTF adjusters.
    pub context_multiplier: f64,
}

fn regime_factor(regime: MarketRegime) -> f64 {
    match regime {
        MarketRegime::TrendingUp | MarketRegime::TrendingDown => 1.0,
        MarketRegime::BreakoutImminent => 0.9,
        MarketRegime::ReversalUp | MarketRegime::ReversalDown => 0.8,
        MarketRegime::RangeBound => 0.75,
        MarketRegime::Unknown => 0.5,
    }
}

fn dealer_factor(dealer: DealerPosition) -> f64 {
    match dealer {
        // Short-gamma dealers amplify moves; long premium benefits.
        DealerPosition::ShortGamma => 1.1,
        DealerPosition::LongGamma => 0.9,
        DealerPosition::Neutral => 1.0,
    }
}

/// Compute the adjusted contract count for an entry.
pub fn size_position(
    inputs: &SizingInputs,
    store: &Store,
    params: &SizingParams,
) -> SizingResult {
    let mut adjustments = Vec::new();
    let mut quantity = inputs.base_quantity as f64;

    // ── Kelly (half-Kelly, fraction capped) ─────────────────────────────
    let kelly_factor = match store.regime_performance(inputs.regime, inputs.dealer_position) {
        Some(row) => {
            let capped = row.kelly_fraction.min(params.kelly_fraction_cap);
            let half = capped / 2.0;
            let factor =
                (half / HALF_KELLY_REFERENCE).clamp(KELLY_FACTOR_MIN, KELLY_FACTOR_MAX);
            adjustments.push(SizeAdjustment {
                name: "kelly".into(),
                factor,
                reason: format!(
                    "half-Kelly {half:.3} for {} / {}",
                    inputs.regime, inputs.dealer_position
                ),
            });
            factor
        }
        None => {
            adjustments.push(SizeAdjustment {
                name: "kelly".into(),
                factor: KELLY_FACTOR_MIN,
                reason: format!("no performance history for {}", inputs.regime),
            });
            KELLY_FACTOR_MIN
        }
    };
    quantity *= kelly_factor;

    // ── VIX bucket ──────────────────────────────────────────────────────
    if let Some(vix) = inputs.vix {
        if let Some(rule) = store.vix_rule_for(vix) {
            adjustments.push(SizeAdjustment {
                name: "vix".into(),
                factor: rule.size_multiplier,
                reason: format!(
                    "VIX {vix:.1} in [{:.0}, {:.0})",
                    rule.vix_min, rule.vix_max
                ),
            });
            quantity *= rule.size_multiplier;
        }
    }

    // ── Regime ──────────────────────────────────────────────────────────
    let rf = regime_factor(inputs.regime);
    adjustments.push(SizeAdjustment {
        name: "regime".into(),
        factor: rf,
        reason: inputs.regime.to_string(),
    });
    quantity *= rf;

    // ── Dealer gamma ────────────────────────────────────────────────────
    let df = dealer_factor(inputs.dealer_position);
    adjustments.push(SizeAdjustment {
        name: "dealer_gamma".into(),
        factor: df,
        reason: inputs.dealer_position.to_string(),
    });
    quantity *= df;

    // ── Confluence ──────────────────────────────────────────────────────
    let cf = 0.5 + inputs.confluence_score / 100.0;
    adjustments.push(SizeAdjustment {
        name: "confluence".into(),
        factor: cf,
        reason: format!("confluence score {:.0}", inputs.confluence_score),
    });
    quantity *= cf;

    // ── Context/MTF multiplier (already floored upstream) ───────────────
    if (inputs.context_multiplier - 1.0).abs() > f64::EPSILON {
        adjustments.push(SizeAdjustment {
            name: "context".into(),
            factor: inputs.context_multiplier,
            reason: "context/MTF adjusters".into(),
        });
        quantity *= inputs.context_multiplier;
    }

    // ── Risk cap ────────────────────────────────────────────────────────
    let contract_cost = inputs.option_price * 100.0;
    let max_by_risk = if contract_cost > 0.0 {
        ((params.portfolio_value * params.risk_pct_per_trade) / contract_cost).floor() as u32
    } else {
        0
    };

    let mut was_limited_by_risk = false;
    let mut adjusted = quantity.floor() as u32;
    if adjusted > max_by_risk {
        adjustments.push(SizeAdjustment {
            name: "risk_cap".into(),
            factor: max_by_risk as f64 / adjusted.max(1) as f64,
            reason: format!(
                "risk cap: {:.1}% of ${:.0} at ${contract_cost:.0}/contract allows {max_by_risk}",
                params.risk_pct_per_trade * 100.0,
                params.portfolio_value
            ),
        });
        adjusted = max_by_risk;
        was_limited_by_risk = true;
    }

    // Never size to zero; one contract is the floor.
    let adjusted_quantity = adjusted.max(1);

    debug!(
        base = inputs.base_quantity,
        adjusted = adjusted_quantity,
        limited = was_limited_by_risk,
        factors = adjustments.len(),
        "position sized"
    );

    SizingResult {
        base_quantity: inputs.base_quantity,
        adjusted_quantity,
        was_limited_by_risk,
        max_by_risk,
        adjustments,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RiskLimitsRow;

    fn store() -> Store {
        Store::new(RiskLimitsRow {
            max_open_positions: 5,
            max_trades_per_day: 25,
            max_daily_loss: 1500.0,
            risk_pct_per_trade: 0.02,
        })
    }

    fn inputs() -> SizingInputs {
        SizingInputs {
            base_quantity: 4,
            option_price: 2.0,
            regime: MarketRegime::TrendingUp,
            dealer_position: DealerPosition::ShortGamma,
            vix: Some(17.0),
            confluence_score: 50.0,
            context_multiplier: 1.0,
        }
    }

    #[test]
    fn factors_are_audited() {
        let store = store();
        let result = size_position(&inputs(), &store, &SizingParams::default());
        let names: Vec<&str> = result.adjustments.iter().map(|a| a.name.as_str()).collect();
        assert!(names.contains(&"kelly"));
        assert!(names.contains(&"vix"));
        assert!(names.contains(&"regime"));
        assert!(names.contains(&"dealer_gamma"));
        assert!(names.contains(&"confluence"));
        assert!(result.adjusted_quantity >= 1);
    }

    #[test]
    fn risk_cap_limits_and_flags() {
        let store = store();
        let mut i = inputs();
        // $25k × 2% = $500 of risk; a $4.00 option costs $400/contract → 1.
        i.option_price = 4.0;
        i.base_quantity = 10;
        let result = size_position(&i, &store, &SizingParams::default());
        assert_eq!(result.max_by_risk, 1);
        assert!(result.adjusted_quantity <= 1);
        assert!(result.was_limited_by_risk);
    }

    #[test]
    fn quantity_never_drops_below_one() {
        let store = store();
        let mut i = inputs();
        i.base_quantity = 1;
        i.regime = MarketRegime::Unknown; // ×0.5
        i.vix = Some(45.0); // ×0.25
        i.confluence_score = 0.0; // ×0.5
        let result = size_position(&i, &store, &SizingParams::default());
        assert_eq!(result.adjusted_quantity, 1);
    }

    #[test]
    fn confluence_scales_half_to_one_and_a_half() {
        let store = store();
        let mut hi = inputs();
        hi.confluence_score = 100.0;
        hi.base_quantity = 10;
        let mut lo = inputs();
        lo.confluence_score = 0.0;
        lo.base_quantity = 10;

        let hi_result = size_position(&hi, &store, &SizingParams::default());
        let lo_result = size_position(&lo, &store, &SizingParams::default());
        assert!(hi_result.adjusted_quantity > lo_result.adjusted_quantity);
    }

    #[test]
    fn high_vix_cuts_size() {
        let store = store();
        let mut calm = inputs();
        calm.vix = Some(12.0);
        calm.base_quantity = 10;
        let mut stressed = inputs();
        stressed.vix = Some(32.0);
        stressed.base_quantity = 10;

        let calm_result = size_position(&calm, &store, &SizingParams::default());
        let stressed_result = size_position(&stressed, &store, &SizingParams::default());
        assert!(stressed_result.adjusted_quantity < calm_result.adjusted_quantity);
    }

    #[test]
    fn context_multiplier_applies() {
        let store = store();
        let mut i = inputs();
        i.base_quantity = 8;
        i.context_multiplier = 0.5;
        let halved = size_position(&i, &store, &SizingParams::default());
        i.context_multiplier = 1.0;
        let full = size_position(&i, &store, &SizingParams::default());
        assert!(halved.adjusted_quantity < full.adjusted_quantity);
    }
}
