// =============================================================================
// Context & MTF adjusters — size and confidence shaping from market state
// =============================================================================
//
// Two independent computations over the same inputs. Each produces a
// quantity multiplier, an additive confidence delta, a violation list, and
// an optional hard reject. The orchestrator multiplies the multipliers and
// sums the deltas; everything here is advisory except the hard rejects.
// =============================================================================

use serde::Serialize;
use tracing::debug;

use crate::market_data::{MarketContext, MtfTrend, VolBucket};
use crate::runtime_config::ContextParams;
use crate::types::Direction;

/// Quantity multiplier never drops below this floor.
const MIN_QUANTITY_MULTIPLIER: f64 = 0.25;

#[derive(Debug, Clone, Serialize)]
pub struct AdjusterOutcome {
    pub quantity_multiplier: f64,
    /// Additive confidence delta [−1, 1]; the orchestrator clamps the total.
    pub confidence_adjustment: f64,
    pub violations: Vec<String>,
    pub should_reject: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub adjustments_applied: Vec<String>,
}

impl AdjusterOutcome {
    fn pass() -> Self {
        Self {
            quantity_multiplier: 1.0,
            confidence_adjustment: 0.0,
            violations: Vec::new(),
            should_reject: false,
            reason: None,
            adjustments_applied: Vec::new(),
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            quantity_multiplier: 0.0,
            confidence_adjustment: 0.0,
            violations: vec![reason.clone()],
            should_reject: true,
            reason: Some(reason),
            adjustments_applied: Vec::new(),
        }
    }

    fn apply_size(&mut self, factor: f64, note: &str) {
        self.quantity_multiplier *= factor;
        self.adjustments_applied
            .push(format!("{note}: x{factor:.2}"));
    }

    fn apply_confidence(&mut self, delta: f64, note: &str) {
        self.confidence_adjustment += delta;
        self.adjustments_applied
            .push(format!("{note}: {delta:+.2}"));
    }

    fn finish(mut self) -> Self {
        if !self.should_reject {
            self.quantity_multiplier = self.quantity_multiplier.max(MIN_QUANTITY_MULTIPLIER);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Context adjuster
// ---------------------------------------------------------------------------

/// Evaluate the market-context rules for an opening trade in `direction`.
pub fn adjust_for_context(
    direction: Direction,
    is_opening: bool,
    ctx: &MarketContext,
    params: &ContextParams,
) -> AdjusterOutcome {
    // ── Hard rejects ────────────────────────────────────────────────────
    if params.require_market_open && !ctx.session.is_open() {
        return AdjusterOutcome::reject(format!("market closed ({})", ctx.session));
    }
    if is_opening {
        if let Some(vix) = ctx.vix {
            if vix > params.max_vix_for_new_positions {
                return AdjusterOutcome::reject(format!(
                    "VIX {vix:.1} above {:.1} cap for new positions",
                    params.max_vix_for_new_positions
                ));
            }
        }
    }
    if ctx.session.is_first_30_min() && !params.allow_first_30_min {
        return AdjusterOutcome::reject("first 30 minutes disallowed".to_string());
    }
    if params.require_market_alignment {
        if let Some(bias) = ctx.market_bias {
            if bias != Direction::Neutral && direction != Direction::Neutral && bias != direction
            {
                return AdjusterOutcome::reject(format!(
                    "{direction} entry against {bias} market bias"
                ));
            }
        }
    }
    if params.require_or_breakout_confirmation {
        match ctx.or_breakout {
            Some(breakout) if breakout == direction => {}
            Some(breakout) => {
                return AdjusterOutcome::reject(format!(
                    "opening-range breakout is {breakout}, conflicts with {direction}"
                ));
            }
            None => {
                return AdjusterOutcome::reject(
                    "no opening-range breakout confirmation".to_string(),
                );
            }
        }
    }

    // ── Advisory adjustments ────────────────────────────────────────────
    let mut out = AdjusterOutcome::pass();

    if let Some(vix) = ctx.vix {
        if VolBucket::from_vix(vix) == VolBucket::HighVol {
            out.apply_size(0.5, "high-vol VIX");
        }
    }
    if let Some(pct) = ctx.atr_percentile {
        if pct > 80.0 {
            out.apply_size(0.75, "ATR percentile above 80");
        }
    }

    for stale in &ctx.stale_sources {
        out.apply_confidence(-0.10, &format!("stale {stale} feed"));
    }
    if ctx.session.is_first_30_min() {
        out.apply_confidence(-0.10, "first 30 minutes");
    }
    if let Some(bias) = ctx.market_bias {
        if bias != Direction::Neutral && direction != Direction::Neutral && bias != direction {
            out.apply_confidence(-0.15, "market divergence");
            out.violations.push(format!("market bias {bias} diverges"));
        }
    }
    match direction {
        Direction::Bullish if ctx.near_resistance => {
            out.apply_confidence(-0.10, "near resistance");
        }
        Direction::Bearish if ctx.near_support => {
            out.apply_confidence(-0.10, "near support");
        }
        _ => {}
    }
    if ctx.or_breakout == Some(direction) && direction != Direction::Neutral {
        out.apply_confidence(0.10, "OR breakout aligned");
    }
    if ctx.candle_alignment == Some(direction) && direction != Direction::Neutral {
        out.apply_confidence(0.05, "candle pattern aligned");
        if ctx.candle_strength > 0.7 {
            out.apply_confidence(0.03, "strong candle");
        }
    }
    match direction {
        Direction::Bullish if ctx.bb_overbought => {
            out.apply_confidence(-0.10, "Bollinger overbought");
        }
        Direction::Bearish if ctx.bb_oversold => {
            out.apply_confidence(-0.10, "Bollinger oversold");
        }
        _ => {}
    }

    debug!(
        symbol = %ctx.symbol,
        direction = %direction,
        multiplier = format!("{:.2}", out.quantity_multiplier),
        delta = format!("{:+.2}", out.confidence_adjustment),
        "context adjuster"
    );

    out.finish()
}

// ---------------------------------------------------------------------------
// MTF adjuster
// ---------------------------------------------------------------------------

/// Evaluate multi-timeframe alignment for a trade in `direction`.
pub fn adjust_for_mtf(
    direction: Direction,
    mtf: &MtfTrend,
    params: &ContextParams,
) -> AdjusterOutcome {
    let against_bias = mtf.bias != Direction::Neutral
        && direction != Direction::Neutral
        && mtf.bias != direction;

    if params.mtf_strict && (mtf.conflict || against_bias) {
        return AdjusterOutcome::reject(format!(
            "MTF bias {} conflicts with {direction} (strict mode)",
            mtf.bias
        ));
    }

    let mut out = AdjusterOutcome::pass();

    if mtf.alignment_score >= 80.0 && mtf.bias == direction {
        out.apply_size(1.25, "strong MTF alignment");
    } else if mtf.conflict || against_bias {
        out.apply_size(0.75, "MTF conflict");
        out.violations.push(format!(
            "MTF bias {} (alignment {:.0}) against {direction}",
            mtf.bias, mtf.alignment_score
        ));
    }

    out.finish()
}
