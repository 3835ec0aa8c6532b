// =============================================================================
// Decision orchestrator — entry / hold / exit verdicts
// =============================================================================
//
// Fuses confluence, regime stability, conflict resolution, market context,
// sizing, and exit planning into one auditable decision. Advisory data that
// cannot be fetched degrades confidence; the regime gate and the conflict
// gate fail closed.
// =============================================================================

pub mod confluence;
pub mod conflict;
pub mod context;
pub mod exit;
pub mod regime;
pub mod sizing;

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::decision::conflict::{ConflictOutcome, DirectionalVote, Resolution};
use crate::decision::confluence::{source_weight, ConfluenceResult};
use crate::decision::context::AdjusterOutcome;
use crate::decision::exit::{ExitAction, ExitEvaluation, ExitInputs, ExitTrigger, ExitUrgency};
use crate::decision::regime::{RegimeAssessment, RegimeTracker};
use crate::decision::sizing::{SizingInputs, SizingResult};
use crate::error::EngineError;
use crate::market_data::{GexBundle, MarketDataProvider, OptionQuote};
use crate::occ;
use crate::risk::RiskEngine;
use crate::runtime_config::RuntimeConfig;
use crate::store::Store;
use crate::types::{
    Direction, MarketRegime, OptionType, OrderType, Position, Signal, SignalSource,
};

// ---------------------------------------------------------------------------
// Decision types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Execute,
    Reject,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectReason {
    /// Machine-readable kind (REGIME_UNSTABLE, UNRESOLVED_CONFLICT, ...).
    pub kind: String,
    pub detail: String,
}

/// Premium-space exit plan attached to an executed entry.
#[derive(Debug, Clone, Serialize)]
pub struct ExitPlan {
    pub stop_loss: f64,
    pub target_1: f64,
    pub target_2: f64,
    pub atr_based: bool,
}

/// Additive confidence components, in points on a 0–100 scale.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfidenceBreakdown {
    pub base: f64,
    pub confluence_impact: f64,
    pub regime_impact: f64,
    pub conflict_impact: f64,
    pub gex_alignment: f64,
    pub regime_alignment: f64,
    pub positioning_impact: f64,
    pub context_impact: f64,
    pub mtf_impact: f64,
    pub total: f64,
}

impl ConfidenceBreakdown {
    fn finalize(mut self) -> Self {
        self.total = (self.base
            + self.confluence_impact
            + self.regime_impact
            + self.conflict_impact
            + self.gex_alignment
            + self.regime_alignment
            + self.positioning_impact
            + self.context_impact
            + self.mtf_impact)
            .clamp(0.0, 100.0);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryDecision {
    pub decision_id: String,
    pub signal_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject: Option<RejectReason>,
    /// Contracts to trade when the verdict is EXECUTE.
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_plan: Option<ExitPlan>,
    pub confidence: f64,
    pub confidence_breakdown: ConfidenceBreakdown,
    pub rules_triggered: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sizing: Option<SizingResult>,
    pub confluence: ConfluenceResult,
    /// Regime snapshot at decision time, recorded on the opened position.
    pub regime_at_entry: MarketRegime,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldAction {
    Hold,
    PartialExit,
    TightenStop,
    Exit,
}

#[derive(Debug, Clone, Serialize)]
pub struct HoldDecision {
    pub decision_id: String,
    pub position_id: String,
    pub action: HoldAction,
    /// Contracts affected for PARTIAL_EXIT / EXIT.
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_stop_loss: Option<f64>,
    pub reason: String,
    pub rules_triggered: Vec<String>,
    pub created_at: chrono::DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Bounded audit ring of recent entry decisions.
const MAX_RECENT_DECISIONS: usize = 100;

pub struct DecisionOrchestrator {
    store: Arc<Store>,
    provider: Arc<dyn MarketDataProvider>,
    regime_tracker: Arc<RegimeTracker>,
    risk_engine: Arc<RiskEngine>,
    config: Arc<RwLock<RuntimeConfig>>,
    recent_decisions: RwLock<Vec<EntryDecision>>,
}

impl DecisionOrchestrator {
    pub fn new(
        store: Arc<Store>,
        provider: Arc<dyn MarketDataProvider>,
        regime_tracker: Arc<RegimeTracker>,
        risk_engine: Arc<RiskEngine>,
        config: Arc<RwLock<RuntimeConfig>>,
    ) -> Self {
        Self {
            store,
            provider,
            regime_tracker,
            risk_engine,
            config,
            recent_decisions: RwLock::new(Vec::new()),
        }
    }

    pub fn regime_tracker(&self) -> &Arc<RegimeTracker> {
        &self.regime_tracker
    }

    pub fn recent_decisions(&self, limit: usize) -> Vec<EntryDecision> {
        let decisions = self.recent_decisions.read();
        decisions.iter().rev().take(limit).cloned().collect()
    }

    fn push_decision(&self, decision: &EntryDecision) {
        let mut decisions = self.recent_decisions.write();
        decisions.push(decision.clone());
        while decisions.len() > MAX_RECENT_DECISIONS {
            decisions.remove(0);
        }
    }

    // =========================================================================
    // Entry
    // =========================================================================

    /// Full entry orchestration for a validated, deduplicated signal. The
    /// decision is pushed onto the audit ring regardless of verdict.
    pub async fn orchestrate_entry_decision(&self, signal: &Signal) -> EntryDecision {
        let decision = self.entry_decision_inner(signal).await;
        self.push_decision(&decision);
        decision
    }

    async fn entry_decision_inner(&self, signal: &Signal) -> EntryDecision {
        let now = Utc::now();
        let cfg = self.config.read().clone();
        let mut rules: Vec<String> = Vec::new();

        // ── Step 1a: advisory data (each fetch degrades, never aborts) ──
        let gex = self.provider.gex_bundle(&signal.symbol).await.ok();
        let ctx = self.provider.market_context(&signal.symbol).await.ok();
        let mtf = self.provider.mtf_trend(&signal.symbol).await.ok();
        let advisory_missing = gex.is_none() || ctx.is_none() || mtf.is_none();

        if let Some(c) = &ctx {
            if let Ok(payload) = serde_json::to_value(c) {
                self.store.upsert_market_context(&signal.symbol, payload);
            }
        }

        // ── Step 1b: regime observation ─────────────────────────────────
        let assessment: Option<RegimeAssessment> = match &gex {
            Some(g) => {
                let a = self.regime_tracker.observe(
                    &signal.symbol,
                    g.regime,
                    g.regime_confidence,
                    now,
                    &cfg.regime,
                );
                self.store.append_regime_observation(a.to_history_row());
                Some(a)
            }
            None => self.regime_tracker.assess(&signal.symbol, now, &cfg.regime),
        };

        // ── Step 1c: confluence ─────────────────────────────────────────
        let confluence = confluence::evaluate(signal, &self.store, &cfg.confluence, now);
        rules.push(format!("confluence: {}", confluence.reason));

        // ── Step 3 inputs: conflict vote ────────────────────────────────
        let votes = Self::votes_from_confluence(signal, &confluence);
        let conflict = conflict::resolve(&votes, signal.direction, &cfg.conflict);
        rules.push(format!("conflict: {}", conflict.impact));

        // ── Context & MTF adjusters ─────────────────────────────────────
        let ctx_out = ctx
            .as_ref()
            .map(|c| context::adjust_for_context(signal.direction, true, c, &cfg.context));
        let mtf_out = mtf
            .as_ref()
            .map(|m| context::adjust_for_mtf(signal.direction, m, &cfg.context));
        for out in [&ctx_out, &mtf_out].into_iter().flatten() {
            rules.extend(out.adjustments_applied.iter().cloned());
        }

        // ── Entry price + option quote ──────────────────────────────────
        let quote = self.fetch_quote(signal).await;
        let entry_price = signal
            .limit_price
            .or_else(|| quote.as_ref().map(|q| q.mid()));

        // ── Step 4: sizing ──────────────────────────────────────────────
        let regime_for_sizing = assessment
            .as_ref()
            .map(|a| a.regime)
            .unwrap_or(MarketRegime::Unknown);
        let dealer = gex
            .as_ref()
            .map(|g| g.dealer_position)
            .unwrap_or_default();
        let confluence_score = (confluence.weighted_score / 5.0 * 100.0).min(100.0);
        let context_multiplier = ctx_out
            .as_ref()
            .map(|o| o.quantity_multiplier)
            .unwrap_or(1.0)
            * mtf_out
                .as_ref()
                .map(|o| o.quantity_multiplier)
                .unwrap_or(1.0);
        let sizing = sizing::size_position(
            &SizingInputs {
                base_quantity: signal.quantity,
                option_price: entry_price.unwrap_or(0.0),
                regime: regime_for_sizing,
                dealer_position: dealer,
                vix: ctx.as_ref().and_then(|c| c.vix),
                confluence_score,
                context_multiplier,
            },
            &self.store,
            &cfg.sizing,
        );

        // ── Step 5: exit planning ───────────────────────────────────────
        let exit_plan = entry_price.map(|entry| {
            Self::plan_exits(
                entry,
                ctx.as_ref().and_then(|c| c.atr),
                ctx.as_ref().and_then(|c| c.atr_percentile),
                &cfg,
            )
        });

        // ── Step 6: confidence breakdown ────────────────────────────────
        let breakdown = Self::confidence_breakdown(
            signal,
            &confluence,
            assessment.as_ref(),
            &conflict,
            gex.as_ref(),
            ctx_out.as_ref(),
            mtf.as_ref(),
            advisory_missing,
        );

        // ── Gates, strictest first ──────────────────────────────────────
        let mut decision = EntryDecision {
            decision_id: Uuid::new_v4().to_string(),
            signal_id: signal.id.clone(),
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            verdict: Verdict::Execute,
            reject: None,
            quantity: sizing.adjusted_quantity,
            entry_price,
            exit_plan,
            confidence: breakdown.total,
            confidence_breakdown: breakdown,
            rules_triggered: rules,
            sizing: Some(sizing),
            confluence,
            regime_at_entry: regime_for_sizing,
            created_at: now,
        };

        // Step 2: regime stability (fail closed).
        if cfg.regime.require_stable_regime {
            match &assessment {
                Some(a) if a.can_trade => {}
                Some(a) => {
                    return Self::rejected(
                        decision,
                        EngineError::RegimeUnstable(
                            a.block_reason
                                .clone()
                                .unwrap_or_else(|| "regime unstable".into()),
                        ),
                    );
                }
                None => {
                    return Self::rejected(
                        decision,
                        EngineError::RegimeUnstable(
                            "no regime observations for ticker".into(),
                        ),
                    );
                }
            }
        }

        // Step 3: conflict resolution.
        if !conflict.can_trade {
            return Self::rejected(
                decision,
                EngineError::UnresolvedConflict(conflict.impact.clone()),
            );
        }

        // Context / MTF hard rejects.
        for out in [&ctx_out, &mtf_out].into_iter().flatten() {
            if out.should_reject {
                let detail = out
                    .reason
                    .clone()
                    .unwrap_or_else(|| "context rejected".into());
                return Self::rejected_with_kind(decision, "CONTEXT_REJECTED", detail);
            }
        }

        // Risk limits.
        let risk = self
            .risk_engine
            .can_open(&signal.symbol, &cfg.risk, now);
        if let Some((rule, detail)) = risk.violation {
            return Self::rejected(
                decision,
                EngineError::RiskLimit(format!("{rule}: {detail}")),
            );
        }

        // Step 7: confidence threshold.
        if decision.confidence < cfg.min_confidence_to_execute {
            let confidence = decision.confidence;
            return Self::rejected(
                decision,
                EngineError::LowConfidence(format!(
                    "confidence {:.0} below {:.0} threshold",
                    confidence, cfg.min_confidence_to_execute
                )),
            );
        }

        decision
            .rules_triggered
            .push(format!("confidence {:.0} clears threshold", decision.confidence));
        info!(
            decision_id = %decision.decision_id,
            symbol = %decision.symbol,
            direction = %decision.direction,
            quantity = decision.quantity,
            confidence = format!("{:.0}", decision.confidence),
            "entry decision: EXECUTE"
        );
        decision
    }

    fn rejected(decision: EntryDecision, err: EngineError) -> EntryDecision {
        let kind = err.kind().to_string();
        let detail = err.detail();
        Self::rejected_with_kind(decision, &kind, detail)
    }

    fn rejected_with_kind(
        mut decision: EntryDecision,
        kind: &str,
        detail: String,
    ) -> EntryDecision {
        info!(
            decision_id = %decision.decision_id,
            symbol = %decision.symbol,
            kind,
            detail = %detail,
            "entry decision: REJECT"
        );
        decision.verdict = Verdict::Reject;
        decision.quantity = 0;
        decision
            .rules_triggered
            .push(format!("{kind}: {detail}"));
        decision.reject = Some(RejectReason {
            kind: kind.to_string(),
            detail,
        });
        decision
    }

    fn votes_from_confluence(signal: &Signal, confluence: &ConfluenceResult) -> Vec<DirectionalVote> {
        let opposite = match signal.direction {
            Direction::Bullish => Direction::Bearish,
            Direction::Bearish => Direction::Bullish,
            Direction::Neutral => Direction::Neutral,
        };
        let mut votes = Vec::new();
        for tag in &confluence.agreeing {
            votes.push(DirectionalVote {
                source: tag.clone(),
                weight: source_weight(SignalSource::from_tag(tag)),
                direction: signal.direction,
            });
        }
        for tag in &confluence.conflicting {
            votes.push(DirectionalVote {
                source: tag.clone(),
                weight: source_weight(SignalSource::from_tag(tag)),
                direction: opposite,
            });
        }
        votes
    }

    /// ATR-scaled plan when the context carries ATR, fixed percents
    /// otherwise. All prices are option premium.
    fn plan_exits(
        entry: f64,
        atr: Option<f64>,
        atr_percentile: Option<f64>,
        cfg: &RuntimeConfig,
    ) -> ExitPlan {
        match atr {
            Some(atr) if atr > 0.0 => {
                let k = 1.0 + atr_percentile.unwrap_or(50.0) / 100.0;
                ExitPlan {
                    stop_loss: (entry - k * atr).max(0.01),
                    target_1: entry + 2.0 * atr,
                    target_2: entry + 3.5 * atr,
                    atr_based: true,
                }
            }
            _ => ExitPlan {
                stop_loss: entry * (1.0 - cfg.exit.stop_loss_percent / 100.0),
                target_1: entry * (1.0 + cfg.exit.profit_target_1_percent / 100.0),
                target_2: entry * (1.0 + cfg.exit.profit_target_2_percent / 100.0),
                atr_based: false,
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn confidence_breakdown(
        signal: &Signal,
        confluence: &ConfluenceResult,
        assessment: Option<&RegimeAssessment>,
        conflict: &ConflictOutcome,
        gex: Option<&GexBundle>,
        ctx_out: Option<&AdjusterOutcome>,
        mtf: Option<&crate::market_data::MtfTrend>,
        advisory_missing: bool,
    ) -> ConfidenceBreakdown {
        let mut b = ConfidenceBreakdown {
            base: 50.0,
            ..Default::default()
        };

        b.confluence_impact = if confluence.approved {
            confluence.confidence_boost * 30.0
        } else {
            confluence.confidence_boost * 30.0 - 15.0
        };

        if let Some(a) = assessment {
            b.regime_impact = a.stability_score / 100.0 * 10.0;
            if !a.can_trade {
                b.regime_impact -= 10.0;
            }
            b.regime_alignment = match a.regime.favors(signal.direction) {
                Some(true) => 8.0,
                Some(false) => -8.0,
                None => 0.0,
            };
        }

        b.conflict_impact = match conflict.resolution {
            Resolution::Agreed => 5.0,
            Resolution::DissentAccepted => -(conflict.confidence_penalty * 100.0),
            Resolution::ConflictRejected => -20.0,
        };

        if let Some(g) = gex {
            b.gex_alignment = match g.dealer_position {
                crate::market_data::DealerPosition::ShortGamma => 5.0,
                crate::market_data::DealerPosition::LongGamma => -3.0,
                crate::market_data::DealerPosition::Neutral => 0.0,
            };
        }

        if advisory_missing {
            b.positioning_impact = -10.0;
        }

        if let Some(out) = ctx_out {
            b.context_impact = out.confidence_adjustment * 100.0;
        }

        if let Some(m) = mtf {
            let against = m.bias != Direction::Neutral
                && signal.direction != Direction::Neutral
                && m.bias != signal.direction;
            b.mtf_impact = if m.alignment_score >= 80.0 && m.bias == signal.direction {
                8.0
            } else if m.conflict || against {
                -8.0
            } else {
                0.0
            };
        }

        b.finalize()
    }

    async fn fetch_quote(&self, signal: &Signal) -> Option<OptionQuote> {
        let (strike, expiration, option_type) =
            match (signal.strike, signal.expiration, signal.option_type) {
                (Some(s), Some(e), Some(t)) => (s, e, t),
                _ => return None,
            };
        let symbol = occ::encode(&signal.symbol, expiration, option_type, strike).ok()?;
        self.provider.option_quote(&symbol).await.ok()
    }

    // =========================================================================
    // Hold
    // =========================================================================

    /// Periodic re-evaluation of an open position outside the exit engine:
    /// cheap rules that do not need full ATR context.
    pub fn orchestrate_hold_decision(
        &self,
        position: &Position,
        quote: &OptionQuote,
        gex: Option<&GexBundle>,
        today: NaiveDate,
    ) -> HoldDecision {
        let mid = quote.mid();
        let entry = position.avg_open_price;
        let abs_qty = position.quantity.unsigned_abs();
        let mut rules = Vec::new();

        let pnl_pct = if entry > 0.0 && mid > 0.0 {
            if position.is_long() {
                (mid - entry) / entry * 100.0
            } else {
                (entry - mid) / entry * 100.0
            }
        } else {
            0.0
        };

        let dte = position.days_to_expiration(today);

        // EXIT: expiring underwater.
        if dte <= self.config.read().exit.dte_immediate_close && pnl_pct < 0.0 {
            rules.push(format!("DTE {dte} with {pnl_pct:.1}% loss"));
            return HoldDecision {
                decision_id: Uuid::new_v4().to_string(),
                position_id: position.id.clone(),
                action: HoldAction::Exit,
                quantity: abs_qty,
                new_stop_loss: None,
                reason: format!("DTE {dte} with a {pnl_pct:.1}% loss"),
                rules_triggered: rules,
                created_at: Utc::now(),
            };
        }

        // PARTIAL_EXIT: regime turned against a profitable position.
        if let Some(g) = gex {
            let dir = match (position.option_type, position.is_long()) {
                (OptionType::Call, true) | (OptionType::Put, false) => Direction::Bullish,
                _ => Direction::Bearish,
            };
            if position.entry_market_regime != MarketRegime::Unknown
                && g.regime != position.entry_market_regime
                && g.regime.favors(dir) != Some(true)
                && pnl_pct > 0.0
            {
                rules.push(format!(
                    "regime {} → {} against position",
                    position.entry_market_regime, g.regime
                ));
                return HoldDecision {
                    decision_id: Uuid::new_v4().to_string(),
                    position_id: position.id.clone(),
                    action: HoldAction::PartialExit,
                    quantity: ((abs_qty as f64) * 0.5).ceil() as u32,
                    new_stop_loss: None,
                    reason: format!(
                        "regime changed to {} against the position at +{pnl_pct:.1}%",
                        g.regime
                    ),
                    rules_triggered: rules,
                    created_at: Utc::now(),
                };
            }
        }

        // TIGHTEN_STOP: +25% run-up moves the stop to breakeven.
        if pnl_pct >= 25.0 {
            rules.push(format!("+{pnl_pct:.1}% run-up"));
            return HoldDecision {
                decision_id: Uuid::new_v4().to_string(),
                position_id: position.id.clone(),
                action: HoldAction::TightenStop,
                quantity: 0,
                new_stop_loss: Some(entry),
                reason: format!("+{pnl_pct:.1}% run-up; stop to breakeven"),
                rules_triggered: rules,
                created_at: Utc::now(),
            };
        }

        HoldDecision {
            decision_id: Uuid::new_v4().to_string(),
            position_id: position.id.clone(),
            action: HoldAction::Hold,
            quantity: 0,
            new_stop_loss: None,
            reason: format!("holding at {pnl_pct:+.1}%"),
            rules_triggered: rules,
            created_at: Utc::now(),
        }
    }

    // =========================================================================
    // Exit
    // =========================================================================

    /// Delegate to the exit engine, then apply the GEX-flip override for
    /// evaluations that ran without positioning data.
    pub fn orchestrate_exit_decision(
        &self,
        inputs: &ExitInputs<'_>,
        gex_override: Option<&GexBundle>,
    ) -> ExitEvaluation {
        let cfg = self.config.read().clone();
        let eval = exit::evaluate(inputs, &cfg.exit);
        if eval.should_exit() {
            return eval;
        }

        // Override: a GEX flip against a ≥10% winner closes in full even
        // when the per-position rules all said hold.
        if inputs.gex.is_none() {
            if let Some(g) = gex_override {
                let position = inputs.position;
                let entry = position.avg_open_price;
                let mid = inputs.quote.mid();
                if entry > 0.0 && mid > 0.0 {
                    let pnl_pct = if position.is_long() {
                        (mid - entry) / entry * 100.0
                    } else {
                        (entry - mid) / entry * 100.0
                    };
                    let dir = match (position.option_type, position.is_long()) {
                        (OptionType::Call, true) | (OptionType::Put, false) => Direction::Bullish,
                        _ => Direction::Bearish,
                    };
                    if g.regime.favors(dir) == Some(false) && pnl_pct >= 10.0 {
                        debug!(position_id = %position.id, "GEX-flip override fired");
                        return ExitEvaluation {
                            action: ExitAction::CloseFull,
                            urgency: ExitUrgency::Soon,
                            trigger: ExitTrigger::GexFlip,
                            quantity: position.quantity.unsigned_abs(),
                            new_stop_loss: None,
                            suggested_order_type: OrderType::Limit,
                            reason: format!(
                                "GEX regime {} flipped against the position at +{pnl_pct:.1}%",
                                g.regime
                            ),
                        };
                    }
                }
            }
        }
        eval
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::fixture::FixtureProvider;
    use crate::market_data::{DealerPosition, MarketContext, MarketSession, MtfTrend};
    use crate::pipeline::normalizer::tests_support::minimal_signal;
    use crate::store::RiskLimitsRow;
    use crate::types::Greeks;

    fn harness() -> (DecisionOrchestrator, Arc<FixtureProvider>, Arc<Store>) {
        let store = Arc::new(Store::new(RiskLimitsRow {
            max_open_positions: 5,
            max_trades_per_day: 25,
            max_daily_loss: 1500.0,
            risk_pct_per_trade: 0.02,
        }));
        let provider = Arc::new(FixtureProvider::new());
        let tracker = Arc::new(RegimeTracker::new());
        let risk = Arc::new(RiskEngine::new(store.clone()));
        let config = Arc::new(RwLock::new(RuntimeConfig::default()));
        let orchestrator = DecisionOrchestrator::new(
            store.clone(),
            provider.clone(),
            tracker,
            risk,
            config,
        );
        (orchestrator, provider, store)
    }

    fn open_session_context(symbol: &str) -> MarketContext {
        MarketContext {
            symbol: symbol.into(),
            session: MarketSession::Morning,
            vix: Some(17.0),
            market_bias: Some(Direction::Bullish),
            atr: Some(0.30),
            atr_percentile: Some(50.0),
            or_breakout: None,
            near_resistance: false,
            near_support: false,
            candle_alignment: None,
            candle_strength: 0.0,
            bb_overbought: false,
            bb_oversold: false,
            stale_sources: Vec::new(),
            as_of: Utc::now(),
        }
    }

    fn warm_regime(orchestrator: &DecisionOrchestrator, symbol: &str) {
        // Two observations spanning the cooldown unlock the regime gate.
        let cfg = RuntimeConfig::default();
        let t0 = Utc::now() - chrono::Duration::seconds(1000);
        orchestrator.regime_tracker().observe(
            symbol,
            MarketRegime::TrendingUp,
            0.9,
            t0,
            &cfg.regime,
        );
        orchestrator.regime_tracker().observe(
            symbol,
            MarketRegime::TrendingUp,
            0.9,
            t0 + chrono::Duration::seconds(500),
            &cfg.regime,
        );
    }

    #[tokio::test]
    async fn entry_executes_with_stable_regime_and_confluence() {
        let (orchestrator, provider, store) = harness();
        provider.set_market_context(open_session_context("SPY"));
        provider.set_mtf_trend(MtfTrend {
            symbol: "SPY".into(),
            bias: Direction::Bullish,
            alignment_score: 85.0,
            conflict: false,
            as_of: Utc::now(),
        });
        warm_regime(&orchestrator, "SPY");

        // A completed corroborating signal gives two-source confluence.
        let mut prior = minimal_signal("SPY");
        prior.source = crate::types::SignalSource::MtfTrendDots;
        prior.status = crate::types::SignalStatus::Completed;
        store.insert_signal(prior);

        let mut signal = minimal_signal("SPY");
        signal.source = crate::types::SignalSource::UltimateOption;
        let decision = orchestrator.orchestrate_entry_decision(&signal).await;

        assert_eq!(decision.verdict, Verdict::Execute, "reject: {:?}", decision.reject);
        assert!(decision.quantity >= 1);
        assert!(decision.exit_plan.is_some());
        assert!(decision.confidence >= 60.0);
        assert!(decision.confluence.approved);
    }

    #[tokio::test]
    async fn regime_cooldown_rejects_entry() {
        let (orchestrator, provider, _store) = harness();
        provider.set_market_context(open_session_context("SPY"));
        // Single fresh observation: inside the flip cooldown.
        let decision = orchestrator
            .orchestrate_entry_decision(&minimal_signal("SPY"))
            .await;
        assert_eq!(decision.verdict, Verdict::Reject);
        let reject = decision.reject.unwrap();
        assert_eq!(reject.kind, "REGIME_UNSTABLE");
        assert!(reject.detail.contains("flip cooldown"), "{}", reject.detail);
    }

    #[tokio::test]
    async fn context_hard_reject_propagates() {
        let (orchestrator, provider, _store) = harness();
        let mut ctx = open_session_context("SPY");
        ctx.vix = Some(45.0);
        provider.set_market_context(ctx);
        provider.set_vix(45.0);
        warm_regime(&orchestrator, "SPY");

        let decision = orchestrator
            .orchestrate_entry_decision(&minimal_signal("SPY"))
            .await;
        assert_eq!(decision.verdict, Verdict::Reject);
        let reject = decision.reject.unwrap();
        assert_eq!(reject.kind, "CONTEXT_REJECTED");
        assert!(reject.detail.contains("VIX"));
    }

    #[tokio::test]
    async fn risk_cap_rejects_when_positions_maxed() {
        let (orchestrator, provider, store) = harness();
        provider.set_market_context(open_session_context("SPY"));
        warm_regime(&orchestrator, "SPY");

        for i in 0..5 {
            let mut p = exit::tests_fixtures::position(2.0, 1);
            p.id = format!("p{i}");
            store.insert_position(p);
        }

        let decision = orchestrator
            .orchestrate_entry_decision(&minimal_signal("SPY"))
            .await;
        assert_eq!(decision.verdict, Verdict::Reject);
        assert_eq!(decision.reject.unwrap().kind, "RISK_LIMIT");
        assert_eq!(store.risk_violations(10).len(), 1);
    }

    #[tokio::test]
    async fn hold_decision_dte_exit() {
        let (orchestrator, _provider, _store) = harness();
        let position = exit::tests_fixtures::position(2.0, 2);
        let quote = OptionQuote {
            symbol: position.symbol.clone(),
            bid: 1.18,
            ask: 1.22,
            last: 1.20,
            volume: 0,
            open_interest: 0,
            greeks: Greeks::default(),
            as_of: Utc::now(),
        };
        let today = position.expiration - chrono::Duration::days(1);
        let decision = orchestrator.orchestrate_hold_decision(&position, &quote, None, today);
        assert_eq!(decision.action, HoldAction::Exit);
        assert_eq!(decision.quantity, 2);
    }

    #[tokio::test]
    async fn hold_decision_tighten_stop_at_25_percent() {
        let (orchestrator, _provider, _store) = harness();
        let position = exit::tests_fixtures::position(2.0, 1);
        let quote = OptionQuote {
            symbol: position.symbol.clone(),
            bid: 2.58,
            ask: 2.62,
            last: 2.60,
            volume: 0,
            open_interest: 0,
            greeks: Greeks::default(),
            as_of: Utc::now(),
        };
        let today = position.expiration - chrono::Duration::days(30);
        let decision = orchestrator.orchestrate_hold_decision(&position, &quote, None, today);
        assert_eq!(decision.action, HoldAction::TightenStop);
        assert_eq!(decision.new_stop_loss, Some(2.0));
    }

    #[tokio::test]
    async fn exit_override_fires_without_inline_gex() {
        let (orchestrator, _provider, _store) = harness();
        let position = exit::tests_fixtures::position(2.0, 1);
        let quote = OptionQuote {
            symbol: position.symbol.clone(),
            bid: 2.28,
            ask: 2.32,
            last: 2.30,
            volume: 0,
            open_interest: 0,
            greeks: Greeks {
                delta: 0.45,
                gamma: 0.03,
                theta: -0.02,
                vega: 0.1,
                iv: 0.30,
            },
            as_of: Utc::now(),
        };
        let today = position.expiration - chrono::Duration::days(30);
        let inputs = ExitInputs {
            position: &position,
            quote: &quote,
            atr: None,
            atr_percentile: None,
            gex: None,
            today,
        };
        let gex = GexBundle {
            underlying: "SPY".into(),
            regime: MarketRegime::TrendingDown,
            regime_confidence: 0.9,
            dealer_position: DealerPosition::ShortGamma,
            zero_gamma_level: None,
            max_pain: None,
            net_gex: -1.0e9,
            as_of: Utc::now(),
        };
        let eval = orchestrator.orchestrate_exit_decision(&inputs, Some(&gex));
        assert_eq!(eval.trigger, ExitTrigger::GexFlip);
        assert_eq!(eval.action, ExitAction::CloseFull);
    }
}
