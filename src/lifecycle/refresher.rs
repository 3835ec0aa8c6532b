// =============================================================================
// Position refresher — quotes, high-water marks, exit evaluation, auto-close
// =============================================================================
//
// One cycle:
//   1. refresh every open position from its option quote (price, P&L,
//      Greeks, monotone high-water mark);
//   2. fetch one GEX bundle per distinct underlying and feed the regime
//      tracker (history rows are append-only);
//   3. run the exit engine per position;
//   4. close triggered positions sequentially with enforced spacing — no
//      two closing orders for the same cycle are ever in flight together.
//
// A process-wide mutex guarantees at most one cycle runs at a time; the
// manual `/refresh-positions` trigger and the timer share it.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::{interval, sleep, Duration};
use tracing::{debug, info, warn};

use crate::decision::exit::{
    ExitAction, ExitEvaluation, ExitInputs, ExitTrigger, ExitUrgency,
};
use crate::decision::{DecisionOrchestrator, HoldAction};
use crate::market_data::{GexBundle, MarketContext, MarketDataProvider};
use crate::positions::PositionManager;
use crate::runtime_config::RuntimeConfig;
use crate::store::Store;
use crate::types::{OrderType, Position};

/// Outcome of one refresh cycle, returned by the manual trigger route.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub exit_signals_count: usize,
    pub closed: usize,
    pub skipped: bool,
}

/// One raised exit signal, retained for the `/exit-signals` projection.
#[derive(Debug, Clone, Serialize)]
pub struct ExitSignalRecord {
    pub position_id: String,
    pub symbol: String,
    pub evaluation: ExitEvaluation,
    pub raised_at: chrono::DateTime<Utc>,
}

/// Bounded ring of recent exit signals.
const MAX_EXIT_RECORDS: usize = 200;

pub struct PositionRefresher {
    store: Arc<Store>,
    positions: Arc<PositionManager>,
    provider: Arc<dyn MarketDataProvider>,
    orchestrator: Arc<DecisionOrchestrator>,
    config: Arc<RwLock<RuntimeConfig>>,
    /// Single-instance lease: timer ticks and manual triggers both take it.
    cycle_lock: tokio::sync::Mutex<()>,
    recent_exits: RwLock<Vec<ExitSignalRecord>>,
}

impl PositionRefresher {
    pub fn new(
        store: Arc<Store>,
        positions: Arc<PositionManager>,
        provider: Arc<dyn MarketDataProvider>,
        orchestrator: Arc<DecisionOrchestrator>,
        config: Arc<RwLock<RuntimeConfig>>,
    ) -> Self {
        Self {
            store,
            positions,
            provider,
            orchestrator,
            config,
            cycle_lock: tokio::sync::Mutex::new(()),
            recent_exits: RwLock::new(Vec::new()),
        }
    }

    pub fn recent_exit_signals(&self, limit: usize) -> Vec<ExitSignalRecord> {
        let exits = self.recent_exits.read();
        exits.iter().rev().take(limit).cloned().collect()
    }

    fn record_exit_signal(
        &self,
        position: &Position,
        eval: &ExitEvaluation,
        now: chrono::DateTime<Utc>,
    ) {
        let mut exits = self.recent_exits.write();
        exits.push(ExitSignalRecord {
            position_id: position.id.clone(),
            symbol: position.symbol.clone(),
            evaluation: eval.clone(),
            raised_at: now,
        });
        while exits.len() > MAX_EXIT_RECORDS {
            exits.remove(0);
        }
    }

    /// Run one refresh cycle. When another cycle holds the lease, returns
    /// immediately with `skipped = true` instead of queueing behind it.
    pub async fn cycle(&self) -> RefreshSummary {
        let Ok(_lease) = self.cycle_lock.try_lock() else {
            debug!("refresh cycle already running; skipping");
            return RefreshSummary {
                skipped: true,
                ..Default::default()
            };
        };

        let open = self.store.open_positions();
        if open.is_empty() {
            debug!("refresh cycle: no open positions");
            return RefreshSummary::default();
        }

        let mut summary = RefreshSummary::default();
        let now = Utc::now();
        let today = now.date_naive();
        let cfg = self.config.read().clone();

        // ── 1. Quote refresh (sequential per position; HWM is monotone) ─
        let mut refreshed: Vec<Position> = Vec::new();
        for position in &open {
            match self.provider.option_quote(&position.symbol).await {
                Ok(quote) => match self.positions.refresh_position(&position.id, &quote) {
                    Ok(updated) => {
                        refreshed.push(updated);
                        summary.refreshed += 1;
                    }
                    Err(e) => {
                        warn!(position_id = %position.id, error = %e, "position refresh failed")
                    }
                },
                Err(e) => {
                    warn!(
                        position_id = %position.id,
                        symbol = %position.symbol,
                        error = %e,
                        "quote fetch failed; skipping refresh"
                    );
                }
            }
        }

        // ── 2. One GEX bundle + context per distinct underlying ─────────
        // Positions are serialized; distinct underlyings may fetch in
        // parallel.
        let mut underlyings: Vec<String> =
            refreshed.iter().map(|p| p.underlying.clone()).collect();
        underlyings.sort();
        underlyings.dedup();

        let fetches = underlyings.iter().map(|underlying| {
            let provider = self.provider.clone();
            let underlying = underlying.clone();
            async move {
                let gex = provider.gex_bundle(&underlying).await;
                let ctx = provider.market_context(&underlying).await;
                (underlying, gex, ctx)
            }
        });
        let fetched = futures_util::future::join_all(fetches).await;

        let mut gex_by_underlying: HashMap<String, GexBundle> = HashMap::new();
        let mut ctx_by_underlying: HashMap<String, MarketContext> = HashMap::new();
        for (underlying, gex, ctx) in fetched {
            match gex {
                Ok(bundle) => {
                    let assessment = self.orchestrator.regime_tracker().observe(
                        &underlying,
                        bundle.regime,
                        bundle.regime_confidence,
                        now,
                        &cfg.regime,
                    );
                    self.store
                        .append_regime_observation(assessment.to_history_row());
                    gex_by_underlying.insert(underlying.clone(), bundle);
                }
                Err(e) => {
                    debug!(underlying = %underlying, error = %e, "no GEX bundle this cycle");
                }
            }
            if let Ok(ctx) = ctx {
                ctx_by_underlying.insert(underlying, ctx);
            }
        }

        // ── 3. Exit evaluation per position ─────────────────────────────
        let mut to_close: Vec<(Position, ExitEvaluation)> = Vec::new();
        for position in &refreshed {
            let Ok(quote) = self.provider.option_quote(&position.symbol).await else {
                continue;
            };
            let gex = gex_by_underlying.get(&position.underlying);
            let ctx = ctx_by_underlying.get(&position.underlying);
            let inputs = ExitInputs {
                position,
                quote: &quote,
                atr: ctx.and_then(|c| c.atr),
                atr_percentile: ctx.and_then(|c| c.atr_percentile),
                gex,
                today,
            };
            let eval = self.orchestrator.orchestrate_exit_decision(&inputs, None);
            if eval.should_exit() {
                info!(
                    position_id = %position.id,
                    symbol = %position.symbol,
                    trigger = %eval.trigger,
                    quantity = eval.quantity,
                    reason = %eval.reason,
                    "exit signal raised"
                );
                summary.exit_signals_count += 1;
                self.record_exit_signal(position, &eval, now);
                to_close.push((position.clone(), eval));
                continue;
            }

            // The exit engine held; the hold rules may still tighten the
            // stop or trim the position.
            let hold =
                self.orchestrator
                    .orchestrate_hold_decision(position, &quote, gex, today);
            match hold.action {
                HoldAction::Hold => {}
                HoldAction::TightenStop => {
                    if let Some(stop) = hold.new_stop_loss {
                        match self
                            .store
                            .update_position(&position.id, |p| p.stop_loss = Some(stop))
                        {
                            Ok(_) => info!(
                                position_id = %position.id,
                                stop = format!("{stop:.2}"),
                                reason = %hold.reason,
                                "stop tightened"
                            ),
                            Err(e) => {
                                warn!(position_id = %position.id, error = %e, "stop tighten failed")
                            }
                        }
                    }
                }
                HoldAction::PartialExit | HoldAction::Exit => {
                    let eval = ExitEvaluation {
                        action: if hold.action == HoldAction::Exit {
                            ExitAction::CloseFull
                        } else {
                            ExitAction::ClosePartial
                        },
                        urgency: if hold.action == HoldAction::Exit {
                            ExitUrgency::Immediate
                        } else {
                            ExitUrgency::Soon
                        },
                        trigger: if hold.action == HoldAction::Exit {
                            ExitTrigger::DteLimit
                        } else {
                            ExitTrigger::RegimeChange
                        },
                        quantity: hold.quantity,
                        new_stop_loss: hold.new_stop_loss,
                        suggested_order_type: if hold.action == HoldAction::Exit {
                            OrderType::Market
                        } else {
                            OrderType::Limit
                        },
                        reason: hold.reason,
                    };
                    summary.exit_signals_count += 1;
                    self.record_exit_signal(position, &eval, now);
                    to_close.push((position.clone(), eval));
                }
            }
        }

        // ── 4. Auto-closer: strictly sequential with spacing ────────────
        let spacing = Duration::from_millis(cfg.workers.close_spacing_ms);
        let mut first = true;
        for (position, eval) in to_close {
            if !first {
                sleep(spacing).await;
            }
            first = false;

            let price = match self.provider.option_quote(&position.symbol).await {
                Ok(q) => q.mid(),
                Err(_) => position.current_price,
            };
            let reason = format!("{}: {}", eval.trigger, eval.reason);
            match self
                .positions
                .close_position(
                    &position,
                    eval.quantity,
                    eval.suggested_order_type,
                    price,
                    &reason,
                )
                .await
            {
                Ok(order) => {
                    summary.closed += 1;
                    // A partial that came with a stop (T1 breakeven) arms
                    // the position stop for the remainder.
                    if eval.action == ExitAction::ClosePartial {
                        if let Some(stop) = eval.new_stop_loss {
                            let _ = self
                                .store
                                .update_position(&position.id, |p| p.stop_loss = Some(stop));
                        }
                    }
                    info!(
                        position_id = %position.id,
                        order_id = %order.id,
                        trigger = %eval.trigger,
                        "auto-close submitted"
                    );
                }
                Err(e) => {
                    warn!(
                        position_id = %position.id,
                        error = %e,
                        "auto-close failed"
                    );
                }
            }
        }

        debug!(
            refreshed = summary.refreshed,
            exits = summary.exit_signals_count,
            closed = summary.closed,
            "refresh cycle complete"
        );
        summary
    }

    /// Background loop; spawn once at startup.
    pub async fn run(self: Arc<Self>) {
        let period = self.config.read().workers.refresh_interval_secs;
        info!(interval_secs = period, "position refresher started");
        let mut ticker = interval(Duration::from_secs(period.max(1)));
        loop {
            ticker.tick().await;
            let _ = self.cycle().await;
        }
    }
}
