// =============================================================================
// Persistence store — table-shaped state behind RwLocks
// =============================================================================
//
// The store is the process-lifetime owner of record for signals, orders,
// trades, positions, and the supporting reference tables. Components hold
// transient copies only.
//
// Guarantees enforced here rather than by callers:
//   - `regime_history` is append-only;
//   - `orders.status` mutates only through `update_order_status`, which
//     checks the transition DAG (terminal statuses are immutable);
//   - signal terminal statuses are set once.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::market_data::DealerPosition;
use crate::types::{
    ExecutionMode, MarketRegime, Order, OrderStatus, Position, Signal, SignalStatus, Trade,
};

/// Cap on the adapter-log ring.
const MAX_ADAPTER_LOGS: usize = 1_000;

// ---------------------------------------------------------------------------
// Reference-table row types
// ---------------------------------------------------------------------------

/// One appended regime observation (`regime_history` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeHistoryRow {
    pub ticker: String,
    pub regime: MarketRegime,
    pub regime_confidence: f64,
    pub consecutive_same_regime: u32,
    pub time_in_regime_seconds: i64,
    pub last_flip_timestamp: DateTime<Utc>,
    pub stability_score: f64,
    pub is_stable: bool,
    pub can_trade: bool,
    #[serde(default)]
    pub block_reason: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Historical edge per (regime, dealer position) used for Kelly sizing
/// (`regime_performance` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimePerformanceRow {
    pub regime: MarketRegime,
    pub dealer_position: DealerPosition,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub average_win: f64,
    pub average_loss: f64,
    pub kelly_fraction: f64,
    pub half_kelly: f64,
}

impl RegimePerformanceRow {
    /// Kelly fraction `W − (1−W)/R` from the row's counts, clamped at zero.
    fn recompute(&mut self) {
        if self.total_trades == 0 || self.average_loss <= 0.0 {
            self.kelly_fraction = 0.0;
            self.half_kelly = 0.0;
            return;
        }
        let w = self.winning_trades as f64 / self.total_trades as f64;
        let r = self.average_win / self.average_loss;
        let kelly = if r > 0.0 { w - (1.0 - w) / r } else { 0.0 };
        self.kelly_fraction = kelly.max(0.0);
        self.half_kelly = self.kelly_fraction / 2.0;
    }
}

/// VIX bucket sizing rule (`vix_sizing_rules` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VixSizingRule {
    pub vix_min: f64,
    pub vix_max: f64,
    pub size_multiplier: f64,
    pub max_positions: u32,
}

/// Engine-wide risk limits (`risk_limits` table; one row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimitsRow {
    pub max_open_positions: u32,
    pub max_trades_per_day: u32,
    pub max_daily_loss: f64,
    pub risk_pct_per_trade: f64,
}

/// A recorded risk rejection (`risk_violations` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskViolationRow {
    pub id: String,
    pub rule: String,
    pub detail: String,
    #[serde(default)]
    pub symbol: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Latest assembled context per symbol (`market_context` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContextRow {
    pub symbol: String,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// One adapter interaction (`adapter_logs` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterLogRow {
    pub adapter_name: String,
    pub operation: String,
    pub correlation_id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub request_payload: Option<serde_json::Value>,
    #[serde(default)]
    pub response_payload: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub logged_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Store {
    signals: RwLock<Vec<Signal>>,
    orders: RwLock<Vec<Order>>,
    trades: RwLock<Vec<Trade>>,
    positions: RwLock<Vec<Position>>,
    regime_history: RwLock<Vec<RegimeHistoryRow>>,
    regime_performance: RwLock<Vec<RegimePerformanceRow>>,
    vix_sizing_rules: RwLock<Vec<VixSizingRule>>,
    risk_limits: RwLock<RiskLimitsRow>,
    risk_violations: RwLock<Vec<RiskViolationRow>>,
    market_context: RwLock<HashMap<String, MarketContextRow>>,
    adapter_logs: RwLock<Vec<AdapterLogRow>>,
}

impl Store {
    pub fn new(risk_limits: RiskLimitsRow) -> Self {
        Self {
            signals: RwLock::new(Vec::new()),
            orders: RwLock::new(Vec::new()),
            trades: RwLock::new(Vec::new()),
            positions: RwLock::new(Vec::new()),
            regime_history: RwLock::new(Vec::new()),
            regime_performance: RwLock::new(Self::seed_regime_performance()),
            vix_sizing_rules: RwLock::new(Self::seed_vix_rules()),
            risk_limits: RwLock::new(risk_limits),
            risk_violations: RwLock::new(Vec::new()),
            market_context: RwLock::new(HashMap::new()),
            adapter_logs: RwLock::new(Vec::new()),
        }
    }

    // ── Seed data ───────────────────────────────────────────────────────

    /// Conservative starting edge per regime; rows sharpen as trades close.
    fn seed_regime_performance() -> Vec<RegimePerformanceRow> {
        let mut rows = Vec::new();
        let seeds: &[(MarketRegime, DealerPosition, u32, u32, f64, f64)] = &[
            (MarketRegime::TrendingUp, DealerPosition::ShortGamma, 40, 24, 420.0, 260.0),
            (MarketRegime::TrendingUp, DealerPosition::LongGamma, 40, 21, 300.0, 240.0),
            (MarketRegime::TrendingDown, DealerPosition::ShortGamma, 40, 23, 410.0, 270.0),
            (MarketRegime::TrendingDown, DealerPosition::LongGamma, 40, 20, 290.0, 250.0),
            (MarketRegime::RangeBound, DealerPosition::LongGamma, 40, 19, 220.0, 230.0),
            (MarketRegime::RangeBound, DealerPosition::ShortGamma, 40, 18, 230.0, 250.0),
            (MarketRegime::BreakoutImminent, DealerPosition::ShortGamma, 30, 17, 480.0, 280.0),
            (MarketRegime::ReversalUp, DealerPosition::Neutral, 25, 13, 350.0, 260.0),
            (MarketRegime::ReversalDown, DealerPosition::Neutral, 25, 13, 340.0, 270.0),
        ];
        for &(regime, dealer, total, wins, avg_win, avg_loss) in seeds {
            let mut row = RegimePerformanceRow {
                regime,
                dealer_position: dealer,
                total_trades: total,
                winning_trades: wins,
                losing_trades: total - wins,
                average_win: avg_win,
                average_loss: avg_loss,
                kelly_fraction: 0.0,
                half_kelly: 0.0,
            };
            row.recompute();
            rows.push(row);
        }
        rows
    }

    fn seed_vix_rules() -> Vec<VixSizingRule> {
        vec![
            VixSizingRule { vix_min: 0.0, vix_max: 15.0, size_multiplier: 1.1, max_positions: 6 },
            VixSizingRule { vix_min: 15.0, vix_max: 20.0, size_multiplier: 1.0, max_positions: 5 },
            VixSizingRule { vix_min: 20.0, vix_max: 25.0, size_multiplier: 0.8, max_positions: 4 },
            VixSizingRule { vix_min: 25.0, vix_max: 30.0, size_multiplier: 0.6, max_positions: 3 },
            VixSizingRule { vix_min: 30.0, vix_max: 40.0, size_multiplier: 0.4, max_positions: 2 },
            VixSizingRule { vix_min: 40.0, vix_max: 100.0, size_multiplier: 0.25, max_positions: 1 },
        ]
    }

    // ── Signals ─────────────────────────────────────────────────────────

    pub fn insert_signal(&self, signal: Signal) {
        self.signals.write().push(signal);
    }

    /// Set a signal's status. Terminal statuses are set exactly once.
    pub fn set_signal_status(
        &self,
        id: &str,
        status: SignalStatus,
        validation_result: Option<String>,
    ) -> Result<()> {
        let mut signals = self.signals.write();
        let signal = signals
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| EngineError::Store(format!("signal {id} not found")))?;

        if signal.status.is_terminal() {
            return Err(EngineError::Store(format!(
                "signal {id} already terminal ({})",
                signal.status
            )));
        }
        signal.status = status;
        if validation_result.is_some() {
            signal.validation_result = validation_result;
        }
        Ok(())
    }

    pub fn get_signal(&self, id: &str) -> Option<Signal> {
        self.signals.read().iter().find(|s| s.id == id).cloned()
    }

    /// Most recent signal carrying `fingerprint`, excluding `exclude_id`
    /// (the dedup path looks up the original behind a duplicate).
    pub fn find_signal_by_fingerprint(
        &self,
        fingerprint: &str,
        exclude_id: Option<&str>,
    ) -> Option<Signal> {
        self.signals
            .read()
            .iter()
            .rev()
            .find(|s| s.fingerprint == fingerprint && Some(s.id.as_str()) != exclude_id)
            .cloned()
    }

    pub fn recent_signals(&self, limit: usize) -> Vec<Signal> {
        let signals = self.signals.read();
        signals.iter().rev().take(limit).cloned().collect()
    }

    /// COMPLETED signals for `symbol` received at or after `since`, newest
    /// first. The confluence engine's lookback query.
    pub fn completed_signals_for(&self, symbol: &str, since: DateTime<Utc>) -> Vec<Signal> {
        self.signals
            .read()
            .iter()
            .rev()
            .filter(|s| {
                s.symbol == symbol
                    && s.status == SignalStatus::Completed
                    && s.received_at >= since
            })
            .cloned()
            .collect()
    }

    // ── Orders ──────────────────────────────────────────────────────────

    pub fn insert_order(&self, order: Order) {
        self.orders.write().push(order);
    }

    pub fn get_order(&self, id: &str) -> Option<Order> {
        self.orders.read().iter().find(|o| o.id == id).cloned()
    }

    pub fn recent_orders(&self, limit: usize) -> Vec<Order> {
        let orders = self.orders.read();
        orders.iter().rev().take(limit).cloned().collect()
    }

    /// Orders awaiting broker resolution (the fill poller's work list).
    pub fn outstanding_orders(&self) -> Vec<Order> {
        self.orders
            .read()
            .iter()
            .filter(|o| {
                matches!(
                    o.status,
                    OrderStatus::Submitted | OrderStatus::Accepted | OrderStatus::PartialFill
                ) && o.broker_order_id.is_some()
            })
            .cloned()
            .collect()
    }

    pub fn orders_with_status(&self, mode: ExecutionMode, statuses: &[OrderStatus]) -> Vec<Order> {
        self.orders
            .read()
            .iter()
            .filter(|o| o.mode == mode && statuses.contains(&o.status))
            .cloned()
            .collect()
    }

    /// Conditional status transition. `expected_current` is the precondition;
    /// the update is rejected when the stored status has moved on, or when
    /// the transition violates the DAG.
    pub fn update_order_status(
        &self,
        id: &str,
        expected_current: OrderStatus,
        next: OrderStatus,
        mutate: impl FnOnce(&mut Order),
    ) -> Result<()> {
        let mut orders = self.orders.write();
        let order = orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| EngineError::Store(format!("order {id} not found")))?;

        if order.status != expected_current {
            return Err(EngineError::Store(format!(
                "order {id} status precondition failed: expected {expected_current}, found {}",
                order.status
            )));
        }
        if !order.status.can_transition_to(next) {
            return Err(EngineError::Store(format!(
                "order {id} illegal transition {} -> {next}",
                order.status
            )));
        }

        order.status = next;
        mutate(order);
        debug!(order_id = id, from = %expected_current, to = %next, "order status transition");
        Ok(())
    }

    // ── Trades ──────────────────────────────────────────────────────────

    pub fn insert_trade(&self, trade: Trade) {
        self.trades.write().push(trade);
    }

    pub fn trades_for_order(&self, order_id: &str) -> Vec<Trade> {
        self.trades
            .read()
            .iter()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect()
    }

    pub fn recent_trades(&self, limit: usize) -> Vec<Trade> {
        let trades = self.trades.read();
        trades.iter().rev().take(limit).cloned().collect()
    }

    // ── Positions ───────────────────────────────────────────────────────

    pub fn insert_position(&self, position: Position) {
        self.positions.write().push(position);
    }

    pub fn get_position(&self, id: &str) -> Option<Position> {
        self.positions.read().iter().find(|p| p.id == id).cloned()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions
            .read()
            .iter()
            .filter(|p| !p.is_closed)
            .cloned()
            .collect()
    }

    pub fn open_position_for_symbol(&self, occ_symbol: &str) -> Option<Position> {
        self.positions
            .read()
            .iter()
            .find(|p| !p.is_closed && p.symbol == occ_symbol)
            .cloned()
    }

    pub fn closed_positions(&self, limit: usize) -> Vec<Position> {
        self.positions
            .read()
            .iter()
            .rev()
            .filter(|p| p.is_closed)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn all_positions(&self, limit: usize) -> Vec<Position> {
        let positions = self.positions.read();
        positions.iter().rev().take(limit).cloned().collect()
    }

    /// Mutate a position in place. Returns the updated copy.
    pub fn update_position(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut Position),
    ) -> Result<Position> {
        let mut positions = self.positions.write();
        let position = positions
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| EngineError::Store(format!("position {id} not found")))?;
        mutate(position);
        Ok(position.clone())
    }

    // ── Regime history (append-only) ────────────────────────────────────

    pub fn append_regime_observation(&self, row: RegimeHistoryRow) {
        self.regime_history.write().push(row);
    }

    pub fn latest_regime(&self, ticker: &str) -> Option<RegimeHistoryRow> {
        self.regime_history
            .read()
            .iter()
            .rev()
            .find(|r| r.ticker == ticker)
            .cloned()
    }

    pub fn regime_history_for(&self, ticker: &str, limit: usize) -> Vec<RegimeHistoryRow> {
        self.regime_history
            .read()
            .iter()
            .rev()
            .filter(|r| r.ticker == ticker)
            .take(limit)
            .cloned()
            .collect()
    }

    // ── Regime performance / Kelly ──────────────────────────────────────

    pub fn regime_performance(
        &self,
        regime: MarketRegime,
        dealer: DealerPosition,
    ) -> Option<RegimePerformanceRow> {
        let rows = self.regime_performance.read();
        rows.iter()
            .find(|r| r.regime == regime && r.dealer_position == dealer)
            .or_else(|| rows.iter().find(|r| r.regime == regime))
            .cloned()
    }

    /// Fold a closed trade into the performance table, recomputing Kelly.
    pub fn record_regime_outcome(
        &self,
        regime: MarketRegime,
        dealer: DealerPosition,
        realized_pnl: f64,
    ) {
        let mut rows = self.regime_performance.write();
        let idx = match rows
            .iter()
            .position(|r| r.regime == regime && r.dealer_position == dealer)
        {
            Some(i) => i,
            None => {
                rows.push(RegimePerformanceRow {
                    regime,
                    dealer_position: dealer,
                    total_trades: 0,
                    winning_trades: 0,
                    losing_trades: 0,
                    average_win: 0.0,
                    average_loss: 0.0,
                    kelly_fraction: 0.0,
                    half_kelly: 0.0,
                });
                rows.len() - 1
            }
        };
        let row = &mut rows[idx];

        row.total_trades += 1;
        if realized_pnl >= 0.0 {
            let n = row.winning_trades as f64;
            row.average_win = (row.average_win * n + realized_pnl) / (n + 1.0);
            row.winning_trades += 1;
        } else {
            let n = row.losing_trades as f64;
            row.average_loss = (row.average_loss * n + realized_pnl.abs()) / (n + 1.0);
            row.losing_trades += 1;
        }
        row.recompute();
    }

    // ── VIX sizing rules ────────────────────────────────────────────────

    pub fn vix_rule_for(&self, vix: f64) -> Option<VixSizingRule> {
        self.vix_sizing_rules
            .read()
            .iter()
            .find(|r| vix >= r.vix_min && vix < r.vix_max)
            .cloned()
    }

    pub fn vix_sizing_rules(&self) -> Vec<VixSizingRule> {
        self.vix_sizing_rules.read().clone()
    }

    // ── Risk limits & violations ────────────────────────────────────────

    pub fn risk_limits(&self) -> RiskLimitsRow {
        self.risk_limits.read().clone()
    }

    pub fn record_risk_violation(&self, rule: &str, detail: &str, symbol: Option<&str>) {
        warn!(rule, detail, symbol = symbol.unwrap_or("-"), "risk violation recorded");
        self.risk_violations.write().push(RiskViolationRow {
            id: Uuid::new_v4().to_string(),
            rule: rule.to_string(),
            detail: detail.to_string(),
            symbol: symbol.map(str::to_string),
            occurred_at: Utc::now(),
        });
    }

    pub fn risk_violations(&self, limit: usize) -> Vec<RiskViolationRow> {
        let rows = self.risk_violations.read();
        rows.iter().rev().take(limit).cloned().collect()
    }

    // ── Market context snapshots ────────────────────────────────────────

    pub fn upsert_market_context(&self, symbol: &str, payload: serde_json::Value) {
        self.market_context.write().insert(
            symbol.to_string(),
            MarketContextRow {
                symbol: symbol.to_string(),
                payload,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn market_context_rows(&self) -> Vec<MarketContextRow> {
        self.market_context.read().values().cloned().collect()
    }

    // ── Adapter logs ────────────────────────────────────────────────────

    pub fn append_adapter_log(&self, row: AdapterLogRow) {
        let mut logs = self.adapter_logs.write();
        logs.push(row);
        while logs.len() > MAX_ADAPTER_LOGS {
            logs.remove(0);
        }
    }

    pub fn adapter_logs(&self, limit: usize) -> Vec<AdapterLogRow> {
        let logs = self.adapter_logs.read();
        logs.iter().rev().take(limit).cloned().collect()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("signals", &self.signals.read().len())
            .field("orders", &self.orders.read().len())
            .field("trades", &self.trades.read().len())
            .field("positions", &self.positions.read().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderSide, OrderType, TimeInForce};

    fn limits() -> RiskLimitsRow {
        RiskLimitsRow {
            max_open_positions: 5,
            max_trades_per_day: 25,
            max_daily_loss: 1500.0,
            risk_pct_per_trade: 0.02,
        }
    }

    fn test_order(id: &str, status: OrderStatus) -> Order {
        Order {
            id: id.to_string(),
            signal_id: None,
            mode: ExecutionMode::Paper,
            side: OrderSide::BuyToOpen,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Day,
            symbol: "SPY   260320C00500000".into(),
            underlying: "SPY".into(),
            strike: Some(500.0),
            expiration: None,
            option_type: None,
            quantity: 1,
            limit_price: None,
            stop_price: None,
            status,
            broker_order_id: Some("b-1".into()),
            filled_quantity: 0,
            avg_fill_price: None,
            rejection_reason: None,
            submitted_at: Utc::now(),
            filled_at: None,
        }
    }

    #[test]
    fn conditional_order_update_enforces_precondition() {
        let store = Store::new(limits());
        store.insert_order(test_order("o1", OrderStatus::Submitted));

        // Wrong precondition fails and leaves the row untouched.
        let err = store.update_order_status("o1", OrderStatus::Accepted, OrderStatus::Filled, |_| {});
        assert!(err.is_err());
        assert_eq!(store.get_order("o1").unwrap().status, OrderStatus::Submitted);

        // Correct precondition succeeds.
        store
            .update_order_status("o1", OrderStatus::Submitted, OrderStatus::Filled, |o| {
                o.filled_quantity = o.quantity;
                o.avg_fill_price = Some(3.01);
            })
            .unwrap();
        let order = store.get_order("o1").unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, 1);
    }

    #[test]
    fn terminal_orders_never_mutate() {
        let store = Store::new(limits());
        store.insert_order(test_order("o1", OrderStatus::Submitted));
        store
            .update_order_status("o1", OrderStatus::Submitted, OrderStatus::Filled, |_| {})
            .unwrap();

        let err =
            store.update_order_status("o1", OrderStatus::Filled, OrderStatus::Cancelled, |_| {});
        assert!(err.is_err());
        assert_eq!(store.get_order("o1").unwrap().status, OrderStatus::Filled);
    }

    #[test]
    fn outstanding_orders_filter() {
        let store = Store::new(limits());
        store.insert_order(test_order("o1", OrderStatus::Submitted));
        store.insert_order(test_order("o2", OrderStatus::Accepted));
        let mut no_broker = test_order("o3", OrderStatus::Submitted);
        no_broker.broker_order_id = None;
        store.insert_order(no_broker);
        store.insert_order(test_order("o4", OrderStatus::Filled));

        let out = store.outstanding_orders();
        let ids: Vec<&str> = out.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["o1", "o2"]);
    }

    #[test]
    fn vix_rules_cover_buckets() {
        let store = Store::new(limits());
        assert!((store.vix_rule_for(12.0).unwrap().size_multiplier - 1.1).abs() < 1e-9);
        assert!((store.vix_rule_for(22.0).unwrap().size_multiplier - 0.8).abs() < 1e-9);
        assert!((store.vix_rule_for(45.0).unwrap().size_multiplier - 0.25).abs() < 1e-9);
    }

    #[test]
    fn kelly_recompute_from_outcomes() {
        let store = Store::new(limits());
        let before = store
            .regime_performance(MarketRegime::TrendingUp, DealerPosition::ShortGamma)
            .unwrap();
        assert!(before.kelly_fraction > 0.0);
        assert!((before.half_kelly - before.kelly_fraction / 2.0).abs() < 1e-12);

        store.record_regime_outcome(MarketRegime::TrendingUp, DealerPosition::ShortGamma, 500.0);
        let after = store
            .regime_performance(MarketRegime::TrendingUp, DealerPosition::ShortGamma)
            .unwrap();
        assert_eq!(after.total_trades, before.total_trades + 1);
        assert_eq!(after.winning_trades, before.winning_trades + 1);
    }

    #[test]
    fn regime_performance_falls_back_to_regime_only_match() {
        let store = Store::new(limits());
        // Seeds have no (BreakoutImminent, LongGamma) row; regime-only match
        // should still return the BreakoutImminent row.
        let row = store
            .regime_performance(MarketRegime::BreakoutImminent, DealerPosition::LongGamma)
            .unwrap();
        assert_eq!(row.regime, MarketRegime::BreakoutImminent);
    }

    #[test]
    fn signal_terminal_status_set_once() {
        let store = Store::new(limits());
        let sig = crate::pipeline::normalizer::tests_support::minimal_signal("SPY");
        let id = sig.id.clone();
        store.insert_signal(sig);

        store
            .set_signal_status(&id, SignalStatus::Completed, None)
            .unwrap();
        assert!(store
            .set_signal_status(&id, SignalStatus::Failed, None)
            .is_err());
        assert_eq!(
            store.get_signal(&id).unwrap().status,
            SignalStatus::Completed
        );
    }

    #[test]
    fn adapter_log_ring_is_bounded() {
        let store = Store::new(limits());
        for i in 0..(MAX_ADAPTER_LOGS + 50) {
            store.append_adapter_log(AdapterLogRow {
                adapter_name: "paper".into(),
                operation: "submit_order".into(),
                correlation_id: format!("c{i}"),
                order_id: None,
                status: "OK".into(),
                request_payload: None,
                response_payload: None,
                error_message: None,
                logged_at: Utc::now(),
            });
        }
        assert_eq!(store.adapter_logs(usize::MAX).len(), MAX_ADAPTER_LOGS);
    }
}
