// =============================================================================
// Risk engine — pre-trade limit checks protecting capital
// =============================================================================
//
// Three limits gate every new entry:
//   1. Open positions  — count of open positions vs the cap.
//   2. Daily trades    — orders submitted today vs the cap.
//   3. Daily loss      — realized (today) + unrealized P&L vs the loss cap.
//
// Every rejection is appended to `risk_violations` so the desk can audit
// what the engine refused and why.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::runtime_config::RiskParams;
use crate::store::Store;

pub struct RiskEngine {
    store: Arc<Store>,
}

/// Outcome of a pre-trade check.
#[derive(Debug, Clone)]
pub struct RiskCheck {
    pub allowed: bool,
    /// Rule name + detail when blocked.
    pub violation: Option<(String, String)>,
}

impl RiskCheck {
    fn pass() -> Self {
        Self {
            allowed: true,
            violation: None,
        }
    }

    fn blocked(rule: &str, detail: String) -> Self {
        Self {
            allowed: false,
            violation: Some((rule.to_string(), detail)),
        }
    }
}

impl RiskEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Evaluate the entry gates for `symbol`. A blocked result is recorded
    /// in `risk_violations` before returning.
    pub fn can_open(&self, symbol: &str, params: &RiskParams, now: DateTime<Utc>) -> RiskCheck {
        let check = self.evaluate(params, now);
        if let Some((rule, detail)) = &check.violation {
            warn!(symbol, rule, detail, "entry blocked by risk engine");
            self.store.record_risk_violation(rule, detail, Some(symbol));
        }
        check
    }

    fn evaluate(&self, params: &RiskParams, now: DateTime<Utc>) -> RiskCheck {
        // ── 1. Open position cap ────────────────────────────────────────
        let open = self.store.open_positions();
        if open.len() as u32 >= params.max_open_positions {
            return RiskCheck::blocked(
                "MAX_OPEN_POSITIONS",
                format!(
                    "{} open positions at the {} cap",
                    open.len(),
                    params.max_open_positions
                ),
            );
        }

        // ── 2. Daily trade cap ──────────────────────────────────────────
        let today = now.date_naive();
        let trades_today = self
            .store
            .recent_orders(usize::MAX)
            .iter()
            .filter(|o| o.submitted_at.date_naive() == today)
            .count() as u32;
        if trades_today >= params.max_trades_per_day {
            return RiskCheck::blocked(
                "MAX_TRADES_PER_DAY",
                format!(
                    "{trades_today} orders today at the {} cap",
                    params.max_trades_per_day
                ),
            );
        }

        // ── 3. Daily loss cap ───────────────────────────────────────────
        let realized_today: f64 = self
            .store
            .closed_positions(usize::MAX)
            .iter()
            .filter(|p| {
                p.closed_at
                    .map(|at| at.date_naive() == today)
                    .unwrap_or(false)
            })
            .map(|p| p.realized_pnl)
            .sum();
        let unrealized: f64 = open.iter().map(|p| p.unrealized_pnl).sum();
        let daily_pnl = realized_today + unrealized;
        if daily_pnl <= -params.max_daily_loss {
            return RiskCheck::blocked(
                "MAX_DAILY_LOSS",
                format!(
                    "daily P&L {daily_pnl:.0} breaches the -{:.0} cap",
                    params.max_daily_loss
                ),
            );
        }

        RiskCheck::pass()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RiskLimitsRow;
    use crate::types::{Greeks, MarketRegime, OptionType, Position};
    use chrono::NaiveDate;

    fn store() -> Arc<Store> {
        Arc::new(Store::new(RiskLimitsRow {
            max_open_positions: 2,
            max_trades_per_day: 25,
            max_daily_loss: 1000.0,
            risk_pct_per_trade: 0.02,
        }))
    }

    fn params() -> RiskParams {
        RiskParams {
            max_open_positions: 2,
            max_trades_per_day: 25,
            max_daily_loss: 1000.0,
        }
    }

    fn open_position(id: &str, unrealized: f64) -> Position {
        Position {
            id: id.into(),
            symbol: format!("SPY   260320C0050000{}", id.len()),
            underlying: "SPY".into(),
            strike: 500.0,
            expiration: NaiveDate::from_ymd_opt(2026, 3, 20).unwrap(),
            option_type: OptionType::Call,
            quantity: 1,
            avg_open_price: 2.0,
            total_cost: 200.0,
            current_price: 2.0,
            market_value: 200.0,
            unrealized_pnl: unrealized,
            unrealized_pnl_percent: 0.0,
            realized_pnl: 0.0,
            greeks: Greeks::default(),
            entry_iv: 0.3,
            stop_loss: None,
            high_water_mark: 0.0,
            partial_exits_taken: 0,
            entry_market_regime: MarketRegime::Unknown,
            is_closed: false,
            opened_at: Utc::now(),
            closed_at: None,
            close_reason: None,
        }
    }

    #[test]
    fn passes_with_headroom() {
        let store = store();
        let engine = RiskEngine::new(store);
        let check = engine.can_open("SPY", &params(), Utc::now());
        assert!(check.allowed);
    }

    #[test]
    fn blocks_at_position_cap_and_records_violation() {
        let store = store();
        store.insert_position(open_position("a", 0.0));
        store.insert_position(open_position("b", 0.0));

        let engine = RiskEngine::new(store.clone());
        let check = engine.can_open("SPY", &params(), Utc::now());
        assert!(!check.allowed);
        assert_eq!(check.violation.unwrap().0, "MAX_OPEN_POSITIONS");
        assert_eq!(store.risk_violations(10).len(), 1);
    }

    #[test]
    fn blocks_on_daily_loss() {
        let store = store();
        store.insert_position(open_position("a", -1200.0));

        let engine = RiskEngine::new(store.clone());
        let check = engine.can_open("SPY", &params(), Utc::now());
        assert!(!check.allowed);
        assert_eq!(check.violation.unwrap().0, "MAX_DAILY_LOSS");
    }
}
