// =============================================================================
// Position manager — order routing, fill application, position lifecycle
// =============================================================================
//
// The one place orders leave the engine. Every adapter interaction is
// recorded in `adapter_logs` with the order id as correlation id, and every
// fill flows through `apply_fill` so paper fills and polled live fills
// mutate positions through identical code.
//
// Invariants owned here:
//   - per-position exit orders are serialized by the caller (lifecycle loop);
//   - `high_water_mark` only ever rises;
//   - a position reaching quantity 0 is closed in the same mutation.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::paper::PaperAdapter;
use crate::broker::{BrokerAdapter, OrderRequest, TradeFill};
use crate::error::{EngineError, Result};
use crate::market_data::{MarketDataProvider, OptionQuote};
use crate::occ;
use crate::store::{AdapterLogRow, Store};
use crate::types::{
    ExecutionMode, Greeks, MarketRegime, Order, OrderSide, OrderStatus, OrderType, Position,
    Signal, SignalAction, TimeInForce, Trade,
};

pub struct PositionManager {
    store: Arc<Store>,
    adapter: Arc<dyn BrokerAdapter>,
    paper: Option<Arc<PaperAdapter>>,
    mode: ExecutionMode,
}

impl PositionManager {
    pub fn new(
        store: Arc<Store>,
        adapter: Arc<dyn BrokerAdapter>,
        paper: Option<Arc<PaperAdapter>>,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            store,
            adapter,
            paper,
            mode,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn adapter(&self) -> &Arc<dyn BrokerAdapter> {
        &self.adapter
    }

    fn log_adapter(
        &self,
        operation: &str,
        order_id: &str,
        status: &str,
        request: Option<serde_json::Value>,
        response: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        self.store.append_adapter_log(AdapterLogRow {
            adapter_name: self.adapter.capabilities().name.to_string(),
            operation: operation.to_string(),
            correlation_id: order_id.to_string(),
            order_id: Some(order_id.to_string()),
            status: status.to_string(),
            request_payload: request,
            response_payload: response,
            error_message: error,
            logged_at: Utc::now(),
        });
    }

    // =========================================================================
    // Opening
    // =========================================================================

    /// Open a position from an executed entry decision. Returns the order;
    /// the position appears once a fill lands (immediately, for paper
    /// market orders).
    pub async fn open_position(
        &self,
        signal: &Signal,
        quantity: u32,
        entry_price: f64,
        entry_regime: MarketRegime,
        quote: Option<&OptionQuote>,
    ) -> Result<Order> {
        let strike = signal
            .strike
            .ok_or_else(|| EngineError::Validation("open requires a strike".into()))?;
        let expiration = signal
            .expiration
            .ok_or_else(|| EngineError::Validation("open requires an expiration".into()))?;
        let option_type = signal
            .option_type
            .ok_or_else(|| EngineError::Validation("open requires an option type".into()))?;

        let occ_symbol = occ::encode(&signal.symbol, expiration, option_type, strike)?;
        let side = match signal.action {
            SignalAction::Buy => OrderSide::BuyToOpen,
            SignalAction::Sell => OrderSide::SellToOpen,
            SignalAction::Close => {
                return Err(EngineError::Validation(
                    "CLOSE signals do not open positions".into(),
                ))
            }
        };

        let order = Order {
            id: Uuid::new_v4().to_string(),
            signal_id: Some(signal.id.clone()),
            mode: self.mode,
            side,
            order_type: signal.order_type,
            time_in_force: signal.time_in_force,
            symbol: occ_symbol.clone(),
            underlying: signal.symbol.clone(),
            strike: Some(strike),
            expiration: Some(expiration),
            option_type: Some(option_type),
            quantity,
            limit_price: signal.limit_price,
            stop_price: None,
            status: OrderStatus::Pending,
            broker_order_id: None,
            filled_quantity: 0,
            avg_fill_price: None,
            rejection_reason: None,
            submitted_at: Utc::now(),
            filled_at: None,
        };
        self.store.insert_order(order.clone());

        let request = OrderRequest {
            order_id: order.id.clone(),
            symbol: occ_symbol,
            side,
            quantity,
            order_type: signal.order_type,
            time_in_force: signal.time_in_force,
            limit_price: signal.limit_price,
            stop_price: None,
        };

        self.submit(&order, &request, Some(entry_price), entry_regime, quote, None)
            .await
    }

    // =========================================================================
    // Closing
    // =========================================================================

    /// Submit a closing order for `quantity` contracts of an open position.
    pub async fn close_position(
        &self,
        position: &Position,
        quantity: u32,
        order_type: OrderType,
        market_price: f64,
        reason: &str,
    ) -> Result<Order> {
        if position.is_closed {
            return Err(EngineError::Validation(format!(
                "position {} is already closed",
                position.id
            )));
        }
        let quantity = quantity.min(position.quantity.unsigned_abs());
        if quantity == 0 {
            return Err(EngineError::Validation("close quantity is zero".into()));
        }

        let side = if position.is_long() {
            OrderSide::SellToClose
        } else {
            OrderSide::BuyToClose
        };
        let limit_price = match order_type {
            OrderType::Limit => Some(market_price),
            _ => None,
        };

        let order = Order {
            id: Uuid::new_v4().to_string(),
            signal_id: None,
            mode: self.mode,
            side,
            order_type,
            time_in_force: TimeInForce::Day,
            symbol: position.symbol.clone(),
            underlying: position.underlying.clone(),
            strike: Some(position.strike),
            expiration: Some(position.expiration),
            option_type: Some(position.option_type),
            quantity,
            limit_price,
            stop_price: None,
            status: OrderStatus::Pending,
            broker_order_id: None,
            filled_quantity: 0,
            avg_fill_price: None,
            rejection_reason: None,
            submitted_at: Utc::now(),
            filled_at: None,
        };
        self.store.insert_order(order.clone());

        let request = OrderRequest {
            order_id: order.id.clone(),
            symbol: position.symbol.clone(),
            side,
            quantity,
            order_type,
            time_in_force: TimeInForce::Day,
            limit_price,
            stop_price: None,
        };

        self.submit(
            &order,
            &request,
            Some(market_price),
            position.entry_market_regime,
            None,
            Some(reason),
        )
        .await
    }

    // =========================================================================
    // Submission plumbing
    // =========================================================================

    async fn submit(
        &self,
        order: &Order,
        request: &OrderRequest,
        market_price: Option<f64>,
        entry_regime: MarketRegime,
        quote: Option<&OptionQuote>,
        close_reason: Option<&str>,
    ) -> Result<Order> {
        let submit = self.adapter.submit_order(request, market_price).await;

        let (result, fill) = match submit {
            Ok(pair) => pair,
            Err(e) => {
                let msg = e.to_string();
                self.log_adapter(
                    "submit_order",
                    &order.id,
                    "ERROR",
                    serde_json::to_value(request).ok(),
                    None,
                    Some(msg.clone()),
                );
                self.store.update_order_status(
                    &order.id,
                    OrderStatus::Pending,
                    OrderStatus::Rejected,
                    |o| o.rejection_reason = Some(msg.clone()),
                )?;
                return Err(e);
            }
        };

        self.log_adapter(
            "submit_order",
            &order.id,
            if result.success { "OK" } else { "REJECTED" },
            serde_json::to_value(request).ok(),
            serde_json::to_value(&result).ok(),
            result.error.clone(),
        );

        if !result.success {
            let msg = result
                .error
                .clone()
                .unwrap_or_else(|| "broker rejected order".into());
            self.store.update_order_status(
                &order.id,
                OrderStatus::Pending,
                OrderStatus::Rejected,
                |o| o.rejection_reason = Some(msg.clone()),
            )?;
            return Err(EngineError::BrokerSubmitFailed(msg));
        }

        // Pending → Submitted with the broker id attached.
        self.store.update_order_status(
            &order.id,
            OrderStatus::Pending,
            OrderStatus::Submitted,
            |o| o.broker_order_id = result.broker_order_id.clone(),
        )?;

        if let Some(fill) = fill {
            self.apply_fill(&order.id, &fill, entry_regime, quote, close_reason)?;
        }

        self.store
            .get_order(&order.id)
            .ok_or_else(|| EngineError::Store(format!("order {} vanished", order.id)))
    }

    // =========================================================================
    // Fill application (shared by paper fills and the live poller)
    // =========================================================================

    /// Fold one fill into its order, insert the Trade row, and mutate the
    /// position (open, add, reduce, or close).
    pub fn apply_fill(
        &self,
        order_id: &str,
        fill: &TradeFill,
        entry_regime: MarketRegime,
        quote: Option<&OptionQuote>,
        close_reason: Option<&str>,
    ) -> Result<()> {
        let order = self
            .store
            .get_order(order_id)
            .ok_or_else(|| EngineError::Store(format!("order {order_id} not found")))?;

        let new_filled = order.filled_quantity + fill.quantity;
        if new_filled > order.quantity {
            return Err(EngineError::Store(format!(
                "order {order_id} overfill: {new_filled} of {}",
                order.quantity
            )));
        }

        // Weighted average across partial fills.
        let prior_notional =
            order.avg_fill_price.unwrap_or(0.0) * order.filled_quantity as f64;
        let avg = (prior_notional + fill.price * fill.quantity as f64) / new_filled as f64;
        let next_status = if new_filled == order.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartialFill
        };

        self.store
            .update_order_status(order_id, order.status, next_status, |o| {
                o.filled_quantity = new_filled;
                o.avg_fill_price = Some(avg);
                if next_status == OrderStatus::Filled {
                    o.filled_at = Some(fill.executed_at);
                }
            })?;

        // Trade row. Buys pay notional + costs; sells collect notional − costs.
        let notional = fill.price * fill.quantity as f64 * 100.0;
        let total_cost = if order.side.is_buy() {
            notional + fill.commission + fill.fees
        } else {
            notional - fill.commission - fill.fees
        };
        self.store.insert_trade(Trade {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            broker_trade_id: fill.broker_trade_id.clone(),
            execution_price: fill.price,
            quantity: fill.quantity,
            commission: fill.commission,
            fees: fill.fees,
            total_cost,
            executed_at: fill.executed_at,
        });

        if order.side.is_opening() {
            self.apply_opening_fill(&order, fill, total_cost, entry_regime, quote)
        } else {
            self.apply_closing_fill(&order, fill, close_reason)
        }
    }

    fn apply_opening_fill(
        &self,
        order: &Order,
        fill: &TradeFill,
        total_cost: f64,
        entry_regime: MarketRegime,
        quote: Option<&OptionQuote>,
    ) -> Result<()> {
        let signed_qty = match order.side {
            OrderSide::BuyToOpen => fill.quantity as i32,
            _ => -(fill.quantity as i32),
        };
        let greeks = quote.map(|q| q.greeks).unwrap_or_else(Greeks::default);
        let entry_iv = greeks.iv;

        if let Some(existing) = self.store.open_position_for_symbol(&order.symbol) {
            // Adding to an existing position: re-weight the open price.
            let updated = self.store.update_position(&existing.id, |p| {
                let prior_abs = p.quantity.unsigned_abs() as f64;
                let add_abs = fill.quantity as f64;
                p.avg_open_price =
                    (p.avg_open_price * prior_abs + fill.price * add_abs) / (prior_abs + add_abs);
                p.quantity += signed_qty;
                p.total_cost += total_cost;
                p.current_price = fill.price;
            })?;
            info!(
                position_id = %updated.id,
                symbol = %order.symbol,
                quantity = updated.quantity,
                "added to existing position"
            );
            return Ok(());
        }

        let position = Position {
            id: Uuid::new_v4().to_string(),
            symbol: order.symbol.clone(),
            underlying: order.underlying.clone(),
            strike: order.strike.unwrap_or(0.0),
            expiration: order.expiration.unwrap_or_else(|| fill.executed_at.date_naive()),
            option_type: order.option_type.unwrap_or(crate::types::OptionType::Call),
            quantity: signed_qty,
            avg_open_price: fill.price,
            total_cost,
            current_price: fill.price,
            market_value: fill.price * 100.0 * fill.quantity as f64,
            unrealized_pnl: 0.0,
            unrealized_pnl_percent: 0.0,
            realized_pnl: 0.0,
            greeks,
            entry_iv,
            stop_loss: None,
            high_water_mark: 0.0,
            partial_exits_taken: 0,
            entry_market_regime: entry_regime,
            is_closed: false,
            opened_at: fill.executed_at,
            closed_at: None,
            close_reason: None,
        };

        info!(
            position_id = %position.id,
            symbol = %position.symbol,
            quantity = position.quantity,
            avg_open = format!("{:.4}", position.avg_open_price),
            regime = %entry_regime,
            "position opened"
        );
        self.store.insert_position(position);
        Ok(())
    }

    fn apply_closing_fill(
        &self,
        order: &Order,
        fill: &TradeFill,
        close_reason: Option<&str>,
    ) -> Result<()> {
        let position = self
            .store
            .open_position_for_symbol(&order.symbol)
            .ok_or_else(|| {
                EngineError::Store(format!(
                    "closing fill for {} with no open position",
                    order.symbol
                ))
            })?;

        let was_long = position.is_long();
        let direction = if was_long { 1.0 } else { -1.0 };
        let closed_qty = (fill.quantity).min(position.quantity.unsigned_abs());
        let realized = direction
            * (fill.price - position.avg_open_price)
            * closed_qty as f64
            * 100.0
            - fill.commission
            - fill.fees;

        let updated = self.store.update_position(&position.id, |p| {
            p.quantity += if was_long {
                -(closed_qty as i32)
            } else {
                closed_qty as i32
            };
            p.realized_pnl += realized;
            p.current_price = fill.price;
            if p.quantity == 0 {
                p.is_closed = true;
                p.closed_at = Some(fill.executed_at);
                p.close_reason = close_reason.map(str::to_string);
                p.unrealized_pnl = 0.0;
                p.unrealized_pnl_percent = 0.0;
                p.market_value = 0.0;
            } else {
                p.partial_exits_taken += 1;
            }
        })?;

        if updated.is_closed {
            info!(
                position_id = %updated.id,
                symbol = %updated.symbol,
                realized_pnl = format!("{:.2}", updated.realized_pnl),
                reason = close_reason.unwrap_or("-"),
                "position closed"
            );
            // Fold the outcome into the Kelly table.
            self.store.record_regime_outcome(
                updated.entry_market_regime,
                crate::market_data::DealerPosition::Neutral,
                updated.realized_pnl,
            );
        } else {
            info!(
                position_id = %updated.id,
                remaining = updated.quantity,
                partial_pnl = format!("{realized:.2}"),
                "partial close applied"
            );
        }
        Ok(())
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Fold a fresh quote into a position: price, P&L, Greeks, and the
    /// monotone high-water mark.
    pub fn refresh_position(&self, position_id: &str, quote: &OptionQuote) -> Result<Position> {
        let mid = quote.mid();
        if mid <= 0.0 {
            return Err(EngineError::MarketDataUnavailable(format!(
                "no usable mid for position {position_id}"
            )));
        }
        self.store.update_position(position_id, |p| {
            let abs_qty = p.quantity.unsigned_abs() as f64;
            let direction = if p.is_long() { 1.0 } else { -1.0 };
            p.current_price = mid;
            p.market_value = mid * 100.0 * abs_qty;
            p.unrealized_pnl = direction * (mid - p.avg_open_price) * abs_qty * 100.0;
            p.unrealized_pnl_percent = if p.avg_open_price > 0.0 {
                direction * (mid - p.avg_open_price) / p.avg_open_price * 100.0
            } else {
                0.0
            };
            p.greeks = quote.greeks;
            if p.unrealized_pnl > p.high_water_mark {
                p.high_water_mark = p.unrealized_pnl;
            }
        })
    }

    // =========================================================================
    // Paper trigger
    // =========================================================================

    /// Attempt to fill resting paper limit orders at current quotes.
    /// Returns how many orders filled.
    pub async fn execute_pending_paper(
        &self,
        provider: &Arc<dyn MarketDataProvider>,
    ) -> usize {
        let Some(paper) = &self.paper else {
            return 0;
        };

        let mut executed = 0;
        for order in self
            .store
            .orders_with_status(ExecutionMode::Paper, &[OrderStatus::Submitted])
        {
            let Some(broker_id) = order.broker_order_id.clone() else {
                continue;
            };
            let Ok(quote) = provider.option_quote(&order.symbol).await else {
                warn!(order_id = %order.id, symbol = %order.symbol, "no quote for resting paper order");
                continue;
            };
            if let Some(fill) = paper.force_fill(&broker_id, quote.mid()) {
                match self.apply_fill(
                    &order.id,
                    &fill,
                    MarketRegime::Unknown,
                    Some(&quote),
                    Some("paper trigger"),
                ) {
                    Ok(()) => executed += 1,
                    Err(e) => warn!(order_id = %order.id, error = %e, "paper fill application failed"),
                }
            }
        }
        executed
    }
}

impl std::fmt::Debug for PositionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionManager")
            .field("adapter", &self.adapter.capabilities().name)
            .field("mode", &self.mode)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalizer::tests_support::minimal_signal;
    use crate::store::RiskLimitsRow;

    fn manager() -> (PositionManager, Arc<Store>) {
        let store = Arc::new(Store::new(RiskLimitsRow {
            max_open_positions: 5,
            max_trades_per_day: 25,
            max_daily_loss: 1500.0,
            risk_pct_per_trade: 0.02,
        }));
        let paper = Arc::new(PaperAdapter::new(Some(42)));
        let manager = PositionManager::new(
            store.clone(),
            paper.clone(),
            Some(paper),
            ExecutionMode::Paper,
        );
        (manager, store)
    }

    #[tokio::test]
    async fn open_market_order_creates_filled_position() {
        let (manager, store) = manager();
        let mut signal = minimal_signal("AAPL");
        signal.strike = Some(200.0);

        let order = manager
            .open_position(&signal, 2, 3.00, MarketRegime::TrendingUp, None)
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, 2);
        let price = order.avg_fill_price.unwrap();
        assert!(price >= 3.00 && price <= 3.003);

        let positions = store.open_positions();
        assert_eq!(positions.len(), 1);
        let p = &positions[0];
        assert_eq!(p.quantity, 2);
        assert_eq!(p.entry_market_regime, MarketRegime::TrendingUp);
        // Total cost is notional plus per-contract commission and fees.
        let expected = 2.0 * 100.0 * price + 1.30 + 0.04;
        assert!((p.total_cost - expected).abs() < 1e-6);

        let trades = store.trades_for_order(&order.id);
        assert_eq!(trades.len(), 1);
        assert!((trades[0].commission - 1.30).abs() < 1e-9);
        assert!((trades[0].fees - 0.04).abs() < 1e-9);

        // The adapter interaction was logged.
        assert!(!store.adapter_logs(10).is_empty());
    }

    #[tokio::test]
    async fn duplicate_submission_merges_into_position() {
        let (manager, store) = manager();
        let signal = minimal_signal("AAPL");

        manager
            .open_position(&signal, 1, 3.00, MarketRegime::TrendingUp, None)
            .await
            .unwrap();
        manager
            .open_position(&signal, 1, 3.00, MarketRegime::TrendingUp, None)
            .await
            .unwrap();

        let positions = store.open_positions();
        assert_eq!(positions.len(), 1, "same contract merges into one position");
        assert_eq!(positions[0].quantity, 2);
    }

    #[tokio::test]
    async fn refresh_updates_pnl_and_hwm_monotone() {
        let (manager, store) = manager();
        let signal = minimal_signal("AAPL");
        manager
            .open_position(&signal, 1, 2.00, MarketRegime::Unknown, None)
            .await
            .unwrap();
        let position = store.open_positions().pop().unwrap();
        let entry = position.avg_open_price;

        let quote_at = |mid: f64| OptionQuote {
            symbol: position.symbol.clone(),
            bid: mid - 0.02,
            ask: mid + 0.02,
            last: mid,
            volume: 0,
            open_interest: 0,
            greeks: Greeks {
                delta: 0.5,
                gamma: 0.02,
                theta: -0.03,
                vega: 0.1,
                iv: 0.3,
            },
            as_of: Utc::now(),
        };

        let up = manager
            .refresh_position(&position.id, &quote_at(entry + 0.50))
            .unwrap();
        assert!((up.unrealized_pnl - 50.0).abs() < 1e-6);
        assert!((up.high_water_mark - 50.0).abs() < 1e-6);

        // Price falls back: P&L drops, HWM holds.
        let down = manager
            .refresh_position(&position.id, &quote_at(entry + 0.10))
            .unwrap();
        assert!((down.unrealized_pnl - 10.0).abs() < 1e-6);
        assert!((down.high_water_mark - 50.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn close_partial_then_full() {
        let (manager, store) = manager();
        let signal = minimal_signal("AAPL");
        manager
            .open_position(&signal, 4, 2.00, MarketRegime::TrendingUp, None)
            .await
            .unwrap();
        let position = store.open_positions().pop().unwrap();

        // Partial close of 1 contract.
        manager
            .close_position(&position, 1, OrderType::Market, 2.60, "T1 partial")
            .await
            .unwrap();
        let after_partial = store.get_position(&position.id).unwrap();
        assert_eq!(after_partial.quantity, 3);
        assert_eq!(after_partial.partial_exits_taken, 1);
        assert!(after_partial.realized_pnl > 0.0);
        assert!(!after_partial.is_closed);

        // Full close of the remainder.
        manager
            .close_position(&after_partial, 3, OrderType::Market, 2.40, "trailing stop")
            .await
            .unwrap();
        let closed = store.get_position(&position.id).unwrap();
        assert!(closed.is_closed);
        assert_eq!(closed.quantity, 0);
        assert_eq!(closed.close_reason.as_deref(), Some("trailing stop"));
        assert!(closed.closed_at.is_some());
    }

    #[tokio::test]
    async fn resting_limit_fills_via_paper_trigger() {
        let (manager, store) = manager();
        let mut signal = minimal_signal("AAPL");
        signal.order_type = OrderType::Limit;
        signal.limit_price = Some(2.50);

        // Limit below the 3.00 market rests without a position.
        let order = manager
            .open_position(&signal, 1, 3.00, MarketRegime::Unknown, None)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Submitted);
        assert!(store.open_positions().is_empty());

        // Quote comes down through the limit; the trigger route fills it.
        let provider = Arc::new(crate::market_data::fixture::FixtureProvider::new());
        provider.set_option_quote(OptionQuote {
            symbol: order.symbol.clone(),
            bid: 2.38,
            ask: 2.42,
            last: 2.40,
            volume: 0,
            open_interest: 0,
            greeks: Greeks::default(),
            as_of: Utc::now(),
        });
        let provider: Arc<dyn MarketDataProvider> = provider;
        let executed = manager.execute_pending_paper(&provider).await;
        assert_eq!(executed, 1);
        assert_eq!(store.open_positions().len(), 1);
        assert_eq!(
            store.get_order(&order.id).unwrap().status,
            OrderStatus::Filled
        );
    }
}
