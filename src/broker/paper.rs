// =============================================================================
// Paper adapter — deterministic in-process fill simulator
// =============================================================================
//
// Fill model:
//   - market orders fill immediately at the market price plus side-adverse
//     slippage (buys fill at or above market, sells at or below, within
//     `slippage_pct` percent);
//   - marketable limit orders fill at the better of the slipped price and
//     the limit;
//   - non-marketable limits (buy below market / sell above market) rest as
//     SUBMITTED with no fill until a later `force_fill` or cancel;
//   - commission $0.65/contract, fees $0.02/contract.
//
// Seeding the RNG makes every fill reproducible.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::broker::{
    AdapterCapabilities, AdapterOrderResult, BrokerAdapter, OrderRequest, OrderStatusResponse,
    TradeFill,
};
use crate::error::{EngineError, Result};
use crate::types::{OrderStatus, OrderType};

/// Maximum adverse slippage, percent of the market price.
const DEFAULT_SLIPPAGE_PCT: f64 = 0.1;
pub const COMMISSION_PER_CONTRACT: f64 = 0.65;
pub const FEE_PER_CONTRACT: f64 = 0.02;

#[derive(Debug, Clone)]
struct RestingOrder {
    request: OrderRequest,
    status: OrderStatus,
    fills: Vec<TradeFill>,
    avg_fill_price: Option<f64>,
}

pub struct PaperAdapter {
    slippage_pct: f64,
    rng: Mutex<ChaCha8Rng>,
    /// Keyed by broker order id.
    orders: RwLock<HashMap<String, RestingOrder>>,
}

impl PaperAdapter {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            slippage_pct: DEFAULT_SLIPPAGE_PCT,
            rng: Mutex::new(rng),
            orders: RwLock::new(HashMap::new()),
        }
    }

    /// Slipped execution price: always adverse to the taker.
    fn slipped_price(&self, market_price: f64, is_buy: bool) -> f64 {
        let u: f64 = self.rng.lock().gen();
        let slip = market_price * (self.slippage_pct / 100.0) * u;
        if is_buy {
            market_price + slip
        } else {
            (market_price - slip).max(0.01)
        }
    }

    fn make_fill(&self, price: f64, quantity: u32) -> TradeFill {
        TradeFill {
            broker_trade_id: Some(format!("PAPER-T-{}", Uuid::new_v4())),
            price,
            quantity,
            commission: COMMISSION_PER_CONTRACT * quantity as f64,
            fees: FEE_PER_CONTRACT * quantity as f64,
            executed_at: Utc::now(),
        }
    }

    /// Attempt to fill a resting limit order at `market_price`. Used by the
    /// paper-trading trigger route. Returns the fill when the order crossed.
    pub fn force_fill(&self, broker_order_id: &str, market_price: f64) -> Option<TradeFill> {
        let mut orders = self.orders.write();
        let resting = orders.get_mut(broker_order_id)?;
        if resting.status != OrderStatus::Submitted {
            return None;
        }
        let limit = resting.request.limit_price?;
        let is_buy = resting.request.side.is_buy();
        let marketable = if is_buy {
            limit >= market_price
        } else {
            limit <= market_price
        };
        if !marketable {
            return None;
        }

        let fill = self.make_fill(limit.min(market_price).max(0.01), resting.request.quantity);
        resting.status = OrderStatus::Filled;
        resting.avg_fill_price = Some(fill.price);
        resting.fills.push(fill.clone());
        info!(
            broker_order_id,
            price = fill.price,
            qty = fill.quantity,
            "paper resting order filled"
        );
        Some(fill)
    }

    /// Broker order ids of resting (unfilled) paper orders.
    pub fn resting_order_ids(&self) -> Vec<String> {
        self.orders
            .read()
            .iter()
            .filter(|(_, o)| o.status == OrderStatus::Submitted)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl BrokerAdapter for PaperAdapter {
    async fn submit_order(
        &self,
        request: &OrderRequest,
        market_price: Option<f64>,
    ) -> Result<(AdapterOrderResult, Option<TradeFill>)> {
        let broker_order_id = format!("PAPER-{}", Uuid::new_v4());
        let is_buy = request.side.is_buy();

        // Resolve the reference price: explicit market price first, limit as
        // a fallback so limit-only flows still work offline.
        let reference = market_price.or(request.limit_price).ok_or_else(|| {
            EngineError::BrokerSubmitFailed(format!(
                "paper order {} has no market or limit price",
                request.order_id
            ))
        })?;

        if reference <= 0.0 {
            return Err(EngineError::BrokerSubmitFailed(format!(
                "paper order {} reference price {reference} must be positive",
                request.order_id
            )));
        }

        match request.order_type {
            OrderType::Market => {
                let price = self.slipped_price(reference, is_buy);
                let fill = self.make_fill(price, request.quantity);

                self.orders.write().insert(
                    broker_order_id.clone(),
                    RestingOrder {
                        request: request.clone(),
                        status: OrderStatus::Filled,
                        fills: vec![fill.clone()],
                        avg_fill_price: Some(price),
                    },
                );

                info!(
                    order_id = %request.order_id,
                    broker_order_id = %broker_order_id,
                    side = %request.side,
                    qty = request.quantity,
                    price = format!("{price:.4}"),
                    "paper market order filled"
                );

                Ok((
                    AdapterOrderResult {
                        success: true,
                        broker_order_id: Some(broker_order_id),
                        status: OrderStatus::Filled,
                        filled_quantity: request.quantity,
                        avg_fill_price: Some(price),
                        error: None,
                        estimated_fill_time_ms: Some(0),
                    },
                    Some(fill),
                ))
            }
            OrderType::Limit => {
                let limit = request.limit_price.ok_or_else(|| {
                    EngineError::BrokerSubmitFailed(format!(
                        "limit order {} missing limit_price",
                        request.order_id
                    ))
                })?;

                let marketable = if is_buy {
                    limit >= reference
                } else {
                    limit <= reference
                };

                if marketable {
                    // Fill at the better of the slipped price and the limit.
                    let slipped = self.slipped_price(reference, is_buy);
                    let price = if is_buy {
                        slipped.min(limit)
                    } else {
                        slipped.max(limit)
                    };
                    let fill = self.make_fill(price, request.quantity);

                    self.orders.write().insert(
                        broker_order_id.clone(),
                        RestingOrder {
                            request: request.clone(),
                            status: OrderStatus::Filled,
                            fills: vec![fill.clone()],
                            avg_fill_price: Some(price),
                        },
                    );

                    Ok((
                        AdapterOrderResult {
                            success: true,
                            broker_order_id: Some(broker_order_id),
                            status: OrderStatus::Filled,
                            filled_quantity: request.quantity,
                            avg_fill_price: Some(price),
                            error: None,
                            estimated_fill_time_ms: Some(0),
                        },
                        Some(fill),
                    ))
                } else {
                    // Non-marketable: rest the order, no Trade yet.
                    self.orders.write().insert(
                        broker_order_id.clone(),
                        RestingOrder {
                            request: request.clone(),
                            status: OrderStatus::Submitted,
                            fills: Vec::new(),
                            avg_fill_price: None,
                        },
                    );

                    debug!(
                        order_id = %request.order_id,
                        broker_order_id = %broker_order_id,
                        limit,
                        market = reference,
                        "paper limit order resting (non-marketable)"
                    );

                    Ok((
                        AdapterOrderResult {
                            success: true,
                            broker_order_id: Some(broker_order_id),
                            status: OrderStatus::Submitted,
                            filled_quantity: 0,
                            avg_fill_price: None,
                            error: None,
                            estimated_fill_time_ms: None,
                        },
                        None,
                    ))
                }
            }
            OrderType::Stop | OrderType::StopLimit => Err(EngineError::BrokerSubmitFailed(
                "paper simulator does not model stop orders".into(),
            )),
        }
    }

    async fn cancel_order(&self, _order_id: &str, broker_order_id: Option<&str>) -> Result<bool> {
        let Some(bid) = broker_order_id else {
            return Ok(false);
        };
        let mut orders = self.orders.write();
        match orders.get_mut(bid) {
            Some(resting) if resting.status == OrderStatus::Submitted => {
                resting.status = OrderStatus::Cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_order_status(
        &self,
        order_id: &str,
        broker_order_id: &str,
    ) -> Result<OrderStatusResponse> {
        let orders = self.orders.read();
        let resting = orders.get(broker_order_id).ok_or_else(|| {
            EngineError::BrokerStatusUnknown {
                order_id: order_id.to_string(),
                attempts: 1,
                reason: format!("unknown paper order {broker_order_id}"),
            }
        })?;
        Ok(OrderStatusResponse {
            status: resting.status,
            filled_quantity: resting.fills.iter().map(|f| f.quantity).sum(),
            avg_fill_price: resting.avg_fill_price,
            estimated_fill_time_ms: Some(0),
        })
    }

    async fn get_order_fills(
        &self,
        _order_id: &str,
        broker_order_id: &str,
    ) -> Result<Vec<TradeFill>> {
        Ok(self
            .orders
            .read()
            .get(broker_order_id)
            .map(|o| o.fills.clone())
            .unwrap_or_default())
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            name: "paper",
            requires_polling: false,
            simulated: true,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderSide, TimeInForce};

    fn request(
        side: OrderSide,
        qty: u32,
        order_type: OrderType,
        limit_price: Option<f64>,
    ) -> OrderRequest {
        OrderRequest {
            order_id: "ord-1".into(),
            symbol: "AAPL  260320C00200000".into(),
            side,
            quantity: qty,
            order_type,
            time_in_force: TimeInForce::Day,
            limit_price,
            stop_price: None,
        }
    }

    #[tokio::test]
    async fn market_buy_fills_with_adverse_slippage() {
        let adapter = PaperAdapter::new(Some(42));
        let req = request(OrderSide::BuyToOpen, 2, OrderType::Market, None);

        let (result, fill) = adapter.submit_order(&req, Some(3.00)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status, OrderStatus::Filled);
        assert_eq!(result.filled_quantity, 2);

        let price = result.avg_fill_price.unwrap();
        // Buys always fill at or above market, within 0.1% slippage.
        assert!(price >= 3.00, "buy filled below market: {price}");
        assert!(price <= 3.003, "slippage exceeded 0.1%: {price}");

        let fill = fill.expect("market order must fill");
        assert!((fill.commission - 1.30).abs() < 1e-9);
        assert!((fill.fees - 0.04).abs() < 1e-9);
    }

    #[tokio::test]
    async fn seeded_fills_are_deterministic() {
        let req = request(OrderSide::BuyToOpen, 2, OrderType::Market, None);

        let a = PaperAdapter::new(Some(42));
        let b = PaperAdapter::new(Some(42));
        let (ra, _) = a.submit_order(&req, Some(3.00)).await.unwrap();
        let (rb, _) = b.submit_order(&req, Some(3.00)).await.unwrap();
        assert_eq!(ra.avg_fill_price, rb.avg_fill_price);
    }

    #[tokio::test]
    async fn market_sell_fills_at_or_below_market() {
        let adapter = PaperAdapter::new(Some(7));
        let req = request(OrderSide::SellToClose, 1, OrderType::Market, None);
        let (result, _) = adapter.submit_order(&req, Some(2.50)).await.unwrap();
        let price = result.avg_fill_price.unwrap();
        assert!(price <= 2.50);
        assert!(price >= 2.50 * (1.0 - 0.001));
    }

    #[tokio::test]
    async fn non_marketable_buy_limit_rests_without_trade() {
        let adapter = PaperAdapter::new(Some(42));
        let req = request(OrderSide::BuyToOpen, 1, OrderType::Limit, Some(2.50));

        let (result, fill) = adapter.submit_order(&req, Some(3.00)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status, OrderStatus::Submitted);
        assert!(fill.is_none());
        assert_eq!(result.filled_quantity, 0);

        let bid = result.broker_order_id.unwrap();
        let status = adapter.get_order_status("ord-1", &bid).await.unwrap();
        assert_eq!(status.status, OrderStatus::Submitted);

        // Market comes down through the limit; force_fill crosses it.
        assert!(adapter.force_fill(&bid, 3.00).is_none());
        let fill = adapter.force_fill(&bid, 2.40).expect("order should cross");
        assert!(fill.price <= 2.50);
        let status = adapter.get_order_status("ord-1", &bid).await.unwrap();
        assert_eq!(status.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn marketable_limit_never_fills_through_the_limit() {
        let adapter = PaperAdapter::new(Some(42));
        let req = request(OrderSide::BuyToOpen, 1, OrderType::Limit, Some(3.10));
        let (result, _) = adapter.submit_order(&req, Some(3.00)).await.unwrap();
        assert_eq!(result.status, OrderStatus::Filled);
        assert!(result.avg_fill_price.unwrap() <= 3.10);
    }

    #[tokio::test]
    async fn cancel_only_affects_resting_orders() {
        let adapter = PaperAdapter::new(Some(42));

        let resting = request(OrderSide::BuyToOpen, 1, OrderType::Limit, Some(2.00));
        let (r1, _) = adapter.submit_order(&resting, Some(3.00)).await.unwrap();
        let bid1 = r1.broker_order_id.unwrap();
        assert!(adapter.cancel_order("ord-1", Some(&bid1)).await.unwrap());

        let filled = request(OrderSide::BuyToOpen, 1, OrderType::Market, None);
        let (r2, _) = adapter.submit_order(&filled, Some(3.00)).await.unwrap();
        let bid2 = r2.broker_order_id.unwrap();
        assert!(!adapter.cancel_order("ord-1", Some(&bid2)).await.unwrap());
    }

    #[tokio::test]
    async fn missing_price_is_a_submit_failure() {
        let adapter = PaperAdapter::new(Some(42));
        let req = request(OrderSide::BuyToOpen, 1, OrderType::Market, None);
        let err = adapter.submit_order(&req, None).await.unwrap_err();
        assert_eq!(err.kind(), "BROKER_SUBMIT_FAILED");
    }
}
