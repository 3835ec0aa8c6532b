// =============================================================================
// Broker adapter abstraction
// =============================================================================
//
// One trait, three backends: the deterministic paper simulator, Tradier
// (form-encoded REST, polled), and Alpaca (JSON REST). The factory applies
// the dual-flag safety gate and never fails open to a misconfigured live
// broker.
// =============================================================================

pub mod alpaca;
pub mod factory;
pub mod paper;
pub mod tradier;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{OrderSide, OrderStatus, OrderType, TimeInForce};

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// What the engine hands an adapter. `order_id` is our id and doubles as the
/// correlation id in `adapter_logs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: String,
    /// OCC option symbol.
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    #[serde(default)]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub stop_price: Option<f64>,
}

/// Outcome of a submission attempt. `success=false` carries the broker's
/// rejection in `error` — submission failures are data, not panics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterOrderResult {
    pub success: bool,
    #[serde(default)]
    pub broker_order_id: Option<String>,
    pub status: OrderStatus,
    #[serde(default)]
    pub filled_quantity: u32,
    #[serde(default)]
    pub avg_fill_price: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    /// Hint the fill poller uses to adapt its cadence.
    #[serde(default)]
    pub estimated_fill_time_ms: Option<u64>,
}

/// A single execution against a broker order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFill {
    #[serde(default)]
    pub broker_trade_id: Option<String>,
    pub price: f64,
    pub quantity: u32,
    pub commission: f64,
    pub fees: f64,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusResponse {
    pub status: OrderStatus,
    pub filled_quantity: u32,
    #[serde(default)]
    pub avg_fill_price: Option<f64>,
    #[serde(default)]
    pub estimated_fill_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AdapterCapabilities {
    pub name: &'static str,
    /// True when fills only arrive by polling `get_order_status`.
    pub requires_polling: bool,
    /// True when no real money can move through this adapter.
    pub simulated: bool,
}

// ---------------------------------------------------------------------------
// The adapter trait
// ---------------------------------------------------------------------------

/// Brokers take the OCC symbol without its padding spaces
/// (`AAPL260320C00200000`); decode-and-reencode validates on the way out.
pub(crate) fn compact_occ(symbol: &str) -> Result<String> {
    let contract = crate::occ::decode(symbol)?;
    let strike_milli = (contract.strike * 1000.0).round() as u64;
    Ok(format!(
        "{}{}{}{:08}",
        contract.underlying,
        contract.expiration.format("%y%m%d"),
        match contract.option_type {
            crate::types::OptionType::Call => 'C',
            crate::types::OptionType::Put => 'P',
        },
        strike_milli
    ))
}

#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Submit an order. `market_price` is the engine's best current option
    /// price, used by the paper simulator for fills and slippage.
    async fn submit_order(
        &self,
        request: &OrderRequest,
        market_price: Option<f64>,
    ) -> Result<(AdapterOrderResult, Option<TradeFill>)>;

    async fn cancel_order(&self, order_id: &str, broker_order_id: Option<&str>) -> Result<bool>;

    async fn get_order_status(
        &self,
        order_id: &str,
        broker_order_id: &str,
    ) -> Result<OrderStatusResponse>;

    async fn get_order_fills(
        &self,
        order_id: &str,
        broker_order_id: &str,
    ) -> Result<Vec<TradeFill>>;

    fn is_configured(&self) -> bool;

    fn capabilities(&self) -> AdapterCapabilities;
}
