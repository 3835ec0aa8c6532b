// =============================================================================
// Alpaca adapter — JSON REST against the paper or live trading API
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, warn};

use crate::broker::{
    compact_occ, AdapterCapabilities, AdapterOrderResult, BrokerAdapter, OrderRequest,
    OrderStatusResponse, TradeFill,
};
use crate::error::{EngineError, Result};
use crate::types::{OrderSide, OrderStatus, OrderType, TimeInForce};

const LIVE_BASE_URL: &str = "https://api.alpaca.markets";
const PAPER_BASE_URL: &str = "https://paper-api.alpaca.markets";

pub struct AlpacaAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    secret_key: String,
}

impl AlpacaAdapter {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>, paper: bool) -> Self {
        let api_key = api_key.into();
        let secret_key = secret_key.into();

        let mut headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            headers.insert("APCA-API-KEY-ID", val);
        }
        if let Ok(val) = HeaderValue::from_str(&secret_key) {
            headers.insert("APCA-API-SECRET-KEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        let base_url = if paper { PAPER_BASE_URL } else { LIVE_BASE_URL };
        debug!(base_url, "AlpacaAdapter initialised");

        Self {
            client,
            base_url: base_url.to_string(),
            api_key,
            secret_key,
        }
    }

    fn side_param(side: OrderSide) -> &'static str {
        if side.is_buy() {
            "buy"
        } else {
            "sell"
        }
    }

    fn intent_param(side: OrderSide) -> &'static str {
        match side {
            OrderSide::BuyToOpen => "buy_to_open",
            OrderSide::SellToOpen => "sell_to_open",
            OrderSide::BuyToClose => "buy_to_close",
            OrderSide::SellToClose => "sell_to_close",
        }
    }

    fn type_param(order_type: OrderType) -> &'static str {
        match order_type {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::StopLimit => "stop_limit",
        }
    }

    fn tif_param(tif: TimeInForce) -> &'static str {
        match tif {
            TimeInForce::Day => "day",
            TimeInForce::Gtc => "gtc",
            TimeInForce::Ioc => "ioc",
            TimeInForce::Fok => "fok",
        }
    }

    fn map_status(raw: &str) -> OrderStatus {
        match raw {
            "pending_new" | "accepted_for_bidding" => OrderStatus::Submitted,
            "new" | "accepted" => OrderStatus::Accepted,
            "partially_filled" => OrderStatus::PartialFill,
            "filled" => OrderStatus::Filled,
            "canceled" | "pending_cancel" | "done_for_day" => OrderStatus::Cancelled,
            "rejected" | "stopped" | "suspended" => OrderStatus::Rejected,
            "expired" => OrderStatus::Expired,
            other => {
                warn!(status = other, "unrecognised Alpaca order status");
                OrderStatus::Submitted
            }
        }
    }

    fn parse_status_body(order_id: &str, body: &serde_json::Value) -> OrderStatusResponse {
        let status = Self::map_status(body["status"].as_str().unwrap_or(""));
        let filled_quantity = body["filled_qty"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| body["filled_qty"].as_f64())
            .unwrap_or(0.0) as u32;
        let avg_fill_price = body["filled_avg_price"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| body["filled_avg_price"].as_f64())
            .filter(|p| *p > 0.0);

        debug!(
            order_id,
            status = %status,
            filled_quantity,
            "Alpaca order status parsed"
        );

        OrderStatusResponse {
            status,
            filled_quantity,
            avg_fill_price,
            estimated_fill_time_ms: match status {
                OrderStatus::Submitted | OrderStatus::Accepted => Some(3_000),
                OrderStatus::PartialFill => Some(1_500),
                _ => None,
            },
        }
    }
}

#[async_trait]
impl BrokerAdapter for AlpacaAdapter {
    async fn submit_order(
        &self,
        request: &OrderRequest,
        _market_price: Option<f64>,
    ) -> Result<(AdapterOrderResult, Option<TradeFill>)> {
        let symbol = compact_occ(&request.symbol)?;

        let mut payload = serde_json::json!({
            "symbol": symbol,
            "qty": request.quantity.to_string(),
            "side": Self::side_param(request.side),
            "type": Self::type_param(request.order_type),
            "time_in_force": Self::tif_param(request.time_in_force),
            "position_intent": Self::intent_param(request.side),
            "client_order_id": request.order_id,
        });
        if let Some(price) = request.limit_price {
            payload["limit_price"] = serde_json::json!(format!("{price:.2}"));
        }
        if let Some(stop) = request.stop_price {
            payload["stop_price"] = serde_json::json!(format!("{stop:.2}"));
        }

        let url = format!("{}/v2/orders", self.base_url);
        let resp = self.client.post(&url).json(&payload).send().await?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;

        if !status.is_success() {
            let message = body["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string());
            return Ok((
                AdapterOrderResult {
                    success: false,
                    broker_order_id: None,
                    status: OrderStatus::Rejected,
                    filled_quantity: 0,
                    avg_fill_price: None,
                    error: Some(format!("Alpaca rejected order: {message}")),
                    estimated_fill_time_ms: None,
                },
                None,
            ));
        }

        let broker_order_id = body["id"].as_str().map(str::to_string).ok_or_else(|| {
            EngineError::BrokerSubmitFailed(format!("Alpaca response missing order id: {body}"))
        })?;

        let parsed = Self::parse_status_body(&request.order_id, &body);

        debug!(
            order_id = %request.order_id,
            broker_order_id = %broker_order_id,
            status = %parsed.status,
            "Alpaca order submitted"
        );

        Ok((
            AdapterOrderResult {
                success: true,
                broker_order_id: Some(broker_order_id),
                status: parsed.status,
                filled_quantity: parsed.filled_quantity,
                avg_fill_price: parsed.avg_fill_price,
                error: None,
                estimated_fill_time_ms: parsed
                    .estimated_fill_time_ms
                    .or(Some(if request.order_type == OrderType::Market {
                        1_500
                    } else {
                        10_000
                    })),
            },
            None,
        ))
    }

    async fn cancel_order(&self, _order_id: &str, broker_order_id: Option<&str>) -> Result<bool> {
        let Some(bid) = broker_order_id else {
            return Ok(false);
        };
        let url = format!("{}/v2/orders/{bid}", self.base_url);
        let resp = self.client.delete(&url).send().await?;
        Ok(resp.status().is_success())
    }

    async fn get_order_status(
        &self,
        order_id: &str,
        broker_order_id: &str,
    ) -> Result<OrderStatusResponse> {
        let url = format!("{}/v2/orders/{broker_order_id}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::BrokerStatusUnknown {
                order_id: order_id.to_string(),
                attempts: 1,
                reason: e.to_string(),
            })?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;
        if !status.is_success() {
            return Err(EngineError::BrokerStatusUnknown {
                order_id: order_id.to_string(),
                attempts: 1,
                reason: format!("Alpaca returned {status}: {body}"),
            });
        }
        Ok(Self::parse_status_body(order_id, &body))
    }

    async fn get_order_fills(
        &self,
        order_id: &str,
        broker_order_id: &str,
    ) -> Result<Vec<TradeFill>> {
        let url = format!(
            "{}/v2/account/activities/FILL?page_size=100",
            self.base_url
        );
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            // Fall back to the aggregate numbers on the order itself.
            let status = self.get_order_status(order_id, broker_order_id).await?;
            if status.filled_quantity == 0 {
                return Ok(Vec::new());
            }
            return Ok(vec![TradeFill {
                broker_trade_id: Some(format!("{broker_order_id}-agg")),
                price: status.avg_fill_price.unwrap_or(0.0),
                quantity: status.filled_quantity,
                commission: 0.0,
                fees: 0.0,
                executed_at: Utc::now(),
            }]);
        }

        let body: serde_json::Value = resp.json().await?;
        let mut fills = Vec::new();
        if let Some(items) = body.as_array() {
            for item in items {
                if item["order_id"].as_str() != Some(broker_order_id) {
                    continue;
                }
                let price = item["price"]
                    .as_str()
                    .and_then(|s| s.parse::<f64>().ok())
                    .or_else(|| item["price"].as_f64())
                    .unwrap_or(0.0);
                let qty = item["qty"]
                    .as_str()
                    .and_then(|s| s.parse::<f64>().ok())
                    .or_else(|| item["qty"].as_f64())
                    .unwrap_or(0.0) as u32;
                let executed_at = item["transaction_time"]
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                fills.push(TradeFill {
                    broker_trade_id: item["id"].as_str().map(str::to_string),
                    price,
                    quantity: qty,
                    commission: 0.0,
                    fees: 0.0,
                    executed_at,
                });
            }
        }
        Ok(fills)
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            name: "alpaca",
            requires_polling: true,
            simulated: false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(AlpacaAdapter::map_status("pending_new"), OrderStatus::Submitted);
        assert_eq!(AlpacaAdapter::map_status("new"), OrderStatus::Accepted);
        assert_eq!(
            AlpacaAdapter::map_status("partially_filled"),
            OrderStatus::PartialFill
        );
        assert_eq!(AlpacaAdapter::map_status("filled"), OrderStatus::Filled);
        assert_eq!(AlpacaAdapter::map_status("canceled"), OrderStatus::Cancelled);
        assert_eq!(AlpacaAdapter::map_status("rejected"), OrderStatus::Rejected);
        assert_eq!(AlpacaAdapter::map_status("expired"), OrderStatus::Expired);
    }

    #[test]
    fn parse_status_body_handles_string_numbers() {
        let body = serde_json::json!({
            "status": "partially_filled",
            "filled_qty": "3",
            "filled_avg_price": "2.45",
        });
        let parsed = AlpacaAdapter::parse_status_body("o1", &body);
        assert_eq!(parsed.status, OrderStatus::PartialFill);
        assert_eq!(parsed.filled_quantity, 3);
        assert!((parsed.avg_fill_price.unwrap() - 2.45).abs() < 1e-9);
    }

    #[test]
    fn configuration_check() {
        assert!(AlpacaAdapter::new("k", "s", true).is_configured());
        assert!(!AlpacaAdapter::new("", "s", true).is_configured());
        assert!(!AlpacaAdapter::new("k", "", true).is_configured());
    }

    #[test]
    fn paper_flag_selects_base_url() {
        assert_eq!(AlpacaAdapter::new("k", "s", true).base_url, PAPER_BASE_URL);
        assert_eq!(AlpacaAdapter::new("k", "s", false).base_url, LIVE_BASE_URL);
    }

    #[test]
    fn side_and_intent_params() {
        assert_eq!(AlpacaAdapter::side_param(OrderSide::BuyToOpen), "buy");
        assert_eq!(AlpacaAdapter::side_param(OrderSide::SellToClose), "sell");
        assert_eq!(
            AlpacaAdapter::intent_param(OrderSide::SellToClose),
            "sell_to_close"
        );
    }
}
