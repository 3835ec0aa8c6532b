// =============================================================================
// Tradier adapter — form-encoded REST, fills arrive by polling
// =============================================================================
//
// Sandbox and live share the same wire shape; only the base URL changes.
// Tradier never streams fills to us, so `requires_polling` is true and the
// fill poller drives `get_order_status` until the order is terminal.
// =============================================================================

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, warn};

use crate::broker::{
    compact_occ, AdapterCapabilities, AdapterOrderResult, BrokerAdapter, OrderRequest,
    OrderStatusResponse, TradeFill,
};
use crate::error::{EngineError, Result};
use crate::occ;
use crate::types::{OrderSide, OrderStatus, OrderType, TimeInForce};

const LIVE_BASE_URL: &str = "https://api.tradier.com";
const SANDBOX_BASE_URL: &str = "https://sandbox.tradier.com";

pub struct TradierAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    account_id: String,
}

impl TradierAdapter {
    pub fn new(
        api_key: impl Into<String>,
        account_id: impl Into<String>,
        sandbox: bool,
    ) -> Self {
        let api_key = api_key.into();

        let mut headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
            headers.insert(reqwest::header::AUTHORIZATION, val);
        }
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        let base_url = if sandbox {
            SANDBOX_BASE_URL
        } else {
            LIVE_BASE_URL
        };
        debug!(base_url, "TradierAdapter initialised");

        Self {
            client,
            base_url: base_url.to_string(),
            api_key,
            account_id: account_id.into(),
        }
    }

    fn side_param(side: OrderSide) -> &'static str {
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

    fn duration_param(tif: TimeInForce) -> &'static str {
        match tif {
            TimeInForce::Day => "day",
            TimeInForce::Gtc => "gtc",
            // Tradier has no IOC/FOK for options; day is the closest legal
            // duration.
            TimeInForce::Ioc | TimeInForce::Fok => "day",
        }
    }

    fn map_status(raw: &str) -> OrderStatus {
        match raw {
            "pending" => OrderStatus::Submitted,
            "open" | "accepted" => OrderStatus::Accepted,
            "partially_filled" => OrderStatus::PartialFill,
            "filled" => OrderStatus::Filled,
            "canceled" => OrderStatus::Cancelled,
            "rejected" | "error" => OrderStatus::Rejected,
            "expired" => OrderStatus::Expired,
            other => {
                warn!(status = other, "unrecognised Tradier order status");
                OrderStatus::Submitted
            }
        }
    }

    async fn fetch_order(&self, broker_order_id: &str) -> Result<serde_json::Value> {
        let url = format!(
            "{}/v1/accounts/{}/orders/{broker_order_id}",
            self.base_url, self.account_id
        );
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;
        if !status.is_success() {
            return Err(EngineError::BrokerStatusUnknown {
                order_id: broker_order_id.to_string(),
                attempts: 1,
                reason: format!("Tradier returned {status}: {body}"),
            });
        }
        Ok(body["order"].clone())
    }
}

#[async_trait]
impl BrokerAdapter for TradierAdapter {
    async fn submit_order(
        &self,
        request: &OrderRequest,
        _market_price: Option<f64>,
    ) -> Result<(AdapterOrderResult, Option<TradeFill>)> {
        let contract = occ::decode(&request.symbol)?;
        let option_symbol = compact_occ(&request.symbol)?;

        let mut form: Vec<(&str, String)> = vec![
            ("class", "option".into()),
            ("symbol", contract.underlying.clone()),
            ("option_symbol", option_symbol),
            ("side", Self::side_param(request.side).into()),
            ("quantity", request.quantity.to_string()),
            ("type", Self::type_param(request.order_type).into()),
            ("duration", Self::duration_param(request.time_in_force).into()),
            ("tag", request.order_id.clone()),
        ];
        if let Some(price) = request.limit_price {
            form.push(("price", format!("{price:.2}")));
        }
        if let Some(stop) = request.stop_price {
            form.push(("stop", format!("{stop:.2}")));
        }

        let url = format!("{}/v1/accounts/{}/orders", self.base_url, self.account_id);
        let resp = self.client.post(&url).form(&form).send().await?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;

        if !status.is_success() {
            let message = body["errors"]["error"]
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
                    error: Some(format!("Tradier rejected order: {message}")),
                    estimated_fill_time_ms: None,
                },
                None,
            ));
        }

        let broker_order_id = body["order"]["id"]
            .as_u64()
            .map(|id| id.to_string())
            .or_else(|| body["order"]["id"].as_str().map(str::to_string))
            .ok_or_else(|| {
                EngineError::BrokerSubmitFailed(format!(
                    "Tradier response missing order id: {body}"
                ))
            })?;

        debug!(
            order_id = %request.order_id,
            broker_order_id = %broker_order_id,
            "Tradier order submitted"
        );

        let estimate = if request.order_type == OrderType::Market {
            2_000
        } else {
            15_000
        };

        Ok((
            AdapterOrderResult {
                success: true,
                broker_order_id: Some(broker_order_id),
                status: OrderStatus::Submitted,
                filled_quantity: 0,
                avg_fill_price: None,
                error: None,
                estimated_fill_time_ms: Some(estimate),
            },
            None,
        ))
    }

    async fn cancel_order(&self, _order_id: &str, broker_order_id: Option<&str>) -> Result<bool> {
        let Some(bid) = broker_order_id else {
            return Ok(false);
        };
        let url = format!(
            "{}/v1/accounts/{}/orders/{bid}",
            self.base_url, self.account_id
        );
        let resp = self.client.delete(&url).send().await?;
        Ok(resp.status().is_success())
    }

    async fn get_order_status(
        &self,
        order_id: &str,
        broker_order_id: &str,
    ) -> Result<OrderStatusResponse> {
        let order = self.fetch_order(broker_order_id).await.map_err(|e| match e {
            EngineError::Http(inner) => EngineError::BrokerStatusUnknown {
                order_id: order_id.to_string(),
                attempts: 1,
                reason: inner.to_string(),
            },
            other => other,
        })?;

        let status = Self::map_status(order["status"].as_str().unwrap_or(""));
        let filled_quantity = order["exec_quantity"]
            .as_f64()
            .or_else(|| order["exec_quantity"].as_str().and_then(|s| s.parse().ok()))
            .unwrap_or(0.0) as u32;
        let avg_fill_price = order["avg_fill_price"]
            .as_f64()
            .or_else(|| order["avg_fill_price"].as_str().and_then(|s| s.parse().ok()))
            .filter(|p| *p > 0.0);

        Ok(OrderStatusResponse {
            status,
            filled_quantity,
            avg_fill_price,
            estimated_fill_time_ms: match status {
                OrderStatus::Submitted | OrderStatus::Accepted => Some(5_000),
                OrderStatus::PartialFill => Some(2_000),
                _ => None,
            },
        })
    }

    async fn get_order_fills(
        &self,
        order_id: &str,
        broker_order_id: &str,
    ) -> Result<Vec<TradeFill>> {
        let status = self.get_order_status(order_id, broker_order_id).await?;
        if status.filled_quantity == 0 {
            return Ok(Vec::new());
        }
        // Tradier reports aggregate execution data on the order itself; one
        // synthetic fill carries the totals.
        Ok(vec![TradeFill {
            broker_trade_id: Some(format!("{broker_order_id}-agg")),
            price: status.avg_fill_price.unwrap_or(0.0),
            quantity: status.filled_quantity,
            commission: 0.0,
            fees: 0.0,
            executed_at: Utc::now(),
        }])
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.account_id.is_empty()
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            name: "tradier",
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
        assert_eq!(TradierAdapter::map_status("pending"), OrderStatus::Submitted);
        assert_eq!(TradierAdapter::map_status("open"), OrderStatus::Accepted);
        assert_eq!(
            TradierAdapter::map_status("partially_filled"),
            OrderStatus::PartialFill
        );
        assert_eq!(TradierAdapter::map_status("filled"), OrderStatus::Filled);
        assert_eq!(TradierAdapter::map_status("canceled"), OrderStatus::Cancelled);
        assert_eq!(TradierAdapter::map_status("rejected"), OrderStatus::Rejected);
        assert_eq!(TradierAdapter::map_status("expired"), OrderStatus::Expired);
        // Unknown statuses stay non-terminal so polling continues.
        assert_eq!(TradierAdapter::map_status("weird"), OrderStatus::Submitted);
    }

    #[test]
    fn configuration_check() {
        let configured = TradierAdapter::new("key", "acct", true);
        assert!(configured.is_configured());
        let missing = TradierAdapter::new("", "acct", true);
        assert!(!missing.is_configured());
    }

    #[test]
    fn sandbox_flag_selects_base_url() {
        let sandbox = TradierAdapter::new("k", "a", true);
        assert_eq!(sandbox.base_url, SANDBOX_BASE_URL);
        let live = TradierAdapter::new("k", "a", false);
        assert_eq!(live.base_url, LIVE_BASE_URL);
    }

    #[test]
    fn tif_mapping_degrades_ioc_to_day() {
        assert_eq!(TradierAdapter::duration_param(TimeInForce::Ioc), "day");
        assert_eq!(TradierAdapter::duration_param(TimeInForce::Gtc), "gtc");
    }
}
