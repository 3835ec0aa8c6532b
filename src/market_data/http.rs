// =============================================================================
// Polygon REST provider — quotes, Greeks, VIX over HTTP
// =============================================================================
//
// Selected with MARKET_DATA_PROVIDER=polygon + POLYGON_API_KEY. Positioning
// analytics (GEX bundle, assembled context, MTF alignment) are not served by
// the quote vendor; those calls return MARKET_DATA_UNAVAILABLE and the
// decision layer degrades per its fail-safe policy.
// =============================================================================

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::market_data::{
    GexBundle, MarketContext, MarketDataProvider, MtfTrend, OptionQuote, StockQuote, VixSnapshot,
};
use crate::occ;
use crate::types::Greeks;

const DEFAULT_BASE_URL: &str = "https://api.polygon.io";

pub struct PolygonProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PolygonProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("PolygonProvider initialised (base_url={DEFAULT_BASE_URL})");

        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let sep = if path.contains('?') { '&' } else { '?' };
        let url = format!("{}{}{}apiKey={}", self.base_url, path, sep, self.api_key);

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;

        if !status.is_success() {
            return Err(EngineError::MarketDataUnavailable(format!(
                "polygon {path} returned {status}: {body}"
            )));
        }
        Ok(body)
    }

    /// Polygon option tickers are the OCC symbol with padding removed and an
    /// `O:` prefix.
    fn polygon_option_ticker(occ_symbol: &str) -> Result<String> {
        let contract = occ::decode(occ_symbol)?;
        let strike_milli = (contract.strike * 1000.0).round() as u64;
        Ok(format!(
            "O:{}{}{}{:08}",
            contract.underlying,
            contract.expiration.format("%y%m%d"),
            match contract.option_type {
                crate::types::OptionType::Call => 'C',
                crate::types::OptionType::Put => 'P',
            },
            strike_milli
        ))
    }
}

fn num(v: &serde_json::Value, path: &[&str]) -> Option<f64> {
    let mut cur = v;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_f64()
}

#[async_trait]
impl MarketDataProvider for PolygonProvider {
    async fn stock_quote(&self, symbol: &str) -> Result<StockQuote> {
        let body = self
            .get_json(&format!(
                "/v2/snapshot/locale/us/markets/stocks/tickers/{symbol}"
            ))
            .await?;

        let last = num(&body, &["ticker", "lastTrade", "p"]).ok_or_else(|| {
            EngineError::MarketDataUnavailable(format!("no last trade for {symbol}"))
        })?;
        let bid = num(&body, &["ticker", "lastQuote", "p"]).unwrap_or(last);
        let ask = num(&body, &["ticker", "lastQuote", "P"]).unwrap_or(last);

        Ok(StockQuote {
            symbol: symbol.to_string(),
            last,
            bid,
            ask,
            as_of: Utc::now(),
        })
    }

    async fn option_quote(&self, occ_symbol: &str) -> Result<OptionQuote> {
        let contract = occ::decode(occ_symbol)?;
        let ticker = Self::polygon_option_ticker(occ_symbol)?;
        let body = self
            .get_json(&format!(
                "/v3/snapshot/options/{}/{}",
                contract.underlying, ticker
            ))
            .await?;

        let results = body.get("results").cloned().unwrap_or_default();
        let bid = num(&results, &["last_quote", "bid"]).unwrap_or(0.0);
        let ask = num(&results, &["last_quote", "ask"]).unwrap_or(0.0);
        let last = num(&results, &["last_trade", "price"]).unwrap_or(0.0);

        if bid <= 0.0 && ask <= 0.0 && last <= 0.0 {
            return Err(EngineError::MarketDataUnavailable(format!(
                "no quote for {occ_symbol}"
            )));
        }

        let greeks = Greeks {
            delta: num(&results, &["greeks", "delta"]).unwrap_or(0.0),
            gamma: num(&results, &["greeks", "gamma"]).unwrap_or(0.0),
            theta: num(&results, &["greeks", "theta"]).unwrap_or(0.0),
            vega: num(&results, &["greeks", "vega"]).unwrap_or(0.0),
            iv: num(&results, &["implied_volatility"]).unwrap_or(0.0),
        };

        Ok(OptionQuote {
            symbol: occ_symbol.to_string(),
            bid,
            ask,
            last,
            volume: results
                .get("day")
                .and_then(|d| d.get("volume"))
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            open_interest: results
                .get("open_interest")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            greeks,
            as_of: Utc::now(),
        })
    }

    async fn vix(&self) -> Result<VixSnapshot> {
        let body = self
            .get_json("/v3/snapshot/indices?ticker=I:VIX")
            .await?;

        let value = body
            .get("results")
            .and_then(|r| r.as_array())
            .and_then(|arr| arr.first())
            .and_then(|first| num(first, &["value"]))
            .ok_or_else(|| EngineError::MarketDataUnavailable("no VIX value".into()))?;

        Ok(VixSnapshot {
            value,
            as_of: Utc::now(),
        })
    }

    async fn gex_bundle(&self, underlying: &str) -> Result<GexBundle> {
        Err(EngineError::MarketDataUnavailable(format!(
            "positioning data not served by polygon (underlying={underlying})"
        )))
    }

    async fn market_context(&self, symbol: &str) -> Result<MarketContext> {
        Err(EngineError::MarketDataUnavailable(format!(
            "assembled context not served by polygon (symbol={symbol})"
        )))
    }

    async fn mtf_trend(&self, symbol: &str) -> Result<MtfTrend> {
        Err(EngineError::MarketDataUnavailable(format!(
            "MTF alignment not served by polygon (symbol={symbol})"
        )))
    }

    fn name(&self) -> &'static str {
        "polygon"
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_ticker_conversion() {
        let t = PolygonProvider::polygon_option_ticker("AAPL  260320C00200000").unwrap();
        assert_eq!(t, "O:AAPL260320C00200000");

        let t = PolygonProvider::polygon_option_ticker("SPY   250117P00590000").unwrap();
        assert_eq!(t, "O:SPY250117P00590000");
    }

    #[test]
    fn num_walks_nested_paths() {
        let v = serde_json::json!({"a": {"b": {"c": 3.5}}});
        assert_eq!(num(&v, &["a", "b", "c"]), Some(3.5));
        assert_eq!(num(&v, &["a", "x"]), None);
    }

    #[tokio::test]
    async fn positioning_calls_degrade() {
        let p = PolygonProvider::new("key");
        assert!(matches!(
            p.gex_bundle("SPY").await,
            Err(EngineError::MarketDataUnavailable(_))
        ));
        assert!(matches!(
            p.mtf_trend("SPY").await,
            Err(EngineError::MarketDataUnavailable(_))
        ));
    }
}
