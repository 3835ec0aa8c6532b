// =============================================================================
// Fixture provider — deterministic market data for paper mode and tests
// =============================================================================
//
// Serves stable synthetic quotes so the engine runs end-to-end with no vendor
// configured. Values derive from a hash of the symbol, so the same symbol
// always prices the same. Tests (and the paper-trading route) can pin exact
// values through the `set_*` overrides.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::Result;
use crate::market_data::{
    DealerPosition, GexBundle, MarketContext, MarketDataProvider, MarketSession, MtfTrend,
    OptionQuote, StockQuote, VixSnapshot,
};
use crate::types::{Direction, Greeks, MarketRegime};

pub struct FixtureProvider {
    stock_overrides: RwLock<HashMap<String, StockQuote>>,
    option_overrides: RwLock<HashMap<String, OptionQuote>>,
    gex_overrides: RwLock<HashMap<String, GexBundle>>,
    context_overrides: RwLock<HashMap<String, MarketContext>>,
    mtf_overrides: RwLock<HashMap<String, MtfTrend>>,
    vix_override: RwLock<Option<f64>>,
}

/// Stable small hash of a symbol, used to derive synthetic price levels.
fn symbol_seed(symbol: &str) -> u64 {
    symbol
        .bytes()
        .fold(1469598103934665603u64, |h, b| {
            (h ^ b as u64).wrapping_mul(1099511628211)
        })
}

impl FixtureProvider {
    pub fn new() -> Self {
        Self {
            stock_overrides: RwLock::new(HashMap::new()),
            option_overrides: RwLock::new(HashMap::new()),
            gex_overrides: RwLock::new(HashMap::new()),
            context_overrides: RwLock::new(HashMap::new()),
            mtf_overrides: RwLock::new(HashMap::new()),
            vix_override: RwLock::new(None),
        }
    }

    pub fn set_stock_quote(&self, quote: StockQuote) {
        self.stock_overrides
            .write()
            .insert(quote.symbol.clone(), quote);
    }

    pub fn set_option_quote(&self, quote: OptionQuote) {
        self.option_overrides
            .write()
            .insert(quote.symbol.clone(), quote);
    }

    pub fn set_gex_bundle(&self, bundle: GexBundle) {
        self.gex_overrides
            .write()
            .insert(bundle.underlying.clone(), bundle);
    }

    pub fn set_market_context(&self, ctx: MarketContext) {
        self.context_overrides
            .write()
            .insert(ctx.symbol.clone(), ctx);
    }

    pub fn set_mtf_trend(&self, trend: MtfTrend) {
        self.mtf_overrides.write().insert(trend.symbol.clone(), trend);
    }

    pub fn set_vix(&self, value: f64) {
        *self.vix_override.write() = Some(value);
    }
}

impl Default for FixtureProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for FixtureProvider {
    async fn stock_quote(&self, symbol: &str) -> Result<StockQuote> {
        if let Some(q) = self.stock_overrides.read().get(symbol) {
            return Ok(q.clone());
        }
        let base = 50.0 + (symbol_seed(symbol) % 900) as f64;
        Ok(StockQuote {
            symbol: symbol.to_string(),
            last: base,
            bid: base - 0.02,
            ask: base + 0.02,
            as_of: Utc::now(),
        })
    }

    async fn option_quote(&self, occ_symbol: &str) -> Result<OptionQuote> {
        if let Some(q) = self.option_overrides.read().get(occ_symbol) {
            return Ok(q.clone());
        }
        let premium = 1.0 + (symbol_seed(occ_symbol) % 400) as f64 / 100.0;
        Ok(OptionQuote {
            symbol: occ_symbol.to_string(),
            bid: premium - 0.05,
            ask: premium + 0.05,
            last: premium,
            volume: 1_200,
            open_interest: 8_500,
            greeks: Greeks {
                delta: 0.45,
                gamma: 0.04,
                theta: -0.06,
                vega: 0.11,
                iv: 0.28,
            },
            as_of: Utc::now(),
        })
    }

    async fn vix(&self) -> Result<VixSnapshot> {
        Ok(VixSnapshot {
            value: self.vix_override.read().unwrap_or(18.0),
            as_of: Utc::now(),
        })
    }

    async fn gex_bundle(&self, underlying: &str) -> Result<GexBundle> {
        if let Some(b) = self.gex_overrides.read().get(underlying) {
            return Ok(b.clone());
        }
        Ok(GexBundle {
            underlying: underlying.to_string(),
            regime: MarketRegime::TrendingUp,
            regime_confidence: 0.8,
            dealer_position: DealerPosition::LongGamma,
            zero_gamma_level: None,
            max_pain: None,
            net_gex: 1.0e9,
            as_of: Utc::now(),
        })
    }

    async fn market_context(&self, symbol: &str) -> Result<MarketContext> {
        if let Some(c) = self.context_overrides.read().get(symbol) {
            return Ok(c.clone());
        }
        let now = Utc::now();
        Ok(MarketContext {
            symbol: symbol.to_string(),
            session: MarketSession::classify(now),
            vix: Some(self.vix_override.read().unwrap_or(18.0)),
            market_bias: Some(Direction::Neutral),
            atr: Some(1.5),
            atr_percentile: Some(50.0),
            or_breakout: None,
            near_resistance: false,
            near_support: false,
            candle_alignment: None,
            candle_strength: 0.0,
            bb_overbought: false,
            bb_oversold: false,
            stale_sources: Vec::new(),
            as_of: now,
        })
    }

    async fn mtf_trend(&self, symbol: &str) -> Result<MtfTrend> {
        if let Some(t) = self.mtf_overrides.read().get(symbol) {
            return Ok(t.clone());
        }
        Ok(MtfTrend {
            symbol: symbol.to_string(),
            bias: Direction::Neutral,
            alignment_score: 50.0,
            conflict: false,
            as_of: Utc::now(),
        })
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn quotes_are_deterministic_per_symbol() {
        let p = FixtureProvider::new();
        let a = p.stock_quote("SPY").await.unwrap();
        let b = p.stock_quote("SPY").await.unwrap();
        assert!((a.last - b.last).abs() < f64::EPSILON);

        let q1 = p.option_quote("SPY   260320C00500000").await.unwrap();
        let q2 = p.option_quote("SPY   260320C00500000").await.unwrap();
        assert!((q1.mid() - q2.mid()).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn overrides_take_precedence() {
        let p = FixtureProvider::new();
        p.set_vix(32.0);
        assert!((p.vix().await.unwrap().value - 32.0).abs() < f64::EPSILON);

        p.set_option_quote(OptionQuote {
            symbol: "AAPL  260320C00200000".into(),
            bid: 2.95,
            ask: 3.05,
            last: 3.0,
            volume: 0,
            open_interest: 0,
            greeks: Greeks::default(),
            as_of: Utc::now(),
        });
        let q = p.option_quote("AAPL  260320C00200000").await.unwrap();
        assert!((q.mid() - 3.0).abs() < 1e-9);
    }
}
