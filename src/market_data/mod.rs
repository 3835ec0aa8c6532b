// =============================================================================
// Market data — provider capability, quote/GEX types, session clock
// =============================================================================
//
// Upstream vendors are abstracted behind `MarketDataProvider`. The engine
// treats everything here as advisory: a failed fetch degrades a decision, it
// never aborts one (the cache layer handles stale-grace serving).
// =============================================================================

pub mod cache;
pub mod fixture;
pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Direction, Greeks, MarketRegime};

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockQuote {
    pub symbol: String,
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionQuote {
    /// OCC option symbol.
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    #[serde(default)]
    pub volume: u64,
    #[serde(default)]
    pub open_interest: u64,
    #[serde(default)]
    pub greeks: Greeks,
    pub as_of: DateTime<Utc>,
}

impl OptionQuote {
    /// Mid price; falls back to last when the book is one-sided.
    pub fn mid(&self) -> f64 {
        if self.bid > 0.0 && self.ask > 0.0 {
            (self.bid + self.ask) / 2.0
        } else {
            self.last
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VixSnapshot {
    pub value: f64,
    pub as_of: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Dealer positioning (GEX)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DealerPosition {
    LongGamma,
    ShortGamma,
    Neutral,
}

impl Default for DealerPosition {
    fn default() -> Self {
        Self::Neutral
    }
}

impl std::fmt::Display for DealerPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LongGamma => "LONG_GAMMA",
            Self::ShortGamma => "SHORT_GAMMA",
            Self::Neutral => "NEUTRAL",
        };
        write!(f, "{s}")
    }
}

/// Gamma-exposure snapshot for one underlying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GexBundle {
    pub underlying: String,
    pub regime: MarketRegime,
    /// Classification confidence [0, 1].
    pub regime_confidence: f64,
    pub dealer_position: DealerPosition,
    /// Underlying price where dealer net gamma crosses zero.
    #[serde(default)]
    pub zero_gamma_level: Option<f64>,
    #[serde(default)]
    pub max_pain: Option<f64>,
    /// Net dealer gamma in $ per 1% move; sign drives the flip check.
    #[serde(default)]
    pub net_gex: f64,
    pub as_of: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Market sessions (US/Eastern)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketSession {
    PreMarket,
    Opening,
    Morning,
    Midday,
    PowerHour,
    AfterHours,
    Closed,
}

impl MarketSession {
    /// Classify a UTC instant into a US equity session.
    pub fn classify(at: DateTime<Utc>) -> Self {
        let et = New_York.from_utc_datetime(&at.naive_utc());
        if matches!(et.weekday(), Weekday::Sat | Weekday::Sun) {
            return Self::Closed;
        }
        let t = et.time();
        let at_or_after = |h, m| t >= NaiveTime::from_hms_opt(h, m, 0).unwrap();
        let before = |h, m| t < NaiveTime::from_hms_opt(h, m, 0).unwrap();

        if at_or_after(4, 0) && before(9, 30) {
            Self::PreMarket
        } else if at_or_after(9, 30) && before(10, 0) {
            Self::Opening
        } else if at_or_after(10, 0) && before(11, 30) {
            Self::Morning
        } else if at_or_after(11, 30) && before(14, 0) {
            Self::Midday
        } else if at_or_after(14, 0) && before(16, 0) {
            Self::PowerHour
        } else if at_or_after(16, 0) && before(20, 0) {
            Self::AfterHours
        } else {
            Self::Closed
        }
    }

    /// Regular trading hours only.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            Self::Opening | Self::Morning | Self::Midday | Self::PowerHour
        )
    }

    /// The first 30 minutes after the bell.
    pub fn is_first_30_min(&self) -> bool {
        matches!(self, Self::Opening)
    }

    /// Sessions where out-of-session signals are queued rather than rejected.
    pub fn is_queueable(&self) -> bool {
        matches!(self, Self::PreMarket | Self::AfterHours)
    }
}

impl std::fmt::Display for MarketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PreMarket => "PRE_MARKET",
            Self::Opening => "OPENING",
            Self::Morning => "MORNING",
            Self::Midday => "MIDDAY",
            Self::PowerHour => "POWER_HOUR",
            Self::AfterHours => "AFTER_HOURS",
            Self::Closed => "CLOSED",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Context inputs for the decision layer
// ---------------------------------------------------------------------------

/// Volatility buckets used by the context adjuster and VIX sizing rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolBucket {
    LowVol,
    NormalVol,
    ElevatedVol,
    HighVol,
}

impl VolBucket {
    pub fn from_vix(vix: f64) -> Self {
        if vix < 15.0 {
            Self::LowVol
        } else if vix < 20.0 {
            Self::NormalVol
        } else if vix < 28.0 {
            Self::ElevatedVol
        } else {
            Self::HighVol
        }
    }
}

/// Assembled market context for one symbol, consumed by the context adjuster
/// and the orchestrator. All fields are advisory; absence degrades gracefully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    pub symbol: String,
    pub session: MarketSession,
    #[serde(default)]
    pub vix: Option<f64>,
    /// Broad-market directional bias.
    #[serde(default)]
    pub market_bias: Option<Direction>,
    #[serde(default)]
    pub atr: Option<f64>,
    /// Percentile of current ATR vs trailing distribution [0, 100].
    #[serde(default)]
    pub atr_percentile: Option<f64>,
    /// Direction of a confirmed opening-range breakout, if any.
    #[serde(default)]
    pub or_breakout: Option<Direction>,
    #[serde(default)]
    pub near_resistance: bool,
    #[serde(default)]
    pub near_support: bool,
    #[serde(default)]
    pub candle_alignment: Option<Direction>,
    /// Candle pattern strength [0, 1].
    #[serde(default)]
    pub candle_strength: f64,
    #[serde(default)]
    pub bb_overbought: bool,
    #[serde(default)]
    pub bb_oversold: bool,
    /// Upstream feeds older than the staleness threshold.
    #[serde(default)]
    pub stale_sources: Vec<String>,
    pub as_of: DateTime<Utc>,
}

/// Multi-timeframe alignment summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtfTrend {
    pub symbol: String,
    pub bias: Direction,
    /// Agreement across timeframes [0, 100].
    pub alignment_score: f64,
    /// True when higher timeframes disagree with the lower ones.
    pub conflict: bool,
    pub as_of: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Provider capability
// ---------------------------------------------------------------------------

/// Capability the engine needs from any market-data vendor.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn stock_quote(&self, symbol: &str) -> Result<StockQuote>;
    async fn option_quote(&self, occ_symbol: &str) -> Result<OptionQuote>;
    async fn vix(&self) -> Result<VixSnapshot>;
    async fn gex_bundle(&self, underlying: &str) -> Result<GexBundle>;
    async fn market_context(&self, symbol: &str) -> Result<MarketContext>;
    async fn mtf_trend(&self, symbol: &str) -> Result<MtfTrend>;

    fn name(&self) -> &'static str;
}
