// =============================================================================
// Shared domain types — signals, orders, trades, positions
// =============================================================================
//
// The database tables own these records; everything in memory is a transient
// copy. Order status transitions form a DAG with immutable terminal states,
// enforced through `OrderStatus::can_transition_to` at every mutation site.
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Signal sources
// ---------------------------------------------------------------------------

/// Known upstream indicator vendors. Unrecognised tags map to `Unknown` so a
/// misconfigured webhook never panics the intake path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalSource {
    UltimateOption,
    MtfTrendDots,
    #[serde(rename = "strat_engine_v6")]
    StratEngineV6,
    #[serde(rename = "orb_bhch_stretch")]
    OrbBhchStretch,
    #[serde(rename = "orb_bhch_orb")]
    OrbBhchOrb,
    SatyPhase,
    Tradingview,
    #[serde(rename = "orb_bhch_ema")]
    OrbBhchEma,
    #[serde(rename = "orb_bhch_bhch")]
    OrbBhchBhch,
    TwelvedataTechnical,
    Unknown,
}

impl SignalSource {
    /// Parse a vendor tag as it arrives on the wire.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "ultimate-option" | "ultimate_option" => Self::UltimateOption,
            "mtf-trend-dots" | "mtf_trend_dots" => Self::MtfTrendDots,
            "strat_engine_v6" | "strat-engine-v6" => Self::StratEngineV6,
            "orb_bhch_stretch" => Self::OrbBhchStretch,
            "orb_bhch_orb" => Self::OrbBhchOrb,
            "saty-phase" | "saty_phase" => Self::SatyPhase,
            "tradingview" | "tv" => Self::Tradingview,
            "orb_bhch_ema" => Self::OrbBhchEma,
            "orb_bhch_bhch" => Self::OrbBhchBhch,
            "twelvedata-technical" | "twelvedata_technical" => Self::TwelvedataTechnical,
            _ => Self::Unknown,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::UltimateOption => "ultimate-option",
            Self::MtfTrendDots => "mtf-trend-dots",
            Self::StratEngineV6 => "strat_engine_v6",
            Self::OrbBhchStretch => "orb_bhch_stretch",
            Self::OrbBhchOrb => "orb_bhch_orb",
            Self::SatyPhase => "saty-phase",
            Self::Tradingview => "tradingview",
            Self::OrbBhchEma => "orb_bhch_ema",
            Self::OrbBhchBhch => "orb_bhch_bhch",
            Self::TwelvedataTechnical => "twelvedata-technical",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_tag())
    }
}

// ---------------------------------------------------------------------------
// Signal enums
// ---------------------------------------------------------------------------

/// Directional read of a signal, derived from action + option type when the
/// payload does not state it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "BULLISH"),
            Self::Bearish => write!(f, "BEARISH"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Close,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Close => write!(f, "CLOSE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionType {
    Call,
    Put,
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CALL"),
            Self::Put => write!(f, "PUT"),
        }
    }
}

/// Derive a trading direction from action + option type.
///
/// BUY CALL / SELL PUT → bullish; BUY PUT / SELL CALL → bearish; everything
/// else (CLOSE, missing option type) is neutral.
pub fn derive_direction(action: SignalAction, option_type: Option<OptionType>) -> Direction {
    match (action, option_type) {
        (SignalAction::Buy, Some(OptionType::Call)) => Direction::Bullish,
        (SignalAction::Sell, Some(OptionType::Put)) => Direction::Bullish,
        (SignalAction::Buy, Some(OptionType::Put)) => Direction::Bearish,
        (SignalAction::Sell, Some(OptionType::Call)) => Direction::Bearish,
        _ => Direction::Neutral,
    }
}

/// Lifecycle status of a signal as it moves through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Pending,
    Validated,
    Processing,
    Completed,
    Rejected,
    Failed,
}

impl SignalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Failed)
    }
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Validated => "VALIDATED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Rejected => "REJECTED",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// A canonical signal produced by the normalizer. Frozen after normalization;
/// only `status` and `validation_result` mutate afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub source: SignalSource,
    /// SHA-256 of `source|symbol|iso-timestamp|direction`.
    pub fingerprint: String,
    pub symbol: String,
    pub direction: Direction,
    pub action: SignalAction,
    #[serde(default)]
    pub strike: Option<f64>,
    #[serde(default)]
    pub expiration: Option<NaiveDate>,
    #[serde(default)]
    pub option_type: Option<OptionType>,
    #[serde(default)]
    pub timeframe: Option<String>,
    pub quantity: u32,
    /// Confidence on a 0–100 scale; defaults to 75 when the payload omits it.
    pub confidence: f64,
    #[serde(default)]
    pub limit_price: Option<f64>,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    #[serde(default)]
    pub strategy: Option<String>,
    /// The original payload, preserved verbatim for audit and for entry-price
    /// resolution at the EXECUTION stage.
    pub raw_payload: serde_json::Value,
    pub signature_verified: bool,
    pub status: SignalStatus,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub validation_result: Option<String>,
}

// ---------------------------------------------------------------------------
// Order enums
// ---------------------------------------------------------------------------

/// Which backend an order was routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Paper,
    Live,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "PAPER"),
            Self::Live => write!(f, "LIVE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    BuyToOpen,
    SellToOpen,
    BuyToClose,
    SellToClose,
}

impl OrderSide {
    /// True for sides that add exposure.
    pub fn is_opening(&self) -> bool {
        matches!(self, Self::BuyToOpen | Self::SellToOpen)
    }

    /// True for sides where a worse fill means a *higher* price.
    pub fn is_buy(&self) -> bool {
        matches!(self, Self::BuyToOpen | Self::BuyToClose)
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BuyToOpen => "BUY_TO_OPEN",
            Self::SellToOpen => "SELL_TO_OPEN",
            Self::BuyToClose => "BUY_TO_CLOSE",
            Self::SellToClose => "SELL_TO_CLOSE",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl Default for OrderType {
    fn default() -> Self {
        Self::Market
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
            Self::Stop => "STOP",
            Self::StopLimit => "STOP_LIMIT",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
}

impl Default for TimeInForce {
    fn default() -> Self {
        Self::Day
    }
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Day => "DAY",
            Self::Gtc => "GTC",
            Self::Ioc => "IOC",
            Self::Fok => "FOK",
        };
        write!(f, "{s}")
    }
}

/// Order lifecycle status. Transitions form a DAG; a terminal status is never
/// mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Accepted,
    PartialFill,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }

    /// Whether moving from `self` to `next` is a legal transition. Terminal
    /// states accept nothing; self-transitions are rejected except
    /// PARTIAL_FILL → PARTIAL_FILL (additional partial fills).
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Pending, Submitted) | (Pending, Rejected) => true,
            (Submitted, Accepted)
            | (Submitted, PartialFill)
            | (Submitted, Filled)
            | (Submitted, Cancelled)
            | (Submitted, Rejected)
            | (Submitted, Expired) => true,
            (Accepted, PartialFill)
            | (Accepted, Filled)
            | (Accepted, Cancelled)
            | (Accepted, Rejected)
            | (Accepted, Expired) => true,
            (PartialFill, PartialFill)
            | (PartialFill, Filled)
            | (PartialFill, Cancelled)
            | (PartialFill, Expired) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Submitted => "SUBMITTED",
            Self::Accepted => "ACCEPTED",
            Self::PartialFill => "PARTIAL_FILL",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    #[serde(default)]
    pub signal_id: Option<String>,
    pub mode: ExecutionMode,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    /// OCC option symbol.
    pub symbol: String,
    pub underlying: String,
    #[serde(default)]
    pub strike: Option<f64>,
    #[serde(default)]
    pub expiration: Option<NaiveDate>,
    #[serde(default)]
    pub option_type: Option<OptionType>,
    pub quantity: u32,
    #[serde(default)]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub stop_price: Option<f64>,
    pub status: OrderStatus,
    #[serde(default)]
    pub broker_order_id: Option<String>,
    #[serde(default)]
    pub filled_quantity: u32,
    #[serde(default)]
    pub avg_fill_price: Option<f64>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub filled_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Trade (fill record)
// ---------------------------------------------------------------------------

/// A single fill against an order. A Trade exists iff its Order has at least
/// one fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub order_id: String,
    #[serde(default)]
    pub broker_trade_id: Option<String>,
    pub execution_price: f64,
    pub quantity: u32,
    pub commission: f64,
    pub fees: f64,
    /// Notional + commission + fees for buys; notional − costs for sells.
    pub total_cost: f64,
    pub executed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Market regime (positions snapshot it at entry)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    TrendingUp,
    TrendingDown,
    RangeBound,
    BreakoutImminent,
    ReversalUp,
    ReversalDown,
    Unknown,
}

impl MarketRegime {
    /// Whether this regime favors the given direction. `None` means the
    /// regime is directionless.
    pub fn favors(&self, direction: Direction) -> Option<bool> {
        match (self, direction) {
            (Self::TrendingUp | Self::ReversalUp, Direction::Bullish) => Some(true),
            (Self::TrendingDown | Self::ReversalDown, Direction::Bearish) => Some(true),
            (Self::TrendingUp | Self::ReversalUp, Direction::Bearish) => Some(false),
            (Self::TrendingDown | Self::ReversalDown, Direction::Bullish) => Some(false),
            _ => None,
        }
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TrendingUp => "TRENDING_UP",
            Self::TrendingDown => "TRENDING_DOWN",
            Self::RangeBound => "RANGE_BOUND",
            Self::BreakoutImminent => "BREAKOUT_IMMINENT",
            Self::ReversalUp => "REVERSAL_UP",
            Self::ReversalDown => "REVERSAL_DOWN",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

impl Default for MarketRegime {
    fn default() -> Self {
        Self::Unknown
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Option Greeks snapshot carried on positions and option quotes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Greeks {
    #[serde(default)]
    pub delta: f64,
    #[serde(default)]
    pub gamma: f64,
    #[serde(default)]
    pub theta: f64,
    #[serde(default)]
    pub vega: f64,
    #[serde(default)]
    pub iv: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    /// OCC option symbol.
    pub symbol: String,
    pub underlying: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub option_type: OptionType,
    /// Signed contract count: positive long, negative short. A position with
    /// `quantity == 0` must be closed.
    pub quantity: i32,
    pub avg_open_price: f64,
    pub total_cost: f64,
    #[serde(default)]
    pub current_price: f64,
    #[serde(default)]
    pub market_value: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
    #[serde(default)]
    pub unrealized_pnl_percent: f64,
    #[serde(default)]
    pub realized_pnl: f64,
    #[serde(default)]
    pub greeks: Greeks,
    /// Entry-time implied volatility, kept for IV-crush exit checks.
    #[serde(default)]
    pub entry_iv: f64,
    /// Active protective stop on the premium, set by partial exits and
    /// stop-tightening decisions.
    #[serde(default)]
    pub stop_loss: Option<f64>,
    /// Monotone non-decreasing peak of `unrealized_pnl` over the position's
    /// lifetime.
    #[serde(default)]
    pub high_water_mark: f64,
    #[serde(default)]
    pub partial_exits_taken: u32,
    #[serde(default)]
    pub entry_market_regime: MarketRegime,
    #[serde(default)]
    pub is_closed: bool,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub close_reason: Option<String>,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.quantity > 0
    }

    /// Calendar days to expiration from `today`.
    pub fn days_to_expiration(&self, today: NaiveDate) -> i64 {
        (self.expiration - today).num_days()
    }
}
