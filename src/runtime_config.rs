// =============================================================================
// Runtime Configuration — engine tunables with atomic save + env settings
// =============================================================================
//
// Central configuration hub. Every tunable parameter lives here so the
// engine can be reconfigured without a rebuild. Persistence uses an atomic
// tmp + rename pattern; all fields carry serde defaults so adding new fields
// never breaks loading an older config file.
//
// Secrets and deployment-mode switches are environment-only (`EnvSettings`)
// and are never written to disk.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::ExecutionMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_lookback_minutes() -> i64 {
    20
}

fn default_min_agreeing() -> usize {
    2
}

fn default_min_weighted() -> f64 {
    1.8
}

fn default_flip_cooldown_secs() -> i64 {
    900
}

fn default_min_consecutive() -> u32 {
    2
}

fn default_min_regime_confidence() -> f64 {
    0.75
}

fn default_max_vix() -> f64 {
    30.0
}

fn default_stale_data_secs() -> i64 {
    300
}

fn default_min_confidence_to_execute() -> f64 {
    60.0
}

fn default_risk_pct() -> f64 {
    0.02
}

fn default_portfolio_value() -> f64 {
    25_000.0
}

fn default_kelly_cap() -> f64 {
    0.25
}

fn default_stop_loss_percent() -> f64 {
    75.0
}

fn default_t1_percent() -> f64 {
    30.0
}

fn default_t2_percent() -> f64 {
    60.0
}

fn default_trail_percent() -> f64 {
    20.0
}

fn default_trail_arm_percent() -> f64 {
    25.0
}

fn default_dte_immediate() -> i64 {
    1
}

fn default_dte_warning() -> i64 {
    5
}

fn default_max_days_in_trade() -> i64 {
    14
}

fn default_deep_itm_delta() -> f64 {
    0.82
}

fn default_theta_decay_pct() -> f64 {
    4.0
}

fn default_iv_crush_pct() -> f64 {
    20.0
}

fn default_refresh_interval_secs() -> u64 {
    30
}

fn default_fill_poll_interval_ms() -> u64 {
    2_000
}

fn default_close_spacing_ms() -> u64 {
    500
}

fn default_queue_confidence_threshold() -> f64 {
    70.0
}

fn default_max_queue_age_minutes() -> i64 {
    90
}

fn default_max_open_positions() -> u32 {
    5
}

fn default_max_trades_per_day() -> u32 {
    25
}

fn default_max_daily_loss() -> f64 {
    1_500.0
}

// =============================================================================
// Component parameter blocks
// =============================================================================

/// Confluence scoring thresholds (§ signal agreement across vendors).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceParams {
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: i64,

    /// Minimum number of agreeing sources.
    #[serde(default = "default_min_agreeing")]
    pub min_agreeing: usize,

    /// Minimum summed source weight among agreeing sources.
    #[serde(default = "default_min_weighted")]
    pub min_weighted_score: f64,

    /// When true, at least one primary source must be in the agreeing set.
    #[serde(default)]
    pub require_primary_source: bool,
}

impl Default for ConfluenceParams {
    fn default() -> Self {
        Self {
            lookback_minutes: default_lookback_minutes(),
            min_agreeing: default_min_agreeing(),
            min_weighted_score: default_min_weighted(),
            require_primary_source: false,
        }
    }
}

/// Regime stability gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeParams {
    /// Seconds that must elapse after a regime flip before entries unlock.
    #[serde(default = "default_flip_cooldown_secs")]
    pub flip_cooldown_secs: i64,

    /// Observations of the same regime required before entries unlock.
    #[serde(default = "default_min_consecutive")]
    pub min_consecutive: u32,

    /// Minimum regime classification confidence [0, 1].
    #[serde(default = "default_min_regime_confidence")]
    pub min_confidence: f64,

    /// When true, an unstable regime rejects entries outright.
    #[serde(default = "default_true")]
    pub require_stable_regime: bool,
}

impl Default for RegimeParams {
    fn default() -> Self {
        Self {
            flip_cooldown_secs: default_flip_cooldown_secs(),
            min_consecutive: default_min_consecutive(),
            min_confidence: default_min_regime_confidence(),
            require_stable_regime: true,
        }
    }
}

/// Conflict resolution policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConflictParams {
    /// Proceed on a losing-side conflict with reduced confidence instead of
    /// rejecting.
    #[serde(default)]
    pub allow_conflict_override: bool,
}

/// Market-context and multi-timeframe gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextParams {
    #[serde(default = "default_true")]
    pub require_market_open: bool,

    /// VIX level above which no new positions open.
    #[serde(default = "default_max_vix")]
    pub max_vix_for_new_positions: f64,

    #[serde(default = "default_true")]
    pub allow_first_30_min: bool,

    /// Reject entries that fight the broad market bias.
    #[serde(default)]
    pub require_market_alignment: bool,

    /// Reject entries without an opening-range breakout in the same direction.
    #[serde(default)]
    pub require_or_breakout_confirmation: bool,

    /// Strict MTF mode rejects on higher-timeframe bias conflict; advisory
    /// mode only adjusts size and confidence.
    #[serde(default)]
    pub mtf_strict: bool,

    /// Context inputs older than this count as stale.
    #[serde(default = "default_stale_data_secs")]
    pub stale_data_secs: i64,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            require_market_open: true,
            max_vix_for_new_positions: default_max_vix(),
            allow_first_30_min: true,
            require_market_alignment: false,
            require_or_breakout_confirmation: false,
            mtf_strict: false,
            stale_data_secs: default_stale_data_secs(),
        }
    }
}

/// Position sizing inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingParams {
    /// Fraction of portfolio value risked per trade.
    #[serde(default = "default_risk_pct")]
    pub risk_pct_per_trade: f64,

    /// Portfolio value used for the risk cap until a broker balance feed
    /// replaces it.
    #[serde(default = "default_portfolio_value")]
    pub portfolio_value: f64,

    /// Hard cap on the Kelly fraction before halving.
    #[serde(default = "default_kelly_cap")]
    pub kelly_fraction_cap: f64,
}

impl Default for SizingParams {
    fn default() -> Self {
        Self {
            risk_pct_per_trade: default_risk_pct(),
            portfolio_value: default_portfolio_value(),
            kelly_fraction_cap: default_kelly_cap(),
        }
    }
}

/// Exit engine thresholds. Percentages are of entry premium.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitParams {
    /// Absolute stop: loss of this percent of entry premium closes the
    /// position.
    #[serde(default = "default_stop_loss_percent")]
    pub stop_loss_percent: f64,

    #[serde(default = "default_t1_percent")]
    pub profit_target_1_percent: f64,

    #[serde(default = "default_t2_percent")]
    pub profit_target_2_percent: f64,

    /// Trailing drawdown from the high-water mark that closes the remainder.
    #[serde(default = "default_trail_percent")]
    pub trailing_stop_percent: f64,

    /// Run-up required before the trailing stop arms.
    #[serde(default = "default_trail_arm_percent")]
    pub trailing_arm_percent: f64,

    #[serde(default = "default_dte_immediate")]
    pub dte_immediate_close: i64,

    #[serde(default = "default_dte_warning")]
    pub dte_warning_close: i64,

    #[serde(default = "default_max_days_in_trade")]
    pub max_days_in_trade: i64,

    #[serde(default = "default_deep_itm_delta")]
    pub deep_itm_delta: f64,

    /// Daily theta burn (percent of position value) that forces a close.
    #[serde(default = "default_theta_decay_pct")]
    pub theta_decay_percent: f64,

    /// IV drop vs entry (percent) treated as a crush.
    #[serde(default = "default_iv_crush_pct")]
    pub iv_crush_percent: f64,

    /// ATR-scaled targets and partial schedule supersede the fixed
    /// thresholds when ATR context is available.
    #[serde(default = "default_true")]
    pub use_enhanced: bool,
}

impl Default for ExitParams {
    fn default() -> Self {
        Self {
            stop_loss_percent: default_stop_loss_percent(),
            profit_target_1_percent: default_t1_percent(),
            profit_target_2_percent: default_t2_percent(),
            trailing_stop_percent: default_trail_percent(),
            trailing_arm_percent: default_trail_arm_percent(),
            dte_immediate_close: default_dte_immediate(),
            dte_warning_close: default_dte_warning(),
            max_days_in_trade: default_max_days_in_trade(),
            deep_itm_delta: default_deep_itm_delta(),
            theta_decay_percent: default_theta_decay_pct(),
            iv_crush_percent: default_iv_crush_pct(),
            use_enhanced: true,
        }
    }
}

/// Risk limits enforced before any order leaves the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParams {
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: u32,

    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: u32,

    /// Dollar loss across today's realized + unrealized P&L that halts new
    /// entries.
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            max_open_positions: default_max_open_positions(),
            max_trades_per_day: default_max_trades_per_day(),
            max_daily_loss: default_max_daily_loss(),
        }
    }
}

/// Background worker cadences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerParams {
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_fill_poll_interval_ms")]
    pub fill_poll_interval_ms: u64,

    /// Minimum spacing between sequential auto-close orders.
    #[serde(default = "default_close_spacing_ms")]
    pub close_spacing_ms: u64,
}

impl Default for WorkerParams {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            fill_poll_interval_ms: default_fill_poll_interval_ms(),
            close_spacing_ms: default_close_spacing_ms(),
        }
    }
}

fn default_queue_allowed_sources() -> Vec<String> {
    vec![
        "ultimate-option".into(),
        "mtf-trend-dots".into(),
        "strat_engine_v6".into(),
        "twelvedata-technical".into(),
        "tradingview".into(),
    ]
}

/// Pre-market signal queue policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueParams {
    /// Minimum signal confidence (0–100) to queue instead of reject.
    #[serde(default = "default_queue_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Base queue age; entries expire `max_queue_age + 240 min` after
    /// queueing to cover the full pre-market window.
    #[serde(default = "default_max_queue_age_minutes")]
    pub max_queue_age_minutes: i64,

    /// Vendor tags allowed to hold signals through the pre-market queue.
    #[serde(default = "default_queue_allowed_sources")]
    pub allowed_sources: Vec<String>,
}

impl Default for QueueParams {
    fn default() -> Self {
        Self {
            confidence_threshold: default_queue_confidence_threshold(),
            max_queue_age_minutes: default_max_queue_age_minutes(),
            allowed_sources: default_queue_allowed_sources(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration.
///
/// Every field has a serde default so older JSON files missing new fields
/// still deserialise.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub confluence: ConfluenceParams,
    #[serde(default)]
    pub regime: RegimeParams,
    #[serde(default)]
    pub conflict: ConflictParams,
    #[serde(default)]
    pub context: ContextParams,
    #[serde(default)]
    pub sizing: SizingParams,
    #[serde(default)]
    pub exit: ExitParams,
    #[serde(default)]
    pub risk: RiskParams,
    #[serde(default)]
    pub workers: WorkerParams,
    #[serde(default)]
    pub queue: QueueParams,

    /// Minimum orchestrator confidence (0–100) to execute an entry.
    #[serde(default = "default_min_confidence_to_execute")]
    pub min_confidence_to_execute: f64,
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`. Missing file is an
    /// error so the caller can fall back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(path = %path.display(), "runtime config loaded");
        Ok(config)
    }

    /// Persist the current configuration using an atomic tmp + rename write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Environment settings (deployment switches + secrets; never persisted)
// =============================================================================

/// Which live broker the factory prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Tradier,
    Alpaca,
}

impl BrokerKind {
    pub fn other(&self) -> BrokerKind {
        match self {
            Self::Tradier => Self::Alpaca,
            Self::Alpaca => Self::Tradier,
        }
    }
}

impl std::fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tradier => write!(f, "tradier"),
            Self::Alpaca => write!(f, "alpaca"),
        }
    }
}

/// Everything read from the process environment at startup. Secrets stay
/// here; `RuntimeConfig` is what gets written to disk.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    pub app_mode: ExecutionMode,
    pub allow_live_execution: bool,
    pub preferred_broker: BrokerKind,

    pub tradier_api_key: Option<String>,
    pub tradier_account_id: Option<String>,
    pub tradier_sandbox: bool,

    pub alpaca_api_key: Option<String>,
    pub alpaca_secret_key: Option<String>,
    pub alpaca_paper: bool,

    pub database_url: Option<String>,

    pub hmac_secret: Option<String>,
    pub jwt_secret: Option<String>,
    pub api_auth_token: Option<String>,

    pub market_data_provider: Option<String>,
    pub polygon_api_key: Option<String>,
    pub alpha_vantage_api_key: Option<String>,
    pub twelvedata_api_key: Option<String>,

    pub bind_addr: String,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    match env_var(name) {
        Some(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"),
        None => default,
    }
}

impl EnvSettings {
    pub fn from_env() -> Self {
        let app_mode = match env_var("APP_MODE").as_deref().map(str::to_uppercase) {
            Some(ref m) if m == "LIVE" => ExecutionMode::Live,
            _ => ExecutionMode::Paper,
        };

        let preferred_broker = match env_var("PREFERRED_BROKER")
            .as_deref()
            .map(str::to_lowercase)
        {
            Some(ref b) if b == "alpaca" => BrokerKind::Alpaca,
            _ => BrokerKind::Tradier,
        };

        Self {
            app_mode,
            allow_live_execution: env_bool("ALLOW_LIVE_EXECUTION", false),
            preferred_broker,

            tradier_api_key: env_var("TRADIER_API_KEY"),
            tradier_account_id: env_var("TRADIER_ACCOUNT_ID"),
            tradier_sandbox: env_bool("TRADIER_SANDBOX", true),

            alpaca_api_key: env_var("ALPACA_API_KEY"),
            alpaca_secret_key: env_var("ALPACA_SECRET_KEY"),
            alpaca_paper: env_bool("ALPACA_PAPER", true),

            database_url: env_var("DATABASE_URL"),

            hmac_secret: env_var("HMAC_SECRET"),
            jwt_secret: env_var("JWT_SECRET"),
            api_auth_token: env_var("API_AUTH_TOKEN"),

            market_data_provider: env_var("MARKET_DATA_PROVIDER"),
            polygon_api_key: env_var("POLYGON_API_KEY"),
            alpha_vantage_api_key: env_var("ALPHA_VANTAGE_API_KEY"),
            twelvedata_api_key: env_var("TWELVEDATA_API_KEY"),

            bind_addr: env_var("ATLAS_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3001".into()),
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
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.confluence.lookback_minutes, 20);
        assert_eq!(cfg.confluence.min_agreeing, 2);
        assert!((cfg.confluence.min_weighted_score - 1.8).abs() < f64::EPSILON);
        assert_eq!(cfg.regime.flip_cooldown_secs, 900);
        assert_eq!(cfg.regime.min_consecutive, 2);
        assert!((cfg.regime.min_confidence - 0.75).abs() < f64::EPSILON);
        assert!(cfg.regime.require_stable_regime);
        assert!((cfg.exit.stop_loss_percent - 75.0).abs() < f64::EPSILON);
        assert_eq!(cfg.exit.max_days_in_trade, 14);
        assert_eq!(cfg.workers.refresh_interval_secs, 30);
        assert_eq!(cfg.workers.close_spacing_ms, 500);
        assert!((cfg.queue.confidence_threshold - 70.0).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.confluence.min_agreeing, 2);
        assert!((cfg.min_confidence_to_execute - 60.0).abs() < f64::EPSILON);
        assert!(!cfg.conflict.allow_conflict_override);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "regime": { "flip_cooldown_secs": 600 } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.regime.flip_cooldown_secs, 600);
        assert_eq!(cfg.regime.min_consecutive, 2);
        assert_eq!(cfg.exit.dte_immediate_close, 1);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.regime.flip_cooldown_secs, cfg2.regime.flip_cooldown_secs);
        assert_eq!(cfg.risk.max_open_positions, cfg2.risk.max_open_positions);
    }

    #[test]
    fn broker_kind_other() {
        assert_eq!(BrokerKind::Tradier.other(), BrokerKind::Alpaca);
        assert_eq!(BrokerKind::Alpaca.other(), BrokerKind::Tradier);
    }
}
