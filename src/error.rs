// =============================================================================
// Engine error taxonomy
// =============================================================================
//
// Every failure surfaced to clients or logs leads with its kind. Advisory
// data failures (market context, positioning) are NOT errors — those paths
// degrade and keep going. Errors here are the ones that stop a signal, an
// order, or a request.
// =============================================================================

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    // Signal intake
    #[error("VALIDATION: {0}")]
    Validation(String),

    #[error("DUPLICATE: signal fingerprint seen within dedup window")]
    Duplicate,

    // Decision rejections (not HTTP errors — the pipeline records them)
    #[error("REGIME_UNSTABLE: {0}")]
    RegimeUnstable(String),

    #[error("UNRESOLVED_CONFLICT: {0}")]
    UnresolvedConflict(String),

    #[error("LOW_CONFIDENCE: {0}")]
    LowConfidence(String),

    #[error("RISK_LIMIT: {0}")]
    RiskLimit(String),

    // Broker layer
    #[error("BROKER_SUBMIT_FAILED: {0}")]
    BrokerSubmitFailed(String),

    #[error("BROKER_STATUS_UNKNOWN: order {order_id} after {attempts} attempts: {reason}")]
    BrokerStatusUnknown {
        order_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("BROKER_NOT_CONFIGURED: {0}")]
    BrokerNotConfigured(String),

    // Market data
    #[error("MARKET_DATA_UNAVAILABLE: {0}")]
    MarketDataUnavailable(String),

    // Pipeline
    #[error("PIPELINE_ERROR: stage {stage}: {reason}")]
    Pipeline { stage: String, reason: String },

    // Ingress auth
    #[error("HMAC_INVALID: webhook signature verification failed")]
    HmacInvalid,

    #[error("AUTH_INVALID: {0}")]
    AuthInvalid(String),

    // Transport / serialization
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("deserialization failed: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// The payload without the kind prefix, for callers that render kind
    /// and detail separately.
    pub fn detail(&self) -> String {
        match self {
            Self::Validation(d)
            | Self::RegimeUnstable(d)
            | Self::UnresolvedConflict(d)
            | Self::LowConfidence(d)
            | Self::RiskLimit(d)
            | Self::BrokerSubmitFailed(d)
            | Self::BrokerNotConfigured(d)
            | Self::MarketDataUnavailable(d)
            | Self::AuthInvalid(d)
            | Self::Store(d) => d.clone(),
            Self::Pipeline { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }

    /// The first-word kind string surfaced to clients and `adapter_logs`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::Duplicate => "DUPLICATE",
            Self::RegimeUnstable(_) => "REGIME_UNSTABLE",
            Self::UnresolvedConflict(_) => "UNRESOLVED_CONFLICT",
            Self::LowConfidence(_) => "LOW_CONFIDENCE",
            Self::RiskLimit(_) => "RISK_LIMIT",
            Self::BrokerSubmitFailed(_) => "BROKER_SUBMIT_FAILED",
            Self::BrokerStatusUnknown { .. } => "BROKER_STATUS_UNKNOWN",
            Self::BrokerNotConfigured(_) => "BROKER_NOT_CONFIGURED",
            Self::MarketDataUnavailable(_) => "MARKET_DATA_UNAVAILABLE",
            Self::Pipeline { .. } => "PIPELINE_ERROR",
            Self::HmacInvalid => "HMAC_INVALID",
            Self::AuthInvalid(_) => "AUTH_INVALID",
            Self::Http(_) => "HTTP_ERROR",
            Self::Deserialization(_) => "DESERIALIZATION",
            Self::Store(_) => "STORE_ERROR",
        }
    }
}
