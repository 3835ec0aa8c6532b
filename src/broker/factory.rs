// =============================================================================
// Adapter factory — dual-flag safety gate
// =============================================================================
//
// LIVE execution requires BOTH flags:
//
//     mode = LIVE  ⇔  APP_MODE=LIVE  ∧  ALLOW_LIVE_EXECUTION=true
//
// When live is authorized, the preferred broker is tried first, then the
// other; if neither is configured the factory falls back to Paper with a
// warning. Any doubt resolves to Paper — the gate never fails open.
// =============================================================================

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::broker::alpaca::AlpacaAdapter;
use crate::broker::paper::PaperAdapter;
use crate::broker::tradier::TradierAdapter;
use crate::broker::BrokerAdapter;
use crate::runtime_config::{BrokerKind, EnvSettings};
use crate::types::ExecutionMode;

/// Result of the gate evaluation, recorded and exposed via `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyGateResult {
    pub mode: ExecutionMode,
    pub adapter_name: String,
    pub reason: String,
}

/// What the factory hands back: the adapter to trade through, the gate
/// verdict, and (in paper mode) a direct handle to the simulator so the
/// paper-trading trigger can fill resting orders.
pub struct AdapterBuild {
    pub adapter: Arc<dyn BrokerAdapter>,
    pub paper: Option<Arc<PaperAdapter>>,
    pub gate: SafetyGateResult,
}

pub struct AdapterFactory;

impl AdapterFactory {
    /// Build the adapter the engine will trade through.
    ///
    /// `paper_seed` pins the simulator RNG for reproducible paper sessions.
    pub fn build(settings: &EnvSettings, paper_seed: Option<u64>) -> AdapterBuild {
        // ── Dual-flag gate ──────────────────────────────────────────────
        if settings.app_mode != ExecutionMode::Live {
            let gate = SafetyGateResult {
                mode: ExecutionMode::Paper,
                adapter_name: "paper".into(),
                reason: "APP_MODE is not LIVE".into(),
            };
            info!(reason = %gate.reason, "safety gate: paper mode");
            return Self::paper_build(paper_seed, gate);
        }
        if !settings.allow_live_execution {
            let gate = SafetyGateResult {
                mode: ExecutionMode::Paper,
                adapter_name: "paper".into(),
                reason: "ALLOW_LIVE_EXECUTION is not enabled".into(),
            };
            warn!(reason = %gate.reason, "safety gate: APP_MODE=LIVE but live execution is not allowed");
            return Self::paper_build(paper_seed, gate);
        }

        // ── Both flags set: pick a configured live broker ───────────────
        for kind in [settings.preferred_broker, settings.preferred_broker.other()] {
            if let Some(adapter) = Self::build_live(kind, settings) {
                let preferred = kind == settings.preferred_broker;
                let gate = SafetyGateResult {
                    mode: ExecutionMode::Live,
                    adapter_name: kind.to_string(),
                    reason: if preferred {
                        format!("live execution enabled via preferred broker {kind}")
                    } else {
                        format!(
                            "preferred broker {} unconfigured; using {kind}",
                            settings.preferred_broker
                        )
                    },
                };
                if preferred {
                    info!(broker = %kind, "safety gate: LIVE execution enabled");
                } else {
                    let err = crate::error::EngineError::BrokerNotConfigured(
                        settings.preferred_broker.to_string(),
                    );
                    warn!(
                        error = %err,
                        fallback = %kind,
                        "safety gate: preferred broker unconfigured, using fallback"
                    );
                }
                return AdapterBuild {
                    adapter,
                    paper: None,
                    gate,
                };
            }
        }

        // ── No live broker configured: fall back to Paper, never fail open
        let gate = SafetyGateResult {
            mode: ExecutionMode::Paper,
            adapter_name: "paper".into(),
            reason: "live execution authorized but no broker is configured; falling back to paper"
                .into(),
        };
        warn!(reason = %gate.reason, "safety gate: falling back to paper");
        Self::paper_build(paper_seed, gate)
    }

    fn paper_build(paper_seed: Option<u64>, gate: SafetyGateResult) -> AdapterBuild {
        let paper = Arc::new(PaperAdapter::new(paper_seed));
        AdapterBuild {
            adapter: paper.clone(),
            paper: Some(paper),
            gate,
        }
    }

    fn build_live(kind: BrokerKind, settings: &EnvSettings) -> Option<Arc<dyn BrokerAdapter>> {
        match kind {
            BrokerKind::Tradier => {
                let key = settings.tradier_api_key.clone()?;
                let account = settings.tradier_account_id.clone()?;
                let adapter = TradierAdapter::new(key, account, settings.tradier_sandbox);
                adapter.is_configured().then(|| {
                    Arc::new(adapter) as Arc<dyn BrokerAdapter>
                })
            }
            BrokerKind::Alpaca => {
                let key = settings.alpaca_api_key.clone()?;
                let secret = settings.alpaca_secret_key.clone()?;
                let adapter = AlpacaAdapter::new(key, secret, settings.alpaca_paper);
                adapter.is_configured().then(|| {
                    Arc::new(adapter) as Arc<dyn BrokerAdapter>
                })
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EnvSettings {
        EnvSettings {
            app_mode: ExecutionMode::Paper,
            allow_live_execution: false,
            preferred_broker: BrokerKind::Tradier,
            tradier_api_key: None,
            tradier_account_id: None,
            tradier_sandbox: true,
            alpaca_api_key: None,
            alpaca_secret_key: None,
            alpaca_paper: true,
            database_url: None,
            hmac_secret: None,
            jwt_secret: None,
            api_auth_token: None,
            market_data_provider: None,
            polygon_api_key: None,
            alpha_vantage_api_key: None,
            twelvedata_api_key: None,
            bind_addr: "127.0.0.1:0".into(),
        }
    }

    #[test]
    fn paper_mode_without_live_flags() {
        let build = AdapterFactory::build(&settings(), Some(1));
        assert_eq!(build.gate.mode, ExecutionMode::Paper);
        assert!(build.adapter.capabilities().simulated);
        assert!(build.paper.is_some());
        assert_eq!(build.gate.reason, "APP_MODE is not LIVE");
    }

    #[test]
    fn live_app_mode_without_allow_flag_stays_paper() {
        let mut s = settings();
        s.app_mode = ExecutionMode::Live;
        s.tradier_api_key = Some("key".into());
        s.tradier_account_id = Some("acct".into());

        let build = AdapterFactory::build(&s, Some(1));
        assert_eq!(build.gate.mode, ExecutionMode::Paper);
        assert!(build.adapter.capabilities().simulated);
        assert_eq!(build.gate.reason, "ALLOW_LIVE_EXECUTION is not enabled");
    }

    #[test]
    fn both_flags_with_preferred_broker() {
        let mut s = settings();
        s.app_mode = ExecutionMode::Live;
        s.allow_live_execution = true;
        s.tradier_api_key = Some("key".into());
        s.tradier_account_id = Some("acct".into());

        let build = AdapterFactory::build(&s, None);
        assert_eq!(build.gate.mode, ExecutionMode::Live);
        assert_eq!(build.adapter.capabilities().name, "tradier");
        assert!(build.paper.is_none());
    }

    #[test]
    fn falls_through_to_other_broker() {
        let mut s = settings();
        s.app_mode = ExecutionMode::Live;
        s.allow_live_execution = true;
        // Preferred (tradier) unconfigured; alpaca is.
        s.alpaca_api_key = Some("key".into());
        s.alpaca_secret_key = Some("secret".into());

        let build = AdapterFactory::build(&s, None);
        assert_eq!(build.gate.mode, ExecutionMode::Live);
        assert_eq!(build.adapter.capabilities().name, "alpaca");
        assert!(build.gate.reason.contains("unconfigured"));
    }

    #[test]
    fn no_broker_configured_falls_back_to_paper() {
        let mut s = settings();
        s.app_mode = ExecutionMode::Live;
        s.allow_live_execution = true;

        let build = AdapterFactory::build(&s, None);
        assert_eq!(build.gate.mode, ExecutionMode::Paper);
        assert!(build.adapter.capabilities().simulated);
        assert!(build.gate.reason.contains("no broker is configured"));
    }
}
