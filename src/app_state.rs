// =============================================================================
// Central application state — the engine's wiring diagram
// =============================================================================
//
// Single source of truth shared across the HTTP handlers and the background
// loops via `Arc<AppState>`. Subsystems are constructed here, in dependency
// order: store → provider (cached) → broker (through the safety gate) →
// risk/regime/orchestrator → position manager → pipeline → workers.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::info;

use crate::broker::factory::{AdapterFactory, SafetyGateResult};
use crate::decision::regime::RegimeTracker;
use crate::decision::DecisionOrchestrator;
use crate::lifecycle::poller::FillPoller;
use crate::lifecycle::refresher::PositionRefresher;
use crate::market_data::cache::ProviderCache;
use crate::market_data::fixture::FixtureProvider;
use crate::market_data::http::PolygonProvider;
use crate::market_data::MarketDataProvider;
use crate::pipeline::SignalPipeline;
use crate::positions::PositionManager;
use crate::risk::RiskEngine;
use crate::runtime_config::{EnvSettings, RuntimeConfig};
use crate::store::{RiskLimitsRow, Store};

pub struct AppState {
    pub env: EnvSettings,
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub store: Arc<Store>,
    pub provider: Arc<dyn MarketDataProvider>,
    pub orchestrator: Arc<DecisionOrchestrator>,
    pub positions: Arc<PositionManager>,
    pub pipeline: Arc<SignalPipeline>,
    pub refresher: Arc<PositionRefresher>,
    pub poller: Arc<FillPoller>,
    pub gate: SafetyGateResult,

    /// Monotonically increasing version counter, bumped on every meaningful
    /// mutation; dashboards diff against it.
    pub state_version: AtomicU64,
    pub last_activity: RwLock<Option<DateTime<Utc>>>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(env: EnvSettings, config: RuntimeConfig) -> Self {
        let runtime_config = Arc::new(RwLock::new(config.clone()));

        // ── Store ───────────────────────────────────────────────────────
        let store = Arc::new(Store::new(RiskLimitsRow {
            max_open_positions: config.risk.max_open_positions,
            max_trades_per_day: config.risk.max_trades_per_day,
            max_daily_loss: config.risk.max_daily_loss,
            risk_pct_per_trade: config.sizing.risk_pct_per_trade,
        }));

        // ── Market data (vendor behind the TTL/coalescing cache) ────────
        let vendor: Arc<dyn MarketDataProvider> = match (
            env.market_data_provider.as_deref(),
            env.polygon_api_key.as_deref(),
        ) {
            (Some("polygon"), Some(key)) => {
                info!("market data: polygon");
                Arc::new(PolygonProvider::new(key))
            }
            _ => {
                info!("market data: deterministic fixture provider");
                Arc::new(FixtureProvider::new())
            }
        };
        let provider: Arc<dyn MarketDataProvider> = Arc::new(ProviderCache::new(vendor));

        // ── Broker (dual-flag safety gate) ──────────────────────────────
        let build = AdapterFactory::build(&env, None);
        let gate = build.gate.clone();
        info!(
            mode = %gate.mode,
            adapter = %gate.adapter_name,
            reason = %gate.reason,
            "broker adapter selected"
        );

        // ── Decision stack ──────────────────────────────────────────────
        let regime_tracker = Arc::new(RegimeTracker::new());
        let risk_engine = Arc::new(RiskEngine::new(store.clone()));
        let orchestrator = Arc::new(DecisionOrchestrator::new(
            store.clone(),
            provider.clone(),
            regime_tracker,
            risk_engine,
            runtime_config.clone(),
        ));

        // ── Execution & lifecycle ───────────────────────────────────────
        let positions = Arc::new(PositionManager::new(
            store.clone(),
            build.adapter,
            build.paper,
            gate.mode,
        ));
        let pipeline = Arc::new(SignalPipeline::new(
            store.clone(),
            orchestrator.clone(),
            positions.clone(),
            provider.clone(),
            runtime_config.clone(),
        ));
        let refresher = Arc::new(PositionRefresher::new(
            store.clone(),
            positions.clone(),
            provider.clone(),
            orchestrator.clone(),
            runtime_config.clone(),
        ));
        let poller = Arc::new(FillPoller::new(
            store.clone(),
            positions.clone(),
            runtime_config.clone(),
        ));

        Self {
            env,
            runtime_config,
            store,
            provider,
            orchestrator,
            positions,
            pipeline,
            refresher,
            poller,
            gate,
            state_version: AtomicU64::new(1),
            last_activity: RwLock::new(None),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    pub fn touch_activity(&self) {
        *self.last_activity.write() = Some(Utc::now());
    }

    pub fn uptime_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }
}
