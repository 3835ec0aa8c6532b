// =============================================================================
// Atlas Options Nexus — Main Entry Point
// =============================================================================
//
// Startup is fail-safe by construction: the broker adapter comes out of the
// dual-flag safety gate, so a half-configured deployment always lands on the
// paper simulator, never on a live broker.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod broker;
mod decision;
mod error;
mod lifecycle;
mod market_data;
mod occ;
mod pipeline;
mod positions;
mod risk;
mod runtime_config;
mod store;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::{EnvSettings, RuntimeConfig};

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Atlas Options Nexus — Starting Up                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });

    let env = EnvSettings::from_env();
    info!(
        provider = env.market_data_provider.as_deref().unwrap_or("fixture"),
        polygon_key = env.polygon_api_key.is_some(),
        alpha_vantage_key = env.alpha_vantage_api_key.is_some(),
        twelvedata_key = env.twelvedata_api_key.is_some(),
        "market data configuration"
    );
    if env.hmac_secret.is_none() {
        warn!("HMAC_SECRET is not set — webhook signatures will not be enforced");
    }
    if env.jwt_secret.is_none() && env.api_auth_token.is_none() {
        warn!("neither JWT_SECRET nor API_AUTH_TOKEN is set — authenticated routes will reject everything");
    }

    // ── 2. Build shared state (store, provider, broker, decision stack) ──
    let state = Arc::new(AppState::new(env, config));

    info!(
        mode = %state.gate.mode,
        adapter = %state.gate.adapter_name,
        reason = %state.gate.reason,
        "execution mode resolved"
    );

    // ── 3. Start the API server ──────────────────────────────────────────
    let bind_addr = state.env.bind_addr.clone();
    let api_state = state.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(addr = %bind_addr, error = %e, "failed to bind API server");
                return;
            }
        };
        info!(addr = %bind_addr, "API server listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    // ── 4. Position refresh loop ─────────────────────────────────────────
    tokio::spawn(state.refresher.clone().run());

    // ── 5. Live fill poller (brokers that resolve fills by polling) ──────
    if state.positions.adapter().capabilities().requires_polling {
        tokio::spawn(state.poller.clone().run());
    } else {
        info!("fill poller not needed for this adapter");
    }

    // ── 6. Pre-market queue drain loop ───────────────────────────────────
    let drain_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let drained = drain_state.pipeline.drain_queue_if_open().await;
            if drained > 0 {
                info!(drained, "pre-market queue drained into the pipeline");
                drain_state.increment_version();
            }
        }
    });

    info!("all subsystems running; press Ctrl+C to stop");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("Atlas Options Nexus shut down complete.");
    Ok(())
}
