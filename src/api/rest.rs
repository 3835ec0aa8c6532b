// =============================================================================
// REST API endpoints — Axum 0.7
// =============================================================================
//
// `/health` is public. `/webhook` authenticates with the HMAC signature
// gate. Everything else requires a Bearer token (JWT or static) via the
// `AuthBearer` extractor.
//
// The webhook handler runs the synchronous pipeline half (through dedup)
// and answers immediately; decision and execution continue on a spawned
// task.
// =============================================================================

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::{verify_webhook_signature, AuthBearer};
use crate::app_state::AppState;
use crate::pipeline::IntakeOutcome;

/// Header carrying the webhook HMAC signature.
const SIGNATURE_HEADER: &str = "x-webhook-signature";

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/health", get(health))
        // ── Signal ingress (HMAC-gated) ─────────────────────────────
        .route("/webhook", post(webhook))
        // ── Triggers (Bearer-gated) ─────────────────────────────────
        .route("/paper-trading", post(paper_trading))
        .route("/refresh-positions", post(refresh_positions))
        // ── Read-only projections (Bearer-gated) ────────────────────
        .route("/positions", get(positions))
        .route("/orders", get(orders))
        .route("/trades", get(trades))
        .route("/signals", get(signals))
        .route("/risk-limits", get(risk_limits))
        .route("/risk-violations", get(risk_violations))
        .route("/exit-signals", get(exit_signals))
        .route("/stats", get(stats))
        .route("/analytics", get(analytics))
        // ── Middleware & state ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    mode: String,
    uptime_ms: u128,
    database: DatabaseHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_activity: Option<chrono::DateTime<chrono::Utc>>,
    safety_gate: String,
}

#[derive(Serialize)]
struct DatabaseHealth {
    connected: bool,
    configured: bool,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        mode: state.gate.mode.to_string(),
        uptime_ms: state.uptime_ms(),
        database: DatabaseHealth {
            // The in-process store is always reachable; `configured`
            // reports whether an external DSN was provided.
            connected: true,
            configured: state.env.database_url.is_some(),
        },
        last_activity: *state.last_activity.read(),
        safety_gate: state.gate.reason.clone(),
    })
}

// =============================================================================
// Webhook ingress
// =============================================================================

async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    state.touch_activity();

    // ── HMAC gate ───────────────────────────────────────────────────────
    let signature_verified = match &state.env.hmac_secret {
        Some(secret) => {
            let presented = headers
                .get(SIGNATURE_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if !verify_webhook_signature(secret, &body, presented) {
                let err = crate::error::EngineError::HmacInvalid;
                warn!(error = %err, "webhook rejected");
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(serde_json::json!({ "error": err.kind() })),
                )
                    .into_response();
            }
            true
        }
        None => {
            warn!("HMAC_SECRET not configured; accepting unsigned webhook");
            false
        }
    };

    // ── Parse ───────────────────────────────────────────────────────────
    let raw: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": "invalid JSON body",
                    "detail": e.to_string(),
                })),
            )
                .into_response();
        }
    };

    // ── Synchronous pipeline half ───────────────────────────────────────
    let outcome = state.pipeline.intake(raw, signature_verified);
    state.increment_version();

    match outcome {
        IntakeOutcome::Accepted {
            tracking_id,
            signal,
        } => {
            let signal_id = signal.id.clone();
            // Decision + execution continue after the response.
            let task_state = state.clone();
            let task_tracking = tracking_id.clone();
            tokio::spawn(async move {
                let _ = task_state
                    .pipeline
                    .decide_and_execute(&task_tracking, signal)
                    .await;
                task_state.increment_version();
            });
            Json(serde_json::json!({
                "status": "ACCEPTED",
                "request_id": tracking_id,
                "signal_id": signal_id,
            }))
            .into_response()
        }
        IntakeOutcome::Queued {
            tracking_id,
            signal_id,
        } => Json(serde_json::json!({
            "status": "ACCEPTED",
            "queued": true,
            "request_id": tracking_id,
            "signal_id": signal_id,
        }))
        .into_response(),
        IntakeOutcome::Duplicate {
            tracking_id,
            original_signal_id,
        } => Json(serde_json::json!({
            "status": "DUPLICATE",
            "request_id": tracking_id,
            "signal_id": original_signal_id,
        }))
        .into_response(),
        IntakeOutcome::Invalid {
            tracking_id,
            errors,
        } => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "request_id": tracking_id,
                "validation_errors": errors,
            })),
        )
            .into_response(),
        IntakeOutcome::Rejected {
            tracking_id,
            signal_id,
            reasons,
        } => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "request_id": tracking_id,
                "signal_id": signal_id,
                "validation_errors": reasons,
            })),
        )
            .into_response(),
    }
}

// =============================================================================
// Triggers
// =============================================================================

async fn paper_trading(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let executed = state
        .positions
        .execute_pending_paper(&state.provider)
        .await;
    state.increment_version();
    info!(executed, "paper-trading trigger");
    Json(serde_json::json!({
        "success": true,
        "executed": executed,
        "message": format!("{executed} resting paper order(s) executed"),
    }))
}

async fn refresh_positions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let summary = state.refresher.cycle().await;
    state.increment_version();
    Json(serde_json::json!({
        "refreshed": summary.refreshed,
        "exit_signals_count": summary.exit_signals_count,
        "closed": summary.closed,
        "skipped": summary.skipped,
    }))
}

// =============================================================================
// Read-only projections
// =============================================================================

const PROJECTION_LIMIT: usize = 200;

async fn positions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.store.all_positions(PROJECTION_LIMIT))
}

async fn orders(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.recent_orders(PROJECTION_LIMIT))
}

async fn trades(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.recent_trades(PROJECTION_LIMIT))
}

async fn signals(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.recent_signals(PROJECTION_LIMIT))
}

async fn risk_limits(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "limits": state.store.risk_limits(),
        "vix_sizing_rules": state.store.vix_sizing_rules(),
    }))
}

async fn risk_violations(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.store.risk_violations(PROJECTION_LIMIT))
}

async fn exit_signals(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.refresher.recent_exit_signals(PROJECTION_LIMIT))
}

#[derive(Serialize)]
struct StatsResponse {
    total_trades: usize,
    win_rate: f64,
    total_net_pnl: f64,
    profit_factor: f64,
    open_positions: usize,
    queued_signals: usize,
}

fn journal_stats(state: &AppState) -> StatsResponse {
    let closed = state.store.closed_positions(500);
    let total_trades = closed.len();
    let wins = closed.iter().filter(|p| p.realized_pnl > 0.0).count();
    let win_rate = if total_trades > 0 {
        wins as f64 / total_trades as f64
    } else {
        0.0
    };
    let total_net_pnl: f64 = closed.iter().map(|p| p.realized_pnl).sum();
    let gross_profit: f64 = closed
        .iter()
        .filter(|p| p.realized_pnl > 0.0)
        .map(|p| p.realized_pnl)
        .sum();
    let gross_loss: f64 = closed
        .iter()
        .filter(|p| p.realized_pnl < 0.0)
        .map(|p| p.realized_pnl.abs())
        .sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    StatsResponse {
        total_trades,
        win_rate,
        total_net_pnl,
        profit_factor,
        open_positions: state.store.open_positions().len(),
        queued_signals: state.pipeline.queued_count(),
    }
}

async fn stats(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(journal_stats(&state))
}

async fn analytics(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let stats = journal_stats(&state);
    Json(serde_json::json!({
        "state_version": state.current_state_version(),
        "stats": stats,
        "recent_decisions": state.orchestrator.recent_decisions(50),
        "pipeline_failures": state.pipeline.recent_failures(),
        "adapter_logs": state.store.adapter_logs(50),
        "market_context": state.store.market_context_rows(),
        "safety_gate": state.gate.clone(),
    }))
}
