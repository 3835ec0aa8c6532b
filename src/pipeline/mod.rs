// =============================================================================
// Signal pipeline — six-stage intake-to-execution state machine
// =============================================================================
//
//   RECEPTION → NORMALIZATION → VALIDATION → DEDUPLICATION → DECISION →
//   EXECUTION
//
// Every transition logs `(tracking_id, stage)`. A failure is recorded
// against its signal and never propagates: batch item N failing does not
// stop item N+1. The intake half runs synchronously inside the webhook
// handler; decision and execution run after the HTTP response.
// =============================================================================

pub mod dedup;
pub mod normalizer;
pub mod queue;
pub mod validator;

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::decision::{DecisionOrchestrator, Verdict};
use crate::market_data::{MarketDataProvider, MarketSession};
use crate::pipeline::dedup::DedupCache;
use crate::pipeline::normalizer::FieldError;
use crate::pipeline::queue::SignalQueue;
use crate::pipeline::validator::ValidationVerdict;
use crate::positions::PositionManager;
use crate::runtime_config::RuntimeConfig;
use crate::store::Store;
use crate::types::{OrderType, Signal, SignalAction, SignalStatus};

/// Bounded failure ring for the dashboard.
const MAX_RECENT_FAILURES: usize = 100;

// ---------------------------------------------------------------------------
// Stage bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    Reception,
    Normalization,
    Validation,
    Deduplication,
    Decision,
    Execution,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Reception => "RECEPTION",
            Self::Normalization => "NORMALIZATION",
            Self::Validation => "VALIDATION",
            Self::Deduplication => "DEDUPLICATION",
            Self::Decision => "DECISION",
            Self::Execution => "EXECUTION",
        };
        write!(f, "{s}")
    }
}

/// One recorded pipeline failure.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineFailure {
    pub tracking_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_id: Option<String>,
    pub stage: PipelineStage,
    pub reason: String,
    pub at: chrono::DateTime<Utc>,
}

/// Synchronous intake verdict, mapped to the webhook HTTP response.
#[derive(Debug, Clone, Serialize)]
pub enum IntakeOutcome {
    /// Signal stored and cleared for decisioning.
    Accepted {
        tracking_id: String,
        signal: Signal,
    },
    /// Fingerprint seen inside the dedup window.
    Duplicate {
        tracking_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        original_signal_id: Option<String>,
    },
    /// Normalization produced field errors; nothing stored.
    Invalid {
        tracking_id: String,
        errors: Vec<FieldError>,
    },
    /// Validation rejected the signal.
    Rejected {
        tracking_id: String,
        signal_id: String,
        reasons: Vec<String>,
    },
    /// Held in the pre-market queue.
    Queued {
        tracking_id: String,
        signal_id: String,
    },
}

/// Terminal outcome of the asynchronous half.
#[derive(Debug, Clone, Serialize)]
pub enum PipelineOutcome {
    Executed {
        signal_id: String,
        decision_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        order_id: Option<String>,
    },
    DecisionRejected {
        signal_id: String,
        decision_id: String,
        kind: String,
        detail: String,
    },
    Closed {
        signal_id: String,
        closed_positions: usize,
    },
    Failed(PipelineFailure),
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct SignalPipeline {
    store: Arc<Store>,
    dedup: DedupCache,
    queue: SignalQueue,
    orchestrator: Arc<DecisionOrchestrator>,
    positions: Arc<PositionManager>,
    provider: Arc<dyn MarketDataProvider>,
    config: Arc<RwLock<RuntimeConfig>>,
    recent_failures: RwLock<Vec<PipelineFailure>>,
}

impl SignalPipeline {
    pub fn new(
        store: Arc<Store>,
        orchestrator: Arc<DecisionOrchestrator>,
        positions: Arc<PositionManager>,
        provider: Arc<dyn MarketDataProvider>,
        config: Arc<RwLock<RuntimeConfig>>,
    ) -> Self {
        let queue_params = config.read().queue.clone();
        Self {
            store,
            dedup: DedupCache::new(),
            queue: SignalQueue::new(&queue_params),
            orchestrator,
            positions,
            provider,
            config,
            recent_failures: RwLock::new(Vec::new()),
        }
    }

    fn log_stage(tracking_id: &str, stage: PipelineStage) {
        info!(tracking_id, stage = %stage, "pipeline stage");
    }

    fn record_failure(&self, failure: PipelineFailure) {
        let err = crate::error::EngineError::Pipeline {
            stage: failure.stage.to_string(),
            reason: failure.reason.clone(),
        };
        error!(
            tracking_id = %failure.tracking_id,
            error = %err,
            "pipeline failure"
        );
        let mut failures = self.recent_failures.write();
        failures.push(failure);
        while failures.len() > MAX_RECENT_FAILURES {
            failures.remove(0);
        }
    }

    pub fn recent_failures(&self) -> Vec<PipelineFailure> {
        self.recent_failures.read().clone()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    // =========================================================================
    // Synchronous intake: RECEPTION → NORMALIZATION → VALIDATION → DEDUP
    // =========================================================================

    pub fn intake(&self, raw: serde_json::Value, signature_verified: bool) -> IntakeOutcome {
        let tracking_id = Uuid::new_v4().to_string();
        let received_at = Utc::now();
        Self::log_stage(&tracking_id, PipelineStage::Reception);

        // ── NORMALIZATION ───────────────────────────────────────────────
        Self::log_stage(&tracking_id, PipelineStage::Normalization);
        let signal = match normalizer::normalize(raw, signature_verified, received_at) {
            Ok(signal) => signal,
            Err(errors) => {
                warn!(tracking_id, count = errors.len(), "normalization failed");
                return IntakeOutcome::Invalid {
                    tracking_id,
                    errors,
                };
            }
        };
        self.store.insert_signal(signal.clone());

        // ── VALIDATION ──────────────────────────────────────────────────
        Self::log_stage(&tracking_id, PipelineStage::Validation);
        let session = MarketSession::classify(received_at);
        let queue_params = self.config.read().queue.clone();
        match validator::validate(&signal, session, received_at.date_naive(), &queue_params) {
            ValidationVerdict::Reject { reasons } => {
                let _ = self.store.set_signal_status(
                    &signal.id,
                    SignalStatus::Rejected,
                    Some(reasons.join("; ")),
                );
                return IntakeOutcome::Rejected {
                    tracking_id,
                    signal_id: signal.id,
                    reasons,
                };
            }
            ValidationVerdict::Queue => {
                let _ = self.store.set_signal_status(
                    &signal.id,
                    SignalStatus::Validated,
                    Some(format!("queued during {session}")),
                );
                let mut queued = signal.clone();
                queued.status = SignalStatus::Validated;
                self.queue.offer(queued, received_at);
                return IntakeOutcome::Queued {
                    tracking_id,
                    signal_id: signal.id,
                };
            }
            ValidationVerdict::Pass => {
                let _ =
                    self.store
                        .set_signal_status(&signal.id, SignalStatus::Validated, None);
            }
        }

        // ── DEDUPLICATION ───────────────────────────────────────────────
        Self::log_stage(&tracking_id, PipelineStage::Deduplication);
        if self.dedup.check_and_set(&signal.fingerprint) {
            let original = self
                .store
                .find_signal_by_fingerprint(&signal.fingerprint, Some(&signal.id));
            let _ = self.store.set_signal_status(
                &signal.id,
                SignalStatus::Rejected,
                Some(crate::error::EngineError::Duplicate.to_string()),
            );
            return IntakeOutcome::Duplicate {
                tracking_id,
                original_signal_id: original.map(|s| s.id),
            };
        }

        IntakeOutcome::Accepted {
            tracking_id,
            signal,
        }
    }

    // =========================================================================
    // Asynchronous half: DECISION → EXECUTION
    // =========================================================================

    pub async fn decide_and_execute(
        &self,
        tracking_id: &str,
        signal: Signal,
    ) -> PipelineOutcome {
        Self::log_stage(tracking_id, PipelineStage::Decision);
        if let Err(e) =
            self.store
                .set_signal_status(&signal.id, SignalStatus::Processing, None)
        {
            // Already terminal (e.g. a replayed queue entry): record, move on.
            let failure = PipelineFailure {
                tracking_id: tracking_id.to_string(),
                signal_id: Some(signal.id.clone()),
                stage: PipelineStage::Decision,
                reason: e.to_string(),
                at: Utc::now(),
            };
            self.record_failure(failure.clone());
            return PipelineOutcome::Failed(failure);
        }

        if signal.action == SignalAction::Close {
            return self.execute_close(tracking_id, &signal).await;
        }

        let decision = self.orchestrator.orchestrate_entry_decision(&signal).await;

        if decision.verdict == Verdict::Reject {
            let reject = decision
                .reject
                .clone()
                .unwrap_or_else(|| crate::decision::RejectReason {
                    kind: "UNKNOWN".into(),
                    detail: "rejected without a reason".into(),
                });
            let _ = self.store.set_signal_status(
                &signal.id,
                SignalStatus::Rejected,
                Some(format!("{}: {}", reject.kind, reject.detail)),
            );
            return PipelineOutcome::DecisionRejected {
                signal_id: signal.id.clone(),
                decision_id: decision.decision_id,
                kind: reject.kind,
                detail: reject.detail,
            };
        }

        // ── EXECUTION ───────────────────────────────────────────────────
        Self::log_stage(tracking_id, PipelineStage::Execution);

        let entry_price = match self.resolve_entry_price(&signal, decision.entry_price).await {
            Some(price) => price,
            None => {
                let failure = PipelineFailure {
                    tracking_id: tracking_id.to_string(),
                    signal_id: Some(signal.id.clone()),
                    stage: PipelineStage::Execution,
                    reason: "no entry price resolvable from metadata or quotes".into(),
                    at: Utc::now(),
                };
                let _ = self.store.set_signal_status(
                    &signal.id,
                    SignalStatus::Failed,
                    Some(failure.reason.clone()),
                );
                self.record_failure(failure.clone());
                return PipelineOutcome::Failed(failure);
            }
        };

        match self
            .positions
            .open_position(
                &signal,
                decision.quantity,
                entry_price,
                decision.regime_at_entry,
                None,
            )
            .await
        {
            Ok(order) => {
                let _ = self
                    .store
                    .set_signal_status(&signal.id, SignalStatus::Completed, None);
                info!(
                    tracking_id,
                    signal_id = %signal.id,
                    decision_id = %decision.decision_id,
                    order_id = %order.id,
                    "signal executed"
                );
                PipelineOutcome::Executed {
                    signal_id: signal.id.clone(),
                    decision_id: decision.decision_id,
                    order_id: Some(order.id),
                }
            }
            Err(e) => {
                let failure = PipelineFailure {
                    tracking_id: tracking_id.to_string(),
                    signal_id: Some(signal.id.clone()),
                    stage: PipelineStage::Execution,
                    reason: e.to_string(),
                    at: Utc::now(),
                };
                let _ = self.store.set_signal_status(
                    &signal.id,
                    SignalStatus::Failed,
                    Some(failure.reason.clone()),
                );
                self.record_failure(failure.clone());
                PipelineOutcome::Failed(failure)
            }
        }
    }

    /// Entry-price resolution order: payload metadata fields, then the
    /// decision's quoted price, then a live option quote.
    async fn resolve_entry_price(
        &self,
        signal: &Signal,
        decision_price: Option<f64>,
    ) -> Option<f64> {
        const PRICE_FIELDS: [&str; 7] = [
            "price",
            "entryPrice",
            "limit_price",
            "last",
            "close",
            "current_price",
            "underlying_price",
        ];
        for field in PRICE_FIELDS {
            if let Some(v) = signal.raw_payload.get(field) {
                let parsed = v
                    .as_f64()
                    .or_else(|| v.as_str().and_then(|s| s.parse().ok()));
                if let Some(price) = parsed {
                    if price > 0.0 {
                        return Some(price);
                    }
                }
            }
        }
        if let Some(price) = decision_price {
            if price > 0.0 {
                return Some(price);
            }
        }
        // Last resort: a fresh quote for the contract.
        let (strike, expiration, option_type) =
            (signal.strike?, signal.expiration?, signal.option_type?);
        let occ =
            crate::occ::encode(&signal.symbol, expiration, option_type, strike).ok()?;
        self.provider
            .option_quote(&occ)
            .await
            .ok()
            .map(|q| q.mid())
            .filter(|mid| *mid > 0.0)
    }

    /// CLOSE signals bypass entry orchestration: flatten the matching open
    /// position at market.
    async fn execute_close(&self, tracking_id: &str, signal: &Signal) -> PipelineOutcome {
        Self::log_stage(tracking_id, PipelineStage::Execution);

        let targets: Vec<_> = self
            .store
            .open_positions()
            .into_iter()
            .filter(|p| p.underlying == signal.symbol)
            .filter(|p| match (signal.strike, signal.option_type) {
                (Some(strike), Some(ot)) => {
                    (p.strike - strike).abs() < 1e-9 && p.option_type == ot
                }
                _ => true,
            })
            .collect();

        if targets.is_empty() {
            let _ = self.store.set_signal_status(
                &signal.id,
                SignalStatus::Completed,
                Some("no open position to close".into()),
            );
            return PipelineOutcome::Closed {
                signal_id: signal.id.clone(),
                closed_positions: 0,
            };
        }

        let mut closed = 0;
        for position in targets {
            let price = match self.provider.option_quote(&position.symbol).await {
                Ok(q) => q.mid(),
                Err(_) => position.current_price,
            };
            match self
                .positions
                .close_position(
                    &position,
                    position.quantity.unsigned_abs(),
                    OrderType::Market,
                    price,
                    "close signal",
                )
                .await
            {
                Ok(_) => closed += 1,
                Err(e) => {
                    warn!(
                        tracking_id,
                        position_id = %position.id,
                        error = %e,
                        "close signal failed for position"
                    );
                }
            }
        }

        let _ = self
            .store
            .set_signal_status(&signal.id, SignalStatus::Completed, None);
        PipelineOutcome::Closed {
            signal_id: signal.id.clone(),
            closed_positions: closed,
        }
    }

    // =========================================================================
    // Batch + queue drain
    // =========================================================================

    /// Process a batch of raw payloads with per-item error isolation.
    pub async fn process_batch(
        &self,
        items: Vec<(serde_json::Value, bool)>,
    ) -> Vec<PipelineOutcome> {
        let mut outcomes = Vec::with_capacity(items.len());
        for (raw, verified) in items {
            match self.intake(raw, verified) {
                IntakeOutcome::Accepted {
                    tracking_id,
                    signal,
                } => {
                    outcomes.push(self.decide_and_execute(&tracking_id, signal).await);
                }
                IntakeOutcome::Duplicate { tracking_id, .. } => {
                    outcomes.push(PipelineOutcome::Failed(PipelineFailure {
                        tracking_id,
                        signal_id: None,
                        stage: PipelineStage::Deduplication,
                        reason: "DUPLICATE".into(),
                        at: Utc::now(),
                    }));
                }
                IntakeOutcome::Invalid { tracking_id, errors } => {
                    outcomes.push(PipelineOutcome::Failed(PipelineFailure {
                        tracking_id,
                        signal_id: None,
                        stage: PipelineStage::Normalization,
                        reason: errors
                            .iter()
                            .map(|e| format!("{}: {}", e.field, e.message))
                            .collect::<Vec<_>>()
                            .join("; "),
                        at: Utc::now(),
                    }));
                }
                IntakeOutcome::Rejected {
                    tracking_id,
                    signal_id,
                    reasons,
                } => {
                    outcomes.push(PipelineOutcome::Failed(PipelineFailure {
                        tracking_id,
                        signal_id: Some(signal_id),
                        stage: PipelineStage::Validation,
                        reason: reasons.join("; "),
                        at: Utc::now(),
                    }));
                }
                IntakeOutcome::Queued {
                    tracking_id,
                    signal_id,
                } => {
                    info!(tracking_id, signal_id, "batch item queued for session open");
                }
            }
        }
        outcomes
    }

    /// Drain queued pre-market signals into DECISION once the session
    /// opens. Returns how many signals re-entered the pipeline.
    pub async fn drain_queue_if_open(&self) -> usize {
        let now = Utc::now();
        let session = MarketSession::classify(now);
        if !matches!(session, MarketSession::Opening | MarketSession::Morning) {
            return 0;
        }
        let drained = self.queue.drain(now);
        let count = drained.len();
        for signal in drained {
            let tracking_id = Uuid::new_v4().to_string();
            info!(
                tracking_id,
                signal_id = %signal.id,
                "queued signal re-entering pipeline at DECISION"
            );
            let _ = self.decide_and_execute(&tracking_id, signal).await;
        }
        count
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::paper::PaperAdapter;
    use crate::decision::regime::RegimeTracker;
    use crate::market_data::fixture::FixtureProvider;
    use crate::market_data::{MarketContext, MtfTrend};
    use crate::risk::RiskEngine;
    use crate::store::RiskLimitsRow;
    use crate::types::{Direction, ExecutionMode, MarketRegime};
    use chrono::Duration;

    struct Harness {
        pipeline: SignalPipeline,
        store: Arc<Store>,
        provider: Arc<FixtureProvider>,
        tracker: Arc<RegimeTracker>,
        config: Arc<RwLock<RuntimeConfig>>,
    }

    fn harness() -> Harness {
        let store = Arc::new(Store::new(RiskLimitsRow {
            max_open_positions: 5,
            max_trades_per_day: 25,
            max_daily_loss: 1500.0,
            risk_pct_per_trade: 0.02,
        }));
        let provider = Arc::new(FixtureProvider::new());
        let provider_dyn: Arc<dyn MarketDataProvider> = provider.clone();
        let tracker = Arc::new(RegimeTracker::new());
        let config = Arc::new(RwLock::new(RuntimeConfig::default()));
        let risk = Arc::new(RiskEngine::new(store.clone()));
        let orchestrator = Arc::new(DecisionOrchestrator::new(
            store.clone(),
            provider_dyn.clone(),
            tracker.clone(),
            risk,
            config.clone(),
        ));
        let paper = Arc::new(PaperAdapter::new(Some(42)));
        let positions = Arc::new(PositionManager::new(
            store.clone(),
            paper.clone(),
            Some(paper),
            ExecutionMode::Paper,
        ));
        let pipeline = SignalPipeline::new(
            store.clone(),
            orchestrator,
            positions,
            provider_dyn,
            config.clone(),
        );
        Harness {
            pipeline,
            store,
            provider,
            tracker,
            config,
        }
    }

    fn payload(ts: &str) -> serde_json::Value {
        let expiration = (Utc::now() + Duration::days(400))
            .date_naive()
            .format("%Y-%m-%d")
            .to_string();
        serde_json::json!({
            "source": "ultimate-option",
            "ticker": "SPY",
            "action": "BUY",
            "type": "CALL",
            "strike": 500.0,
            "expiration": expiration,
            "qty": 1,
            "price": 3.0,
            "ts": ts,
        })
    }

    fn in_session_context(symbol: &str) -> MarketContext {
        MarketContext {
            symbol: symbol.into(),
            session: crate::market_data::MarketSession::Morning,
            vix: Some(17.0),
            market_bias: Some(Direction::Bullish),
            atr: Some(0.30),
            atr_percentile: Some(50.0),
            or_breakout: None,
            near_resistance: false,
            near_support: false,
            candle_alignment: None,
            candle_strength: 0.0,
            bb_overbought: false,
            bb_oversold: false,
            stale_sources: Vec::new(),
            as_of: Utc::now(),
        }
    }

    fn warm(h: &Harness, symbol: &str) {
        let cfg = h.config.read().clone();
        let t0 = Utc::now() - Duration::seconds(1000);
        h.tracker
            .observe(symbol, MarketRegime::TrendingUp, 0.9, t0, &cfg.regime);
        h.tracker.observe(
            symbol,
            MarketRegime::TrendingUp,
            0.9,
            t0 + Duration::seconds(500),
            &cfg.regime,
        );
        h.provider.set_market_context(in_session_context(symbol));
        h.provider.set_mtf_trend(MtfTrend {
            symbol: symbol.into(),
            bias: Direction::Bullish,
            alignment_score: 85.0,
            conflict: false,
            as_of: Utc::now(),
        });
        // Corroborating completed signal for two-source confluence.
        let mut prior = normalizer::tests_support::minimal_signal(symbol);
        prior.source = crate::types::SignalSource::MtfTrendDots;
        prior.status = SignalStatus::Completed;
        h.store.insert_signal(prior);
    }

    // Intake is session-dependent; drive the async half directly so the
    // tests hold regardless of wall-clock session.
    fn accepted_signal(h: &Harness, ts: &str) -> Signal {
        let signal =
            normalizer::normalize(payload(ts), true, Utc::now()).expect("payload normalizes");
        h.store.insert_signal(signal.clone());
        h.store
            .set_signal_status(&signal.id, SignalStatus::Validated, None)
            .unwrap();
        signal
    }

    #[tokio::test]
    async fn full_pipeline_executes_and_completes_signal() {
        let h = harness();
        warm(&h, "SPY");

        let signal = accepted_signal(&h, "2027-01-05T15:00:00Z");
        let outcome = h.pipeline.decide_and_execute("t-1", signal.clone()).await;

        match outcome {
            PipelineOutcome::Executed { order_id, .. } => {
                assert!(order_id.is_some());
            }
            other => panic!("expected Executed, got {other:?}"),
        }
        // The signal must land on a terminal status.
        assert_eq!(
            h.store.get_signal(&signal.id).unwrap().status,
            SignalStatus::Completed
        );
        assert_eq!(h.store.open_positions().len(), 1);
    }

    #[tokio::test]
    async fn decision_reject_marks_signal_rejected() {
        let h = harness();
        // No regime warm-up: the stability gate rejects.
        h.provider.set_market_context(in_session_context("SPY"));

        let signal = accepted_signal(&h, "2027-01-05T15:10:00Z");
        let outcome = h.pipeline.decide_and_execute("t-2", signal.clone()).await;

        match outcome {
            PipelineOutcome::DecisionRejected { kind, .. } => {
                assert_eq!(kind, "REGIME_UNSTABLE");
            }
            other => panic!("expected DecisionRejected, got {other:?}"),
        }
        assert_eq!(
            h.store.get_signal(&signal.id).unwrap().status,
            SignalStatus::Rejected
        );
    }

    #[tokio::test]
    async fn dedup_blocks_second_copy_within_window() {
        let h = harness();
        // Two intakes with the same payload timestamp produce the same
        // fingerprint; the dedup cache admits exactly one.
        let a = normalizer::normalize(payload("2027-01-05T15:20:00Z"), true, Utc::now()).unwrap();
        let b = normalizer::normalize(payload("2027-01-05T15:20:00Z"), true, Utc::now()).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert!(!h.pipeline.dedup.check_and_set(&a.fingerprint));
        assert!(h.pipeline.dedup.check_and_set(&b.fingerprint));
    }

    #[tokio::test]
    async fn close_signal_flattens_position() {
        let h = harness();
        warm(&h, "SPY");

        let signal = accepted_signal(&h, "2027-01-05T15:30:00Z");
        h.pipeline.decide_and_execute("t-3", signal).await;
        assert_eq!(h.store.open_positions().len(), 1);

        let mut close = normalizer::normalize(
            serde_json::json!({
                "source": "ultimate-option",
                "ticker": "SPY",
                "action": "EXIT",
                "ts": "2027-01-05T15:40:00Z",
            }),
            true,
            Utc::now(),
        )
        .unwrap();
        h.store.insert_signal(close.clone());
        h.store
            .set_signal_status(&close.id, SignalStatus::Validated, None)
            .unwrap();
        close.status = SignalStatus::Validated;

        let outcome = h.pipeline.decide_and_execute("t-4", close).await;
        match outcome {
            PipelineOutcome::Closed {
                closed_positions, ..
            } => assert_eq!(closed_positions, 1),
            other => panic!("expected Closed, got {other:?}"),
        }
        assert!(h.store.open_positions().is_empty());
    }

    #[tokio::test]
    async fn batch_isolates_failures() {
        let h = harness();
        warm(&h, "SPY");

        // Item 1 is garbage; item 2 is fine. The bad item must not stop
        // the good one.
        let signals = vec![
            (serde_json::json!({ "action": "HODL" }), true),
            (payload("2027-01-05T15:50:00Z"), true),
        ];
        let outcomes = h.pipeline.process_batch(signals).await;
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], PipelineOutcome::Failed(_)));
        // Second item's fate depends on the live session clock (it may be
        // queued out of session), but it must not be a normalization
        // failure.
        if let PipelineOutcome::Failed(f) = &outcomes[1] {
            assert_ne!(f.stage, PipelineStage::Normalization);
        }
        assert!(!h.pipeline.recent_failures().is_empty());
    }

    #[tokio::test]
    async fn entry_price_resolution_priority() {
        let h = harness();
        let mut signal = normalizer::tests_support::minimal_signal("SPY");
        signal.raw_payload = serde_json::json!({
            "price": 2.50,
            "last": 9.99,
        });
        let price = h.pipeline.resolve_entry_price(&signal, Some(1.0)).await;
        assert_eq!(price, Some(2.50));

        signal.raw_payload = serde_json::json!({ "close": "1.75" });
        let price = h.pipeline.resolve_entry_price(&signal, Some(1.0)).await;
        assert_eq!(price, Some(1.75));

        // No metadata: falls to the decision's quoted price.
        signal.raw_payload = serde_json::json!({});
        let price = h.pipeline.resolve_entry_price(&signal, Some(1.23)).await;
        assert_eq!(price, Some(1.23));
    }
}
