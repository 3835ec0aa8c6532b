// =============================================================================
// Regime stability tracker — flip-cooldown gating per ticker
// =============================================================================
//
// Every GEX refresh feeds one observation per ticker. Consecutive same-regime
// observations build stability; a flip resets the counters and starts the
// cooldown clock. Entries stay blocked until cooldown, consecutive count,
// and classification confidence all clear — any doubt blocks.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::runtime_config::RegimeParams;
use crate::store::RegimeHistoryRow;
use crate::types::MarketRegime;

/// Stability score at or above this counts as stable.
const STABLE_SCORE_FLOOR: f64 = 60.0;

#[derive(Debug, Clone)]
struct TickerState {
    regime: MarketRegime,
    confidence: f64,
    consecutive: u32,
    regime_started_at: DateTime<Utc>,
    last_flip_at: DateTime<Utc>,
}

/// Snapshot of one ticker's gate state, recomputed against `now`.
#[derive(Debug, Clone, Serialize)]
pub struct RegimeAssessment {
    pub ticker: String,
    pub regime: MarketRegime,
    pub confidence: f64,
    pub consecutive: u32,
    pub time_in_regime_secs: i64,
    pub seconds_since_flip: i64,
    /// 0–100 composite stability score.
    pub stability_score: f64,
    pub is_stable: bool,
    pub can_trade: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl RegimeAssessment {
    /// Row shape appended to `regime_history`.
    pub fn to_history_row(&self) -> RegimeHistoryRow {
        RegimeHistoryRow {
            ticker: self.ticker.clone(),
            regime: self.regime,
            regime_confidence: self.confidence,
            consecutive_same_regime: self.consecutive,
            time_in_regime_seconds: self.time_in_regime_secs,
            last_flip_timestamp: self.checked_at
                - chrono::Duration::seconds(self.seconds_since_flip),
            stability_score: self.stability_score,
            is_stable: self.is_stable,
            can_trade: self.can_trade,
            block_reason: self.block_reason.clone(),
            checked_at: self.checked_at,
        }
    }
}

pub struct RegimeTracker {
    states: RwLock<HashMap<String, TickerState>>,
}

impl RegimeTracker {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Feed one regime observation for `ticker` and return the resulting
    /// assessment.
    pub fn observe(
        &self,
        ticker: &str,
        regime: MarketRegime,
        confidence: f64,
        now: DateTime<Utc>,
        params: &RegimeParams,
    ) -> RegimeAssessment {
        use std::collections::hash_map::Entry;

        let mut states = self.states.write();

        let state = match states.entry(ticker.to_string()) {
            Entry::Occupied(entry) => {
                let state = entry.into_mut();
                if state.regime == regime {
                    state.consecutive += 1;
                    state.confidence = confidence;
                } else {
                    info!(
                        ticker,
                        from = %state.regime,
                        to = %regime,
                        after_secs = (now - state.regime_started_at).num_seconds(),
                        "regime flip"
                    );
                    state.regime = regime;
                    state.confidence = confidence;
                    state.consecutive = 1;
                    state.regime_started_at = now;
                    state.last_flip_at = now;
                }
                state
            }
            // First sighting counts as a flip: the cooldown applies from
            // first contact rather than granting instant trust.
            Entry::Vacant(entry) => entry.insert(TickerState {
                regime,
                confidence,
                consecutive: 1,
                regime_started_at: now,
                last_flip_at: now,
            }),
        };

        let assessment = Self::assess_state(ticker, state, now, params);
        debug!(
            ticker,
            regime = %assessment.regime,
            consecutive = assessment.consecutive,
            score = format!("{:.1}", assessment.stability_score),
            can_trade = assessment.can_trade,
            "regime observation"
        );
        assessment
    }

    /// Recompute the gate against `now` without a new observation (cooldowns
    /// keep elapsing between GEX refreshes).
    pub fn assess(
        &self,
        ticker: &str,
        now: DateTime<Utc>,
        params: &RegimeParams,
    ) -> Option<RegimeAssessment> {
        let states = self.states.read();
        states
            .get(ticker)
            .map(|state| Self::assess_state(ticker, state, now, params))
    }

    fn assess_state(
        ticker: &str,
        state: &TickerState,
        now: DateTime<Utc>,
        params: &RegimeParams,
    ) -> RegimeAssessment {
        let time_in_regime_secs = (now - state.regime_started_at).num_seconds().max(0);
        let seconds_since_flip = (now - state.last_flip_at).num_seconds().max(0);
        let cooldown = params.flip_cooldown_secs.max(1);

        // Composite score: consecutive observations, dwell time, confidence,
        // minus a decaying flip penalty.
        let consec_component = (state.consecutive as f64 * 10.0).min(30.0);
        let dwell_component = (time_in_regime_secs as f64 / 600.0 * 30.0).min(30.0);
        let confidence_component = state.confidence * 40.0;
        let flip_penalty =
            ((1.0 - seconds_since_flip as f64 / cooldown as f64) * 30.0).max(0.0);
        let stability_score =
            (consec_component + dwell_component + confidence_component - flip_penalty)
                .clamp(0.0, 100.0);

        // ── Gate ────────────────────────────────────────────────────────
        let mut block_reason = None;
        if state.regime == MarketRegime::Unknown {
            block_reason = Some("regime UNKNOWN".to_string());
        } else if seconds_since_flip < params.flip_cooldown_secs {
            block_reason = Some(format!(
                "flip cooldown: {seconds_since_flip}s of {}s elapsed",
                params.flip_cooldown_secs
            ));
        } else if state.consecutive < params.min_consecutive {
            block_reason = Some(format!(
                "only {} consecutive observation(s); need {}",
                state.consecutive, params.min_consecutive
            ));
        } else if state.confidence < params.min_confidence {
            block_reason = Some(format!(
                "regime confidence {:.2} below {:.2}",
                state.confidence, params.min_confidence
            ));
        }

        RegimeAssessment {
            ticker: ticker.to_string(),
            regime: state.regime,
            confidence: state.confidence,
            consecutive: state.consecutive,
            time_in_regime_secs,
            seconds_since_flip,
            stability_score,
            is_stable: stability_score >= STABLE_SCORE_FLOOR,
            can_trade: block_reason.is_none(),
            block_reason,
            checked_at: now,
        }
    }
}

impl Default for RegimeTracker {
    fn default() -> Self {
        Self::new()
    }
}
