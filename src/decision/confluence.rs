// =============================================================================
// Confluence engine — cross-source agreement scoring
// =============================================================================
//
// Each vendor carries a fixed weight reflecting its historical signal
// quality. Recent COMPLETED signals for the ticker vote by direction; the
// approval rule and a tiered confidence boost come out the other side.
//
// Fail-open: when the signal history cannot be read, the current signal
// approves alone with a warning flag. A data outage must not silence the
// desk.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::runtime_config::ConfluenceParams;
use crate::store::Store;
use crate::types::{Direction, Signal, SignalSource};

/// Per-source weights. Order matches descending signal quality.
pub fn source_weight(source: SignalSource) -> f64 {
    match source {
        SignalSource::UltimateOption => 1.6,
        SignalSource::MtfTrendDots => 1.5,
        SignalSource::StratEngineV6 => 1.4,
        SignalSource::TwelvedataTechnical => 1.4,
        SignalSource::OrbBhchStretch => 1.3,
        SignalSource::OrbBhchOrb => 1.0,
        SignalSource::SatyPhase => 0.8,
        SignalSource::Tradingview => 0.7,
        SignalSource::OrbBhchEma => 0.5,
        SignalSource::OrbBhchBhch => 0.4,
        SignalSource::Unknown => 0.3,
    }
}

/// Sources whose agreement satisfies `require_primary_source`.
pub fn is_primary(source: SignalSource) -> bool {
    matches!(
        source,
        SignalSource::UltimateOption | SignalSource::MtfTrendDots | SignalSource::StratEngineV6
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfluenceResult {
    pub approved: bool,
    pub agreeing: Vec<String>,
    pub conflicting: Vec<String>,
    pub neutral: Vec<String>,
    pub weighted_score: f64,
    /// Additive confidence boost [0, 1].
    pub confidence_boost: f64,
    /// Set when the history read failed and the result is fail-open.
    pub fail_open: bool,
    pub reason: String,
}

/// Evaluate confluence for `signal` against the store's recent history.
pub fn evaluate(
    signal: &Signal,
    store: &Store,
    params: &ConfluenceParams,
    now: DateTime<Utc>,
) -> ConfluenceResult {
    let since = now - chrono::Duration::minutes(params.lookback_minutes);
    let history = store.completed_signals_for(&signal.symbol, since);
    evaluate_with_history(signal, Some(history), params)
}

/// Core evaluation. `history = None` models a failed store read and takes
/// the fail-open path.
pub fn evaluate_with_history(
    signal: &Signal,
    history: Option<Vec<Signal>>,
    params: &ConfluenceParams,
) -> ConfluenceResult {
    let Some(history) = history else {
        warn!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            "confluence history unavailable; failing open with the current source only"
        );
        return ConfluenceResult {
            approved: true,
            agreeing: vec![signal.source.to_string()],
            conflicting: Vec::new(),
            neutral: Vec::new(),
            weighted_score: source_weight(signal.source),
            confidence_boost: 0.0,
            fail_open: true,
            reason: "signal history unavailable; fail-open".into(),
        };
    };

    // Dedupe by source, most recent wins. The current signal always
    // represents its own source.
    let mut by_source: Vec<&Signal> = Vec::new();
    by_source.push(signal);
    for candidate in &history {
        if candidate.id == signal.id {
            continue;
        }
        if by_source.iter().any(|s| s.source == candidate.source) {
            continue;
        }
        by_source.push(candidate);
    }

    // Bucket by direction relative to the proposed trade.
    let mut agreeing: Vec<&Signal> = Vec::new();
    let mut conflicting: Vec<&Signal> = Vec::new();
    let mut neutral: Vec<&Signal> = Vec::new();
    for s in &by_source {
        if s.direction == Direction::Neutral || signal.direction == Direction::Neutral {
            neutral.push(s);
        } else if s.direction == signal.direction {
            agreeing.push(s);
        } else {
            conflicting.push(s);
        }
    }

    let weighted_score: f64 = agreeing.iter().map(|s| source_weight(s.source)).sum();
    let has_primary = agreeing.iter().any(|s| is_primary(s.source));

    // ── Approval rule ───────────────────────────────────────────────────
    let approved = agreeing.len() >= params.min_agreeing
        && weighted_score >= params.min_weighted_score
        && conflicting.len() < agreeing.len()
        && (!params.require_primary_source || has_primary);

    // ── Tiered confidence boost ─────────────────────────────────────────
    let mut boost = match agreeing.len() {
        0 | 1 => 0.0,
        2 => 0.15,
        3 => 0.30,
        _ => 0.50,
    };
    if has_primary && agreeing.len() >= 2 {
        boost += 0.10;
    }
    if weighted_score >= 4.0 {
        boost += 0.15;
    } else if weighted_score >= 3.0 {
        boost += 0.08;
    }
    // A strong-trend reading from the technicals vendor adds conviction.
    if agreeing.iter().any(|s| {
        s.source == SignalSource::TwelvedataTechnical
            && s.raw_payload
                .get("adx")
                .and_then(|v| v.as_str())
                .map(|v| v.eq_ignore_ascii_case("STRONG"))
                .unwrap_or(false)
    }) {
        boost += 0.10;
    }
    if !conflicting.is_empty() {
        boost *= (1.0 - 0.25 * conflicting.len() as f64).max(0.3);
    }
    let confidence_boost = boost.min(1.0);

    let reason = if approved {
        format!(
            "{} sources agree (weighted {:.2}, {} conflicting)",
            agreeing.len(),
            weighted_score,
            conflicting.len()
        )
    } else if agreeing.len() < params.min_agreeing {
        format!(
            "only {} agreeing source(s); need {}",
            agreeing.len(),
            params.min_agreeing
        )
    } else if weighted_score < params.min_weighted_score {
        format!(
            "weighted score {:.2} below {:.2}",
            weighted_score, params.min_weighted_score
        )
    } else if conflicting.len() >= agreeing.len() {
        format!(
            "{} conflicting sources outweigh {} agreeing",
            conflicting.len(),
            agreeing.len()
        )
    } else {
        "no primary source in agreement".to_string()
    };

    debug!(
        signal_id = %signal.id,
        symbol = %signal.symbol,
        approved,
        weighted = format!("{weighted_score:.2}"),
        agreeing = agreeing.len(),
        conflicting = conflicting.len(),
        boost = format!("{confidence_boost:.2}"),
        "confluence evaluated"
    );

    ConfluenceResult {
        approved,
        agreeing: agreeing.iter().map(|s| s.source.to_string()).collect(),
        conflicting: conflicting.iter().map(|s| s.source.to_string()).collect(),
        neutral: neutral.iter().map(|s| s.source.to_string()).collect(),
        weighted_score,
        confidence_boost,
        fail_open: false,
        reason,
    }
}
