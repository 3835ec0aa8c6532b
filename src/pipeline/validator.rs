// =============================================================================
// Validator — hard rejects and session escalation
// =============================================================================
//
// Validation never mutates a signal. It returns a verdict the pipeline acts
// on: pass, reject with structured reasons, or escalate to the pre-market
// queue when the session and the signal's pedigree allow it.
// =============================================================================

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::market_data::MarketSession;
use crate::runtime_config::QueueParams;
use crate::types::{Signal, SignalAction};

/// Validation verdict consumed by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ValidationVerdict {
    /// Proceed to deduplication.
    Pass,
    /// Hard reject with one reason per failed rule.
    Reject { reasons: Vec<String> },
    /// Hold in the signal queue until the session opens.
    Queue,
}

/// Validate a normalized signal against the hard rules, then the session
/// rule. `today` is the trading date used for expiration checks.
pub fn validate(
    signal: &Signal,
    session: MarketSession,
    today: NaiveDate,
    queue_params: &QueueParams,
) -> ValidationVerdict {
    let mut reasons = Vec::new();

    // ── Hard rejects ────────────────────────────────────────────────────
    if signal.symbol.is_empty() {
        reasons.push("symbol is required".to_string());
    }
    if signal.quantity == 0 {
        reasons.push("quantity must be positive".to_string());
    }

    match signal.action {
        SignalAction::Buy | SignalAction::Sell => {
            // Opening actions need a full contract spec.
            match signal.strike {
                None => reasons.push("strike is required for open actions".to_string()),
                Some(k) if k <= 0.0 => {
                    reasons.push(format!("strike {k} must be positive"));
                }
                Some(_) => {}
            }
            if signal.option_type.is_none() {
                reasons.push("option_type is required for open actions".to_string());
            }
            match signal.expiration {
                None => reasons.push("expiration is required for open actions".to_string()),
                Some(exp) if exp < today => {
                    reasons.push(format!("expiration {exp} is in the past"));
                }
                Some(_) => {}
            }
        }
        SignalAction::Close => {
            // Closes resolve against an open position; contract fields are
            // optional but a stated past expiration is still nonsense.
            if let Some(exp) = signal.expiration {
                if exp < today {
                    reasons.push(format!("expiration {exp} is in the past"));
                }
            }
        }
    }

    if !reasons.is_empty() {
        debug!(signal_id = %signal.id, ?reasons, "signal failed validation");
        return ValidationVerdict::Reject { reasons };
    }

    // ── Session rule ────────────────────────────────────────────────────
    if session.is_open() {
        return ValidationVerdict::Pass;
    }

    if session.is_queueable() {
        let allowed = queue_params
            .allowed_sources
            .iter()
            .any(|tag| tag == signal.source.as_tag());
        if allowed && signal.confidence >= queue_params.confidence_threshold {
            return ValidationVerdict::Queue;
        }
        return ValidationVerdict::Reject {
            reasons: vec![format!(
                "OUT_OF_SESSION: {} session; source {} confidence {:.0} does not qualify for the queue",
                session, signal.source, signal.confidence
            )],
        };
    }

    ValidationVerdict::Reject {
        reasons: vec![format!("OUT_OF_SESSION: market is {session}")],
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalizer::tests_support::minimal_signal;
    use crate::types::SignalSource;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    #[test]
    fn valid_signal_passes_in_session() {
        let signal = minimal_signal("SPY");
        let verdict = validate(
            &signal,
            MarketSession::Morning,
            today(),
            &QueueParams::default(),
        );
        assert_eq!(verdict, ValidationVerdict::Pass);
    }

    #[test]
    fn past_expiration_rejects() {
        let mut signal = minimal_signal("SPY");
        signal.expiration = Some(NaiveDate::from_ymd_opt(2025, 1, 17).unwrap());
        let verdict = validate(
            &signal,
            MarketSession::Morning,
            today(),
            &QueueParams::default(),
        );
        match verdict {
            ValidationVerdict::Reject { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("in the past")));
            }
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[test]
    fn open_action_requires_contract_fields() {
        let mut signal = minimal_signal("SPY");
        signal.strike = None;
        signal.option_type = None;
        signal.expiration = None;
        let verdict = validate(
            &signal,
            MarketSession::Morning,
            today(),
            &QueueParams::default(),
        );
        match verdict {
            ValidationVerdict::Reject { reasons } => assert_eq!(reasons.len(), 3),
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[test]
    fn close_without_contract_fields_passes() {
        let mut signal = minimal_signal("SPY");
        signal.action = SignalAction::Close;
        signal.strike = None;
        signal.option_type = None;
        signal.expiration = None;
        let verdict = validate(
            &signal,
            MarketSession::Midday,
            today(),
            &QueueParams::default(),
        );
        assert_eq!(verdict, ValidationVerdict::Pass);
    }

    #[test]
    fn pre_market_queues_qualified_sources() {
        let mut signal = minimal_signal("SPY");
        signal.confidence = 85.0;
        let verdict = validate(
            &signal,
            MarketSession::PreMarket,
            today(),
            &QueueParams::default(),
        );
        assert_eq!(verdict, ValidationVerdict::Queue);
    }

    #[test]
    fn pre_market_rejects_low_confidence() {
        let mut signal = minimal_signal("SPY");
        signal.confidence = 60.0;
        let verdict = validate(
            &signal,
            MarketSession::PreMarket,
            today(),
            &QueueParams::default(),
        );
        match verdict {
            ValidationVerdict::Reject { reasons } => {
                assert!(reasons[0].starts_with("OUT_OF_SESSION"));
            }
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[test]
    fn pre_market_rejects_unlisted_source() {
        let mut signal = minimal_signal("SPY");
        signal.source = SignalSource::OrbBhchBhch;
        signal.confidence = 95.0;
        let verdict = validate(
            &signal,
            MarketSession::AfterHours,
            today(),
            &QueueParams::default(),
        );
        assert!(matches!(verdict, ValidationVerdict::Reject { .. }));
    }

    #[test]
    fn closed_market_rejects_outright() {
        let mut signal = minimal_signal("SPY");
        signal.confidence = 99.0;
        let verdict = validate(
            &signal,
            MarketSession::Closed,
            today(),
            &QueueParams::default(),
        );
        match verdict {
            ValidationVerdict::Reject { reasons } => {
                assert!(reasons[0].contains("CLOSED"));
            }
            other => panic!("expected reject, got {other:?}"),
        }
    }
}
