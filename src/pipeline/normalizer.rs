// =============================================================================
// Signal normalizer — union-shaped vendor payloads to canonical signals
// =============================================================================
//
// Webhook vendors disagree on everything: field names, action verbs, date
// formats, symbol prefixes. The tables below fold all of it into one
// canonical `Signal`. Errors are field-level and collected, not
// short-circuited, so a rejection names every problem at once.
// =============================================================================

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::types::{
    derive_direction, Direction, OptionType, OrderType, Signal, SignalAction, SignalSource,
    SignalStatus, TimeInForce,
};

/// Default confidence (0–100) when the payload carries none.
const DEFAULT_CONFIDENCE: f64 = 75.0;

/// One field-level normalization problem.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Field extraction helpers
// ---------------------------------------------------------------------------

fn first_string(raw: &serde_json::Value, aliases: &[&str]) -> Option<String> {
    for alias in aliases {
        if let Some(v) = raw.get(alias) {
            if let Some(s) = v.as_str() {
                if !s.trim().is_empty() {
                    return Some(s.trim().to_string());
                }
            } else if v.is_number() {
                return Some(v.to_string());
            }
        }
    }
    None
}

fn first_f64(raw: &serde_json::Value, aliases: &[&str]) -> Option<f64> {
    for alias in aliases {
        if let Some(v) = raw.get(alias) {
            if let Some(n) = v.as_f64() {
                return Some(n);
            }
            if let Some(s) = v.as_str() {
                if let Ok(n) = s.trim().parse::<f64>() {
                    return Some(n);
                }
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Table-driven value normalization
// ---------------------------------------------------------------------------

fn normalize_action(raw: &str) -> Option<SignalAction> {
    match raw.trim().to_uppercase().as_str() {
        "BUY" | "LONG" => Some(SignalAction::Buy),
        "SELL" | "SHORT" => Some(SignalAction::Sell),
        "CLOSE" | "EXIT" | "FLATTEN" => Some(SignalAction::Close),
        _ => None,
    }
}

fn normalize_option_type(raw: &str) -> Option<OptionType> {
    match raw.trim().to_uppercase().as_str() {
        "C" | "CALL" => Some(OptionType::Call),
        "P" | "PUT" => Some(OptionType::Put),
        _ => None,
    }
}

/// Accepts `YYYY-MM-DD`, `MM/DD/YYYY`, and bare `YYMMDD` (years ≤ 50 map to
/// 20xx, above to 19xx), then falls through to an ISO datetime parse.
fn normalize_expiration(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();

    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%m/%d/%Y") {
        return Some(d);
    }
    if raw.len() == 6 && raw.chars().all(|c| c.is_ascii_digit()) {
        let yy: i32 = raw[0..2].parse().ok()?;
        let mm: u32 = raw[2..4].parse().ok()?;
        let dd: u32 = raw[4..6].parse().ok()?;
        let year = if yy <= 50 { 2000 + yy } else { 1900 + yy };
        return NaiveDate::from_ymd_opt(year, mm, dd);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    None
}

fn normalize_order_type(raw: &str) -> Option<OrderType> {
    match raw.trim().to_uppercase().as_str() {
        "MARKET" | "MKT" => Some(OrderType::Market),
        "LIMIT" | "LMT" => Some(OrderType::Limit),
        "STOP" => Some(OrderType::Stop),
        "STOP_LIMIT" | "STOP-LIMIT" => Some(OrderType::StopLimit),
        _ => None,
    }
}

fn normalize_tif(raw: &str) -> Option<TimeInForce> {
    match raw.trim().to_uppercase().as_str() {
        "DAY" => Some(TimeInForce::Day),
        "GTC" => Some(TimeInForce::Gtc),
        "IOC" => Some(TimeInForce::Ioc),
        "FOK" => Some(TimeInForce::Fok),
        _ => None,
    }
}

/// Uppercase, strip exchange prefixes (`NASDAQ:SPY`) and dotted suffixes
/// (`SPY.US`).
fn normalize_symbol(raw: &str) -> String {
    let mut symbol = raw.trim().to_uppercase();
    if let Some(idx) = symbol.find(':') {
        symbol = symbol[idx + 1..].to_string();
    }
    if let Some(idx) = symbol.find('.') {
        symbol = symbol[..idx].to_string();
    }
    symbol
}

fn normalize_direction(raw: &str) -> Option<Direction> {
    match raw.trim().to_uppercase().as_str() {
        "BULLISH" | "BULL" | "UP" | "LONG" => Some(Direction::Bullish),
        "BEARISH" | "BEAR" | "DOWN" | "SHORT" => Some(Direction::Bearish),
        "NEUTRAL" | "FLAT" => Some(Direction::Neutral),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Dedup fingerprint: SHA-256 of `source|symbol|iso-timestamp|direction`.
pub fn fingerprint(
    source: SignalSource,
    symbol: &str,
    timestamp: DateTime<Utc>,
    direction: Direction,
) -> String {
    let input = format!(
        "{}|{}|{}|{}",
        source.as_tag(),
        symbol,
        timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        direction
    );
    hex::encode(Sha256::digest(input.as_bytes()))
}

// ---------------------------------------------------------------------------
// Normalize
// ---------------------------------------------------------------------------

/// Normalize a raw vendor payload into a canonical [`Signal`].
///
/// Every problem becomes a [`FieldError`]; a non-empty list rejects the
/// payload (there is no partially-valid signal).
pub fn normalize(
    raw: serde_json::Value,
    signature_verified: bool,
    received_at: DateTime<Utc>,
) -> std::result::Result<Signal, Vec<FieldError>> {
    let mut errors: Vec<FieldError> = Vec::new();

    // Source tag may ride in the payload; missing maps to Unknown.
    let source = first_string(&raw, &["source", "vendor", "indicator"])
        .map(|s| SignalSource::from_tag(&s))
        .unwrap_or(SignalSource::Unknown);

    // Symbol.
    let symbol = match first_string(&raw, &["ticker", "symbol", "underlying"]) {
        Some(s) => {
            let cleaned = normalize_symbol(&s);
            if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_alphanumeric()) {
                errors.push(FieldError::new("symbol", format!("unusable symbol '{s}'")));
                String::new()
            } else {
                cleaned
            }
        }
        None => {
            errors.push(FieldError::new("symbol", "missing (ticker/symbol/underlying)"));
            String::new()
        }
    };

    // Action.
    let action = match first_string(&raw, &["action", "side", "signal", "order"]) {
        Some(s) => match normalize_action(&s) {
            Some(a) => Some(a),
            None => {
                errors.push(FieldError::new("action", format!("unrecognised action '{s}'")));
                None
            }
        },
        None => {
            errors.push(FieldError::new("action", "missing (action/side/signal/order)"));
            None
        }
    };

    // Option type.
    let option_type = match first_string(&raw, &["type", "option_type"]) {
        Some(s) => match normalize_option_type(&s) {
            Some(t) => Some(t),
            None => {
                errors.push(FieldError::new(
                    "option_type",
                    format!("unrecognised option type '{s}'"),
                ));
                None
            }
        },
        None => None,
    };

    // Expiration.
    let expiration = match first_string(&raw, &["expiration", "expiry", "exp"]) {
        Some(s) => match normalize_expiration(&s) {
            Some(d) => Some(d),
            None => {
                errors.push(FieldError::new(
                    "expiration",
                    format!("unparseable expiration '{s}'"),
                ));
                None
            }
        },
        None => None,
    };

    // Quantity.
    let quantity = match first_f64(&raw, &["qty", "quantity", "contracts", "size"]) {
        Some(q) if q >= 1.0 && q.fract() == 0.0 && q <= u32::MAX as f64 => q as u32,
        Some(q) => {
            errors.push(FieldError::new(
                "quantity",
                format!("quantity {q} must be a positive whole contract count"),
            ));
            0
        }
        None => 1,
    };

    // Strike.
    let strike = first_f64(&raw, &["strike"]);
    if let Some(k) = strike {
        if k <= 0.0 {
            errors.push(FieldError::new("strike", format!("strike {k} must be positive")));
        }
    }

    // Prices / order plumbing.
    let limit_price = first_f64(&raw, &["price", "limit_price"]);
    let order_type = match first_string(&raw, &["order_type"]) {
        Some(s) => normalize_order_type(&s).unwrap_or_else(|| {
            errors.push(FieldError::new(
                "order_type",
                format!("unrecognised order type '{s}'"),
            ));
            OrderType::Market
        }),
        None => OrderType::Market,
    };
    let time_in_force = match first_string(&raw, &["time_in_force", "tif"]) {
        Some(s) => normalize_tif(&s).unwrap_or_else(|| {
            errors.push(FieldError::new(
                "time_in_force",
                format!("unrecognised time-in-force '{s}'"),
            ));
            TimeInForce::Day
        }),
        None => TimeInForce::Day,
    };

    // Timeframe / strategy passthrough.
    let timeframe = first_string(&raw, &["timeframe", "interval", "tf"]);
    let strategy = first_string(&raw, &["strategy", "strategy_type"]);

    // Confidence: fractions scale up to the 0–100 range.
    let confidence = match first_f64(&raw, &["confidence", "conf"]) {
        Some(c) if c <= 1.0 && c >= 0.0 => c * 100.0,
        Some(c) => c.clamp(0.0, 100.0),
        None => DEFAULT_CONFIDENCE,
    };

    // Direction: explicit wins, otherwise derived.
    let direction = match first_string(&raw, &["direction", "bias"]) {
        Some(s) => normalize_direction(&s)
            .unwrap_or_else(|| derive_direction(action.unwrap_or(SignalAction::Close), option_type)),
        None => derive_direction(action.unwrap_or(SignalAction::Close), option_type),
    };

    // Signal timestamp drives the dedup fingerprint; the payload's own
    // timestamp wins so a replayed alert fingerprints identically.
    let signal_ts = first_string(&raw, &["ts", "timestamp", "time"])
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(received_at);

    if !errors.is_empty() {
        return Err(errors);
    }

    let action = action.expect("action errors already collected");
    let fp = fingerprint(source, &symbol, signal_ts, direction);

    Ok(Signal {
        id: Uuid::new_v4().to_string(),
        source,
        fingerprint: fp,
        symbol,
        direction,
        action,
        strike,
        expiration,
        option_type,
        timeframe,
        quantity,
        confidence,
        limit_price,
        order_type,
        time_in_force,
        strategy,
        raw_payload: raw,
        signature_verified,
        status: SignalStatus::Pending,
        received_at,
        validation_result: None,
    })
}

// =============================================================================
// Test support (shared fixtures for sibling module tests)
// =============================================================================
#[cfg(test)]
pub mod tests_support {
    use super::*;

    /// A minimal valid BUY CALL signal for `symbol`, expiring comfortably in
    /// the future so date-sensitive rules stay quiet.
    pub fn minimal_signal(symbol: &str) -> Signal {
        let expiration = (Utc::now() + chrono::Duration::days(400))
            .date_naive()
            .format("%Y-%m-%d")
            .to_string();
        let raw = serde_json::json!({
            "source": "tradingview",
            "ticker": symbol,
            "action": "BUY",
            "type": "CALL",
            "strike": 500.0,
            "expiration": expiration,
            "qty": 1,
        });
        normalize(raw, true, Utc::now()).expect("fixture signal must normalize")
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_payload() -> serde_json::Value {
        serde_json::json!({
            "source": "ultimate-option",
            "ticker": "NASDAQ:SPY",
            "action": "LONG",
            "type": "C",
            "strike": 500.0,
            "expiration": "2026-03-20",
            "qty": 2,
            "price": 3.15,
            "timeframe": "5m",
            "ts": "2025-01-10T14:05:00Z",
        })
    }

    #[test]
    fn normalizes_aliases_and_tables() {
        let signal = normalize(base_payload(), true, Utc::now()).unwrap();
        assert_eq!(signal.symbol, "SPY");
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.option_type, Some(OptionType::Call));
        assert_eq!(signal.direction, Direction::Bullish);
        assert_eq!(signal.quantity, 2);
        assert_eq!(signal.source, SignalSource::UltimateOption);
        assert_eq!(
            signal.expiration,
            Some(NaiveDate::from_ymd_opt(2026, 3, 20).unwrap())
        );
        assert_eq!(signal.order_type, OrderType::Market);
        assert_eq!(signal.time_in_force, TimeInForce::Day);
        assert!((signal.limit_price.unwrap() - 3.15).abs() < 1e-9);
    }

    #[test]
    fn action_table() {
        for (input, expected) in [
            ("LONG", SignalAction::Buy),
            ("SHORT", SignalAction::Sell),
            ("EXIT", SignalAction::Close),
            ("FLATTEN", SignalAction::Close),
            ("buy", SignalAction::Buy),
        ] {
            assert_eq!(normalize_action(input), Some(expected), "input {input}");
        }
        assert_eq!(normalize_action("HODL"), None);
    }

    #[test]
    fn expiration_formats() {
        let expect = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        assert_eq!(normalize_expiration("2026-03-20"), Some(expect));
        assert_eq!(normalize_expiration("03/20/2026"), Some(expect));
        assert_eq!(normalize_expiration("260320"), Some(expect));
        // Years above the pivot map to the 1900s.
        assert_eq!(
            normalize_expiration("990115"),
            Some(NaiveDate::from_ymd_opt(1999, 1, 15).unwrap())
        );
        assert_eq!(
            normalize_expiration("2026-03-20T00:00:00Z"),
            Some(expect)
        );
        assert_eq!(normalize_expiration("next friday"), None);
    }

    #[test]
    fn symbol_cleanup() {
        assert_eq!(normalize_symbol("NASDAQ:SPY"), "SPY");
        assert_eq!(normalize_symbol("spy.us"), "SPY");
        assert_eq!(normalize_symbol("  qqq "), "QQQ");
    }

    #[test]
    fn sell_call_is_bearish() {
        let mut payload = base_payload();
        payload["action"] = serde_json::json!("SHORT");
        let signal = normalize(payload, true, Utc::now()).unwrap();
        assert_eq!(signal.direction, Direction::Bearish);
    }

    #[test]
    fn explicit_direction_wins_over_derivation() {
        let mut payload = base_payload();
        payload["direction"] = serde_json::json!("BEARISH");
        let signal = normalize(payload, true, Utc::now()).unwrap();
        assert_eq!(signal.direction, Direction::Bearish);
    }

    #[test]
    fn errors_accumulate() {
        let payload = serde_json::json!({
            "action": "HODL",
            "type": "X",
            "strike": -5.0,
            "qty": 0,
        });
        let errors = normalize(payload, true, Utc::now()).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"symbol"));
        assert!(fields.contains(&"action"));
        assert!(fields.contains(&"option_type"));
        assert!(fields.contains(&"strike"));
        assert!(fields.contains(&"quantity"));
    }

    #[test]
    fn normalization_is_deterministic() {
        let at = Utc.with_ymd_and_hms(2025, 1, 10, 14, 5, 0).unwrap();
        let a = normalize(base_payload(), true, at).unwrap();
        let b = normalize(base_payload(), true, at).unwrap();
        // Identical apart from the server-assigned id.
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.symbol, b.symbol);
        assert_eq!(a.direction, b.direction);
        assert_eq!(a.quantity, b.quantity);
        assert_eq!(a.confidence, b.confidence);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn fingerprint_uses_payload_timestamp() {
        let a = normalize(base_payload(), true, Utc::now()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = normalize(base_payload(), true, Utc::now()).unwrap();
        // Same payload ts → same fingerprint even with different arrival
        // times.
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn confidence_fraction_scales_to_percent() {
        let mut payload = base_payload();
        payload["confidence"] = serde_json::json!(0.8);
        let signal = normalize(payload, true, Utc::now()).unwrap();
        assert!((signal.confidence - 80.0).abs() < 1e-9);

        let mut payload = base_payload();
        payload["confidence"] = serde_json::json!(85);
        let signal = normalize(payload, true, Utc::now()).unwrap();
        assert!((signal.confidence - 85.0).abs() < 1e-9);
    }
}
