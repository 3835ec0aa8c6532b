// =============================================================================
// OCC option symbol codec
// =============================================================================
//
// Canonical 21-character form exchanged with every broker backend:
//
//   UNDERLYING (6 chars, space-padded right)
//   YYMMDD     (6 digits, expiration)
//   C | P      (1 char)
//   STRIKE     (8 digits, strike * 1000, zero-padded)
//
// e.g. "AAPL  260320C00200000" = AAPL 2026-03-20 $200 call.
// =============================================================================

use chrono::NaiveDate;

use crate::error::{EngineError, Result};
use crate::types::OptionType;

/// Strike precision is 1/1000 of a dollar.
const STRIKE_SCALE: f64 = 1000.0;

/// Encode an option contract into its OCC symbol.
///
/// Underlyings longer than 6 characters are rejected rather than truncated;
/// a truncated root would decode to a different contract.
pub fn encode(
    underlying: &str,
    expiration: NaiveDate,
    option_type: OptionType,
    strike: f64,
) -> Result<String> {
    let root = underlying.trim().to_uppercase();
    if root.is_empty() || root.len() > 6 {
        return Err(EngineError::Validation(format!(
            "underlying '{underlying}' must be 1-6 characters for OCC encoding"
        )));
    }
    if !(strike > 0.0) {
        return Err(EngineError::Validation(format!(
            "strike {strike} must be positive for OCC encoding"
        )));
    }

    let cp = match option_type {
        OptionType::Call => 'C',
        OptionType::Put => 'P',
    };
    let strike_milli = (strike * STRIKE_SCALE).round() as u64;
    if strike_milli > 99_999_999 {
        return Err(EngineError::Validation(format!(
            "strike {strike} exceeds the 8-digit OCC field"
        )));
    }

    Ok(format!(
        "{root:<6}{}{cp}{strike_milli:08}",
        expiration.format("%y%m%d")
    ))
}

/// Decoded contract fields.
#[derive(Debug, Clone, PartialEq)]
pub struct OccContract {
    pub underlying: String,
    pub expiration: NaiveDate,
    pub option_type: OptionType,
    pub strike: f64,
}

/// Decode an OCC symbol back into its contract fields.
pub fn decode(symbol: &str) -> Result<OccContract> {
    if symbol.len() != 21 {
        return Err(EngineError::Validation(format!(
            "OCC symbol '{symbol}' must be exactly 21 characters, got {}",
            symbol.len()
        )));
    }
    if !symbol.is_ascii() {
        return Err(EngineError::Validation(format!(
            "OCC symbol '{symbol}' contains non-ASCII characters"
        )));
    }

    let underlying = symbol[0..6].trim_end().to_string();
    if underlying.is_empty() {
        return Err(EngineError::Validation(
            "OCC symbol has an empty underlying root".into(),
        ));
    }

    let expiration = NaiveDate::parse_from_str(&symbol[6..12], "%y%m%d").map_err(|e| {
        EngineError::Validation(format!("OCC expiration '{}' invalid: {e}", &symbol[6..12]))
    })?;

    let option_type = match &symbol[12..13] {
        "C" => OptionType::Call,
        "P" => OptionType::Put,
        other => {
            return Err(EngineError::Validation(format!(
                "OCC option-type flag '{other}' must be C or P"
            )))
        }
    };

    let strike_milli: u64 = symbol[13..21].parse().map_err(|_| {
        EngineError::Validation(format!("OCC strike '{}' is not numeric", &symbol[13..21]))
    })?;

    Ok(OccContract {
        underlying,
        expiration,
        option_type,
        strike: strike_milli as f64 / STRIKE_SCALE,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn encode_known_contract() {
        let sym = encode("AAPL", d(2026, 3, 20), OptionType::Call, 200.0).unwrap();
        assert_eq!(sym, "AAPL  260320C00200000");
        assert_eq!(sym.len(), 21);
    }

    #[test]
    fn encode_long_root_uses_full_width() {
        let sym = encode("GOOGL", d(2025, 1, 17), OptionType::Put, 190.0).unwrap();
        assert_eq!(sym, "GOOGL 250117P00190000");
    }

    #[test]
    fn decode_known_contract() {
        let c = decode("AAPL  260320C00200000").unwrap();
        assert_eq!(c.underlying, "AAPL");
        assert_eq!(c.expiration, d(2026, 3, 20));
        assert_eq!(c.option_type, OptionType::Call);
        assert!((c.strike - 200.0).abs() < 1e-9);
    }

    #[test]
    fn roundtrip_fractional_strikes() {
        // Strikes round-trip within 1/1000 of a dollar.
        for strike in [0.5, 2.125, 37.5, 455.0, 1234.567, 6025.0] {
            for ot in [OptionType::Call, OptionType::Put] {
                let sym = encode("SPXW", d(2026, 12, 18), ot, strike).unwrap();
                let back = decode(&sym).unwrap();
                assert_eq!(back.underlying, "SPXW");
                assert_eq!(back.option_type, ot);
                assert!(
                    (back.strike - strike).abs() < 0.0005,
                    "strike {strike} round-tripped to {}",
                    back.strike
                );
            }
        }
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(encode("TOOLONGX", d(2026, 1, 16), OptionType::Call, 10.0).is_err());
        assert!(encode("", d(2026, 1, 16), OptionType::Call, 10.0).is_err());
        assert!(encode("SPY", d(2026, 1, 16), OptionType::Call, -1.0).is_err());
        assert!(decode("SPY").is_err());
        assert!(decode("SPY   260116X00100000").is_err());
        assert!(decode("SPY   260116C0010000Z").is_err());
    }
}
