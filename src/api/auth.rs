// =============================================================================
// Ingress authentication — webhook HMAC + Bearer tokens
// =============================================================================
//
// Two independent gates:
//
//   - POST /webhook carries `x-webhook-signature`: hex HMAC-SHA256 of the
//     raw body under HMAC_SECRET, optional `sha256=` prefix. Compared in
//     constant time.
//   - Read routes carry `Authorization: Bearer <token>`: either a JWT
//     signed with JWT_SECRET or the static API_AUTH_TOKEN (constant-time).
//
// Both failures answer 401; nothing about the expected credential leaks
// through timing.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use sha2::Sha256;
use tracing::warn;

use crate::app_state::AppState;

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Constant-time comparison
// =============================================================================

/// Compare two byte slices in constant time. Every byte is examined even
/// after a mismatch so timing reveals nothing about the prefix.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

// =============================================================================
// Webhook HMAC
// =============================================================================

/// Verify `x-webhook-signature` against the raw request body.
///
/// The header value is hex, optionally prefixed `sha256=`. Returns `false`
/// on any malformation; the caller answers 401.
pub fn verify_webhook_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    let presented = header_value.trim();
    let presented = presented.strip_prefix("sha256=").unwrap_or(presented);

    let Ok(presented_bytes) = hex::decode(presented) else {
        return false;
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    constant_time_eq(&expected, &presented_bytes)
}

/// Hex-encode the signature for a body; used by tests and local tooling.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

// =============================================================================
// Bearer extractor
// =============================================================================

#[derive(Debug, Deserialize)]
struct Claims {
    #[allow(dead_code)]
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Axum extractor gating the authenticated read routes. Accepts a valid JWT
/// under JWT_SECRET or the static API_AUTH_TOKEN.
pub struct AuthBearer;

pub struct AuthRejection {
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
    }
}

#[async_trait::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthBearer {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let token = match header {
            Some(value) if value.starts_with("Bearer ") => &value[7..],
            _ => {
                warn!("missing or malformed Authorization header");
                return Err(AuthRejection {
                    message: "Missing or invalid bearer token",
                });
            }
        };

        // JWT first: a well-formed token under JWT_SECRET is accepted.
        if let Some(secret) = &state.env.jwt_secret {
            let validation = Validation::default();
            if decode::<Claims>(
                token,
                &DecodingKey::from_secret(secret.as_bytes()),
                &validation,
            )
            .is_ok()
            {
                return Ok(AuthBearer);
            }
        }

        // Static API token fallback.
        if let Some(expected) = &state.env.api_auth_token {
            if constant_time_eq(token.as_bytes(), expected.as_bytes()) {
                return Ok(AuthBearer);
            }
        }

        let err = crate::error::EngineError::AuthInvalid("bearer token failed verification".into());
        warn!(error = %err, "request rejected");
        Err(AuthRejection {
            message: "Invalid bearer token",
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer_string"));
        assert!(constant_time_eq(b"", b""));
        assert!(!constant_time_eq(b"\x00", b"\x01"));
    }

    #[test]
    fn webhook_signature_roundtrip() {
        let secret = "hmac-secret";
        let body = br#"{"ticker":"SPY","action":"BUY"}"#;
        let sig = sign_body(secret, body);

        assert!(verify_webhook_signature(secret, body, &sig));
        assert!(verify_webhook_signature(
            secret,
            body,
            &format!("sha256={sig}")
        ));
    }

    #[test]
    fn webhook_signature_rejects_tampering() {
        let secret = "hmac-secret";
        let body = br#"{"ticker":"SPY","action":"BUY"}"#;
        let sig = sign_body(secret, body);

        // Wrong body, wrong secret, malformed hex.
        assert!(!verify_webhook_signature(
            secret,
            br#"{"ticker":"SPY","action":"SELL"}"#,
            &sig
        ));
        assert!(!verify_webhook_signature("other-secret", body, &sig));
        assert!(!verify_webhook_signature(secret, body, "not-hex!"));
        assert!(!verify_webhook_signature(secret, body, ""));
    }

    #[test]
    fn jwt_decode_accepts_valid_token() {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let secret = "jwt-secret";
        let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize;
        let claims = serde_json::json!({ "sub": "dashboard", "exp": exp });
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();

        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        );
        assert!(decoded.is_ok());

        // Wrong secret fails.
        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"other"),
            &Validation::default(),
        );
        assert!(decoded.is_err());
    }
}
