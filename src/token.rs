//! Compact HMAC-signed, time-boxed tokens.
//!
//! Wire format: `b64url(header) "." b64url(payload) "." b64url(HMAC-SHA256)`,
//! all base64url without padding. Session tokens (`typ = "jwt"`) and signup
//! grants (`typ = "signup"`) share this mechanism; checking `typ` is left to
//! the caller via [`Token::expect_type`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::blind_index::hmac_sha256;
use crate::crypto::{b64url_decode_strict, b64url_encode, SecureKey};
use crate::error::{KmsError, Result};

pub const TOKEN_VERSION: &str = "1";

/// `typ` of session tokens
pub const SESSION_TOKEN_TYPE: &str = "jwt";

/// `typ` of signup grants
pub const SIGNUP_TOKEN_TYPE: &str = "signup";

/// Upper bound for any issued TTL (30 days)
pub const MAX_TTL_MS: i64 = 30 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub ver: String,
    pub typ: String,
}

/// `ttl` and `iat` are milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub sub: String,
    pub ttl: i64,
    pub iat: i64,
}

/// A verified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub header: Header,
    pub payload: Payload,
}

impl Token {
    /// Fail with `WrongTokenType` unless `typ` matches
    pub fn expect_type(&self, typ: &str) -> Result<&Self> {
        if self.header.typ != typ {
            return Err(KmsError::WrongTokenType {
                expected: typ.to_string(),
                found: self.header.typ.clone(),
            });
        }
        Ok(self)
    }

    pub fn subject(&self) -> &str {
        &self.payload.sub
    }

    /// Millisecond timestamp at which the token stops being valid
    pub fn expires_at(&self) -> Option<i64> {
        self.payload.iat.checked_add(self.payload.ttl)
    }
}

/// Current wall-clock time in milliseconds since the epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Issue a token stamped with the current time
pub fn generate(secret: &SecureKey, typ: &str, sub: &str, ttl_ms: i64) -> Result<String> {
    generate_at(secret, typ, sub, ttl_ms, now_ms())
}

/// Issue a token with an explicit `iat`
pub fn generate_at(secret: &SecureKey, typ: &str, sub: &str, ttl_ms: i64, iat: i64) -> Result<String> {
    if ttl_ms <= 0 || ttl_ms > MAX_TTL_MS {
        return Err(KmsError::Validation(format!(
            "token ttl must be between 1 and {} ms, got {}",
            MAX_TTL_MS, ttl_ms
        )));
    }

    let header = Header { ver: TOKEN_VERSION.to_string(), typ: typ.to_string() };
    let payload = Payload { sub: sub.to_string(), ttl: ttl_ms, iat };

    let signing_input = format!(
        "{}.{}",
        b64url_encode(serde_json::to_vec(&header)?),
        b64url_encode(serde_json::to_vec(&payload)?)
    );
    let signature = hmac_sha256(secret.as_bytes(), signing_input.as_bytes())?;

    Ok(format!("{}.{}", signing_input, b64url_encode(signature)))
}

/// Verify signature and expiry against the current time
pub fn verify(secret: &SecureKey, token: &str) -> Result<Token> {
    verify_at(secret, token, now_ms())
}

/// Verify signature and expiry against `now`.
///
/// Order: shape, signature, expiry, then header.
pub fn verify_at(secret: &SecureKey, token: &str, now: i64) -> Result<Token> {
    let parts: Vec<&str> = token.split('.').collect();
    let [header_b64, payload_b64, signature_b64] = parts.as_slice() else {
        return Err(KmsError::MalformedToken(format!(
            "expected 3 segments, found {}",
            parts.len()
        )));
    };

    let signing_input = format!("{}.{}", header_b64, payload_b64);
    let expected = hmac_sha256(secret.as_bytes(), signing_input.as_bytes())?;
    let presented = b64url_decode_strict(signature_b64).map_err(|_| KmsError::Signature)?;
    if !bool::from(expected.as_slice().ct_eq(presented.as_slice())) {
        return Err(KmsError::Signature);
    }

    let payload: Payload = decode_segment(payload_b64, "payload")?;
    let valid = payload
        .iat
        .checked_add(payload.ttl)
        .is_some_and(|expires_at| now < expires_at);
    if !valid {
        return Err(KmsError::ExpiredToken);
    }

    let header: Header = decode_segment(header_b64, "header")?;
    Ok(Token { header, payload })
}

fn decode_segment<T: DeserializeOwned>(segment: &str, what: &str) -> Result<T> {
    let bytes = b64url_decode_strict(segment)
        .map_err(|_| KmsError::MalformedToken(format!("{} is not base64url", what)))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| KmsError::MalformedToken(format!("{} is not valid JSON", what)))
}
