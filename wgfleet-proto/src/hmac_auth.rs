//! Panel<->Agent request signing.
//!
//! `message = METHOD|PATH|BODY|TIMESTAMP`, HMAC-SHA256 over the shared
//! secret, hex-lowercase. The Agent rejects anything outside a 300s clock
//! skew window or with a bad signature; both checks run in constant time
//! where it matters (the signature compare).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Replay window; requests signed outside it are rejected regardless of
/// signature validity. Not configurable — kept as a fixed constant.
pub const TIMESTAMP_WINDOW_SECS: i64 = 300;

pub const SIGNATURE_HEADER: &str = "X-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";

/// Builds the exact message string that gets HMAC'd.
pub fn canonical_message(method: &str, path: &str, body: &str, timestamp: &str) -> String {
    format!("{method}|{path}|{body}|{timestamp}")
}

/// Computes the lowercase-hex HMAC-SHA256 signature for a request.
pub fn sign(secret: &str, method: &str, path: &str, body: &str, timestamp: &str) -> String {
    let message = canonical_message(method, path, body, timestamp);
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    MissingHeaders,
    TimestampOutOfWindow,
    BadTimestamp,
    SignatureMismatch,
}

/// Verifies a signature against the shared secret, constant-time on the
/// comparison itself. `now` is injected so callers (and tests) control time.
pub fn verify(
    secret: &str,
    method: &str,
    path: &str,
    body: &str,
    timestamp_header: &str,
    signature_header: &str,
    now_unix: i64,
) -> Result<(), VerifyError> {
    if timestamp_header.is_empty() || signature_header.is_empty() {
        return Err(VerifyError::MissingHeaders);
    }

    let ts: i64 = timestamp_header
        .parse()
        .map_err(|_| VerifyError::BadTimestamp)?;

    if (now_unix - ts).abs() > TIMESTAMP_WINDOW_SECS {
        return Err(VerifyError::TimestampOutOfWindow);
    }

    let expected = sign(secret, method, path, body, timestamp_header);

    let ok: bool = expected.as_bytes().ct_eq(signature_header.as_bytes()).into();
    if !ok {
        return Err(VerifyError::SignatureMismatch);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let secret = "topsecret";
        let now = 1_700_000_000i64;
        let ts = now.to_string();
        let sig = sign(secret, "POST", "/v1/wg/wg0/peers", "{}", &ts);
        assert!(verify(secret, "POST", "/v1/wg/wg0/peers", "{}", &ts, &sig, now).is_ok());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let secret = "topsecret";
        let ts = "1000".to_string();
        let sig = sign(secret, "GET", "/v1/status", "", &ts);
        let now = 1000 + TIMESTAMP_WINDOW_SECS + 1;
        assert_eq!(
            verify(secret, "GET", "/v1/status", "", &ts, &sig, now),
            Err(VerifyError::TimestampOutOfWindow)
        );
    }

    #[test]
    fn rejects_tampered_body() {
        let secret = "topsecret";
        let now = 1_700_000_000i64;
        let ts = now.to_string();
        let sig = sign(secret, "POST", "/v1/wg/wg0/peers", "{\"a\":1}", &ts);
        assert_eq!(
            verify(secret, "POST", "/v1/wg/wg0/peers", "{\"a\":2}", &ts, &sig, now),
            Err(VerifyError::SignatureMismatch)
        );
    }

    #[test]
    fn rejects_tampered_path() {
        let secret = "topsecret";
        let now = 1_700_000_000i64;
        let ts = now.to_string();
        let sig = sign(secret, "GET", "/v1/wg/wg0/dump", "", &ts);
        assert_eq!(
            verify(secret, "GET", "/v1/wg/wg1/dump", "", &ts, &sig, now),
            Err(VerifyError::SignatureMismatch)
        );
    }

    #[test]
    fn rejects_missing_headers() {
        assert_eq!(
            verify("secret", "GET", "/health", "", "", "", 0),
            Err(VerifyError::MissingHeaders)
        );
    }

    #[test]
    fn accepts_correctly_signed_request_at_window_edge() {
        let secret = "topsecret";
        let ts = "1000".to_string();
        let sig = sign(secret, "GET", "/v1/status", "", &ts);
        let now = 1000 + TIMESTAMP_WINDOW_SECS;
        assert!(verify(secret, "GET", "/v1/status", "", &ts, &sig, now).is_ok());
    }
}
