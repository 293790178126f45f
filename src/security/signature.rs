// src/security/signature.rs
//! Keyed HMAC-SHA256 signatures over `"{timestamp}.{payload}"`.
//!
//! Senders compute `sign(secret, payload, ts)` and ship the hex digest plus the
//! timestamp as headers; receivers call `verify` which checks the clock window
//! first and then compares digests in constant time.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::Rejection;

type HmacSha256 = Hmac<Sha256>;

/// Default accepted clock skew between sender and receiver (5 minutes).
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// Header carrying the hex signature.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
/// Header carrying the unix-seconds timestamp that was signed.
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

fn mac_for(secret: &str) -> HmacSha256 {
    // HMAC accepts keys of any length; the error branch is unreachable.
    HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length")
}

/// Hex-encoded HMAC-SHA256 of `"{timestamp}.{payload}"`.
pub fn sign(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let mut mac = mac_for(secret);
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Sign with the current wall clock. Returns `(timestamp, signature)`.
pub fn sign_now(secret: &str, payload: &[u8]) -> (i64, String) {
    let ts = now_unix();
    (ts, sign(secret, payload, ts))
}

/// Verify against the current wall clock.
pub fn verify(
    secret: &str,
    payload: &[u8],
    timestamp: i64,
    signature: &str,
    tolerance_secs: u64,
) -> Result<(), Rejection> {
    verify_at(secret, payload, timestamp, signature, tolerance_secs, now_unix())
}

/// Same as [`verify`] with an explicit clock reading.
pub fn verify_at(
    secret: &str,
    payload: &[u8],
    timestamp: i64,
    signature: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), Rejection> {
    if now.abs_diff(timestamp) > tolerance_secs {
        return Err(Rejection::ExpiredTimestamp);
    }

    let expected = sign(secret, payload, timestamp);
    let provided = signature.trim().as_bytes();
    if provided.len() != expected.len() {
        return Err(Rejection::SignatureMismatch);
    }
    if !bool::from(provided.ct_eq(expected.as_bytes())) {
        return Err(Rejection::SignatureMismatch);
    }
    Ok(())
}

/// Random hex secret of `len_bytes` bytes (hex output is twice as long).
pub fn generate_secret(len_bytes: usize) -> String {
    let mut buf = vec![0u8; len_bytes];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
