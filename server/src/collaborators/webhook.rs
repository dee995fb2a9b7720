//! Signatures on payment provider callbacks.
//!
//! The provider signs each outcome it posts with a secret shared out of band.
//! The signature header carries the signing time and a hex HMAC-SHA256 over
//! `{timestamp}.{body}`:
//!
//! ```text
//! x-parkpass-signature: t=1780300800,v1=5257a869e7ecebeda32affa62cdca3fa51cad7e77a0e56ff536d0ce8e108d8bd
//! ```

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-parkpass-signature";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing {SIGNATURE_HEADER} header")]
    Missing,

    #[error("malformed {SIGNATURE_HEADER} header")]
    Malformed,

    #[error("webhook signature is outside the accepted time window")]
    Stale,

    #[error("webhook signature mismatch")]
    Mismatch,

    #[error("webhook secret is not usable as an HMAC key")]
    Key,
}

fn mac_for(payload: &[u8], timestamp: i64, secret: &str) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Key)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Header value for `payload` signed at `timestamp` (Unix seconds).
pub fn sign_webhook(payload: &[u8], timestamp: i64, secret: &str) -> Result<String, SignatureError> {
    let signature = hex::encode(mac_for(payload, timestamp, secret)?.finalize().into_bytes());
    Ok(format!("t={timestamp},v1={signature}"))
}

/// Checks `header` against the raw request body. Signatures older or newer
/// than `tolerance` relative to `now` are refused so a captured callback
/// cannot be replayed later.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: DateTime<Utc>,
    tolerance: Duration,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = t.parse::<i64>().ok();
        } else if let Some(v) = part.strip_prefix("v1=") {
            signature = Some(v);
        }
    }
    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        return Err(SignatureError::Malformed);
    };

    if (now.timestamp() - timestamp).abs() > tolerance.num_seconds() {
        return Err(SignatureError::Stale);
    }

    let expected = hex::decode(signature).map_err(|_| SignatureError::Malformed)?;
    mac_for(payload, timestamp, secret)?
        .verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}
