//! Ticket QR payloads and their signatures.
//!
//! Gate scanners read the payload string directly, so its layout is a wire
//! contract:
//!
//! ```text
//! {scheme}://ticket/v1/{ticket_id}/{type}/{price}/{issued_at}/{valid_until}/{validation_code}/{security_hash}
//! ```
//!
//! Timestamps are Unix seconds. `security_hash` is hex HMAC-SHA256 over
//! `ticket_id|validation_code|valid_until`, so a gate can reject a forged
//! code before it touches the ticket's state.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Money, TicketType};

type HmacSha256 = Hmac<Sha256>;

pub const PAYLOAD_VERSION: &str = "v1";

/// Characters used for manual-entry codes; no 0/O or 1/I lookalikes.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QrError {
    #[error("payload does not use the '{0}' scheme")]
    WrongScheme(String),

    #[error("unsupported payload version '{0}'")]
    UnsupportedVersion(String),

    #[error("malformed payload field: {0}")]
    Malformed(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrPayload {
    pub ticket_id: Uuid,
    pub ticket_type: TicketType,
    pub price: Money,
    pub issued_at: i64,
    pub valid_until: i64,
    pub validation_code: String,
    pub security_hash: String,
}

impl QrPayload {
    pub fn encode(&self, scheme: &str) -> String {
        format!(
            "{scheme}://ticket/{PAYLOAD_VERSION}/{}/{}/{}/{}/{}/{}/{}",
            self.ticket_id,
            self.ticket_type,
            self.price,
            self.issued_at,
            self.valid_until,
            self.validation_code,
            self.security_hash,
        )
    }

    pub fn parse(input: &str, scheme: &str) -> Result<Self, QrError> {
        let rest = input
            .trim()
            .strip_prefix(scheme)
            .and_then(|rest| rest.strip_prefix("://ticket/"))
            .ok_or_else(|| QrError::WrongScheme(scheme.to_string()))?;

        let fields: Vec<&str> = rest.split('/').collect();
        let (version, fields) = fields
            .split_first()
            .ok_or(QrError::Malformed("version"))?;
        if *version != PAYLOAD_VERSION {
            return Err(QrError::UnsupportedVersion(version.to_string()));
        }

        let [ticket_id, ticket_type, price, issued_at, valid_until, code, hash] = fields else {
            return Err(QrError::Malformed("field count"));
        };

        let payload = QrPayload {
            ticket_id: ticket_id
                .parse()
                .map_err(|_| QrError::Malformed("ticket_id"))?,
            ticket_type: ticket_type
                .parse()
                .map_err(|_| QrError::Malformed("type"))?,
            price: Money::new(price.parse().map_err(|_| QrError::Malformed("price"))?),
            issued_at: issued_at
                .parse()
                .map_err(|_| QrError::Malformed("issued_at"))?,
            valid_until: valid_until
                .parse()
                .map_err(|_| QrError::Malformed("valid_until"))?,
            validation_code: code.to_string(),
            security_hash: hash.to_string(),
        };

        if !is_validation_code(&payload.validation_code) {
            return Err(QrError::Malformed("validation_code"));
        }
        if payload.security_hash.len() != 64
            || !payload.security_hash.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(QrError::Malformed("security_hash"));
        }
        Ok(payload)
    }
}

/// True if `input` has the shape of a manual-entry validation code.
pub fn is_validation_code(input: &str) -> bool {
    input.len() == CODE_LEN && input.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

pub fn generate_validation_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Keyed signer for ticket security hashes.
#[derive(Clone)]
pub struct TicketSigner {
    key: Vec<u8>,
}

impl TicketSigner {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    fn mac(&self, ticket_id: Uuid, validation_code: &str, valid_until: i64) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(format!("{ticket_id}|{validation_code}|{valid_until}").as_bytes());
        mac
    }

    pub fn sign(&self, ticket_id: Uuid, validation_code: &str, valid_until: DateTime<Utc>) -> String {
        hex::encode(
            self.mac(ticket_id, validation_code, valid_until.timestamp())
                .finalize()
                .into_bytes(),
        )
    }

    /// Constant-time comparison of `hash` against the expected signature.
    pub fn verify(&self, ticket_id: Uuid, validation_code: &str, valid_until: i64, hash: &str) -> bool {
        let Ok(bytes) = hex::decode(hash) else {
            return false;
        };
        self.mac(ticket_id, validation_code, valid_until)
            .verify_slice(&bytes)
            .is_ok()
    }
}

impl std::fmt::Debug for TicketSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketSigner").finish_non_exhaustive()
    }
}
