use crate::error::{PaymentError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Parsed `t={unix_ts},v1={hex_hmac}` header.
#[derive(Debug, PartialEq, Eq)]
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    PaymentError::SignatureInvalid("malformed timestamp".to_string())
                })?)
            }
            // Undecodable candidates simply never match.
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| PaymentError::SignatureInvalid("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(PaymentError::SignatureInvalid(
            "missing v1 signature".to_string(),
        ));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

/// Verifies timestamped HMAC-SHA256 webhook signatures.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance: Duration,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| PaymentError::ConfigError("invalid webhook signing secret".to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Checks `header` against `payload`, with `now` as unix seconds.
    ///
    /// Fails when the timestamp is outside the tolerance in either direction
    /// or when no `v1` entry matches.
    pub fn verify(&self, payload: &[u8], header: &str, now: i64) -> Result<()> {
        let parsed = parse_header(header)?;

        let skew = now.abs_diff(parsed.timestamp);
        if skew > self.tolerance.as_secs() {
            return Err(PaymentError::SignatureInvalid(format!(
                "timestamp outside tolerance by {}s",
                skew
            )));
        }

        for candidate in &parsed.signatures {
            // verify_slice compares in constant time.
            if self.mac(parsed.timestamp, payload)?.verify_slice(candidate).is_ok() {
                return Ok(());
            }
        }

        Err(PaymentError::SignatureInvalid(
            "no matching signature".to_string(),
        ))
    }

    /// Produces a header for `payload` signed at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String> {
        let digest = self.mac(timestamp, payload)?.finalize().into_bytes();
        Ok(format!("t={},v1={}", timestamp, hex::encode(digest)))
    }
}
