//! Webhook signature verification using HMAC-SHA256.
//!
//! The webhook sender signs deliveries in one of two shapes, carried in the
//! `X-Webflow-Signature` header:
//!
//! - `<timestamp>.<hex>`: HMAC over `"<timestamp>.<payload as compact JSON>"`,
//!   checked against every configured secret.
//! - `<hex>`: HMAC over the exact bytes of the request body, checked against
//!   one designated secret. Re-serializing the body would change whitespace
//!   and break the signature, so the raw bytes must be kept.
//!
//! Requests without the header are manual triggers and are let through.

use crate::config::{MissingSecretPolicy, WebhookConfig};
use crate::errors::SignatureError;
use hmac::{Hmac, Mac};
use serde_json::{Number, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webflow-signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    TimestampComposite,
    RawBody,
}

/// How a request that passed verification was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authentication {
    Verified(Scheme),
    /// No signature header: manual or test invocation.
    Unsigned,
    /// A signature was sent but no secret is configured to check it.
    Unchecked,
}

/// Parsed form of the signature header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureHeader<'a> {
    Composite { timestamp: &'a str, signature: &'a str },
    Raw { signature: &'a str },
}

impl<'a> SignatureHeader<'a> {
    /// Hex digests never contain a dot, so a dot selects the composite scheme.
    pub fn parse(header: &'a str) -> Self {
        let header = header.trim();
        match header.split_once('.') {
            Some((timestamp, signature)) => SignatureHeader::Composite {
                timestamp,
                signature,
            },
            None => SignatureHeader::Raw { signature: header },
        }
    }
}

/// Rewrites integral floats as integers, the way the sender's
/// `JSON.stringify` prints them (`1.0` as `1`, `1e2` as `100`).
fn normalize_numbers(value: &mut Value) {
    match value {
        Value::Number(n) if n.is_f64() => {
            if let Some(f) = n.as_f64()
                && f.fract() == 0.0
                && f.abs() < i64::MAX as f64
            {
                *n = Number::from(f as i64);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_numbers),
        Value::Object(map) => map.values_mut().for_each(normalize_numbers),
        _ => {}
    }
}

/// The string signed under the composite scheme.
///
/// Keys keep document order. Fractional numbers use the shortest
/// round-trip form on both sides, but exponent spellings of very large or
/// very small values can still differ from the sender's.
pub fn composite_message(timestamp: &str, payload: &Value) -> String {
    let mut payload = payload.clone();
    normalize_numbers(&mut payload);
    format!("{timestamp}.{payload}")
}

/// Constant-time check of a hex signature. Malformed hex never verifies.
fn verify_hex(message: &[u8], hex_signature: &str, secret: &[u8]) -> bool {
    let Ok(expected) = hex::decode(hex_signature) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}

pub struct SignatureVerifier {
    secrets: Vec<Vec<u8>>,
    raw_body_secret: Option<Vec<u8>>,
    missing_secret_policy: MissingSecretPolicy,
}

impl SignatureVerifier {
    pub fn new(config: &WebhookConfig) -> Self {
        let mut secrets: Vec<Vec<u8>> = Vec::new();
        for secret in config.secrets.iter().chain(config.raw_body_secret.iter()) {
            let secret = secret.as_bytes().to_vec();
            if !secret.is_empty() && !secrets.contains(&secret) {
                secrets.push(secret);
            }
        }

        let raw_body_secret = config
            .raw_body_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| s.as_bytes().to_vec())
            .or_else(|| secrets.first().cloned());

        SignatureVerifier {
            secrets,
            raw_body_secret,
            missing_secret_policy: config.missing_secret_policy,
        }
    }

    /// Checks the signature header, if any, against the request.
    ///
    /// `raw_body` must be the body exactly as received; `payload` is its
    /// parsed form, used by the composite scheme.
    pub fn verify(
        &self,
        header: Option<&str>,
        raw_body: &[u8],
        payload: &Value,
    ) -> Result<Authentication, SignatureError> {
        let Some(header) = header else {
            tracing::info!("No webhook signature (manual call or testing)");
            return Ok(Authentication::Unsigned);
        };

        if self.secrets.is_empty() {
            return match self.missing_secret_policy {
                MissingSecretPolicy::Allow => {
                    tracing::warn!(
                        "Webhook signature received but no secret is configured, skipping verification"
                    );
                    Ok(Authentication::Unchecked)
                }
                MissingSecretPolicy::Reject => {
                    tracing::warn!("Webhook signature received but no secret is configured");
                    Err(SignatureError::NoSecretConfigured)
                }
            };
        }

        let scheme = match SignatureHeader::parse(header) {
            SignatureHeader::Composite {
                timestamp,
                signature,
            } => {
                let message = composite_message(timestamp, payload);
                let verified = self
                    .secrets
                    .iter()
                    .any(|secret| verify_hex(message.as_bytes(), signature, secret));
                verified.then_some(Scheme::TimestampComposite)
            }
            SignatureHeader::Raw { signature } => self
                .raw_body_secret
                .as_deref()
                .filter(|secret| verify_hex(raw_body, signature, secret))
                .map(|_| Scheme::RawBody),
        };

        match scheme {
            Some(scheme) => {
                tracing::debug!(?scheme, "Webhook signature verified");
                Ok(Authentication::Verified(scheme))
            }
            None => {
                tracing::warn!("Invalid webhook signature");
                Err(SignatureError::Invalid)
            }
        }
    }
}

/// HMAC-SHA256 of `message` keyed by `secret`.
#[cfg(test)]
pub(crate) fn compute_signature(message: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Builds a composite header value, as the webhook sender would.
#[cfg(test)]
pub(crate) fn sign_composite(timestamp: &str, payload: &Value, secret: &[u8]) -> String {
    let signature = compute_signature(composite_message(timestamp, payload).as_bytes(), secret);
    format!("{timestamp}.{}", hex::encode(signature))
}

/// Builds a raw-body header value, as the webhook sender would.
#[cfg(test)]
pub(crate) fn sign_raw_body(body: &[u8], secret: &[u8]) -> String {
    hex::encode(compute_signature(body, secret))
}
