//! Slack request signing (`X-Slack-Signature`, `X-Slack-Request-Timestamp`).

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const MAX_REQUEST_AGE_SECS: i64 = 5 * 60;

const VERSION: &str = "v0";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("request timestamp is not a unix time")]
    InvalidTimestamp,
    #[error("request timestamp is outside the accepted window")]
    Stale,
    #[error("signature header is malformed")]
    Malformed,
    #[error("signature does not match request body")]
    Mismatch,
}

#[derive(Clone)]
pub struct SignatureVerifier {
    signing_secret: SecretString,
}

impl SignatureVerifier {
    pub fn new(signing_secret: SecretString) -> Self {
        Self { signing_secret }
    }

    pub fn verify(
        &self,
        timestamp: &str,
        signature: &str,
        body: &[u8],
    ) -> Result<(), SignatureError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default();
        self.verify_at(timestamp, signature, body, now)
    }

    pub fn verify_at(
        &self,
        timestamp: &str,
        signature: &str,
        body: &[u8],
        now_unix: i64,
    ) -> Result<(), SignatureError> {
        let sent_at: i64 =
            timestamp.trim().parse().map_err(|_| SignatureError::InvalidTimestamp)?;
        if (now_unix - sent_at).abs() > MAX_REQUEST_AGE_SECS {
            return Err(SignatureError::Stale);
        }

        let expected = signature
            .strip_prefix(VERSION)
            .and_then(|rest| rest.strip_prefix('='))
            .ok_or(SignatureError::Malformed)
            .and_then(|digest| hex::decode(digest).map_err(|_| SignatureError::Malformed))?;

        self.mac_for(timestamp.trim(), body)?
            .verify_slice(&expected)
            .map_err(|_| SignatureError::Mismatch)
    }

    /// Produces the header value Slack would send for `body`.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> Result<String, SignatureError> {
        let digest = self.mac_for(timestamp, body)?.finalize().into_bytes();
        Ok(format!("{VERSION}={}", hex::encode(digest)))
    }

    fn mac_for(&self, timestamp: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
        let mut mac =
            HmacSha256::new_from_slice(self.signing_secret.expose_secret().as_bytes())
                .map_err(|_| SignatureError::Malformed)?;
        mac.update(VERSION.as_bytes());
        mac.update(b":");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(body);
        Ok(mac)
    }
}
