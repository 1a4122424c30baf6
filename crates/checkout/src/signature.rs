//! HMAC-SHA256 verification of server-to-server payment notifications.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{CheckoutError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the unix timestamp the sender signed.
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// Header carrying the hex-encoded signature.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Verifies `hex(HMAC-SHA256(secret, "{timestamp}.{body}"))`.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance_secs: u64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    /// Creates a verifier accepting timestamps within `tolerance_secs` of now.
    pub fn new(secret: impl Into<Vec<u8>>, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| {
            CheckoutError::InvalidWebhookSignature("unusable webhook secret".to_string())
        })?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac)
    }

    /// Produces the signature a sender would attach. Used by tests and tools.
    pub fn sign(&self, timestamp: i64, body: &[u8]) -> Result<String> {
        let mac = self.mac(&timestamp.to_string(), body)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Checks the headers of a notification against the current time.
    pub fn verify(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<()> {
        self.verify_at(timestamp, signature, body, chrono::Utc::now().timestamp())
    }

    /// Checks the headers of a notification against `now` (unix seconds).
    pub fn verify_at(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
        now: i64,
    ) -> Result<()> {
        let reject = |reason: &str| {
            tracing::warn!(reason, "webhook signature rejected");
            CheckoutError::InvalidWebhookSignature(reason.to_string())
        };

        let timestamp = timestamp
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| reject("missing timestamp"))?;
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| reject("missing signature"))?;

        let sent_at: i64 = timestamp
            .parse()
            .map_err(|_| reject("timestamp is not a unix time"))?;
        if now.abs_diff(sent_at) > self.tolerance_secs {
            return Err(reject("timestamp outside tolerance"));
        }

        let provided = hex::decode(signature).map_err(|_| reject("signature is not hex"))?;
        self.mac(timestamp, body)?
            .verify_slice(&provided)
            .map_err(|_| reject("signature mismatch"))
    }
}
