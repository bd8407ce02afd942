//! HMAC-SHA256 webhook signature verification
//!
//! Every partner signs webhook bodies with a shared secret and sends the
//! hex-encoded MAC in a signature header, optionally prefixed with
//! `sha256=`. Verification fails closed: malformed headers and MAC
//! mismatches both reject the delivery.

use charter_core::CoreError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifies webhook bodies against a partner's shared secret
#[derive(Clone)]
pub struct WebhookVerifier {
    mac: HmacSha256,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the HMAC state; it is derived from the shared secret.
        f.debug_struct("WebhookVerifier").finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    /// Create a verifier over the partner's shared secret
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, CoreError> {
        let mac = HmacSha256::new_from_slice(secret.as_ref()).map_err(|_| {
            CoreError::Configuration("Webhook secret is unusable as an HMAC key".to_string())
        })?;
        Ok(Self { mac })
    }

    /// Verify a raw body against the signature header
    ///
    /// Comparison is constant-time via the MAC's own verify.
    pub fn verify(&self, raw_payload: &[u8], signature_header: &str) -> Result<(), CoreError> {
        let encoded = signature_header
            .strip_prefix("sha256=")
            .unwrap_or(signature_header);
        let claimed = hex::decode(encoded).map_err(|_| {
            CoreError::SignatureVerification("Signature header is not valid hex".to_string())
        })?;

        let mut mac = self.mac.clone();
        mac.update(raw_payload);
        mac.verify_slice(&claimed)
            .map_err(|_| CoreError::SignatureVerification("Signature mismatch".to_string()))
    }

    /// Produce the signature header value for a body; used by the simulation
    /// and by tests to forge valid deliveries
    pub fn sign(&self, raw_payload: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(raw_payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }
}
