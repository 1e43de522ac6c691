//! Webhook signature verification (hex HMAC-SHA256 over the raw request body).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the provider's signature.
pub const SIGNATURE_HEADER: &str = "x-sendbird-signature";

/// Returns `false` on any mismatch or malformed input; never panics.
pub fn verify(raw_payload: &[u8], signature: &str, secret: &str) -> bool {
    let expected = match hex::decode(signature.trim()) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "Webhook signature is not valid hex");
            return false;
        }
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(err) => {
            tracing::warn!(error = %err, "Unable to initialise webhook HMAC");
            return false;
        }
    };
    mac.update(raw_payload);

    mac.verify_slice(&expected).is_ok()
}

/// Hex signature of `raw_payload`, as the provider computes it.
pub fn sign(raw_payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(raw_payload);
    hex::encode(mac.finalize().into_bytes())
}
