//! Tenant API-key digests
//!
//! The control surface stores HMAC-SHA256 digests of tenant API keys, never
//! the keys themselves. The engine exposes the hash/verify pair so both
//! sides agree on the digest format (lowercase hex).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Digest an API key with the process-wide secret
pub fn hash_api_key(api_key_secret: &str, api_key: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(api_key_secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(api_key.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of a presented key against a stored digest
pub fn verify_api_key(api_key_secret: &str, api_key: &str, stored_digest: &str) -> bool {
    let mut mac = HmacSha256::new_from_slice(api_key_secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(api_key.as_bytes());
    match hex::decode(stored_digest) {
        Ok(expected) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}
