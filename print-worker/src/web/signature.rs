//! Shopify webhook signature verification.
//!
//! Shopify signs the raw request body with HMAC-SHA256 keyed by the shared
//! webhook secret and sends the base64 digest in `X-Shopify-Hmac-Sha256`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the base64 HMAC digest.
pub const SIGNATURE_HEADER: &str = "x-shopify-hmac-sha256";

/// Verify a webhook signature over the exact raw body bytes.
///
/// Returns `false` when the signature or secret is missing or empty. Must be
/// called before the body is parsed.
pub fn verify_webhook_signature(body: &[u8], signature: Option<&str>, secret: Option<&str>) -> bool {
    let (signature, secret) = match (signature, secret) {
        (Some(sig), Some(secret)) if !sig.is_empty() && !secret.is_empty() => (sig, secret),
        _ => {
            warn!(
                has_signature = signature.map_or(false, |s| !s.is_empty()),
                has_secret = secret.map_or(false, |s| !s.is_empty()),
                "webhook_signature_missing_fields"
            );
            return false;
        }
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            warn!("webhook_signature_invalid_key");
            return false;
        }
    };
    mac.update(body);

    let expected_signature = STANDARD.encode(mac.finalize().into_bytes());

    let valid = constant_time_compare(&expected_signature, signature.trim());

    if !valid {
        warn!(
            expected_length = expected_signature.len(),
            actual_length = signature.len(),
            body_length = body.len(),
            "webhook_signature_mismatch"
        );
    }

    valid
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Sign `body` the way Shopify does. Used by tests and local tooling.
pub fn sign_body(body: &[u8], secret: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(body);
    STANDARD.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "shpss_test_secret";
    const BODY: &[u8] = br##"{"name":"#1001","currency":"USD"}"##;

    #[test]
    fn test_verify_signature_valid() {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(BODY);
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        assert!(verify_webhook_signature(BODY, Some(&signature), Some(SECRET)));
        assert_eq!(sign_body(BODY, SECRET), signature);
    }

    #[test]
    fn test_verify_signature_missing_fields() {
        let signature = sign_body(BODY, SECRET);

        assert!(!verify_webhook_signature(BODY, None, Some(SECRET)));
        assert!(!verify_webhook_signature(BODY, Some(""), Some(SECRET)));
        assert!(!verify_webhook_signature(BODY, Some(&signature), None));
        assert!(!verify_webhook_signature(BODY, Some(&signature), Some("")));
    }

    #[test]
    fn test_verify_signature_body_mutation() {
        let signature = sign_body(BODY, SECRET);

        for i in 0..BODY.len() {
            let mut mutated = BODY.to_vec();
            mutated[i] ^= 0x01;
            assert!(!verify_webhook_signature(&mutated, Some(&signature), Some(SECRET)));
        }
    }

    #[test]
    fn test_verify_signature_header_mutation() {
        let signature = sign_body(BODY, SECRET);

        for i in 0..signature.len() {
            let mut mutated = signature.clone().into_bytes();
            mutated[i] = if mutated[i] == b'A' { b'B' } else { b'A' };
            let mutated = String::from_utf8(mutated).unwrap();
            assert!(!verify_webhook_signature(BODY, Some(&mutated), Some(SECRET)));
        }
    }

    #[test]
    fn test_verify_signature_wrong_secret() {
        let signature = sign_body(BODY, "other-secret");

        assert!(!verify_webhook_signature(BODY, Some(&signature), Some(SECRET)));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}
