//! Cryptographic utilities for webhook verification.
//!
//! Every inbound callback, from the generation worker and from Paystack, is
//! signed the same way: HMAC-SHA512 over the raw request body, hex encoded.

use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Compute HMAC-SHA512 of `message` and return it hex encoded (128 characters).
///
/// # Panics
///
/// Never in practice: HMAC accepts keys of any size per RFC 2104.
#[must_use]
pub fn hmac_sha512_hex(secret: &[u8], message: &[u8]) -> String {
    // INVARIANT: HMAC accepts keys of any size, so `new_from_slice` cannot fail.
    let mut mac = HmacSha512::new_from_slice(secret).expect("HMAC accepts any key size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex-encoded HMAC-SHA512 signature over `message`.
///
/// Comparison is constant-time. Malformed hex is a mismatch.
#[must_use]
pub fn verify_hmac_sha512_hex(secret: &[u8], message: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_has_sha512_length() {
        let sig = hmac_sha512_hex(b"key", b"The quick brown fox jumps over the lazy dog");
        assert_eq!(sig.len(), 128);
    }

    #[test]
    fn signature_verifies() {
        let body = br#"{"job_id":"abc","status":"completed"}"#;
        let sig = hmac_sha512_hex(b"secret", body);
        assert!(verify_hmac_sha512_hex(b"secret", body, &sig));
        assert!(verify_hmac_sha512_hex(b"secret", body, &sig.to_uppercase()));
    }

    #[test]
    fn tampered_body_or_wrong_secret_fails() {
        let sig = hmac_sha512_hex(b"secret", b"payload");
        assert!(!verify_hmac_sha512_hex(b"secret", b"payload!", &sig));
        assert!(!verify_hmac_sha512_hex(b"other", b"payload", &sig));
    }

    #[test]
    fn malformed_signature_fails() {
        assert!(!verify_hmac_sha512_hex(b"secret", b"payload", "not-hex"));
        assert!(!verify_hmac_sha512_hex(b"secret", b"payload", ""));
    }
}
