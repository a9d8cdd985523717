use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over a facilitator request body. Returns the hex-encoded MAC.
pub fn compute_hmac(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    alloy::hex::encode(mac.finalize().into_bytes())
}

/// Verify the `X-Facilitator-Auth` signature of a request body in constant time.
/// Invalid hex is compared against zeros so it takes the same path.
pub fn verify_hmac(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    let expected = alloy::hex::decode(signature).unwrap_or_else(|_| vec![0u8; 32]);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_accepts_matching_body() {
        let body = br#"{"x402Version":2}"#;
        let sig = compute_hmac(b"shared", body);
        assert_eq!(sig.len(), 64);
        assert!(verify_hmac(b"shared", body, &sig));
    }

    #[test]
    fn test_hmac_rejects_other_secret_or_body() {
        let sig = compute_hmac(b"secret-1", b"settle");
        assert!(!verify_hmac(b"secret-2", b"settle", &sig));
        assert!(!verify_hmac(b"secret-1", b"verify", &sig));
    }

    #[test]
    fn test_hmac_any_key_length() {
        let long_key = vec![7u8; 200];
        for key in [&b""[..], &b"k"[..], &long_key[..]] {
            let sig = compute_hmac(key, b"body");
            assert!(verify_hmac(key, b"body", &sig));
        }
    }

    #[test]
    fn test_hmac_invalid_hex() {
        assert!(!verify_hmac(b"secret", b"body", "not-hex-zz"));
    }
}
