//! HMAC signature verification for webhook bodies, shared by every provider
//! that signs with `hmac-sha1`/`hmac-sha256` over a shared secret
//! (GitHub, GitLab, Gogs, Bitbucket Server). Comparisons are constant-time
//! so response-timing can't leak the correct signature one byte at a time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Verifies a `sha256=<hex>`-style signature header (GitHub's
/// `X-Hub-Signature-256`, Gogs's `X-Gogs-Signature` variant).
pub fn verify_hmac_sha256_hex(secret: &str, body: &[u8], signature_header: &str) -> AppResult<()> {
    let hex_sig = signature_header
        .strip_prefix("sha256=")
        .unwrap_or(signature_header);

    let expected = decode_hex(hex_sig).ok_or(AppError::WebhookSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Webhook("invalid HMAC key length".to_string()))?;
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    if computed.as_slice().ct_eq(&expected[..]).into() {
        Ok(())
    } else {
        Err(AppError::WebhookSignature)
    }
}

/// Bitbucket Server / plain shared-secret providers that send the raw token
/// value rather than an HMAC digest; still compared in constant time.
pub fn verify_shared_secret(expected_secret: &str, provided: &str) -> AppResult<()> {
    if expected_secret.as_bytes().ct_eq(provided.as_bytes()).into() {
        Ok(())
    } else {
        Err(AppError::WebhookSignature)
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_matching_signature() {
        let secret = "topsecret";
        let body = b"hello world";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let digest = mac.finalize().into_bytes();
        let header = format!("sha256={}", hex_encode(&digest));
        assert!(verify_hmac_sha256_hex(secret, body, &header).is_ok());
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = b"hello world";
        let mut mac = HmacSha256::new_from_slice(b"right").unwrap();
        mac.update(body);
        let digest = mac.finalize().into_bytes();
        let header = format!("sha256={}", hex_encode(&digest));
        assert!(verify_hmac_sha256_hex("wrong", body, &header).is_err());
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(verify_hmac_sha256_hex("secret", b"body", "not-hex").is_err());
    }

    fn hex_encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}
