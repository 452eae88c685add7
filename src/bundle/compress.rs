//! `base64+gz` encoding for `BundleResource.content` (spec §4.3 step 5).
//! Compression is forced when requested, or when content isn't valid UTF-8,
//! or (spec step 9) when the serialized Bundle overall crosses 1,000,000
//! bytes and the whole thing must be rebuilt with compression on.

use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::{AppError, AppResult};

pub const ENCODING_BASE64_GZ: &str = "base64+gz";

/// Returns `(content, encoding)` per spec step 5: raw UTF-8 when `force` is
/// false and the bytes decode as UTF-8, otherwise `base64+gz`.
pub fn encode(bytes: &[u8], force: bool) -> AppResult<(String, String)> {
    if !force {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return Ok((text.to_string(), String::new()));
        }
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).map_err(AppError::Io)?;
    let gz = encoder.finish().map_err(AppError::Io)?;
    Ok((STANDARD.encode(gz), ENCODING_BASE64_GZ.to_string()))
}

/// Inverse of `encode`; used by the deployer to recover original bytes and
/// by tests asserting the round-trip law (spec §8).
pub fn decode(content: &str, encoding: &str) -> AppResult<Vec<u8>> {
    if encoding.is_empty() {
        return Ok(content.as_bytes().to_vec());
    }
    if encoding != ENCODING_BASE64_GZ {
        return Err(AppError::Validation(format!("unknown resource encoding {encoding:?}")));
    }

    let gz = STANDARD
        .decode(content)
        .map_err(|e| AppError::Validation(format!("invalid base64 content: {e}")))?;
    let mut decoder = GzDecoder::new(&gz[..]);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(AppError::Io)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_content_stays_raw_unless_forced() {
        let (content, encoding) = encode(b"hello: world", false).unwrap();
        assert_eq!(content, "hello: world");
        assert!(encoding.is_empty());
    }

    #[test]
    fn non_utf8_is_always_compressed() {
        let bytes = [0xff, 0xfe, 0x00, 0x01];
        let (_, encoding) = encode(&bytes, false).unwrap();
        assert_eq!(encoding, ENCODING_BASE64_GZ);
    }

    #[test]
    fn round_trip_reproduces_original_bytes() {
        let original = b"some: yaml\nwith: unicode \xc3\xa9";
        // not valid utf8 purely by construction above would be invalid; use
        // raw bytes directly to force compression and verify the round trip.
        let bytes = vec![1u8, 2, 3, 4, 250, 251, 252];
        let (content, encoding) = encode(&bytes, true).unwrap();
        let decoded = decode(&content, &encoding).unwrap();
        assert_eq!(decoded, bytes);
        let _ = original;
    }
}
