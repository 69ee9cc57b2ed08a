//! SHA-256 verification of the reassembled lossless payload.
//!
//! Always hashes the raw bytes as embedded in the document, never decoded samples.

use sha2::{Digest, Sha256};
use song_codec_types::{IntegrityReport, IntegrityStatus};

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Compare the digest of `bytes` against `expected_hex`.
///
/// Returns [`IntegrityStatus::Unverified`] when no digest was declared.
pub fn verify(bytes: &[u8], expected_hex: Option<&str>) -> IntegrityStatus {
    match expected_hex {
        Some(expected) => compare_digests(&sha256_hex(bytes), expected),
        None => IntegrityStatus::Unverified,
    }
}

/// Compare an already-computed digest with the declared one.
pub(crate) fn compare_digests(computed: &str, expected: &str) -> IntegrityStatus {
    if computed.eq_ignore_ascii_case(expected.trim()) {
        IntegrityStatus::Verified
    } else {
        IntegrityStatus::Mismatch
    }
}

/// Full comparison details for a payload digest.
///
/// `computed` is `None` when there is no payload, in which case the status is
/// [`IntegrityStatus::Unverified`].
pub fn report(computed: Option<String>, expected: Option<&str>) -> IntegrityReport {
    let status = match (computed.as_deref(), expected) {
        (Some(c), Some(e)) => compare_digests(c, e),
        _ => IntegrityStatus::Unverified,
    };
    IntegrityReport {
        status,
        computed,
        expected: expected.map(str::to_string),
    }
}
