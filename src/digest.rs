//! Deterministic hashing and timestamp helpers shared by both pipeline stages.

use sha2::{Digest, Sha256};
use time::OffsetDateTime;

/// Hex-encoded SHA-256 digest of the given text.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-256 digest over `parts` joined by newlines.
pub fn sha256_hex_lines(parts: &[&str]) -> String {
    sha256_hex(&parts.join("\n"))
}

/// Process-independent 64-bit hash: the first eight digest bytes read big-endian.
///
/// Unlike `std::hash`, the value is identical across processes, platforms and releases, which
/// is what makes shard assignment reproducible.
pub fn stable_hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Current UTC timestamp formatted as RFC3339.
pub fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn stable_hash_uses_digest_prefix() {
        assert_eq!(stable_hash("abc"), 0xba78_16bf_8f01_cfea);
        assert_eq!(stable_hash("c1"), stable_hash("c1"));
        assert_ne!(stable_hash("c1"), stable_hash("c2"));
    }

    #[test]
    fn joined_lines_hash_differs_from_concatenation() {
        assert_ne!(sha256_hex_lines(&["a", "bc"]), sha256_hex_lines(&["ab", "c"]));
    }

    #[test]
    fn timestamp_is_rfc3339_like() {
        let ts = current_timestamp_rfc3339();
        assert!(ts.contains('T') && ts.ends_with('Z'));
    }
}
