//! Identity types for Cardwall entities

use chrono::{DateTime, Utc};

/// Entity identifier: a sequential database primary key.
/// Persisted rows always carry an id >= 1; anything below that marks a
/// record that has never been saved.
pub type EntityId = i64;

/// Project identifier. Nearly every cache key is scoped to one project.
pub type ProjectId = i64;

/// Monotonic revision number: entity versions, staleness counters and
/// structure revisions all use this type. A revision strictly increases
/// on every persisted mutation and is never reused for a different state
/// of the same row.
pub type Revision = i64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Digest width in bytes. 128 bits is plenty for cache addressing.
const SHORT_DIGEST_BYTES: usize = 16;

/// Compute a short deterministic digest over string parts.
///
/// Each part is framed with a separator byte before hashing so that
/// `["ab", "c"]` and `["a", "bc"]` cannot collide. The result is a
/// 32-character lowercase hex string. Collision resistance here serves
/// cache addressing, not security: the point is determinism.
pub fn short_digest(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[0x1f]);
    }
    let hash = hasher.finalize();
    hex::encode(&hash.as_bytes()[..SHORT_DIGEST_BYTES])
}

/// Digest a raw byte payload at the same width as [`short_digest`].
pub fn short_digest_bytes(bytes: &[u8]) -> String {
    let hash = blake3::hash(bytes);
    hex::encode(&hash.as_bytes()[..SHORT_DIGEST_BYTES])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_digest_deterministic() {
        let a = short_digest(&["17", "1724601600"]);
        let b = short_digest(&["17", "1724601600"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_short_digest_length() {
        assert_eq!(short_digest(&[]).len(), 32);
        assert_eq!(short_digest(&["x"]).len(), 32);
    }

    #[test]
    fn test_short_digest_part_framing() {
        // Part boundaries must matter: concatenation alone would collide.
        assert_ne!(short_digest(&["ab", "c"]), short_digest(&["a", "bc"]));
        assert_ne!(short_digest(&["abc"]), short_digest(&["ab", "c"]));
    }

    #[test]
    fn test_short_digest_is_hex() {
        let digest = short_digest(&["card", "101"]);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_short_digest_bytes_shape() {
        let digest = short_digest_bytes(b"{\"page\":2}");
        assert_eq!(digest.len(), 32);
        assert_eq!(digest, short_digest_bytes(b"{\"page\":2}"));
        assert_ne!(digest, short_digest_bytes(b"{\"page\":3}"));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: digests are stable across repeated calls.
        #[test]
        fn prop_digest_deterministic(parts in proptest::collection::vec(".*", 0..6)) {
            let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
            prop_assert_eq!(short_digest(&refs), short_digest(&refs));
        }

        /// Property: every digest is 32 lowercase hex characters.
        #[test]
        fn prop_digest_shape(parts in proptest::collection::vec(".*", 0..6)) {
            let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
            let digest = short_digest(&refs);
            prop_assert_eq!(digest.len(), 32);
            prop_assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }
}
