//! Canonical serialization for content fingerprints.
//!
//! Permission maps, analysis configurations and graph build criteria are
//! fingerprinted so that a reload of identical content can be recognised
//! and so log lines can name the exact criteria a graph was built with.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: Struct fields serialize in declaration order
//! - Stable Vec order: Vectors serialize in index order
//! - No HashMap allowed: Use BTreeMap/BTreeSet for anything fingerprinted

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Serialize a value to canonical JSON bytes for hashing.
///
/// Fails for values JSON cannot represent, such as maps with non-string
/// keys.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}

/// Compute canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> serde_json::Result<u64> {
    let bytes = to_canonical_bytes(value)?;
    Ok(xxh64(&bytes, 0))
}

/// Compute canonical hash and return as hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> serde_json::Result<String> {
    Ok(format!("{:016x}", canonical_hash(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[derive(Serialize)]
    struct Criteria {
        class_perms: BTreeSet<(String, String)>,
        depth: u32,
    }

    #[test]
    fn test_determinism() {
        let mut a = BTreeSet::new();
        a.insert(("file".to_string(), "write".to_string()));
        a.insert(("file".to_string(), "read".to_string()));
        let mut b = BTreeSet::new();
        b.insert(("file".to_string(), "read".to_string()));
        b.insert(("file".to_string(), "write".to_string()));

        let h1 = canonical_hash_hex(&Criteria { class_perms: a, depth: 1 }).unwrap();
        let h2 = canonical_hash_hex(&Criteria { class_perms: b, depth: 1 }).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
    }

    #[test]
    fn test_unserializable_value_is_an_error() {
        let mut weights = std::collections::BTreeMap::new();
        weights.insert(("file".to_string(), "read".to_string()), 10u32);

        assert!(to_canonical_bytes(&weights).is_err());
        assert!(canonical_hash_hex(&weights).is_err());
    }
}
