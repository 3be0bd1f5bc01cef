//! Device identifiers are hashed at the edge so the engine only ever sees
//! opaque ids.

use sha2::{Digest, Sha256};

/// Hex SHA-256 of `salt || raw`.
pub fn hash_device_id(salt: &str, raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_and_salted() {
        let a = hash_device_id("s1", "phone-123");
        assert_eq!(a, hash_device_id("s1", "phone-123"));
        assert_ne!(a, hash_device_id("s2", "phone-123"));
        assert_eq!(a.len(), 64);
        assert!(!a.contains("phone"));
    }
}
