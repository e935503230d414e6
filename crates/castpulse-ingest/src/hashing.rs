use sha2::{Digest, Sha256};
use tracing::debug;

/// Salted hash of a username for privacy-preserving authorship.
///
/// Returns `None` for missing/deleted authors and when no salt is
/// configured — an unsalted hash would be trivially reversible over
/// the public username space.
pub fn hash_username(username: Option<&str>, salt: &str) -> Option<String> {
    let sanitized = username?.trim();
    if sanitized.is_empty() || sanitized == "[deleted]" {
        return None;
    }

    let salt = salt.trim();
    if salt.is_empty() {
        debug!("author hash salt not configured; skipping username hashing");
        return None;
    }

    let mut digest = Sha256::new();
    digest.update(salt.as_bytes());
    digest.update(sanitized.to_lowercase().as_bytes());
    Some(hex::encode(digest.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_stable_and_case_insensitive() {
        let a = hash_username(Some("SomeUser"), "pepper").unwrap();
        let b = hash_username(Some("someuser"), "pepper").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn different_salts_differ() {
        let a = hash_username(Some("someuser"), "pepper").unwrap();
        let b = hash_username(Some("someuser"), "other").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn deleted_and_unsalted_yield_none() {
        assert!(hash_username(Some("[deleted]"), "pepper").is_none());
        assert!(hash_username(Some(""), "pepper").is_none());
        assert!(hash_username(None, "pepper").is_none());
        assert!(hash_username(Some("someuser"), "").is_none());
    }
}
