//! Cache key derivation.

use sha2::{Digest, Sha256};

/// Length in hex characters of a derived key (128 bits).
pub const KEY_HEX_LEN: usize = 32;

/// Deterministic digest identifying a cacheable image.
///
/// Derived from the resource identifier (usually a URL). The hex form is
/// filesystem-safe and doubles as the on-disk entry name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives a key from a resource identifier.
    #[must_use]
    pub fn derive(identifier: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(identifier.as_bytes());
        let result = hasher.finalize();
        Self(hex::encode(&result[..KEY_HEX_LEN / 2]))
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
