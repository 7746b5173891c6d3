//! Opaque token value generation.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Number of random bytes in a generated token (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Produces opaque token values for codes, access tokens and refresh tokens.
pub trait TokenGenerator: Send + Sync {
    /// Returns a fresh token value.
    fn generate(&self) -> String;
}

/// Cryptographically secure generator.
///
/// Returns a 256-bit random value encoded as base64url (43 characters).
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureTokenGenerator;

impl TokenGenerator for SecureTokenGenerator {
    fn generate(&self) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

/// Deterministic generator yielding `{prefix}-1`, `{prefix}-2`, ...
///
/// Intended for tests only.
#[derive(Debug)]
pub struct SequentialTokenGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialTokenGenerator {
    /// Creates a generator with the given prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl TokenGenerator for SequentialTokenGenerator {
    fn generate(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{n}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_secure_token_format() {
        let token = SecureTokenGenerator.generate();
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_secure_tokens_are_unique() {
        let tokens: HashSet<_> = (0..1000).map(|_| SecureTokenGenerator.generate()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_sequential_generator() {
        let generator = SequentialTokenGenerator::new("at");
        assert_eq!(generator.generate(), "at-1");
        assert_eq!(generator.generate(), "at-2");
    }
}
