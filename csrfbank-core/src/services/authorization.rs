//! Authorization gate - per-identity anti-forgery tokens
//!
//! Tokens live for the lifetime of the process. Issuing a new token for an
//! identity replaces the previous one; verifying never consumes it.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use base64::Engine;
use rand::Rng;
use subtle::ConstantTimeEq;

/// Number of random bytes in a token (256 bits)
pub const TOKEN_BYTES: usize = 32;

/// Outcome of a gate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Authorized,
    Rejected,
}

impl Authorization {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Authorization::Authorized)
    }
}

/// Guarded identity -> token table
#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: RwLock<HashMap<String, String>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for `identity`, replacing any earlier one
    pub fn issue(&self, identity: &str) -> String {
        let token = generate_token();
        self.write().insert(identity.to_string(), token.clone());
        token
    }

    /// Check a presented token against the one issued for `identity`
    ///
    /// Rejected when nothing was issued, nothing was presented, or the
    /// strings differ in any way (case-sensitive, full match).
    pub fn verify(&self, identity: &str, presented: Option<&str>) -> Authorization {
        let tokens = self.read();
        let (Some(expected), Some(presented)) = (tokens.get(identity), presented) else {
            return Authorization::Rejected;
        };
        if bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
            Authorization::Authorized
        } else {
            Authorization::Rejected
        }
    }

    // The table holds plain strings; a panic while holding the lock cannot
    // leave it half-updated.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.tokens.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.tokens.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 256 random bits, URL-safe base64 with padding
pub fn generate_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::thread_rng().gen();
    base64::engine::general_purpose::URL_SAFE.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_format() {
        let token = generate_token();
        assert_eq!(token.len(), 44);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '='));

        let decoded = base64::engine::general_purpose::URL_SAFE
            .decode(&token)
            .unwrap();
        assert_eq!(decoded.len(), TOKEN_BYTES);
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_requires_issued_token() {
        let store = TokenStore::new();
        assert_eq!(store.verify("alice", Some("anything")), Authorization::Rejected);
        assert_eq!(store.verify("alice", None), Authorization::Rejected);
    }

    #[test]
    fn test_verify_exact_match() {
        let store = TokenStore::new();
        let token = store.issue("alice");

        assert!(store.verify("alice", Some(&token)).is_authorized());
        // not consumed
        assert!(store.verify("alice", Some(&token)).is_authorized());

        assert_eq!(store.verify("alice", None), Authorization::Rejected);
        assert_eq!(store.verify("alice", Some("")), Authorization::Rejected);
        let case_flipped: String = token
            .chars()
            .map(|c| {
                if c.is_ascii_uppercase() {
                    c.to_ascii_lowercase()
                } else {
                    c.to_ascii_uppercase()
                }
            })
            .collect();
        if case_flipped != token {
            assert_eq!(
                store.verify("alice", Some(&case_flipped)),
                Authorization::Rejected
            );
        }
        assert_eq!(
            store.verify("alice", Some(&token[..token.len() - 1])),
            Authorization::Rejected
        );
    }

    #[test]
    fn test_tokens_scoped_per_identity() {
        let store = TokenStore::new();
        let alice_token = store.issue("alice");
        store.issue("bob");

        assert!(store.verify("alice", Some(&alice_token)).is_authorized());
        assert_eq!(store.verify("bob", Some(&alice_token)), Authorization::Rejected);
    }

    #[test]
    fn test_reissue_replaces_token() {
        let store = TokenStore::new();
        let first = store.issue("alice");
        let second = store.issue("alice");

        assert_eq!(store.verify("alice", Some(&first)), Authorization::Rejected);
        assert!(store.verify("alice", Some(&second)).is_authorized());
        assert_ne!(first, second);
    }
}
