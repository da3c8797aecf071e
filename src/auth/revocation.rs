//! Revocation store: blacklist entries for logged-out session tokens and
//! presence entries for unredeemed password-reset tokens, both in the
//! key-value store with a TTL matching the token's remaining lifetime.
//!
//! Keys never contain the raw token, only an unpadded base64url SHA-256 digest.

use base64ct::{Base64UrlUnpadded, Encoding};
use sha2::{Digest, Sha256};
use std::{sync::Arc, time::Duration};

use crate::kv::{KvError, KvStore};

const BLACKLIST_PREFIX: &str = "blacklist:";
const PASSWORD_RESET_PREFIX: &str = "password_reset:";
const MARKER: &str = "1";

fn token_digest(token: &str) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(token.as_bytes()))
}

fn blacklist_key(token: &str) -> String {
    format!("{BLACKLIST_PREFIX}{}", token_digest(token))
}

fn password_reset_key(token: &str) -> String {
    format!("{PASSWORD_RESET_PREFIX}{}", token_digest(token))
}

#[derive(Clone)]
pub struct RevocationStore {
    kv: Arc<dyn KvStore>,
}

impl std::fmt::Debug for RevocationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationStore").finish_non_exhaustive()
    }
}

impl RevocationStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Blacklist a session token for `ttl`. Writing an existing entry again
    /// only refreshes it.
    ///
    /// # Errors
    /// Returns an error if the key-value store fails.
    pub async fn revoke(&self, token: &str, ttl: Duration) -> Result<(), KvError> {
        self.kv.set_ex(&blacklist_key(token), MARKER, ttl).await
    }

    /// # Errors
    /// Returns an error if the key-value store fails.
    pub async fn is_revoked(&self, token: &str) -> Result<bool, KvError> {
        self.kv.exists(&blacklist_key(token)).await
    }

    /// Mark a reset token as redeemable for `ttl`.
    ///
    /// # Errors
    /// Returns an error if the key-value store fails.
    pub async fn grant(&self, token: &str, ttl: Duration) -> Result<(), KvError> {
        self.kv.set_ex(&password_reset_key(token), MARKER, ttl).await
    }

    /// # Errors
    /// Returns an error if the key-value store fails.
    pub async fn is_redeemable(&self, token: &str) -> Result<bool, KvError> {
        self.kv.exists(&password_reset_key(token)).await
    }

    /// Claim a reset token. Only one caller gets `true` for a given grant.
    ///
    /// # Errors
    /// Returns an error if the key-value store fails.
    pub async fn consume(&self, token: &str) -> Result<bool, KvError> {
        self.kv.del(&password_reset_key(token)).await
    }

    /// Undo a [`consume`](Self::consume) whose follow-up write failed.
    ///
    /// # Errors
    /// Returns an error if the key-value store fails.
    pub async fn restore(&self, token: &str, ttl: Duration) -> Result<(), KvError> {
        self.grant(token, ttl).await
    }

    /// # Errors
    /// Returns an error if the key-value store cannot be reached.
    pub async fn ping(&self) -> Result<(), KvError> {
        self.kv.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    #[test]
    fn keys_hide_the_token() {
        let key = blacklist_key("header.payload.signature");
        assert!(key.starts_with("blacklist:"));
        assert!(!key.contains("payload"));
        // 32 byte digest, unpadded base64url
        assert_eq!(key.len(), "blacklist:".len() + 43);
        assert_ne!(blacklist_key("a"), blacklist_key("b"));
    }

    #[tokio::test]
    async fn blacklist_and_presence_do_not_collide() -> Result<(), KvError> {
        let store = RevocationStore::new(Arc::new(MemoryKv::new()));
        store.grant("t", Duration::from_secs(60)).await?;
        assert!(!store.is_revoked("t").await?);
        store.revoke("t", Duration::from_secs(60)).await?;
        assert!(store.is_revoked("t").await?);
        assert!(store.is_redeemable("t").await?);
        Ok(())
    }

    #[tokio::test]
    async fn consume_is_single_use() -> Result<(), KvError> {
        let store = RevocationStore::new(Arc::new(MemoryKv::new()));
        store.grant("t", Duration::from_secs(60)).await?;
        assert!(store.consume("t").await?);
        assert!(!store.consume("t").await?);
        assert!(!store.is_redeemable("t").await?);
        Ok(())
    }
}
