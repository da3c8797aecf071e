//! Key-value store used for token revocation and single-use reset tokens.
//!
//! Only single-key commands are needed (`SET` with TTL, `EXISTS`, `DEL`),
//! so no locking is done on top of the store. Every call goes straight to the
//! backend; there is no caching layer that could serve a stale answer.

mod memory;
mod redis;

pub use self::memory::MemoryKv;
pub use self::redis::RedisKv;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error(transparent)]
    Redis(#[from] ::redis::RedisError),

    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store `value` under `key`, expiring after `ttl` (rounded up to whole seconds).
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    /// Remove `key`; returns `true` only for the caller that actually removed it.
    async fn del(&self, key: &str) -> Result<bool, KvError>;

    async fn ping(&self) -> Result<(), KvError>;
}

/// TTL in whole seconds, never zero (a zero `EX` is rejected by Redis).
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    let secs = if ttl.subsec_nanos() > 0 { secs + 1 } else { secs };
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_rounds_up_and_is_never_zero() {
        assert_eq!(ttl_seconds(Duration::from_secs(0)), 1);
        assert_eq!(ttl_seconds(Duration::from_millis(1)), 1);
        assert_eq!(ttl_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_seconds(Duration::from_secs(86_400)), 86_400);
    }
}
