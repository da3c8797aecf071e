use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use super::{KvError, KvStore};

/// In-process key-value store with TTL, for local runs and tests.
///
/// Unlike Redis the TTL is kept with full `Duration` precision. Can be switched
/// into an unavailable state to simulate an outage.
#[derive(Debug)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    available: AtomicBool,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), KvError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(KvError::Unavailable("memory store offline".to_string()))
        }
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, (String, Instant)>) -> T,
    ) -> Result<T, KvError> {
        self.check()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| KvError::Unavailable("memory store lock poisoned".to_string()))?;
        let now = Instant::now();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(f(&mut entries))
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let expires_at = Instant::now() + ttl;
        self.with_entries(|entries| {
            entries.insert(key.to_string(), (value.to_string(), expires_at));
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        self.with_entries(|entries| entries.contains_key(key))
    }

    async fn del(&self, key: &str) -> Result<bool, KvError> {
        self.with_entries(|entries| entries.remove(key).is_some())
    }

    async fn ping(&self) -> Result<(), KvError> {
        self.check()
    }
}
