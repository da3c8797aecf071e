use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::time::Duration;
use tracing::{Instrument, info_span};

use super::{KvError, KvStore, ttl_seconds};

/// Redis-backed store. The connection manager is shared and cloned per call;
/// it reconnects on its own after connection loss.
#[derive(Clone)]
pub struct RedisKv {
    connection: ConnectionManager,
}

impl RedisKv {
    /// Connect to `redis_url` and verify the connection with `PING`.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the server cannot be reached.
    pub async fn connect(redis_url: &str) -> Result<Self, KvError> {
        let client = Client::open(redis_url)?;
        let connection = client.get_connection_manager().await?;
        let store = Self { connection };
        store.ping().await?;
        Ok(store)
    }
}

impl std::fmt::Debug for RedisKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKv").finish_non_exhaustive()
    }
}

fn command_span(command: &'static str) -> tracing::Span {
    info_span!("kv.command", db.system = "redis", db.operation = command)
}

#[async_trait]
impl KvStore for RedisKv {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .set_ex(key, value, ttl_seconds(ttl))
            .instrument(command_span("SET"))
            .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.connection.clone();
        let found: bool = conn
            .exists(key)
            .instrument(command_span("EXISTS"))
            .await?;
        Ok(found)
    }

    async fn del(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(key).instrument(command_span("DEL")).await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<(), KvError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .instrument(command_span("PING"))
            .await?;
        Ok(())
    }
}
