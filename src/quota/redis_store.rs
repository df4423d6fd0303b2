//! Redis-backed counter store.
//!
//! Makes quotas consistent across gateway instances. The increment, the
//! first-hit expiry, and the TTL read run in one Lua script so they are atomic
//! on the server.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::OnceCell;

use crate::quota::store::{CounterStore, Hit, StoreError};

const HIT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// Default key prefix, shared with the storefront's existing limiter keys.
pub const DEFAULT_PREFIX: &str = "rate-limit:";

pub struct RedisStore {
    client: redis::Client,
    prefix: String,
    script: redis::Script,
    connection: OnceCell<MultiplexedConnection>,
}

impl RedisStore {
    /// Create a store for `url`. The connection is opened on first use.
    pub fn open(url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            prefix: prefix.to_string(),
            script: redis::Script::new(HIT_SCRIPT),
            connection: OnceCell::new(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                let conn = self.client.get_multiplexed_async_connection().await?;
                tracing::info!(prefix = %self.prefix, "Connected to redis counter store");
                Ok::<_, StoreError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<Hit, StoreError> {
        let mut conn = self.connection().await?;
        let window_ms = (window.as_millis() as u64).max(1);

        let (count, ttl_ms): (i64, i64) = self
            .script
            .key(self.key(key))
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        if count < 1 {
            return Err(StoreError::Protocol(format!("non-positive count {count}")));
        }

        Ok(Hit {
            count: count as u64,
            reset_after: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _removed: i64 = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
