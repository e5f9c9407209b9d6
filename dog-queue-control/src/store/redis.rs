//! Redis-backed lock store.

use std::time::Duration;
use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use tracing::debug;

use crate::{ControlError, ControlResult, store::LockStore};

/// Namespaced key layout for lock-store entries
#[derive(Debug, Clone)]
pub struct LockKeys {
    namespace: String,
}

impl LockKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Physical key for a logical store key
    pub fn key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

/// Lock store over a shared Redis instance
#[derive(Clone)]
pub struct RedisLockStore {
    conn: ConnectionManager,
    keys: LockKeys,
}

impl RedisLockStore {
    /// Connect to Redis
    pub async fn connect(redis_url: &str, namespace: &str) -> ControlResult<Self> {
        let client = ::redis::Client::open(redis_url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;
        Ok(Self::with_connection(conn, namespace))
    }

    /// Create a store over an existing connection manager
    pub fn with_connection(conn: ConnectionManager, namespace: &str) -> Self {
        Self {
            conn,
            keys: LockKeys::new(namespace),
        }
    }

    pub fn keys(&self) -> &LockKeys {
        &self.keys
    }
}

/// `PX` argument: at least 1 ms, clamped to `u64::MAX`
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn unavailable(err: ::redis::RedisError) -> ControlError {
    ControlError::StoreUnavailable(err.to_string())
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> ControlResult<bool> {
        let mut conn = self.conn.clone();
        let ttl_ms = ttl_millis(ttl);

        // SET NX PX replies OK on create, nil when the key exists
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(self.keys.key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        debug!(key, acquired = reply.is_some(), "SET NX");
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> ControlResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(self.keys.key(key)).await.map_err(unavailable)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> ControlResult<bool> {
        let mut conn = self.conn.clone();
        let present: bool = conn.exists(self.keys.key(key)).await.map_err(unavailable)?;
        Ok(present)
    }
}
