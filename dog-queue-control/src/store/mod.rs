pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use std::time::Duration;

use crate::ControlResult;

pub use memory::MemoryLockStore;

#[cfg(feature = "redis")]
pub use self::redis::RedisLockStore;

/// Shared key-value store primitives the control layer relies on.
///
/// Every operation is a single atomic store command; nothing spans keys.
/// Implementations must surface connectivity failures as
/// `ControlError::StoreUnavailable`, never as "key absent".
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Atomically create `key` with `value` unless it exists. Returns whether it was created.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> ControlResult<bool>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> ControlResult<()>;

    /// Check whether `key` is present and not expired
    async fn exists(&self, key: &str) -> ControlResult<bool>;
}
