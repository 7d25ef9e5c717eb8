//! Durable key-value state store
//!
//! The sync engine only needs scalar keys with optional expiry and named
//! hashes. [`RedisStore`] is the production backend; [`MemoryStore`] backs
//! tests and local dry runs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

pub mod memory;
pub mod redis_client;

pub use memory::MemoryStore;
pub use redis_client::RedisStore;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a scalar, replacing any previous value and expiry
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Set only when the key is absent; returns whether the value was written
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn hash_get(&self, map: &str, field: &str) -> Result<Option<String>>;

    async fn hash_set(&self, map: &str, field: &str, value: &str) -> Result<()>;

    async fn hash_delete(&self, map: &str, field: &str) -> Result<()>;

    async fn hash_get_all(&self, map: &str) -> Result<HashMap<String, String>>;

    async fn hash_field_exists(&self, map: &str, field: &str) -> Result<bool>;
}
