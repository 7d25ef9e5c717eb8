use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::StateStore;

#[derive(Debug, Clone)]
struct Scalar {
    value: String,
    expires_at: Option<Instant>,
}

impl Scalar {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    scalars: HashMap<String, Scalar>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// Process-local [`StateStore`] with expiry semantics matching Redis
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields currently held in a hash
    pub async fn hash_len(&self, map: &str) -> usize {
        self.inner.read().await.hashes.get(map).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> crate::Result<Option<String>> {
        let now = Instant::now();
        let inner = self.inner.read().await;
        Ok(inner
            .scalars
            .get(key)
            .filter(|s| s.is_live(now))
            .map(|s| s.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> crate::Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.inner.write().await.scalars.insert(
            key.to_string(),
            Scalar {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> crate::Result<bool> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        if inner.scalars.get(key).is_some_and(|s| s.is_live(now)) {
            return Ok(false);
        }
        inner.scalars.insert(
            key.to_string(),
            Scalar {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> crate::Result<()> {
        let mut inner = self.inner.write().await;
        inner.scalars.remove(key);
        inner.hashes.remove(key);
        Ok(())
    }

    async fn hash_get(&self, map: &str, field: &str) -> crate::Result<Option<String>> {
        let inner = self.inner.read().await;
        Ok(inner.hashes.get(map).and_then(|h| h.get(field)).cloned())
    }

    async fn hash_set(&self, map: &str, field: &str, value: &str) -> crate::Result<()> {
        self.inner
            .write()
            .await
            .hashes
            .entry(map.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_delete(&self, map: &str, field: &str) -> crate::Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(hash) = inner.hashes.get_mut(map) {
            hash.remove(field);
            if hash.is_empty() {
                inner.hashes.remove(map);
            }
        }
        Ok(())
    }

    async fn hash_get_all(&self, map: &str) -> crate::Result<HashMap<String, String>> {
        let inner = self.inner.read().await;
        Ok(inner.hashes.get(map).cloned().unwrap_or_default())
    }

    async fn hash_field_exists(&self, map: &str, field: &str) -> crate::Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner.hashes.get(map).is_some_and(|h| h.contains_key(field)))
    }
}
