use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use super::StateStore;
use crate::config::RedisConfig;
use crate::GovSyncError;

/// Redis-backed [`StateStore`]; every key is prefixed with the configured namespace
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    namespace: String,
}

impl RedisStore {
    pub fn connect(config: &RedisConfig) -> crate::Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| GovSyncError::ConfigError(format!("Redis open error: {e}")))?;

        Ok(Self {
            client,
            namespace: config.namespace.clone(),
        })
    }

    fn key(&self, k: &str) -> String {
        format!("{}{}", self.namespace, k)
    }

    async fn conn(&self) -> crate::Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| GovSyncError::Store(format!("Redis connect error: {e}")))
    }

    /// Round-trip check used at startup
    pub async fn ping(&self) -> crate::Result<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| GovSyncError::Store(format!("Redis PING error: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> crate::Result<Option<String>> {
        let mut conn = self.conn().await?;
        let val: Option<String> = conn
            .get(self.key(key))
            .await
            .map_err(|e| GovSyncError::Store(format!("Redis GET error: {e}")))?;
        Ok(val)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> crate::Result<()> {
        let k = self.key(key);
        let mut conn = self.conn().await?;
        match ttl {
            Some(ttl) => {
                redis::pipe()
                    .set(&k, value)
                    .ignore()
                    .expire(&k, ttl.as_secs() as i64)
                    .ignore()
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(|e| GovSyncError::Store(format!("Redis SET/EXPIRE error: {e}")))?;
            }
            None => {
                let _: () = conn
                    .set(&k, value)
                    .await
                    .map_err(|e| GovSyncError::Store(format!("Redis SET error: {e}")))?;
            }
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> crate::Result<bool> {
        let mut conn = self.conn().await?;
        // SET NX EX replies OK when written and nil when the key already exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| GovSyncError::Store(format!("Redis SET NX error: {e}")))?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> crate::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .del(self.key(key))
            .await
            .map_err(|e| GovSyncError::Store(format!("Redis DEL error: {e}")))?;
        Ok(())
    }

    async fn hash_get(&self, map: &str, field: &str) -> crate::Result<Option<String>> {
        let mut conn = self.conn().await?;
        let val: Option<String> = conn
            .hget(self.key(map), field)
            .await
            .map_err(|e| GovSyncError::Store(format!("Redis HGET error: {e}")))?;
        Ok(val)
    }

    async fn hash_set(&self, map: &str, field: &str, value: &str) -> crate::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .hset(self.key(map), field, value)
            .await
            .map_err(|e| GovSyncError::Store(format!("Redis HSET error: {e}")))?;
        Ok(())
    }

    async fn hash_delete(&self, map: &str, field: &str) -> crate::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .hdel(self.key(map), field)
            .await
            .map_err(|e| GovSyncError::Store(format!("Redis HDEL error: {e}")))?;
        Ok(())
    }

    async fn hash_get_all(&self, map: &str) -> crate::Result<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        let all: HashMap<String, String> = conn
            .hgetall(self.key(map))
            .await
            .map_err(|e| GovSyncError::Store(format!("Redis HGETALL error: {e}")))?;
        Ok(all)
    }

    async fn hash_field_exists(&self, map: &str, field: &str) -> crate::Result<bool> {
        let mut conn = self.conn().await?;
        let exists: bool = conn
            .hexists(self.key(map), field)
            .await
            .map_err(|e| GovSyncError::Store(format!("Redis HEXISTS error: {e}")))?;
        Ok(exists)
    }
}
