//! Short-lived key/value tokens, such as password reset tokens.
//!
//! Redis backs the store in deployments; the in-process [`MemoryTokenStore`] is used when no
//! `REDIS_URL` is configured and by the tests.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tower_sessions_redis_store::fred::{
    self,
    prelude::{Expiration, KeysInterface, Pool},
};

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), TokenStoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, TokenStoreError>;

    async fn remove(&self, key: &str) -> Result<(), TokenStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),
    #[error("Token store lock poisoned")]
    Poisoned,
}

pub struct RedisTokenStore {
    pool: Pool,
}

impl RedisTokenStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), TokenStoreError> {
        let seconds = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);

        self.pool
            .set::<(), _, _>(key, value, Some(Expiration::EX(seconds)), None, false)
            .await?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, TokenStoreError> {
        Ok(self.pool.get::<Option<String>, _>(key).await?)
    }

    async fn remove(&self, key: &str) -> Result<(), TokenStoreError> {
        self.pool.del::<i64, _>(key).await?;

        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), TokenStoreError> {
        let mut entries = self.entries.lock().map_err(|_| TokenStoreError::Poisoned)?;
        let now = Instant::now();

        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.insert(key.to_string(), (value.to_string(), now + ttl));

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, TokenStoreError> {
        let entries = self.entries.lock().map_err(|_| TokenStoreError::Poisoned)?;

        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn remove(&self, key: &str) -> Result<(), TokenStoreError> {
        let mut entries = self.entries.lock().map_err(|_| TokenStoreError::Poisoned)?;
        entries.remove(key);

        Ok(())
    }
}
