//! Short-lived storage for one-time confirmation codes.

use log::{debug, info};
use rand::{thread_rng, Rng};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::errors::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum CodeStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("code store lock poisoned")]
    Poisoned,
}

impl From<CodeStoreError> for ApiError {
    fn from(e: CodeStoreError) -> Self {
        ApiError::InternalError(format!("Code store unavailable: {}", e))
    }
}

/// Key of the sign-in code for a Telegram id.
pub fn login_code_key(tg_id: &str) -> String {
    format!("otp:{}", tg_id)
}

/// Key of the password-reset code for a handle; disjoint from sign-in keys.
pub fn reset_code_key(username: &str) -> String {
    format!("reset:{}", username)
}

/// Five-digit numeric code.
pub fn generate_code() -> u32 {
    thread_rng().gen_range(10000..=99999)
}

#[derive(Clone)]
pub enum CodeStore {
    Redis(RedisCodeStore),
    Memory(MemoryCodeStore),
}

impl CodeStore {
    pub async fn connect(redis_url: &str) -> Result<Self, CodeStoreError> {
        let store = RedisCodeStore::connect(redis_url).await?;
        info!("Connected to code store at {}", redis_url);
        Ok(CodeStore::Redis(store))
    }

    pub fn in_memory() -> Self {
        CodeStore::Memory(MemoryCodeStore::default())
    }

    pub async fn put(&self, key: &str, code: &str, ttl: Duration) -> Result<(), CodeStoreError> {
        match self {
            CodeStore::Redis(store) => store.put(key, code, ttl).await,
            CodeStore::Memory(store) => store.put(key, code, ttl),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, CodeStoreError> {
        match self {
            CodeStore::Redis(store) => store.get(key).await,
            CodeStore::Memory(store) => store.get(key),
        }
    }

    pub async fn remove(&self, key: &str) -> Result<(), CodeStoreError> {
        match self {
            CodeStore::Redis(store) => store.remove(key).await,
            CodeStore::Memory(store) => store.remove(key),
        }
    }
}

#[derive(Clone)]
pub struct RedisCodeStore {
    conn: MultiplexedConnection,
}

impl RedisCodeStore {
    pub async fn connect(redis_url: &str) -> Result<Self, CodeStoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }

    async fn put(&self, key: &str, code: &str, ttl: Duration) -> Result<(), CodeStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, code, ttl.as_secs().max(1)).await?;
        debug!("Stored code under {} for {}s", key, ttl.as_secs());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CodeStoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn remove(&self, key: &str) -> Result<(), CodeStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

/// Process-local store, used when Redis is unreachable and in tests.
#[derive(Clone, Default)]
pub struct MemoryCodeStore {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl MemoryCodeStore {
    fn put(&self, key: &str, code: &str, ttl: Duration) -> Result<(), CodeStoreError> {
        let mut entries = self.entries.lock().map_err(|_| CodeStoreError::Poisoned)?;
        entries.insert(key.to_string(), (code.to_string(), Instant::now() + ttl));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, CodeStoreError> {
        let mut entries = self.entries.lock().map_err(|_| CodeStoreError::Poisoned)?;
        match entries.get(key) {
            Some((code, deadline)) if Instant::now() < *deadline => Ok(Some(code.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn remove(&self, key: &str) -> Result<(), CodeStoreError> {
        let mut entries = self.entries.lock().map_err(|_| CodeStoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_have_five_digits() {
        for _ in 0..1000 {
            let code = generate_code();
            assert!((10000..=99999).contains(&code));
            assert_eq!(code.to_string().len(), 5);
        }
    }

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(login_code_key("12345"), "otp:12345");
        assert_eq!(reset_code_key("ann"), "reset:ann");
    }

    #[test]
    fn reset_and_login_keys_never_collide() {
        for value in ["12345", "ann", "otp:1", ""] {
            assert_ne!(login_code_key(value), reset_code_key(value));
        }
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = CodeStore::in_memory();
        store.put("otp:1", "54321", Duration::from_secs(600)).await.unwrap();
        assert_eq!(store.get("otp:1").await.unwrap().as_deref(), Some("54321"));
        assert_eq!(store.get("otp:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_expires_entries() {
        let store = CodeStore::in_memory();
        store.put("otp:1", "54321", Duration::ZERO).await.unwrap();
        assert_eq!(store.get("otp:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_removes_entries() {
        let store = CodeStore::in_memory();
        store.put("otp:1", "54321", Duration::from_secs(600)).await.unwrap();
        store.remove("otp:1").await.unwrap();
        assert_eq!(store.get("otp:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn newer_code_replaces_older() {
        let store = CodeStore::in_memory();
        store.put("otp:1", "11111", Duration::from_secs(600)).await.unwrap();
        store.put("otp:1", "22222", Duration::from_secs(600)).await.unwrap();
        assert_eq!(store.get("otp:1").await.unwrap().as_deref(), Some("22222"));
    }
}
