//! Zone and Health Store
//!
//! Key-value access used by the zone directory and the health index. Zones
//! are hashes (zone name -> location label -> record JSON); health entries
//! are plain keys (`host:ip` -> status JSON).

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{DnsError, RedisConfig};

/// Minimal key-value interface the resolver depends on
#[async_trait]
pub trait Store: Send + Sync {
    /// All top-level keys (zone names or health keys)
    async fn keys(&self) -> Result<Vec<String>, DnsError>;

    /// All field names of a hash key
    async fn hkeys(&self, key: &str) -> Result<Vec<String>, DnsError>;

    /// Field value of a hash key
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, DnsError>;

    /// Set a field of a hash key
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), DnsError>;

    /// Value of a plain key
    async fn get(&self, key: &str) -> Result<Option<String>, DnsError>;

    /// Set a plain key
    async fn set(&self, key: &str, value: &str) -> Result<(), DnsError>;

    /// Delete a key of either kind
    async fn del(&self, key: &str) -> Result<(), DnsError>;
}

/// Redis/DragonflyDB backed store
///
/// Keys are namespaced as `<prefix><key><suffix>`; the namespace is stripped
/// again when listing.
pub struct RedisStore {
    connection: ConnectionManager,
    prefix: String,
    suffix: String,
    timeout: Duration,
}

impl RedisStore {
    /// Connect to Redis using the given configuration
    pub async fn connect(config: &RedisConfig) -> Result<Self, DnsError> {
        let client = Client::open(config.url.as_str())?;
        let timeout = Duration::from_millis(config.timeout_ms);
        let connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| DnsError::StoreTimeout(config.timeout_ms))??;

        info!("Connected to store at {}", config.url);

        Ok(Self {
            connection,
            prefix: config.prefix.clone(),
            suffix: config.suffix.clone(),
            timeout,
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}{}", self.prefix, key, self.suffix)
    }

    fn strip_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())
    }

    /// Run a store command under the configured timeout
    async fn timed<T, F>(&self, fut: F) -> Result<T, DnsError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(DnsError::from),
            Err(_) => Err(DnsError::StoreTimeout(self.timeout.as_millis() as u64)),
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn keys(&self) -> Result<Vec<String>, DnsError> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*{}", self.prefix, self.suffix);
        let raw: Vec<String> = self.timed(conn.keys(pattern)).await?;
        debug!("Store listed {} keys", raw.len());
        Ok(raw
            .iter()
            .filter_map(|k| self.strip_key(k).map(str::to_string))
            .collect())
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>, DnsError> {
        let mut conn = self.connection.clone();
        self.timed(conn.hkeys(self.full_key(key))).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, DnsError> {
        let mut conn = self.connection.clone();
        self.timed(conn.hget(self.full_key(key), field)).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), DnsError> {
        let mut conn = self.connection.clone();
        self.timed(conn.hset::<_, _, _, ()>(self.full_key(key), field, value))
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, DnsError> {
        let mut conn = self.connection.clone();
        self.timed(conn.get(self.full_key(key))).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DnsError> {
        let mut conn = self.connection.clone();
        self.timed(conn.set::<_, _, ()>(self.full_key(key), value))
            .await
    }

    async fn del(&self, key: &str) -> Result<(), DnsError> {
        let mut conn = self.connection.clone();
        self.timed(conn.del::<_, ()>(self.full_key(key))).await
    }
}

#[derive(Debug, Clone)]
enum MemoryValue {
    Plain(String),
    Hash(BTreeMap<String, String>),
}

/// In-process store with the same semantics as [`RedisStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, MemoryValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn keys(&self) -> Result<Vec<String>, DnsError> {
        let data = self.data.read().await;
        let mut keys: Vec<String> = data.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>, DnsError> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(MemoryValue::Hash(fields)) => Ok(fields.keys().cloned().collect()),
            Some(MemoryValue::Plain(_)) => Err(DnsError::StoreError(format!(
                "WRONGTYPE {} is not a hash",
                key
            ))),
            None => Ok(Vec::new()),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, DnsError> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(MemoryValue::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(MemoryValue::Plain(_)) => Err(DnsError::StoreError(format!(
                "WRONGTYPE {} is not a hash",
                key
            ))),
            None => Ok(None),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), DnsError> {
        let mut data = self.data.write().await;
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| MemoryValue::Hash(BTreeMap::new()));
        match entry {
            MemoryValue::Hash(fields) => {
                fields.insert(field.to_string(), value.to_string());
                Ok(())
            }
            MemoryValue::Plain(_) => Err(DnsError::StoreError(format!(
                "WRONGTYPE {} is not a hash",
                key
            ))),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, DnsError> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(MemoryValue::Plain(value)) => Ok(Some(value.clone())),
            Some(MemoryValue::Hash(_)) => Err(DnsError::StoreError(format!(
                "WRONGTYPE {} is a hash",
                key
            ))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DnsError> {
        self.data
            .write()
            .await
            .insert(key.to_string(), MemoryValue::Plain(value.to_string()));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), DnsError> {
        self.data.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_hashes() {
        let store = MemoryStore::new();
        store.hset("example.com.", "www", "{}").await.unwrap();
        store.hset("example.com.", "@", "{}").await.unwrap();

        let mut fields = store.hkeys("example.com.").await.unwrap();
        fields.sort();
        assert_eq!(fields, vec!["@".to_string(), "www".to_string()]);
        assert_eq!(
            store.hget("example.com.", "www").await.unwrap(),
            Some("{}".to_string())
        );
        assert_eq!(store.hget("example.com.", "ftp").await.unwrap(), None);
        assert!(store.hkeys("missing.com.").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_plain_keys() {
        let store = MemoryStore::new();
        store.set("w0.example.com:1.2.3.4", "{\"status\":3}").await.unwrap();
        store.set("w1.example.com:1.2.3.4", "{}").await.unwrap();

        assert_eq!(store.keys().await.unwrap().len(), 2);
        store.del("w1.example.com:1.2.3.4").await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["w0.example.com:1.2.3.4".to_string()]);
        assert!(store.get("w1.example.com:1.2.3.4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_wrong_type() {
        let store = MemoryStore::new();
        store.set("plain", "x").await.unwrap();
        assert!(store.hget("plain", "f").await.is_err());
        assert!(store.hset("plain", "f", "v").await.is_err());
    }
}
