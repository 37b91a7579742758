//! TTL-bounded snapshot store: Redis-backed with an in-memory fallback.
//!
//! One handle, two implementations selected at construction. If Redis is
//! unreachable at startup the store degrades to a process-local volatile map
//! with the same read/write semantics (no cross-process visibility); runtime
//! Redis errors are logged and absorbed so a store hiccup never aborts a
//! collection cycle. Callers must not depend on persistence across restarts
//! either way.

use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct Store {
    inner: StoreInner,
}

#[derive(Clone)]
enum StoreInner {
    Redis(ConnectionManager),
    Memory(Arc<Mutex<MemoryStore>>),
}

#[derive(Default)]
struct MemoryStore {
    values: HashMap<String, ValueEntry>,
    hashes: HashMap<String, HashMap<String, String>>,
}

struct ValueEntry {
    json: String,
    expires_at: Instant,
}

impl ValueEntry {
    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

impl Store {
    /// Connect to Redis, falling back to the in-memory store when no URL is
    /// configured or the server is unreachable.
    pub async fn connect(url: Option<&str>) -> Store {
        let Some(url) = url else {
            tracing::info!("No store URL configured, using in-memory snapshot store");
            return Store::memory();
        };

        match Self::try_redis(url).await {
            Ok(manager) => {
                tracing::info!("Connected to snapshot store at {}", url);
                Store {
                    inner: StoreInner::Redis(manager),
                }
            }
            Err(e) => {
                tracing::warn!("Snapshot store connection failed: {}", e);
                tracing::warn!("Running with in-memory store; snapshots will not be shared");
                Store::memory()
            }
        }
    }

    pub fn memory() -> Store {
        Store {
            inner: StoreInner::Memory(Arc::new(Mutex::new(MemoryStore::default()))),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.inner, StoreInner::Memory(_))
    }

    async fn try_redis(url: &str) -> Result<ConnectionManager, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let mut manager = ConnectionManager::new(client).await?;
        redis::cmd("PING").query_async::<_, ()>(&mut manager).await?;
        Ok(manager)
    }

    /// Store a JSON-serialized value that vanishes after `ttl`.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize value for key {}: {}", key, e);
                return;
            }
        };
        match &self.inner {
            StoreInner::Redis(manager) => {
                let mut con = manager.clone();
                if let Err(e) = con.set_ex::<_, _, ()>(key, json, ttl.as_secs()).await {
                    tracing::error!("Failed to store key {}: {}", key, e);
                }
            }
            StoreInner::Memory(memory) => {
                memory.lock().set(key, json, ttl);
            }
        }
    }

    /// Pipelined write of many JSON values sharing one TTL.
    pub async fn set_json_batch(&self, entries: &[(String, serde_json::Value)], ttl: Duration) {
        if entries.is_empty() {
            return;
        }
        match &self.inner {
            StoreInner::Redis(manager) => {
                let mut pipe = redis::pipe();
                for (key, value) in entries {
                    pipe.set_ex(key, value.to_string(), ttl.as_secs()).ignore();
                }
                let mut con = manager.clone();
                if let Err(e) = pipe.query_async::<_, ()>(&mut con).await {
                    tracing::error!("Failed to store batch of {} keys: {}", entries.len(), e);
                }
            }
            StoreInner::Memory(memory) => {
                let mut guard = memory.lock();
                for (key, value) in entries {
                    guard.set(key, value.to_string(), ttl);
                }
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = match &self.inner {
            StoreInner::Redis(manager) => {
                let mut con = manager.clone();
                match con.get::<_, Option<String>>(key).await {
                    Ok(json) => json?,
                    Err(e) => {
                        tracing::error!("Failed to read key {}: {}", key, e);
                        return None;
                    }
                }
            }
            StoreInner::Memory(memory) => memory.lock().get(key)?,
        };
        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Discarding unparseable value at key {}: {}", key, e);
                None
            }
        }
    }

    /// All live keys starting with `prefix`.
    pub async fn list_keys(&self, prefix: &str) -> Vec<String> {
        match &self.inner {
            StoreInner::Redis(manager) => {
                let mut con = manager.clone();
                match con.keys::<_, Vec<String>>(format!("{prefix}*")).await {
                    Ok(keys) => keys,
                    Err(e) => {
                        tracing::error!("Failed to list keys under {}: {}", prefix, e);
                        Vec::new()
                    }
                }
            }
            StoreInner::Memory(memory) => memory.lock().keys_with_prefix(prefix),
        }
    }

    pub async fn count_keys(&self, prefix: &str) -> usize {
        self.list_keys(prefix).await.len()
    }

    /// Pipelined write of hash entries. Hashes carry no TTL; they back the
    /// metadata store's fast tier.
    pub async fn hash_set_batch(&self, entries: &[(String, Vec<(String, String)>)]) {
        if entries.is_empty() {
            return;
        }
        match &self.inner {
            StoreInner::Redis(manager) => {
                let mut pipe = redis::pipe();
                for (key, fields) in entries {
                    pipe.hset_multiple(key, fields).ignore();
                }
                let mut con = manager.clone();
                if let Err(e) = pipe.query_async::<_, ()>(&mut con).await {
                    tracing::error!("Failed to store {} hashes: {}", entries.len(), e);
                }
            }
            StoreInner::Memory(memory) => {
                let mut guard = memory.lock();
                for (key, fields) in entries {
                    let hash = guard.hashes.entry(key.clone()).or_default();
                    for (field, value) in fields {
                        hash.insert(field.clone(), value.clone());
                    }
                }
            }
        }
    }

    pub async fn hash_get_all(&self, key: &str) -> HashMap<String, String> {
        match &self.inner {
            StoreInner::Redis(manager) => {
                let mut con = manager.clone();
                match con.hgetall::<_, HashMap<String, String>>(key).await {
                    Ok(map) => map,
                    Err(e) => {
                        tracing::error!("Failed to read hash {}: {}", key, e);
                        HashMap::new()
                    }
                }
            }
            StoreInner::Memory(memory) => memory
                .lock()
                .hashes
                .get(key)
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// One pipelined round trip reading many hashes; results align with
    /// `keys`, empty maps for missing entries.
    pub async fn hash_get_all_batch(&self, keys: &[String]) -> Vec<HashMap<String, String>> {
        if keys.is_empty() {
            return Vec::new();
        }
        match &self.inner {
            StoreInner::Redis(manager) => {
                let mut pipe = redis::pipe();
                for key in keys {
                    pipe.hgetall(key);
                }
                let mut con = manager.clone();
                match pipe
                    .query_async::<_, Vec<HashMap<String, String>>>(&mut con)
                    .await
                {
                    Ok(maps) => maps,
                    Err(e) => {
                        tracing::error!("Failed to read {} hashes: {}", keys.len(), e);
                        vec![HashMap::new(); keys.len()]
                    }
                }
            }
            StoreInner::Memory(memory) => {
                let guard = memory.lock();
                keys.iter()
                    .map(|key| guard.hashes.get(key).cloned().unwrap_or_default())
                    .collect()
            }
        }
    }
}

impl MemoryStore {
    fn set(&mut self, key: &str, json: String, ttl: Duration) {
        self.values.insert(
            key.to_string(),
            ValueEntry {
                json,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn get(&mut self, key: &str) -> Option<String> {
        match self.values.get(key) {
            Some(entry) if entry.live() => Some(entry.json.clone()),
            Some(_) => {
                self.values.remove(key);
                None
            }
            None => None,
        }
    }

    fn keys_with_prefix(&mut self, prefix: &str) -> Vec<String> {
        self.values.retain(|_, entry| entry.live());
        self.values
            .keys()
            .chain(self.hashes.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}
