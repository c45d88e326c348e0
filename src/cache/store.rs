//! Cache backends the orchestrator can register.

use crate::error::{Error, Result};
use crate::redundancy::PersistentStore;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Invalidation pattern: `*`, `prefix*`, or an exact key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    All,
    Prefix(String),
    Exact(String),
}

impl KeyPattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            KeyPattern::All
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            KeyPattern::Prefix(prefix.to_string())
        } else {
            KeyPattern::Exact(pattern.to_string())
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::All => true,
            KeyPattern::Prefix(prefix) => key.starts_with(prefix.as_str()),
            KeyPattern::Exact(exact) => key == exact,
        }
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn invalidate(&self, pattern: &KeyPattern) -> Result<usize>;
    async fn clear(&self) -> Result<()>;

    /// Approximate number of live entries.
    fn entry_count(&self) -> usize;

    /// Approximate in-memory footprint; zero for out-of-process stores.
    fn approx_bytes(&self) -> usize {
        0
    }

    fn supports_trim(&self) -> bool {
        false
    }

    /// Drop roughly `fraction` of the entries, least valuable first.
    async fn trim(&self, _fraction: f64) -> Result<usize> {
        Ok(0)
    }
}

struct MemoryEntry {
    value: Value,
    expires_at: Option<Instant>,
    bytes: usize,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process LRU with per-entry TTL.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, MemoryEntry>>,
    bytes: AtomicUsize,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            bytes: AtomicUsize::new(0),
        }
    }

    fn estimate(key: &str, value: &Value) -> usize {
        key.len() + serde_json::to_vec(value).map(|v| v.len()).unwrap_or(64)
    }

    fn release(&self, entry: &MemoryEntry) {
        self.bytes.fetch_sub(entry.bytes.min(self.bytes.load(Ordering::Relaxed)), Ordering::Relaxed);
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => true,
            Some(entry) => return Ok(Some(entry.value.clone())),
            None => return Ok(None),
        };
        if expired {
            if let Some(entry) = entries.pop(key) {
                self.release(&entry);
            }
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let bytes = Self::estimate(key, &value);
        let entry = MemoryEntry {
            value,
            // A TTL past the clock's range never expires.
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
            bytes,
        };
        let mut entries = self.entries.lock();
        if let Some((_, evicted)) = entries.push(key.to_string(), entry) {
            self.release(&evicted);
        }
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.entries.lock().pop(key);
        if let Some(entry) = &removed {
            self.release(entry);
        }
        Ok(removed.is_some())
    }

    async fn invalidate(&self, pattern: &KeyPattern) -> Result<usize> {
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(k, _)| pattern.matches(k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            if let Some(entry) = entries.pop(key) {
                self.release(&entry);
            }
        }
        Ok(doomed.len())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().clear();
        self.bytes.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }

    fn approx_bytes(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }

    fn supports_trim(&self) -> bool {
        true
    }

    async fn trim(&self, fraction: f64) -> Result<usize> {
        let mut entries = self.entries.lock();
        let target = (entries.len() as f64 * fraction.clamp(0.0, 1.0)).ceil() as usize;
        let mut removed = 0;
        while removed < target {
            match entries.pop_lru() {
                Some((_, entry)) => {
                    self.release(&entry);
                    removed += 1;
                }
                None => break,
            }
        }
        Ok(removed)
    }
}

/// Cache entries kept in a persistent store under a key prefix. Entries are
/// wrapped as `{"v": value, "exp": epoch_millis | null}`.
pub struct StoreCache {
    store: Arc<dyn PersistentStore>,
    prefix: String,
    entries: AtomicUsize,
}

impl StoreCache {
    pub fn new(store: Arc<dyn PersistentStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            entries: AtomicUsize::new(0),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn own_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys()
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(self.prefix.as_str()).map(str::to_string))
            .collect())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

#[async_trait]
impl CacheStore for StoreCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let storage_key = self.storage_key(key);
        let Some(wrapped) = self.store.get(&storage_key).await? else {
            return Ok(None);
        };
        let expires = wrapped.get("exp").and_then(Value::as_u64);
        if expires.is_some_and(|exp| now_millis() >= exp) {
            self.store.delete(&storage_key).await?;
            return Ok(None);
        }
        match wrapped.get("v") {
            Some(value) => Ok(Some(value.clone())),
            None => Err(Error::Cache {
                cache: self.prefix.clone(),
                reason: format!("malformed entry '{}'", key),
            }),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let exp = ttl.and_then(|ttl| {
            u64::try_from(ttl.as_millis())
                .ok()
                .and_then(|ms| now_millis().checked_add(ms))
        });
        self.store
            .put(&self.storage_key(key), json!({ "v": value, "exp": exp }))
            .await?;
        self.entries.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.store.delete(&self.storage_key(key)).await?;
        if removed {
            self.entries
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .ok();
        }
        Ok(removed)
    }

    async fn invalidate(&self, pattern: &KeyPattern) -> Result<usize> {
        let mut removed = 0;
        for key in self.own_keys().await? {
            if pattern.matches(&key) && self.store.delete(&self.storage_key(&key)).await? {
                removed += 1;
            }
        }
        self.entries
            .store(self.own_keys().await?.len(), Ordering::Relaxed);
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        self.invalidate(&KeyPattern::All).await?;
        Ok(())
    }

    fn entry_count(&self) -> usize {
        self.entries.load(Ordering::Relaxed)
    }
}
