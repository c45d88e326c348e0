//! Boundaries to the outside world: the primary dataset loader and the
//! optional persistent key-value store backing the tertiary layer.

use crate::error::{Error, Result};
use crate::record::Record;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[async_trait]
pub trait DatasetLoader: Send + Sync {
    async fn load_dataset(&self) -> Result<Vec<Record>>;

    fn name(&self) -> &str {
        "loader"
    }
}

#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn put(&self, key: &str, value: Value) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Wraps an async closure as a loader.
pub struct FnLoader<F> {
    name: String,
    load: F,
}

impl<F> FnLoader<F> {
    pub fn new(name: impl Into<String>, load: F) -> Self {
        Self {
            name: name.into(),
            load,
        }
    }
}

#[async_trait]
impl<F, Fut> DatasetLoader for FnLoader<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Record>>> + Send + 'static,
{
    async fn load_dataset(&self) -> Result<Vec<Record>> {
        (self.load)().await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Loads a JSON array of records from disk on every call.
pub struct JsonFileLoader {
    path: PathBuf,
    name: String,
}

impl JsonFileLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: format!("file:{}", path.display()),
            path,
        }
    }
}

#[async_trait]
impl DatasetLoader for JsonFileLoader {
    async fn load_dataset(&self) -> Result<Vec<Record>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::Load(format!("{}: {}", self.path.display(), e)))?;
        let value: Value = serde_json::from_slice(&bytes)?;
        Record::many_from_json(value)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }
}

/// A single JSON object on disk, rewritten atomically on every mutation.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<serde_json::Map<String, Value>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(serde_json::Map::new()),
            Ok(bytes) => match serde_json::from_slice(&bytes)? {
                Value::Object(map) => Ok(map),
                _ => Err(Error::Store(format!(
                    "{} does not contain a JSON object",
                    self.path.display()
                ))),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(serde_json::Map::new()),
            Err(e) => Err(Error::Store(format!("{}: {}", self.path.display(), e))),
        }
    }

    async fn write_all(&self, map: serde_json::Map<String, Value>) -> Result<()> {
        let bytes = serde_json::to_vec(&Value::Object(map))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| Error::Store(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Store(format!("{}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl PersistentStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_all().await?;
        map.insert(key.to_string(), value);
        self.write_all(map).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_all().await?;
        let removed = map.remove(key).is_some();
        if removed {
            self.write_all(map).await?;
        }
        Ok(removed)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.read_all().await?.keys().cloned().collect())
    }
}
