use async_trait::async_trait;
use resilient_dataset::cache::KeyPattern;
use resilient_dataset::{
    CacheStore, CoreConfig, DatasetLoader, Error, PersistentStore, Record, ResilientCore, Result,
};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn init_test_logging() {
    let _ = resilient_dataset::init_logging(tracing::Level::DEBUG, false);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderMode {
    Healthy,
    Failing,
    Corrupt,
}

/// Loader whose behavior can be switched while the core is running.
pub struct SwitchableLoader {
    mode: AtomicU8,
    calls: AtomicUsize,
}

impl SwitchableLoader {
    pub fn new(mode: LoaderMode) -> Arc<Self> {
        let loader = Arc::new(Self {
            mode: AtomicU8::new(0),
            calls: AtomicUsize::new(0),
        });
        loader.set_mode(mode);
        loader
    }

    pub fn set_mode(&self, mode: LoaderMode) {
        let raw = match mode {
            LoaderMode::Healthy => 0,
            LoaderMode::Failing => 1,
            LoaderMode::Corrupt => 2,
        };
        self.mode.store(raw, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatasetLoader for SwitchableLoader {
    async fn load_dataset(&self) -> Result<Vec<Record>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode.load(Ordering::SeqCst) {
            0 => Ok(super::sample_dataset()),
            1 => Err(Error::Network("connection refused".to_string())),
            _ => Ok(super::corrupt_dataset()),
        }
    }

    fn name(&self) -> &str {
        "switchable"
    }
}

/// Cache tier that fails every operation.
pub struct BrokenCache {
    pub calls: AtomicUsize,
}

impl BrokenCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn fail<T>(&self) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::Cache {
            cache: "broken".to_string(),
            reason: "connection reset".to_string(),
        })
    }
}

#[async_trait]
impl CacheStore for BrokenCache {
    async fn get(&self, _key: &str) -> Result<Option<Value>> {
        self.fail()
    }

    async fn set(&self, _key: &str, _value: Value, _ttl: Option<Duration>) -> Result<()> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        self.fail()
    }

    async fn invalidate(&self, _pattern: &KeyPattern) -> Result<usize> {
        self.fail()
    }

    async fn clear(&self) -> Result<()> {
        self.fail()
    }

    fn entry_count(&self) -> usize {
        0
    }
}

pub fn test_core(
    loader: Arc<dyn DatasetLoader>,
    store: Option<Arc<dyn PersistentStore>>,
) -> Arc<ResilientCore> {
    let mut builder = ResilientCore::builder(loader).config(CoreConfig::testing());
    if let Some(store) = store {
        builder = builder.store(store);
    }
    builder.build().expect("testing config is valid")
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
