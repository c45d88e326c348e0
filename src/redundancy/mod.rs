//! Redundancy Manager
//!
//! Serves the dataset from the best available of four ranked layers. The
//! emergency layer is seeded synchronously at construction so `get_all`
//! never returns an empty dataset, whatever state the other layers are in.

pub mod emergency;
pub mod layer;
pub mod sources;

pub use emergency::emergency_records;
pub use layer::{Layer, LayerKind, LayerStats, RedundancyHealth};
pub use sources::{DatasetLoader, FnLoader, JsonFileLoader, JsonFileStore, MemoryStore, PersistentStore};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
use crate::error::{Error, Result};
use crate::log_layer_switch;
use crate::record::{sample_check, Record};
use crate::utils::RetryPolicy;
use layer::LayerTable;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedundancyConfig {
    /// Records inspected by the serving-path structural check
    pub sample_size: usize,

    /// Period of the background layer validator
    pub validation_interval: Duration,

    /// Key under which the dataset snapshot lives in the persistent store
    pub store_key: String,

    /// Global breaker guarding the fall-through to the emergency layer
    pub breaker: CircuitBreakerConfig,

    /// Backoff for background layer recovery
    pub recovery: RetryPolicy,
}

impl Default for RedundancyConfig {
    fn default() -> Self {
        Self {
            sample_size: 3,
            validation_interval: Duration::from_secs(60),
            store_key: "dataset_snapshot".to_string(),
            breaker: CircuitBreakerConfig::default(),
            recovery: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RedundancyStats {
    pub health: RedundancyHealth,
    pub current_layer: LayerKind,
    pub initialized: bool,
    pub emergency_pinned: bool,
    pub layers: Vec<LayerStats>,
    pub requests: u64,
    pub layer_switches: u64,
    pub emergency_activations: u64,
    pub primary_loads: u64,
    pub recovery_attempts: u64,
    pub recoveries: u64,
    pub breaker: CircuitBreakerSnapshot,
}

#[derive(Debug, Default)]
struct RedundancyCounters {
    requests: AtomicU64,
    layer_switches: AtomicU64,
    emergency_activations: AtomicU64,
    primary_loads: AtomicU64,
    recovery_attempts: AtomicU64,
    recoveries: AtomicU64,
}

pub struct RedundancyManager {
    config: RedundancyConfig,
    loader: Arc<dyn DatasetLoader>,
    store: Option<Arc<dyn PersistentStore>>,
    layers: Arc<RwLock<LayerTable>>,
    breaker: CircuitBreaker,
    init_state: tokio::sync::Mutex<bool>,
    initialized: AtomicBool,
    emergency_pinned: AtomicBool,
    counters: Arc<RedundancyCounters>,
    recovery_tx: mpsc::UnboundedSender<LayerKind>,
    recovery_rx: Mutex<Option<mpsc::UnboundedReceiver<LayerKind>>>,
    pending_recovery: Mutex<HashSet<LayerKind>>,
    writeback: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RedundancyManager {
    pub fn new(
        config: RedundancyConfig,
        loader: Arc<dyn DatasetLoader>,
        store: Option<Arc<dyn PersistentStore>>,
    ) -> Self {
        let (recovery_tx, recovery_rx) = mpsc::unbounded_channel();
        let breaker = CircuitBreaker::new("redundancy", config.breaker.clone());
        Self {
            config,
            loader,
            store,
            layers: Arc::new(RwLock::new(LayerTable::new(emergency_records()))),
            breaker,
            init_state: tokio::sync::Mutex::new(false),
            initialized: AtomicBool::new(false),
            emergency_pinned: AtomicBool::new(false),
            counters: Arc::new(RedundancyCounters::default()),
            recovery_tx,
            recovery_rx: Mutex::new(Some(recovery_rx)),
            pending_recovery: Mutex::new(HashSet::new()),
            writeback: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Load the fallible layers. Concurrent and repeated calls share one load.
    pub async fn initialize(&self) -> RedundancyHealth {
        let mut initialized = self.init_state.lock().await;
        if !*initialized {
            self.load_layers().await;
            *initialized = true;
            self.initialized.store(true, Ordering::Release);
        }
        self.health()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    async fn load_layers(&self) {
        let primary = match self.load_primary().await {
            Ok(records) => Some(records),
            Err(e) => {
                warn!(loader = self.loader.name(), error = %e, "Primary dataset load failed");
                let mut table = self.layers.write();
                table.get_mut(LayerKind::Primary).mark_unhealthy(e.to_string());
                // A previous snapshot stays servable.
                if table.get(LayerKind::Secondary).records.is_empty() {
                    table.get_mut(LayerKind::Secondary).mark_unhealthy("no primary snapshot");
                }
                None
            }
        };

        self.load_tertiary(primary).await;

        let mut table = self.layers.write();
        let best = table.best_healthy().unwrap_or(LayerKind::Emergency);
        self.switch_to(&mut table, best, "initialization");
        info!(
            current = %table.current,
            health = ?table.health(),
            "Redundancy layers initialized"
        );
    }

    /// Load, check and install the primary and secondary layers.
    async fn load_primary(&self) -> Result<Arc<Vec<Record>>> {
        self.counters.primary_loads.fetch_add(1, Ordering::Relaxed);
        let records = self.loader.load_dataset().await?;
        if !sample_check(&records, self.config.sample_size) {
            return Err(Error::Corruption(format!(
                "primary dataset failed structural check ({} records)",
                records.len()
            )));
        }

        let records = Arc::new(records);
        let mut table = self.layers.write();
        table.get_mut(LayerKind::Primary).populate(records.clone());
        table.get_mut(LayerKind::Secondary).populate(records.clone());
        debug!(records = records.len(), "Primary and secondary layers populated");
        Ok(records)
    }

    async fn load_tertiary(&self, primary: Option<Arc<Vec<Record>>>) {
        let Some(store) = self.store.clone() else {
            self.layers
                .write()
                .get_mut(LayerKind::Tertiary)
                .mark_unhealthy("no persistent store configured");
            return;
        };

        match read_snapshot(store.as_ref(), &self.config.store_key, self.config.sample_size).await {
            Ok(Some(records)) => {
                self.layers
                    .write()
                    .get_mut(LayerKind::Tertiary)
                    .populate(Arc::new(records));
            }
            Ok(None) => {
                self.layers
                    .write()
                    .get_mut(LayerKind::Tertiary)
                    .mark_unhealthy("persistent store is empty");
                if let Some(records) = primary {
                    self.spawn_writeback(store, records);
                }
            }
            Err(e) => {
                warn!(error = %e, "Tertiary layer unavailable");
                self.layers
                    .write()
                    .get_mut(LayerKind::Tertiary)
                    .mark_unhealthy(e.to_string());
            }
        }
    }

    /// Persist a snapshot without blocking the caller; the tertiary layer is
    /// populated once the write lands.
    fn spawn_writeback(&self, store: Arc<dyn PersistentStore>, records: Arc<Vec<Record>>) {
        let layers = self.layers.clone();
        let key = self.config.store_key.clone();
        let handle = tokio::spawn(async move {
            let value = match serde_json::to_value(records.as_ref()) {
                Ok(value) => value,
                Err(e) => {
                    warn!(error = %e, "Could not serialize snapshot for write-back");
                    return;
                }
            };
            match store.put(&key, value).await {
                Ok(()) => {
                    layers.write().get_mut(LayerKind::Tertiary).populate(records);
                    debug!(key = %key, "Snapshot written back to persistent store");
                }
                Err(e) => warn!(error = %e, "Snapshot write-back failed"),
            }
        });

        if let Some(previous) = self.writeback.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Wait for an in-flight snapshot write-back, if any.
    pub async fn wait_for_writeback(&self) {
        let handle = self.writeback.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// The dataset from the best layer that passes the structural sample
    /// check. Never empty.
    pub fn get_all(&self) -> Arc<Vec<Record>> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        if self.emergency_pinned.load(Ordering::Acquire) || !self.breaker.allow_request() {
            return self.layers.read().get(LayerKind::Emergency).records.clone();
        }

        let sample = self.config.sample_size;
        let mut table = self.layers.write();
        let current = table.current;

        if current != LayerKind::Emergency {
            let layer = table.get(current);
            if layer.healthy && sample_check(&layer.records, sample) {
                let records = layer.records.clone();
                drop(table);
                self.breaker.record_success();
                return records;
            }
            table.get_mut(current).mark_unhealthy("failed sample check");
            self.schedule_recovery(current);
        }

        for kind in LayerKind::FALLIBLE {
            if kind == current || !table.get(kind).healthy {
                continue;
            }
            if sample_check(&table.get(kind).records, sample) {
                self.switch_to(&mut table, kind, "current layer failed sample check");
                let records = table.get(kind).records.clone();
                drop(table);
                self.breaker.record_success();
                return records;
            }
            table.get_mut(kind).mark_unhealthy("failed sample check");
            self.schedule_recovery(kind);
        }

        self.switch_to(&mut table, LayerKind::Emergency, "no fallible layer passed");
        let records = table.get(LayerKind::Emergency).records.clone();
        drop(table);
        self.breaker.record_failure();
        records
    }

    fn switch_to(&self, table: &mut LayerTable, to: LayerKind, reason: &str) {
        let from = table.current;
        if from == to {
            return;
        }
        table.current = to;
        self.counters.layer_switches.fetch_add(1, Ordering::Relaxed);
        if to == LayerKind::Emergency {
            self.counters.emergency_activations.fetch_add(1, Ordering::Relaxed);
        }
        log_layer_switch!(from, to, reason);
    }

    fn schedule_recovery(&self, kind: LayerKind) {
        if kind == LayerKind::Emergency || !self.pending_recovery.lock().insert(kind) {
            return;
        }
        if self.recovery_tx.send(kind).is_err() {
            self.pending_recovery.lock().remove(&kind);
            debug!(layer = %kind, "Recovery worker gone; recovery not scheduled");
        }
    }

    /// Reload the primary layer. On failure the old primary data is kept but
    /// marked unhealthy and serving moves to the next healthy layer.
    pub async fn force_refresh(&self) -> Result<()> {
        match self.load_primary().await {
            Ok(records) => {
                self.emergency_pinned.store(false, Ordering::Release);
                if let Some(store) = self.store.clone() {
                    self.spawn_writeback(store, records);
                }
                let mut table = self.layers.write();
                self.switch_to(&mut table, LayerKind::Primary, "refresh succeeded");
                info!(health = ?table.health(), "Dataset refreshed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Dataset refresh failed");
                let mut table = self.layers.write();
                table.get_mut(LayerKind::Primary).mark_unhealthy(e.to_string());
                if table.current == LayerKind::Primary {
                    let next = table.best_healthy().unwrap_or(LayerKind::Emergency);
                    self.switch_to(&mut table, next, "refresh failed");
                }
                drop(table);
                self.schedule_recovery(LayerKind::Primary);
                Err(e)
            }
        }
    }

    /// Abandon the current layer for the next healthy one in priority order.
    pub fn force_next_layer(&self) -> LayerKind {
        let mut table = self.layers.write();
        let current = table.current;
        if current == LayerKind::Emergency {
            return current;
        }
        table.get_mut(current).mark_unhealthy("forced to next layer");
        let next = LayerKind::FALLIBLE
            .iter()
            .copied()
            .filter(|k| *k > current)
            .find(|k| table.get(*k).healthy)
            .unwrap_or(LayerKind::Emergency);
        self.switch_to(&mut table, next, "forced to next layer");
        drop(table);
        self.schedule_recovery(current);
        next
    }

    /// Serve only the emergency dataset until the next successful refresh
    /// or reinitialization.
    pub fn force_emergency(&self) {
        if !self.emergency_pinned.swap(true, Ordering::AcqRel) {
            let mut table = self.layers.write();
            self.switch_to(&mut table, LayerKind::Emergency, "emergency mode");
            error!("Redundancy manager pinned to emergency layer");
        }
    }

    pub fn is_emergency_pinned(&self) -> bool {
        self.emergency_pinned.load(Ordering::Acquire)
    }

    /// Drop the pin and breaker state and reload every fallible layer.
    pub async fn reinitialize(&self) -> Result<RedundancyHealth> {
        let mut initialized = self.init_state.lock().await;
        self.emergency_pinned.store(false, Ordering::Release);
        self.breaker.reset();
        self.load_layers().await;
        *initialized = true;
        self.initialized.store(true, Ordering::Release);

        let health = self.health();
        if health == RedundancyHealth::Emergency {
            return Err(Error::Initialization(
                "no fallible layer could be loaded".to_string(),
            ));
        }
        Ok(health)
    }

    /// Re-sample every layer independently of request traffic.
    pub fn validate_layers(&self) -> RedundancyHealth {
        let sample = self.config.sample_size;
        let mut unhealthy = Vec::new();
        let mut table = self.layers.write();

        for kind in LayerKind::FALLIBLE {
            let layer = table.get(kind);
            if layer.healthy && !sample_check(&layer.records, sample) {
                table.get_mut(kind).mark_unhealthy("periodic validation failed");
            }
            if !table.get(kind).healthy {
                unhealthy.push(kind);
            }
        }

        if !self.is_emergency_pinned() {
            let best = table.best_healthy().unwrap_or(LayerKind::Emergency);
            if best < table.current || !table.get(table.current).healthy {
                self.switch_to(&mut table, best, "periodic validation");
            }
        }
        let health = table.health();
        drop(table);

        if self.is_initialized() {
            for kind in unhealthy {
                self.schedule_recovery(kind);
            }
        }
        debug!(health = ?health, "Layer validation pass complete");
        health
    }

    fn healthy_primary(&self) -> Option<Arc<Vec<Record>>> {
        let table = self.layers.read();
        let layer = table.get(LayerKind::Primary);
        if layer.healthy {
            Some(layer.records.clone())
        } else {
            None
        }
    }

    async fn recover_layer(&self, kind: LayerKind) -> Result<()> {
        self.counters.recovery_attempts.fetch_add(1, Ordering::Relaxed);
        let label = format!("{} layer recovery", kind);

        match kind {
            LayerKind::Primary => {
                self.config
                    .recovery
                    .execute_async(&label, || self.load_primary())
                    .await?;
            }
            LayerKind::Secondary => {
                let records = match self.healthy_primary() {
                    Some(records) => records,
                    None => {
                        self.config
                            .recovery
                            .execute_async(&label, || self.load_primary())
                            .await?
                    }
                };
                self.layers.write().get_mut(LayerKind::Secondary).populate(records);
            }
            LayerKind::Tertiary => {
                let store = self
                    .store
                    .clone()
                    .ok_or_else(|| Error::Store("no persistent store configured".to_string()))?;
                let key = self.config.store_key.clone();
                let sample = self.config.sample_size;
                let snapshot = self
                    .config
                    .recovery
                    .execute_async(&label, || read_snapshot(store.as_ref(), &key, sample))
                    .await?;
                let records = match snapshot {
                    Some(records) => Arc::new(records),
                    None => {
                        let primary = self
                            .healthy_primary()
                            .ok_or_else(|| Error::Store("store empty and no primary snapshot".to_string()))?;
                        store.put(&key, serde_json::to_value(primary.as_ref())?).await?;
                        primary
                    }
                };
                self.layers.write().get_mut(LayerKind::Tertiary).populate(records);
            }
            LayerKind::Emergency => {}
        }

        self.counters.recoveries.fetch_add(1, Ordering::Relaxed);
        if !self.is_emergency_pinned() {
            let mut table = self.layers.write();
            if let Some(best) = table.best_healthy() {
                if best < table.current {
                    self.switch_to(&mut table, best, "layer recovered");
                }
            }
        }
        info!(layer = %kind, "Layer recovered");
        Ok(())
    }

    /// Start the recovery worker and the periodic validator.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        if let Some(mut rx) = self.recovery_rx.lock().take() {
            let weak: Weak<Self> = Arc::downgrade(self);
            tasks.push(tokio::spawn(async move {
                while let Some(kind) = rx.recv().await {
                    let Some(manager) = weak.upgrade() else { break };
                    if let Err(e) = manager.recover_layer(kind).await {
                        warn!(layer = %kind, error = %e, "Layer recovery gave up");
                    }
                    manager.pending_recovery.lock().remove(&kind);
                }
            }));
        }

        let weak = Arc::downgrade(self);
        let period = self.config.validation_interval;
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                manager.validate_layers();
            }
        }));
        debug!("Redundancy background tasks started");
    }

    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(handle) = self.writeback.lock().take() {
            handle.abort();
        }
    }

    pub fn health(&self) -> RedundancyHealth {
        self.layers.read().health()
    }

    pub fn current_layer(&self) -> LayerKind {
        self.layers.read().current
    }

    pub fn layer_records(&self, kind: LayerKind) -> Arc<Vec<Record>> {
        self.layers.read().get(kind).records.clone()
    }

    /// Footprint of the dataset currently being served.
    pub fn dataset_bytes(&self) -> usize {
        let table = self.layers.read();
        table
            .get(table.current)
            .records
            .iter()
            .map(Record::approx_bytes)
            .sum()
    }

    pub fn stats(&self) -> RedundancyStats {
        let table = self.layers.read();
        RedundancyStats {
            health: table.health(),
            current_layer: table.current,
            initialized: self.is_initialized(),
            emergency_pinned: self.is_emergency_pinned(),
            layers: table.iter().map(Layer::stats).collect(),
            requests: self.counters.requests.load(Ordering::Relaxed),
            layer_switches: self.counters.layer_switches.load(Ordering::Relaxed),
            emergency_activations: self.counters.emergency_activations.load(Ordering::Relaxed),
            primary_loads: self.counters.primary_loads.load(Ordering::Relaxed),
            recovery_attempts: self.counters.recovery_attempts.load(Ordering::Relaxed),
            recoveries: self.counters.recoveries.load(Ordering::Relaxed),
            breaker: self.breaker.snapshot(),
        }
    }
}

impl Drop for RedundancyManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn read_snapshot(
    store: &dyn PersistentStore,
    key: &str,
    sample: usize,
) -> Result<Option<Vec<Record>>> {
    let Some(value) = store.get(key).await? else {
        return Ok(None);
    };
    let records = Record::many_from_json(value)?;
    if !sample_check(&records, sample) {
        return Err(Error::Corruption(format!(
            "stored snapshot '{}' failed structural check",
            key
        )));
    }
    Ok(Some(records))
}
