//! Application boundary over the five components.
//!
//! `ResilientCore` owns one instance of each component, wires them together
//! and exposes the operations the rest of an application uses. Consumers
//! receive it as an `Arc` and never see a raw component failure from the
//! serving path.

use crate::cache::{
    CacheHealth, CacheOptions, CacheOrchestrator, CacheOrchestratorStats, CacheStore, CacheTier,
    MemoryCache,
};
use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::integrity::{IntegrityGuard, IntegrityStats};
use crate::monitoring::{
    EstimatedMemoryProbe, HealthCallback, HealthMonitor, HealthReport, HealthStats, HealthStatus,
    MemoryProbe, Subscription,
};
use crate::record::Record;
use crate::recovery::{
    AutoRecovery, Components, ContextKind, ErrorContext, RecoveryOutcome, RecoveryStats, SystemState,
};
use crate::redundancy::{
    DatasetLoader, PersistentStore, RedundancyHealth, RedundancyManager, RedundancyStats,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Default capacity of the in-process L1 cache.
pub const DEFAULT_L1_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub state: SystemState,
    pub integrity: IntegrityStats,
    pub redundancy: RedundancyStats,
    pub cache: CacheOrchestratorStats,
    pub recovery: RecoveryStats,
    pub health: HealthStats,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SystemHealth {
    /// Overall status of the latest report; `None` before the first check
    pub status: Option<HealthStatus>,
    pub state: SystemState,
    pub redundancy: RedundancyHealth,
    pub cache: CacheHealth,
}

struct PendingCache {
    name: String,
    store: Arc<dyn CacheStore>,
    tier: CacheTier,
    priority: u32,
}

pub struct ResilientCoreBuilder {
    loader: Arc<dyn DatasetLoader>,
    store: Option<Arc<dyn PersistentStore>>,
    config: CoreConfig,
    probe: Option<Arc<dyn MemoryProbe>>,
    l1_capacity: Option<usize>,
    caches: Vec<PendingCache>,
}

impl ResilientCoreBuilder {
    /// Persistent store backing the tertiary layer.
    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn l1_capacity(mut self, capacity: usize) -> Self {
        self.l1_capacity = Some(capacity);
        self
    }

    /// Do not register the default in-process L1 cache.
    pub fn without_l1(mut self) -> Self {
        self.l1_capacity = None;
        self
    }

    pub fn cache(
        mut self,
        name: impl Into<String>,
        store: Arc<dyn CacheStore>,
        tier: CacheTier,
        priority: u32,
    ) -> Self {
        self.caches.push(PendingCache {
            name: name.into(),
            store,
            tier,
            priority,
        });
        self
    }

    pub fn build(self) -> Result<Arc<ResilientCore>> {
        self.config.validate()?;
        let config = self.config;

        let redundancy = Arc::new(RedundancyManager::new(
            config.redundancy.clone(),
            self.loader,
            self.store,
        ));
        let integrity = Arc::new(IntegrityGuard::new(config.integrity.clone()));
        let cache = Arc::new(CacheOrchestrator::new(config.cache.clone(), redundancy.clone()));

        if let Some(capacity) = self.l1_capacity {
            cache.register_cache("L1", Arc::new(MemoryCache::new(capacity)), CacheTier::L1, 0)?;
        }
        for pending in self.caches {
            cache.register_cache(pending.name, pending.store, pending.tier, pending.priority)?;
        }

        let components = Components {
            integrity: integrity.clone(),
            redundancy: redundancy.clone(),
            cache: cache.clone(),
        };
        let recovery = Arc::new(AutoRecovery::new(config.recovery.clone(), components.clone()));
        let probe = self.probe.unwrap_or_else(|| {
            Arc::new(EstimatedMemoryProbe::new(
                cache.clone(),
                redundancy.clone(),
                config.health.memory_budget_bytes,
            ))
        });
        let health = Arc::new(HealthMonitor::new(
            config.health.clone(),
            components,
            recovery.clone(),
            probe,
        ));

        Ok(Arc::new(ResilientCore {
            config,
            integrity,
            redundancy,
            cache,
            recovery,
            health,
            started: AtomicBool::new(false),
        }))
    }
}

pub struct ResilientCore {
    config: CoreConfig,
    integrity: Arc<IntegrityGuard>,
    redundancy: Arc<RedundancyManager>,
    cache: Arc<CacheOrchestrator>,
    recovery: Arc<AutoRecovery>,
    health: Arc<HealthMonitor>,
    started: AtomicBool,
}

impl ResilientCore {
    pub fn builder(loader: Arc<dyn DatasetLoader>) -> ResilientCoreBuilder {
        ResilientCoreBuilder {
            loader,
            store: None,
            config: CoreConfig::default(),
            probe: None,
            l1_capacity: Some(DEFAULT_L1_CAPACITY),
            caches: Vec::new(),
        }
    }

    /// Load every layer and validate the served dataset. Safe to call
    /// concurrently; the primary loader runs once.
    pub async fn initialize(&self) -> RedundancyHealth {
        let health = self.redundancy.initialize().await;
        let records = self.redundancy.get_all();
        let validation = self
            .integrity
            .validate_batch(&records, self.integrity.default_level());
        if validation.valid {
            info!(records = records.len(), health = ?health, "Resilient core initialized");
        } else {
            warn!(
                records = records.len(),
                invalid = validation.summary.invalid,
                health = ?health,
                "Resilient core initialized with invalid records"
            );
        }
        health
    }

    /// Start every background task: layer validation and recovery, cache
    /// preloading and health checks, and health monitoring.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.redundancy.start();
        self.cache.start();
        self.health.start();
    }

    pub fn shutdown(&self) {
        self.health.shutdown();
        self.cache.shutdown();
        self.recovery.shutdown();
        self.redundancy.shutdown();
        self.started.store(false, Ordering::Release);
        info!("Resilient core shut down");
    }

    /// The dataset from the best available layer. Never empty.
    pub fn get_all_records(&self) -> Arc<Vec<Record>> {
        self.redundancy.get_all()
    }

    pub async fn cache_get(&self, key: &str, options: &CacheOptions) -> Option<Value> {
        self.cache.get(key, options).await
    }

    pub async fn cache_set(&self, key: &str, value: Value, options: &CacheOptions) -> bool {
        self.cache.set(key, value, options).await
    }

    pub async fn cache_invalidate(&self, pattern: &str, options: &CacheOptions) -> bool {
        self.cache.invalidate(pattern, options).await
    }

    pub async fn report_error(&self, error: &Error, context: ErrorContext) -> RecoveryOutcome {
        self.recovery.handle_error(error, context).await
    }

    pub fn get_system_stats(&self) -> SystemStats {
        SystemStats {
            state: self.recovery.state(),
            integrity: self.integrity.stats(),
            redundancy: self.redundancy.stats(),
            cache: self.cache.stats(),
            recovery: self.recovery.stats(),
            health: self.health.stats(),
        }
    }

    pub fn get_current_health(&self) -> SystemHealth {
        SystemHealth {
            status: self.health.current_health(),
            state: self.recovery.state(),
            redundancy: self.redundancy.health(),
            cache: self.cache.health(),
        }
    }

    pub fn subscribe_to_health(&self, callback: HealthCallback) -> Subscription {
        self.health.subscribe(callback)
    }

    /// Reload the primary dataset. Cached fallback entries are dropped on
    /// success so readers see the new data.
    pub async fn force_refresh(&self) -> Result<RedundancyHealth> {
        match self.redundancy.force_refresh().await {
            Ok(()) => {
                self.cache
                    .invalidate("record*", &CacheOptions::default())
                    .await;
                Ok(self.redundancy.health())
            }
            Err(e) => {
                let context = ErrorContext::new(ContextKind::Manual).component("redundancy");
                let outcome = self.recovery.handle_error(&e, context).await;
                warn!(error = %e, strategy = ?outcome.strategy, "Forced refresh failed");
                Err(e)
            }
        }
    }

    pub async fn force_health_check(&self) -> HealthReport {
        self.health.perform_full_health_check().await
    }

    pub fn install_global_handlers(&self) -> bool {
        self.recovery.install_global_handlers()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn integrity(&self) -> &Arc<IntegrityGuard> {
        &self.integrity
    }

    pub fn redundancy(&self) -> &Arc<RedundancyManager> {
        &self.redundancy
    }

    pub fn cache(&self) -> &Arc<CacheOrchestrator> {
        &self.cache
    }

    pub fn recovery(&self) -> &Arc<AutoRecovery> {
        &self.recovery
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }
}

impl Drop for ResilientCore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
