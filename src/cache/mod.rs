//! Cache Orchestrator
//!
//! Coordinates registered cache tiers (L1 fastest through L3) in front of
//! the Redundancy Manager, which acts as the always-available L4 tier.

pub mod preload;
pub mod stats;
pub mod store;

pub use preload::{AccessTracker, CacheStrategy};
pub use stats::{CacheSnapshot, CacheStats, ResponseTimeAverage};
pub use store::{CacheStore, KeyPattern, MemoryCache, StoreCache};

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::error::{Error, Result};
use crate::log_cache_event;
use crate::record::Record;
use crate::redundancy::RedundancyManager;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Name under which the redundancy fallback appears in stats.
pub const FALLBACK_CACHE: &str = "L4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CacheTier {
    L1,
    L2,
    L3,
    L4,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheHealth {
    Optimal,
    Degraded,
    Critical,
    Emergency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a write does not carry one
    pub default_ttl: Duration,

    /// Operating strategy at startup and after reinitialization
    pub strategy: CacheStrategy,

    /// Per-cache breaker settings
    pub breaker: CircuitBreakerConfig,

    /// Smoothing factor of the response-time average
    pub ewma_alpha: f64,

    /// Period of the preload queue drain
    pub preload_interval: Duration,

    /// Distinct keys tracked before the tally resets
    pub max_tracked_keys: usize,

    /// Upper bound on queued preloads
    pub max_preload_queue: usize,

    /// How long memory-pressure mode lasts
    pub memory_pressure_cooldown: Duration,

    /// Share of entries a trimming cache drops under memory pressure
    pub trim_fraction: f64,

    /// Period of the cache health check
    pub health_check_interval: Duration,

    /// Operations required before hit rate counts toward health
    pub min_operations_for_health: u64,

    pub degraded_error_rate: f64,
    pub critical_error_rate: f64,
    pub emergency_error_rate: f64,
    pub degraded_hit_rate: f64,
    pub critical_hit_rate: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            strategy: CacheStrategy::Balanced,
            breaker: CircuitBreakerConfig::default(),
            ewma_alpha: 0.1,
            preload_interval: Duration::from_secs(5),
            max_tracked_keys: 10_000,
            max_preload_queue: 256,
            memory_pressure_cooldown: Duration::from_secs(60),
            trim_fraction: 0.5,
            health_check_interval: Duration::from_secs(60),
            min_operations_for_health: 20,
            degraded_error_rate: 0.1,
            critical_error_rate: 0.25,
            emergency_error_rate: 0.5,
            degraded_hit_rate: 0.5,
            critical_hit_rate: 0.2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Overrides the default TTL on writes
    pub ttl: Option<Duration>,
    /// Restrict the operation to these tiers
    pub tiers: Option<Vec<CacheTier>>,
    /// Do not fall through to the redundancy layer
    pub skip_fallback: bool,
    /// Do not tally this access for preloading
    pub no_preload: bool,
}

impl CacheOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Default::default()
        }
    }

    pub fn tiers(tiers: impl IntoIterator<Item = CacheTier>) -> Self {
        Self {
            tiers: Some(tiers.into_iter().collect()),
            ..Default::default()
        }
    }

    fn allows(&self, tier: CacheTier) -> bool {
        self.tiers.as_ref().map_or(true, |t| t.contains(&tier))
    }

    /// Stable description of the options, part of the access-pattern key.
    fn signature(&self) -> String {
        let tiers = self
            .tiers
            .as_ref()
            .map(|t| t.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(","))
            .unwrap_or_default();
        format!(
            "ttl={:?};tiers={};fallback={}",
            self.ttl.map(|t| t.as_secs()),
            tiers,
            !self.skip_fallback
        )
    }
}

pub struct RegisteredCache {
    pub name: String,
    pub tier: CacheTier,
    pub priority: u32,
    store: Arc<dyn CacheStore>,
    enabled: AtomicBool,
    stats: CacheStats,
}

impl RegisteredCache {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheOrchestratorStats {
    pub strategy: CacheStrategy,
    pub health: CacheHealth,
    pub gets: u64,
    pub sets: u64,
    pub hits: u64,
    pub fallback_hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub error_rate: f64,
    pub fallback_avg_response_us: f64,
    pub under_memory_pressure: bool,
    pub memory_pressure_events: u64,
    pub preload_queue: usize,
    pub preloaded: u64,
    pub tracked_patterns: usize,
    pub estimated_bytes: usize,
    pub caches: Vec<CacheSnapshot>,
}

#[derive(Debug, Default)]
struct OrchestratorCounters {
    gets: AtomicU64,
    sets: AtomicU64,
    hits: AtomicU64,
    fallback_hits: AtomicU64,
    misses: AtomicU64,
    memory_pressure_events: AtomicU64,
    preloaded: AtomicU64,
}

pub struct CacheOrchestrator {
    config: CacheConfig,
    caches: RwLock<Vec<Arc<RegisteredCache>>>,
    breakers: CircuitBreakerRegistry,
    fallback: Arc<RedundancyManager>,
    fallback_response: ResponseTimeAverage,
    strategy: RwLock<CacheStrategy>,
    tracker: AccessTracker,
    pressure_until: Mutex<Option<Instant>>,
    last_health: Mutex<CacheHealth>,
    counters: OrchestratorCounters,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheOrchestrator {
    pub fn new(config: CacheConfig, fallback: Arc<RedundancyManager>) -> Self {
        Self {
            breakers: CircuitBreakerRegistry::new(config.breaker.clone()),
            fallback_response: ResponseTimeAverage::new(config.ewma_alpha),
            strategy: RwLock::new(config.strategy),
            tracker: AccessTracker::new(config.max_tracked_keys, config.max_preload_queue),
            caches: RwLock::new(Vec::new()),
            fallback,
            pressure_until: Mutex::new(None),
            last_health: Mutex::new(CacheHealth::Optimal),
            counters: OrchestratorCounters::default(),
            tasks: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Register a cache in front of the fallback. Tier L4 is reserved.
    pub fn register_cache(
        &self,
        name: impl Into<String>,
        store: Arc<dyn CacheStore>,
        tier: CacheTier,
        priority: u32,
    ) -> Result<()> {
        let name = name.into();
        if tier == CacheTier::L4 || name == FALLBACK_CACHE {
            return Err(Error::Config(format!(
                "cache '{}': tier L4 is reserved for the redundancy fallback",
                name
            )));
        }

        let mut caches = self.caches.write();
        if caches.iter().any(|c| c.name == name) {
            return Err(Error::Config(format!("cache '{}' already registered", name)));
        }
        caches.push(Arc::new(RegisteredCache {
            name: name.clone(),
            tier,
            priority,
            store,
            enabled: AtomicBool::new(true),
            stats: CacheStats::new(self.config.ewma_alpha),
        }));
        caches.sort_by_key(|c| (c.tier, c.priority));
        info!(cache = %name, tier = %tier, priority, "Cache registered");
        Ok(())
    }

    /// Enabled caches in lookup order, limited to the requested tiers.
    fn ordered(&self, options: &CacheOptions) -> Vec<Arc<RegisteredCache>> {
        self.caches
            .read()
            .iter()
            .filter(|c| c.is_enabled() && options.allows(c.tier))
            .cloned()
            .collect()
    }

    pub fn cache_names(&self) -> Vec<String> {
        self.caches.read().iter().map(|c| c.name.clone()).collect()
    }

    pub async fn get(&self, key: &str, options: &CacheOptions) -> Option<Value> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        if !options.no_preload {
            let threshold = if self.is_under_memory_pressure() {
                None
            } else {
                self.strategy().preload_threshold()
            };
            let queued = self.tracker.record(key, &options.signature(), threshold);
            if !queued.is_empty() {
                debug!(key, queued = queued.len(), "Related keys queued for preload");
            }
        }
        self.lookup(key, options).await
    }

    async fn lookup(&self, key: &str, options: &CacheOptions) -> Option<Value> {
        let caches = self.ordered(options);

        for (index, cache) in caches.iter().enumerate() {
            if !self.breakers.allow_request(&cache.name) {
                cache.stats.record_skip();
                continue;
            }

            let start = Instant::now();
            match cache.store.get(key).await {
                Ok(Some(value)) => {
                    cache.stats.record_hit(start.elapsed());
                    self.breakers.record_success(&cache.name);
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    log_cache_event!("hit", cache.name, key, true);
                    self.write_back(&caches[..index], key, &value, options).await;
                    return Some(value);
                }
                Ok(None) => {
                    cache.stats.record_miss();
                    self.breakers.record_success(&cache.name);
                }
                Err(e) => {
                    cache.stats.record_error();
                    self.breakers.record_failure(&cache.name);
                    debug!(cache = %cache.name, key, error = %e, "Cache read failed");
                }
            }
        }

        if options.skip_fallback || !options.allows(CacheTier::L4) {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let start = Instant::now();
        match self.fallback_lookup(key) {
            Some(value) => {
                self.fallback_response.record(start.elapsed());
                self.counters.fallback_hits.fetch_add(1, Ordering::Relaxed);
                log_cache_event!("fallback", FALLBACK_CACHE, key, true);
                self.write_back(&caches, key, &value, options).await;
                Some(value)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                log_cache_event!("miss", FALLBACK_CACHE, key, false);
                None
            }
        }
    }

    /// Resolve a key against the redundancy layer's dataset.
    fn fallback_lookup(&self, key: &str) -> Option<Value> {
        let records = self.fallback.get_all();
        let selected: Vec<&Record> = if key == "records" {
            records.iter().collect()
        } else if let Some(id) = key.strip_prefix("record:") {
            let record = records.iter().find(|r| r.id == id)?;
            return serde_json::to_value(record).ok();
        } else if let Some(tag) = key.strip_prefix("records:tag:") {
            records.iter().filter(|r| r.has_tag(tag)).collect()
        } else {
            return None;
        };

        if selected.is_empty() {
            return None;
        }
        serde_json::to_value(selected).ok()
    }

    async fn write_back(
        &self,
        targets: &[Arc<RegisteredCache>],
        key: &str,
        value: &Value,
        options: &CacheOptions,
    ) {
        let ttl = Some(options.ttl.unwrap_or(self.config.default_ttl));
        for cache in targets {
            if !self.breakers.allow_request(&cache.name) {
                continue;
            }
            match cache.store.set(key, value.clone(), ttl).await {
                Ok(()) => {
                    cache.stats.record_set();
                    self.breakers.record_success(&cache.name);
                }
                Err(e) => {
                    cache.stats.record_error();
                    self.breakers.record_failure(&cache.name);
                    debug!(cache = %cache.name, key, error = %e, "Cache write-back failed");
                }
            }
        }
    }

    /// Write to every enabled cache in the requested tiers. Under memory
    /// pressure only L1 is written. True if at least one write landed.
    pub async fn set(&self, key: &str, value: Value, options: &CacheOptions) -> bool {
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        let pressure = self.is_under_memory_pressure();
        let ttl = Some(options.ttl.unwrap_or(self.config.default_ttl));
        let mut stored = false;

        for cache in self.ordered(options) {
            if pressure && cache.tier != CacheTier::L1 {
                continue;
            }
            if !self.breakers.allow_request(&cache.name) {
                cache.stats.record_skip();
                continue;
            }
            match cache.store.set(key, value.clone(), ttl).await {
                Ok(()) => {
                    cache.stats.record_set();
                    self.breakers.record_success(&cache.name);
                    stored = true;
                }
                Err(e) => {
                    cache.stats.record_error();
                    self.breakers.record_failure(&cache.name);
                    warn!(cache = %cache.name, key, error = %e, "Cache write failed");
                }
            }
        }
        stored
    }

    /// Remove matching keys from every reachable cache. True when no cache
    /// reported an error.
    pub async fn invalidate(&self, pattern: &str, options: &CacheOptions) -> bool {
        let pattern = KeyPattern::parse(pattern);
        self.tracker.forget(&pattern);
        let mut clean = true;

        for cache in self.ordered(options) {
            if !self.breakers.allow_request(&cache.name) {
                continue;
            }
            match cache.store.invalidate(&pattern).await {
                Ok(removed) => {
                    self.breakers.record_success(&cache.name);
                    debug!(cache = %cache.name, ?pattern, removed, "Cache invalidated");
                }
                Err(e) => {
                    clean = false;
                    cache.stats.record_error();
                    self.breakers.record_failure(&cache.name);
                    warn!(cache = %cache.name, ?pattern, error = %e, "Cache invalidation failed");
                }
            }
        }
        clean
    }

    /// Halt preloading and shed memory: trimming caches trim themselves,
    /// the rest above L1 are cleared.
    pub async fn handle_memory_pressure(&self) {
        *self.pressure_until.lock() = Some(Instant::now() + self.config.memory_pressure_cooldown);
        self.counters.memory_pressure_events.fetch_add(1, Ordering::Relaxed);
        let dropped = self.tracker.clear_queue();
        warn!(dropped_preloads = dropped, "Memory pressure: shedding cache memory");

        let caches: Vec<_> = self.caches.read().iter().cloned().collect();
        for cache in caches {
            let outcome = if cache.store.supports_trim() {
                cache.store.trim(self.config.trim_fraction).await.map(|_| ())
            } else if cache.tier > CacheTier::L1 {
                cache.store.clear().await
            } else {
                Ok(())
            };
            if let Err(e) = outcome {
                cache.stats.record_error();
                warn!(cache = %cache.name, error = %e, "Cache could not shed memory");
            }
        }
    }

    pub fn is_under_memory_pressure(&self) -> bool {
        self.pressure_until
            .lock()
            .is_some_and(|until| Instant::now() < until)
    }

    /// Drain one batch of queued preloads. Abandoned under memory pressure.
    pub async fn process_preload_queue(&self) -> usize {
        if self.is_under_memory_pressure() {
            self.tracker.clear_queue();
            return 0;
        }
        let batch = self.tracker.next_batch(self.strategy().batch_size());
        let options = CacheOptions {
            no_preload: true,
            ..Default::default()
        };

        let mut loaded = 0;
        for key in batch {
            if self.lookup(&key, &options).await.is_some() {
                loaded += 1;
            }
        }
        self.counters.preloaded.fetch_add(loaded as u64, Ordering::Relaxed);
        loaded
    }

    pub fn strategy(&self) -> CacheStrategy {
        *self.strategy.read()
    }

    pub fn set_strategy(&self, strategy: CacheStrategy) {
        let previous = std::mem::replace(&mut *self.strategy.write(), strategy);
        if previous != strategy {
            info!(from = %previous, to = %strategy, "Cache strategy changed");
        }
    }

    /// Emergency strategy, with every cache above L1 disabled until restored.
    pub fn enter_emergency_mode(&self) {
        self.set_strategy(CacheStrategy::Emergency);
        self.tracker.clear_queue();
        for cache in self.caches.read().iter() {
            if cache.tier != CacheTier::L1 && cache.enabled.swap(false, Ordering::AcqRel) {
                error!(cache = %cache.name, "Cache disabled by emergency mode");
            }
        }
    }

    /// Re-enable a disabled cache and reset its breaker.
    pub fn restore_cache(&self, name: &str) -> bool {
        let caches = self.caches.read();
        let Some(cache) = caches.iter().find(|c| c.name == name) else {
            return false;
        };
        cache.enabled.store(true, Ordering::Release);
        self.breakers.reset(name);
        info!(cache = %name, "Cache restored");
        true
    }

    /// Clear every cache and return to the configured operating state.
    pub async fn reinitialize(&self) -> Result<()> {
        let caches: Vec<_> = self.caches.read().iter().cloned().collect();
        let mut failures = Vec::new();
        for cache in &caches {
            cache.enabled.store(true, Ordering::Release);
            cache.stats.reset();
            if let Err(e) = cache.store.clear().await {
                failures.push(format!("{}: {}", cache.name, e));
            }
        }
        self.breakers.reset_all();
        self.tracker.reset();
        *self.pressure_until.lock() = None;
        *self.last_health.lock() = CacheHealth::Optimal;
        self.set_strategy(self.config.strategy);

        if failures.is_empty() {
            info!(caches = caches.len(), "Cache orchestrator reinitialized");
            Ok(())
        } else {
            Err(Error::Cache {
                cache: "orchestrator".to_string(),
                reason: failures.join("; "),
            })
        }
    }

    /// Aggregate per-cache error and hit rates into one health level.
    pub fn evaluate_health(&self) -> CacheHealth {
        let caches = self.caches.read();
        let (mut errors, mut operations) = (0u64, 0u64);
        for cache in caches.iter() {
            errors += cache.stats.errors.load(Ordering::Relaxed);
            operations += cache.stats.operations();
        }
        let error_rate = ratio(errors, errors + operations);

        let upper: Vec<_> = caches.iter().filter(|c| c.tier != CacheTier::L1).collect();
        let all_upper_down = !upper.is_empty()
            && upper
                .iter()
                .all(|c| !c.is_enabled() || self.breakers.is_open(&c.name));
        let any_open = caches.iter().any(|c| self.breakers.is_open(&c.name));

        let gets = self.counters.gets.load(Ordering::Relaxed);
        let hit_rate = self.hit_rate();
        let judge_hits = !caches.is_empty() && gets >= self.config.min_operations_for_health;

        if error_rate >= self.config.emergency_error_rate || all_upper_down {
            CacheHealth::Emergency
        } else if error_rate >= self.config.critical_error_rate
            || (judge_hits && hit_rate < self.config.critical_hit_rate)
        {
            CacheHealth::Critical
        } else if error_rate >= self.config.degraded_error_rate
            || any_open
            || (judge_hits && hit_rate < self.config.degraded_hit_rate)
        {
            CacheHealth::Degraded
        } else {
            CacheHealth::Optimal
        }
    }

    /// Evaluate health and, when it got worse, apply the corrective step
    /// for the new level.
    pub async fn check_health(&self) -> CacheHealth {
        let health = self.evaluate_health();
        let previous = std::mem::replace(&mut *self.last_health.lock(), health);
        if health <= previous {
            return health;
        }

        warn!(from = ?previous, to = ?health, "Cache health worsened");
        match health {
            CacheHealth::Optimal => {}
            CacheHealth::Degraded => self.set_strategy(self.strategy().reduce()),
            CacheHealth::Critical => {
                self.set_strategy(CacheStrategy::Conservative);
                self.invalidate("*", &CacheOptions::default()).await;
                self.handle_memory_pressure().await;
            }
            CacheHealth::Emergency => self.enter_emergency_mode(),
        }
        health
    }

    pub fn health(&self) -> CacheHealth {
        *self.last_health.lock()
    }

    /// Registered-cache hits over all gets.
    pub fn hit_rate(&self) -> f64 {
        ratio(
            self.counters.hits.load(Ordering::Relaxed),
            self.counters.gets.load(Ordering::Relaxed),
        )
    }

    pub fn estimated_bytes(&self) -> usize {
        self.caches
            .read()
            .iter()
            .map(|c| c.store.approx_bytes())
            .sum()
    }

    pub fn open_breakers(&self) -> usize {
        self.breakers.open_count()
    }

    pub fn stats(&self) -> CacheOrchestratorStats {
        let caches = self.caches.read();
        let snapshots: Vec<CacheSnapshot> = caches
            .iter()
            .map(|c| CacheSnapshot {
                name: c.name.clone(),
                tier: c.tier,
                priority: c.priority,
                enabled: c.is_enabled(),
                breaker: self.breakers.get(&c.name).state(),
                hits: c.stats.hits.load(Ordering::Relaxed),
                misses: c.stats.misses.load(Ordering::Relaxed),
                errors: c.stats.errors.load(Ordering::Relaxed),
                sets: c.stats.sets.load(Ordering::Relaxed),
                skipped: c.stats.skipped.load(Ordering::Relaxed),
                hit_rate: c.stats.hit_rate(),
                error_rate: c.stats.error_rate(),
                avg_response_us: c.stats.response_time.micros(),
                entries: c.store.entry_count(),
                approx_bytes: c.store.approx_bytes(),
            })
            .collect();
        drop(caches);

        let (errors, total) = snapshots
            .iter()
            .fold((0, 0), |(e, t), s| (e + s.errors, t + s.errors + s.hits + s.misses + s.sets));

        CacheOrchestratorStats {
            strategy: self.strategy(),
            health: self.health(),
            gets: self.counters.gets.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            fallback_hits: self.counters.fallback_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
            error_rate: ratio(errors, total),
            fallback_avg_response_us: self.fallback_response.micros(),
            under_memory_pressure: self.is_under_memory_pressure(),
            memory_pressure_events: self.counters.memory_pressure_events.load(Ordering::Relaxed),
            preload_queue: self.tracker.queue_len(),
            preloaded: self.counters.preloaded.load(Ordering::Relaxed),
            tracked_patterns: self.tracker.tracked_patterns(),
            estimated_bytes: self.estimated_bytes(),
            caches: snapshots,
        }
    }

    /// Start the preload drain and the periodic health check.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.preload_interval;
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                cache.process_preload_queue().await;
            }
        }));

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.health_check_interval;
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                cache.check_health().await;
            }
        }));
        debug!("Cache background tasks started");
    }

    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for CacheOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redundancy::{FnLoader, RedundancyConfig};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct FailingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CacheStore for FailingStore {
        async fn get(&self, _: &str) -> Result<Option<Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Cache {
                cache: "L2".into(),
                reason: "unreachable".into(),
            })
        }
        async fn set(&self, _: &str, _: Value, _: Option<Duration>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Cache {
                cache: "L2".into(),
                reason: "unreachable".into(),
            })
        }
        async fn delete(&self, _: &str) -> Result<bool> {
            Ok(false)
        }
        async fn invalidate(&self, _: &KeyPattern) -> Result<usize> {
            Ok(0)
        }
        async fn clear(&self) -> Result<()> {
            Ok(())
        }
        fn entry_count(&self) -> usize {
            0
        }
    }

    async fn orchestrator() -> CacheOrchestrator {
        let loader = Arc::new(FnLoader::new("empty", || async {
            Err::<Vec<Record>, Error>(Error::Network("offline".into()))
        }));
        let redundancy = Arc::new(RedundancyManager::new(RedundancyConfig::default(), loader, None));
        redundancy.initialize().await;
        CacheOrchestrator::new(CacheConfig::default(), redundancy)
    }

    #[tokio::test]
    async fn test_fallback_hit_is_written_back() {
        let cache = orchestrator().await;
        cache
            .register_cache("L1", Arc::new(MemoryCache::new(100)), CacheTier::L1, 0)
            .unwrap();

        let value = cache.get("record:hablar", &CacheOptions::default()).await.unwrap();
        assert_eq!(value["id"], "hablar");
        assert_eq!(cache.stats().fallback_hits, 1);

        cache.get("record:hablar", &CacheOptions::default()).await.unwrap();
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.caches[0].hits, 1);
        assert!(cache.get("unknown-key", &CacheOptions::default()).await.is_none());
    }

    #[tokio::test]
    async fn test_open_breaker_skips_cache() {
        let cache = orchestrator().await;
        let failing = Arc::new(FailingStore {
            calls: AtomicUsize::new(0),
        });
        cache.register_cache("L2", failing.clone(), CacheTier::L2, 0).unwrap();

        for _ in 0..3 {
            assert!(cache.get("records", &CacheOptions::default()).await.is_some());
        }
        assert_eq!(cache.open_breakers(), 1);

        let calls = failing.calls.load(Ordering::SeqCst);
        let value = cache.get("records", &CacheOptions::default()).await.unwrap();
        assert!(value.as_array().is_some_and(|a| !a.is_empty()));
        assert_eq!(failing.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_l4_is_reserved() {
        let cache = orchestrator().await;
        let store = Arc::new(MemoryCache::new(1));
        assert!(cache.register_cache("x", store.clone(), CacheTier::L4, 0).is_err());
        assert!(cache.register_cache("L4", store.clone(), CacheTier::L2, 0).is_err());
        cache.register_cache("a", store.clone(), CacheTier::L1, 0).unwrap();
        assert!(cache.register_cache("a", store, CacheTier::L1, 0).is_err());
    }

    #[tokio::test]
    async fn test_memory_pressure_halts_preloading_and_clears_upper_tiers() {
        let cache = orchestrator().await;
        let l1 = Arc::new(MemoryCache::new(100));
        let l2 = Arc::new(StoreCache::new(Arc::new(crate::redundancy::MemoryStore::new()), "c:"));
        cache.register_cache("L1", l1.clone(), CacheTier::L1, 0).unwrap();
        cache.register_cache("L2", l2.clone(), CacheTier::L2, 0).unwrap();

        for i in 0..4 {
            assert!(cache.set(&format!("k:{}", i), json!(i), &CacheOptions::default()).await);
        }
        cache.get("record:ser", &CacheOptions::default()).await;
        for _ in 0..3 {
            cache.get("record:hablar", &CacheOptions::default()).await;
        }
        assert!(cache.stats().preload_queue > 0);

        cache.handle_memory_pressure().await;
        assert!(cache.is_under_memory_pressure());
        assert_eq!(cache.stats().preload_queue, 0);
        assert_eq!(l2.get("k:0").await.unwrap(), None);
        assert!(l1.entry_count() < 6);

        assert!(cache.set("late", json!(1), &CacheOptions::default()).await);
        assert_eq!(l2.get("late").await.unwrap(), None);
        assert_eq!(cache.process_preload_queue().await, 0);
    }

    #[tokio::test]
    async fn test_corrective_ladder() {
        let cache = orchestrator().await;
        cache
            .register_cache("L1", Arc::new(MemoryCache::new(10)), CacheTier::L1, 0)
            .unwrap();
        cache
            .register_cache(
                "L2",
                Arc::new(FailingStore {
                    calls: AtomicUsize::new(0),
                }),
                CacheTier::L2,
                0,
            )
            .unwrap();

        for _ in 0..5 {
            cache.set("k", json!(1), &CacheOptions::tiers([CacheTier::L2])).await;
        }
        assert_eq!(cache.check_health().await, CacheHealth::Emergency);
        assert_eq!(cache.strategy(), CacheStrategy::Emergency);
        assert!(!cache.stats().caches[1].enabled);

        assert!(cache.restore_cache("L2"));
        cache.reinitialize().await.unwrap();
        assert_eq!(cache.strategy(), CacheStrategy::Balanced);
        assert!(cache.stats().caches.iter().all(|c| c.enabled));
    }

    #[tokio::test]
    async fn test_low_hit_rate_steps_down_the_ladder() {
        let cache = orchestrator().await;
        cache
            .register_cache("L1", Arc::new(MemoryCache::new(10)), CacheTier::L1, 0)
            .unwrap();
        cache.set_strategy(CacheStrategy::Aggressive);
        let opts = CacheOptions {
            skip_fallback: true,
            no_preload: true,
            ..Default::default()
        };
        cache.set("hot", json!("cached"), &opts).await;

        // 6 hits out of 20 gets
        for _ in 0..6 {
            assert!(cache.get("hot", &opts).await.is_some());
        }
        for i in 0..14 {
            assert!(cache.get(&format!("cold:{}", i), &opts).await.is_none());
        }
        assert_eq!(cache.check_health().await, CacheHealth::Degraded);
        assert_eq!(cache.strategy(), CacheStrategy::Balanced);
        assert!(!cache.is_under_memory_pressure());
        assert!(cache.get("hot", &opts).await.is_some());

        // 7 hits out of 41 gets
        for i in 0..20 {
            cache.get(&format!("cold:more:{}", i), &opts).await;
        }
        assert_eq!(cache.check_health().await, CacheHealth::Critical);
        assert_eq!(cache.strategy(), CacheStrategy::Conservative);
        assert!(cache.is_under_memory_pressure());
        assert!(cache.get("hot", &opts).await.is_none());

        // No further step while the level holds
        cache.set_strategy(CacheStrategy::Balanced);
        assert_eq!(cache.check_health().await, CacheHealth::Critical);
        assert_eq!(cache.strategy(), CacheStrategy::Balanced);
    }

    #[tokio::test]
    async fn test_error_rate_reaches_critical() {
        let cache = orchestrator().await;
        cache
            .register_cache("L1", Arc::new(MemoryCache::new(10)), CacheTier::L1, 0)
            .unwrap();
        cache
            .register_cache(
                "L2",
                Arc::new(FailingStore {
                    calls: AtomicUsize::new(0),
                }),
                CacheTier::L2,
                0,
            )
            .unwrap();
        let opts = CacheOptions {
            skip_fallback: true,
            no_preload: true,
            ..Default::default()
        };
        cache.set("warm", json!(1), &CacheOptions::tiers([CacheTier::L1])).await;

        // 2 L2 errors against 6 L1 operations
        for _ in 0..2 {
            cache.get("missing", &opts).await;
        }
        for _ in 0..3 {
            cache.get("warm", &opts).await;
        }
        assert_eq!(cache.check_health().await, CacheHealth::Critical);
        assert_eq!(cache.strategy(), CacheStrategy::Conservative);
        assert!(cache.is_under_memory_pressure());
        assert!(cache.get("warm", &CacheOptions::tiers([CacheTier::L1])).await.is_none());
        assert!(cache.stats().caches.iter().all(|c| c.enabled));
    }

    #[tokio::test]
    async fn test_invalidate_patterns() {
        let cache = orchestrator().await;
        cache
            .register_cache("L1", Arc::new(MemoryCache::new(10)), CacheTier::L1, 0)
            .unwrap();
        let opts = CacheOptions {
            skip_fallback: true,
            ..Default::default()
        };
        cache.set("record:a", json!(1), &opts).await;
        cache.set("record:b", json!(2), &opts).await;
        cache.set("other", json!(3), &opts).await;

        assert!(cache.invalidate("record:*", &opts).await);
        assert!(cache.get("record:a", &opts).await.is_none());
        assert_eq!(cache.get("other", &opts).await, Some(json!(3)));
    }
}
