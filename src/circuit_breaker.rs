//! Failure-counting circuit breakers.
//!
//! A breaker opens after `failure_threshold` consecutive failures. Once open
//! it stays open until `timeout` has elapsed; after that it is half-open and
//! the next recorded success closes it, while the next recorded failure
//! re-opens it with a fresh timeout. Successes recorded while fully open are
//! ignored.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    open: bool,
    failure_count: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct CircuitBreakerStats {
    successes: AtomicU64,
    failures: AtomicU64,
    state_transitions: AtomicU64,
}

pub struct CircuitBreaker {
    name: String,
    inner: Mutex<BreakerInner>,
    config: CircuitBreakerConfig,
    stats: CircuitBreakerStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub timeout_ms: u64,
    pub since_last_failure_ms: Option<u64>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub state_transitions: u64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(BreakerInner {
                open: false,
                failure_count: 0,
                last_failure: None,
                opened_at: None,
            }),
            config,
            stats: CircuitBreakerStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        self.state_of(&inner)
    }

    fn state_of(&self, inner: &BreakerInner) -> CircuitState {
        if !inner.open {
            return CircuitState::Closed;
        }
        match inner.opened_at {
            Some(opened) if opened.elapsed() >= self.config.timeout => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }

    /// True while the breaker is open and its timeout has not elapsed.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Whether a call should be attempted: closed, or half-open probe.
    pub fn allow_request(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        self.stats.successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        match self.state_of(&inner) {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.open = false;
                inner.failure_count = 0;
                inner.opened_at = None;
                self.stats.state_transitions.fetch_add(1, Ordering::Relaxed);
                info!(breaker = %self.name, "Circuit breaker closed after successful probe");
            }
            CircuitState::Open => {
                debug!(breaker = %self.name, "Success ignored while circuit is open");
            }
        }
    }

    pub fn record_failure(&self) {
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.last_failure = Some(now);
        match self.state_of(&inner) {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.open = true;
                    inner.opened_at = Some(now);
                    self.stats.state_transitions.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                inner.opened_at = Some(now);
                self.stats.state_transitions.fetch_add(1, Ordering::Relaxed);
                warn!(breaker = %self.name, "Half-open probe failed, circuit re-opened");
            }
            CircuitState::Open => {
                inner.failure_count += 1;
            }
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.open {
            self.stats.state_transitions.fetch_add(1, Ordering::Relaxed);
        }
        inner.open = false;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.opened_at = None;
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: self.state_of(&inner),
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            timeout_ms: self.config.timeout.as_millis() as u64,
            since_last_failure_ms: inner.last_failure.map(|t| t.elapsed().as_millis() as u64),
            total_successes: self.stats.successes.load(Ordering::Relaxed),
            total_failures: self.stats.failures.load(Ordering::Relaxed),
            state_transitions: self.stats.state_transitions.load(Ordering::Relaxed),
        }
    }
}

/// Breakers created on demand, keyed by error category or cache name.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    pub fn get(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(key) {
            return existing.clone();
        }
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.config.clone())))
            .clone()
    }

    pub fn is_open(&self, key: &str) -> bool {
        self.breakers.get(key).is_some_and(|b| b.is_open())
    }

    pub fn allow_request(&self, key: &str) -> bool {
        self.breakers.get(key).map_or(true, |b| b.allow_request())
    }

    pub fn record_success(&self, key: &str) {
        self.get(key).record_success();
    }

    pub fn record_failure(&self, key: &str) {
        self.get(key).record_failure();
    }

    pub fn reset(&self, key: &str) {
        if let Some(breaker) = self.breakers.get(key) {
            breaker.reset();
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }

    pub fn open_count(&self) -> usize {
        self.breakers.iter().filter(|b| b.is_open()).count()
    }

    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
