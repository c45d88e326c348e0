//! Auto-Recovery System
//!
//! Classifies reported errors, picks a recovery strategy (escalating along a
//! fixed chain when the same remedy keeps being tried), and executes it
//! against the integrity guard, redundancy manager and cache orchestrator.
//! A failure inside recovery itself falls through to an unconditional
//! emergency path.

pub mod classifier;
pub mod global;
pub mod strategies;

pub use classifier::{Classification, ClassifierFn, ErrorClassifier};
pub use strategies::{Components, StrategyHandler};

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::error::{Error, Result};
use crate::log_recovery;
use crate::utils::{absorb_async, BoundedHistory};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorCategory {
    DataCorruption,
    CacheFailure,
    MemoryPressure,
    NetworkFailure,
    PerformanceDegradation,
    InitializationFailure,
    ValidationFailure,
    SystemOverload,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 8] = [
        ErrorCategory::DataCorruption,
        ErrorCategory::CacheFailure,
        ErrorCategory::MemoryPressure,
        ErrorCategory::NetworkFailure,
        ErrorCategory::PerformanceDegradation,
        ErrorCategory::InitializationFailure,
        ErrorCategory::ValidationFailure,
        ErrorCategory::SystemOverload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::DataCorruption => "data_corruption",
            ErrorCategory::CacheFailure => "cache_failure",
            ErrorCategory::MemoryPressure => "memory_pressure",
            ErrorCategory::NetworkFailure => "network_failure",
            ErrorCategory::PerformanceDegradation => "performance_degradation",
            ErrorCategory::InitializationFailure => "initialization_failure",
            ErrorCategory::ValidationFailure => "validation_failure",
            ErrorCategory::SystemOverload => "system_overload",
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorCategory::DataCorruption
            | ErrorCategory::MemoryPressure
            | ErrorCategory::InitializationFailure
            | ErrorCategory::SystemOverload => Severity::High,
            ErrorCategory::CacheFailure
            | ErrorCategory::NetworkFailure
            | ErrorCategory::PerformanceDegradation => Severity::Medium,
            ErrorCategory::ValidationFailure => Severity::Low,
        }
    }

    pub fn default_strategy(&self) -> RecoveryStrategy {
        match self {
            ErrorCategory::DataCorruption => RecoveryStrategy::FallbackData,
            ErrorCategory::CacheFailure => RecoveryStrategy::CacheRebuild,
            ErrorCategory::MemoryPressure => RecoveryStrategy::MemoryCleanup,
            ErrorCategory::NetworkFailure
            | ErrorCategory::InitializationFailure
            | ErrorCategory::ValidationFailure => RecoveryStrategy::RestartComponent,
            ErrorCategory::PerformanceDegradation | ErrorCategory::SystemOverload => {
                RecoveryStrategy::GracefulDegradation
            }
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    Catastrophic,
}

/// Recovery strategies, declared in escalation order. `MemoryCleanup` sits
/// outside the chain and escalates to `GracefulDegradation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecoveryStrategy {
    RestartComponent,
    CacheRebuild,
    FallbackData,
    MemoryCleanup,
    GracefulDegradation,
    EmergencyMode,
    SystemRestart,
}

impl RecoveryStrategy {
    pub const CHAIN: [RecoveryStrategy; 6] = [
        RecoveryStrategy::RestartComponent,
        RecoveryStrategy::CacheRebuild,
        RecoveryStrategy::FallbackData,
        RecoveryStrategy::GracefulDegradation,
        RecoveryStrategy::EmergencyMode,
        RecoveryStrategy::SystemRestart,
    ];

    /// The next strategy in the escalation chain. `SystemRestart` is terminal.
    pub fn escalate(&self) -> Option<RecoveryStrategy> {
        match self {
            RecoveryStrategy::RestartComponent => Some(RecoveryStrategy::CacheRebuild),
            RecoveryStrategy::CacheRebuild => Some(RecoveryStrategy::FallbackData),
            RecoveryStrategy::FallbackData | RecoveryStrategy::MemoryCleanup => {
                Some(RecoveryStrategy::GracefulDegradation)
            }
            RecoveryStrategy::GracefulDegradation => Some(RecoveryStrategy::EmergencyMode),
            RecoveryStrategy::EmergencyMode => Some(RecoveryStrategy::SystemRestart),
            RecoveryStrategy::SystemRestart => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SystemState {
    Healthy,
    Degraded,
    Critical,
    Emergency,
    Offline,
}

impl SystemState {
    fn degraded(self) -> Self {
        match self {
            SystemState::Healthy => SystemState::Degraded,
            SystemState::Degraded | SystemState::Critical => SystemState::Critical,
            other => other,
        }
    }

    fn improved(self) -> Self {
        match self {
            SystemState::Critical => SystemState::Degraded,
            SystemState::Degraded | SystemState::Healthy => SystemState::Healthy,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextKind {
    Operation,
    GlobalError,
    UnhandledRejection,
    HealthAlert,
    Manual,
}

/// Where an error came from and anything the reporter knows about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub kind: ContextKind,
    pub component: Option<String>,
    pub severity: Option<Severity>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl ErrorContext {
    pub fn new(kind: ContextKind) -> Self {
        Self {
            kind,
            component: None,
            severity: None,
            details: BTreeMap::new(),
        }
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new(ContextKind::Operation)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub strategy: RecoveryStrategy,
    pub category: Option<ErrorCategory>,
    pub severity: Option<Severity>,
    pub recovery_time: Duration,
    pub state: SystemState,
    /// The strategy differs from the classifier's suggestion.
    pub escalated: bool,
    /// Produced by the emergency path rather than a regular strategy.
    pub emergency: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub breaker: CircuitBreakerConfig,

    /// How far back strategy attempts count toward escalation
    pub attempt_window: Duration,

    /// Attempts of one (category, strategy) pair tolerated before escalating
    pub max_attempts_per_strategy: usize,

    pub history_capacity: usize,

    /// Window for the recent-error count reported in stats
    pub recent_error_window: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            attempt_window: Duration::from_secs(300),
            max_attempts_per_strategy: 2,
            history_capacity: 100,
            recent_error_window: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryRecord {
    pub timestamp: SystemTime,
    pub category: Option<ErrorCategory>,
    pub strategy: RecoveryStrategy,
    pub success: bool,
    pub duration_ms: u64,
    pub message: String,
    pub emergency: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStats {
    pub state: SystemState,
    pub errors_handled: u64,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub emergency_escalations: u64,
    pub avg_recovery_ms: f64,
    pub open_breakers: usize,
    pub recent_errors: usize,
    pub by_category: BTreeMap<String, u64>,
    pub strategy_overrides: usize,
    pub custom_classifiers: usize,
}

#[derive(Debug, Default)]
struct RecoveryCounters {
    errors_handled: AtomicU64,
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    emergency_escalations: AtomicU64,
    total_recovery_us: AtomicU64,
}

type AttemptLog = HashMap<(ErrorCategory, RecoveryStrategy), VecDeque<Instant>>;

pub struct AutoRecovery {
    config: RecoveryConfig,
    components: Components,
    classifier: RwLock<ErrorClassifier>,
    overrides: DashMap<RecoveryStrategy, Arc<dyn StrategyHandler>>,
    breakers: CircuitBreakerRegistry,
    attempts: Mutex<AttemptLog>,
    escalation: Mutex<HashMap<ErrorCategory, (RecoveryStrategy, Instant)>>,
    state: RwLock<SystemState>,
    history: Mutex<BoundedHistory<RecoveryRecord>>,
    by_category: Mutex<BTreeMap<ErrorCategory, u64>>,
    counters: RecoveryCounters,
    global_installed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AutoRecovery {
    pub fn new(config: RecoveryConfig, components: Components) -> Self {
        Self {
            breakers: CircuitBreakerRegistry::new(config.breaker.clone()),
            history: Mutex::new(BoundedHistory::new(config.history_capacity)),
            components,
            classifier: RwLock::new(ErrorClassifier::new()),
            overrides: DashMap::new(),
            attempts: Mutex::new(HashMap::new()),
            escalation: Mutex::new(HashMap::new()),
            state: RwLock::new(SystemState::Healthy),
            by_category: Mutex::new(BTreeMap::new()),
            counters: RecoveryCounters::default(),
            global_installed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            config,
        }
    }

    pub fn register_classifier(&self, name: impl Into<String>, classifier: ClassifierFn) {
        self.classifier.write().register(name, classifier);
    }

    /// Replace the built-in handler for `strategy`.
    pub fn register_strategy_override(
        &self,
        strategy: RecoveryStrategy,
        handler: Arc<dyn StrategyHandler>,
    ) {
        info!(?strategy, "Recovery strategy override registered");
        self.overrides.insert(strategy, handler);
    }

    pub fn classify(&self, error: &Error, context: &ErrorContext) -> Classification {
        self.classifier.read().classify(error, context)
    }

    /// Recover from `error`. Never fails: a breakdown of recovery itself runs
    /// the emergency path and reports its outcome.
    pub async fn handle_error(&self, error: &Error, context: ErrorContext) -> RecoveryOutcome {
        let start = Instant::now();
        self.counters.errors_handled.fetch_add(1, Ordering::Relaxed);

        let attempt = absorb_async(self.attempt_recovery(error, &context, start)).await;
        match attempt {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => self.emergency_escalation(error, &e.to_string(), start).await,
            Err(payload) => {
                let reason = global::panic_message(payload.as_ref());
                self.emergency_escalation(error, &reason, start).await
            }
        }
    }

    async fn attempt_recovery(
        &self,
        error: &Error,
        context: &ErrorContext,
        start: Instant,
    ) -> Result<RecoveryOutcome> {
        let classification = self.classify(error, context);
        let category = classification.category;
        *self.by_category.lock().entry(category).or_insert(0) += 1;

        let strategy = self.select_strategy(&classification);
        let escalated = strategy != classification.suggested;
        self.note_attempt(category, strategy);
        self.counters.attempts.fetch_add(1, Ordering::Relaxed);
        debug!(
            %category,
            severity = ?classification.severity,
            confidence = classification.confidence,
            ?strategy,
            escalated,
            "Executing recovery strategy"
        );

        let success = match self.overrides.get(&strategy).map(|h| h.value().clone()) {
            Some(handler) => handler.execute(&classification, context).await?,
            None => {
                self.components
                    .execute(strategy, &classification, context)
                    .await?
            }
        };

        let elapsed = start.elapsed();
        self.counters
            .total_recovery_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        let state = {
            let mut state = self.state.write();
            *state = if success {
                match strategy {
                    RecoveryStrategy::EmergencyMode => SystemState::Emergency,
                    RecoveryStrategy::SystemRestart => SystemState::Degraded,
                    _ => state.improved(),
                }
            } else {
                state.degraded()
            };
            *state
        };

        if success {
            self.counters.successes.fetch_add(1, Ordering::Relaxed);
            self.breakers.reset(category.as_str());
            self.escalation.lock().remove(&category);
        } else {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            self.breakers.record_failure(category.as_str());
            if escalated {
                self.escalation.lock().insert(category, (strategy, Instant::now()));
            }
        }

        log_recovery!(category, strategy, success, elapsed);
        self.history.lock().push(RecoveryRecord {
            timestamp: SystemTime::now(),
            category: Some(category),
            strategy,
            success,
            duration_ms: elapsed.as_millis() as u64,
            message: error.to_string(),
            emergency: false,
        });

        Ok(RecoveryOutcome {
            success,
            strategy,
            category: Some(category),
            severity: Some(classification.severity),
            recovery_time: elapsed,
            state,
            escalated,
            emergency: false,
        })
    }

    /// The suggested strategy unless its category breaker is open or it has
    /// been tried too often recently. Within the attempt window, failures
    /// never step back below a strategy already escalated to.
    pub fn select_strategy(&self, classification: &Classification) -> RecoveryStrategy {
        let category = classification.category;
        if self.breakers.is_open(category.as_str()) {
            return RecoveryStrategy::EmergencyMode;
        }

        let mut strategy = classification.suggested;
        {
            let mut escalation = self.escalation.lock();
            match escalation.get(&category) {
                Some((level, at)) if at.elapsed() <= self.config.attempt_window => {
                    strategy = strategy.max(*level);
                }
                Some(_) => {
                    escalation.remove(&category);
                }
                None => {}
            }
        }

        while self.recent_attempts(category, strategy) > self.config.max_attempts_per_strategy {
            match strategy.escalate() {
                Some(next) => strategy = next,
                None => break,
            }
        }
        strategy
    }

    fn recent_attempts(&self, category: ErrorCategory, strategy: RecoveryStrategy) -> usize {
        let window = self.config.attempt_window;
        let mut attempts = self.attempts.lock();
        match attempts.get_mut(&(category, strategy)) {
            Some(log) => {
                while log.front().is_some_and(|at| at.elapsed() > window) {
                    log.pop_front();
                }
                log.len()
            }
            None => 0,
        }
    }

    fn note_attempt(&self, category: ErrorCategory, strategy: RecoveryStrategy) {
        self.attempts
            .lock()
            .entry((category, strategy))
            .or_default()
            .push_back(Instant::now());
    }

    /// Last resort: emergency mode, then an ordered restart of every
    /// component. Success leaves the system degraded, failure offline.
    async fn emergency_escalation(
        &self,
        error: &Error,
        reason: &str,
        start: Instant,
    ) -> RecoveryOutcome {
        self.counters.emergency_escalations.fetch_add(1, Ordering::Relaxed);
        error!(error = %error, reason, "Recovery broke down; escalating to emergency mode");

        self.components.activate_emergency_mode();
        *self.state.write() = SystemState::Emergency;

        let restarted = absorb_async(self.components.restart_all()).await;
        let success = match restarted {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "Emergency restart failed");
                false
            }
            Err(payload) => {
                error!(reason = %global::panic_message(payload.as_ref()), "Emergency restart panicked");
                false
            }
        };

        let state = if success {
            SystemState::Degraded
        } else {
            SystemState::Offline
        };
        *self.state.write() = state;

        let elapsed = start.elapsed();
        log_recovery!("emergency", RecoveryStrategy::SystemRestart, success, elapsed);
        self.history.lock().push(RecoveryRecord {
            timestamp: SystemTime::now(),
            category: None,
            strategy: RecoveryStrategy::SystemRestart,
            success,
            duration_ms: elapsed.as_millis() as u64,
            message: format!("{} ({})", error, reason),
            emergency: true,
        });
        if success {
            warn!("Emergency restart succeeded; system degraded");
        }

        RecoveryOutcome {
            success,
            strategy: RecoveryStrategy::SystemRestart,
            category: None,
            severity: Some(Severity::Catastrophic),
            recovery_time: elapsed,
            state,
            escalated: true,
            emergency: true,
        }
    }

    pub fn state(&self) -> SystemState {
        *self.state.read()
    }

    pub fn is_breaker_open(&self, category: ErrorCategory) -> bool {
        self.breakers.is_open(category.as_str())
    }

    pub fn recent_history(&self) -> Vec<RecoveryRecord> {
        self.history.lock().to_vec()
    }

    /// Errors handled within the recent-error window.
    pub fn recent_error_count(&self) -> usize {
        let window = self.config.recent_error_window;
        let now = SystemTime::now();
        self.history
            .lock()
            .iter()
            .filter(|r| now.duration_since(r.timestamp).unwrap_or_default() <= window)
            .count()
    }

    pub fn stats(&self) -> RecoveryStats {
        let attempts = self.counters.attempts.load(Ordering::Relaxed);
        let total_us = self.counters.total_recovery_us.load(Ordering::Relaxed);
        RecoveryStats {
            state: self.state(),
            errors_handled: self.counters.errors_handled.load(Ordering::Relaxed),
            attempts,
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            emergency_escalations: self.counters.emergency_escalations.load(Ordering::Relaxed),
            avg_recovery_ms: if attempts == 0 {
                0.0
            } else {
                total_us as f64 / attempts as f64 / 1000.0
            },
            open_breakers: self.breakers.open_count(),
            recent_errors: self.recent_error_count(),
            by_category: self
                .by_category
                .lock()
                .iter()
                .map(|(c, n)| (c.as_str().to_string(), *n))
                .collect(),
            strategy_overrides: self.overrides.len(),
            custom_classifiers: self.classifier.read().custom_count(),
        }
    }

    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for AutoRecovery {
    fn drop(&mut self) {
        self.shutdown();
    }
}
