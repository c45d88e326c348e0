//! Health Check System
//!
//! Periodic full and quick health checks over every component, trend
//! analysis across recent full reports, cooldown-limited alerts, and the
//! monitoring-to-recovery loop for High and Critical alerts.

pub mod alert_manager;
pub mod health_checker;
pub mod memory;
pub mod trends;

pub use alert_manager::{Alert, AlertCooldowns, AlertManager, AlertSeverity, AlertStats, AlertType};
pub use health_checker::{
    run_check, CheckResult, CheckType, ComponentSnapshot, HealthStatus, HealthThresholds,
};
pub use memory::{EstimatedMemoryProbe, MemoryProbe};
pub use trends::{Trend, TrendAnalysis, TrendSample};

use crate::error::Error;
use crate::recovery::{AutoRecovery, Components, ContextKind, ErrorContext};
use crate::utils::{absorb, BoundedHistory};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Interval between full checks
    pub full_interval: Duration,

    /// Interval between quick checks
    pub quick_interval: Duration,

    /// Full reports considered by trend analysis
    pub trend_window: usize,

    /// Reports retained in history
    pub history_capacity: usize,

    /// Byte budget the estimated memory percentage is measured against
    pub memory_budget_bytes: usize,

    pub thresholds: HealthThresholds,
    pub cooldowns: AlertCooldowns,

    /// Forward High and Critical alerts into recovery
    pub forward_alerts: bool,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            full_interval: Duration::from_secs(120),
            quick_interval: Duration::from_secs(30),
            trend_window: 3,
            history_capacity: 100,
            memory_budget_bytes: 256 * 1024 * 1024,
            thresholds: HealthThresholds::default(),
            cooldowns: AlertCooldowns::default(),
            forward_alerts: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportKind {
    Full,
    Quick,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub kind: ReportKind,
    pub overall: HealthStatus,
    pub score: f64,
    pub checks: Vec<CheckResult>,
    pub alerts: Vec<Alert>,
    pub trends: Option<TrendAnalysis>,
    pub sample: TrendSample,
    pub timestamp: SystemTime,
    pub duration: Duration,
}

impl HealthReport {
    pub fn check(&self, check: CheckType) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.check == check)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStats {
    pub full_checks: u64,
    pub quick_checks: u64,
    pub alerts: AlertStats,
    pub alerts_forwarded: u64,
    pub subscribers: usize,
    pub current: Option<HealthStatus>,
}

pub type HealthCallback = Arc<dyn Fn(&HealthReport) + Send + Sync>;

type SubscriberList = RwLock<Vec<(u64, HealthCallback)>>;

/// Handle returned by [`HealthMonitor::subscribe`].
pub struct Subscription {
    id: u64,
    subscribers: Weak<SubscriberList>,
}

impl Subscription {
    /// Stop receiving reports. Returns false if already removed.
    pub fn unsubscribe(self) -> bool {
        let Some(subscribers) = self.subscribers.upgrade() else {
            return false;
        };
        let mut subscribers = subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(id, _)| *id != self.id);
        subscribers.len() != before
    }
}

pub struct HealthMonitor {
    config: HealthCheckConfig,
    components: Components,
    recovery: Arc<AutoRecovery>,
    probe: Arc<dyn MemoryProbe>,
    alerts: AlertManager,
    full_reports: Mutex<BoundedHistory<HealthReport>>,
    latest: RwLock<Option<HealthReport>>,
    subscribers: Arc<SubscriberList>,
    next_subscriber: AtomicU64,
    full_checks: AtomicU64,
    quick_checks: AtomicU64,
    forwarded: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthCheckConfig,
        components: Components,
        recovery: Arc<AutoRecovery>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        Self {
            alerts: AlertManager::new(config.cooldowns.clone(), config.history_capacity),
            full_reports: Mutex::new(BoundedHistory::new(config.history_capacity)),
            components,
            recovery,
            probe,
            latest: RwLock::new(None),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_subscriber: AtomicU64::new(1),
            full_checks: AtomicU64::new(0),
            quick_checks: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
            config,
        }
    }

    pub fn snapshot(&self) -> ComponentSnapshot {
        ComponentSnapshot {
            integrity: self.components.integrity.stats(),
            cache: self.components.cache.stats(),
            redundancy: self.components.redundancy.stats(),
            recovery: self.recovery.stats(),
            memory_percent: self.probe.memory_percent(),
        }
    }

    /// Run all eight checks, analyze trends and raise alerts.
    pub async fn perform_full_health_check(&self) -> HealthReport {
        self.full_checks.fetch_add(1, Ordering::Relaxed);
        self.run(ReportKind::Full, &CheckType::ALL).await
    }

    /// Memory, error-rate and overview checks only.
    pub async fn perform_quick_check(&self) -> HealthReport {
        self.quick_checks.fetch_add(1, Ordering::Relaxed);
        self.run(ReportKind::Quick, &CheckType::QUICK).await
    }

    async fn run(&self, kind: ReportKind, checks: &[CheckType]) -> HealthReport {
        let start = Instant::now();
        let snapshot = self.snapshot();
        let results: Vec<CheckResult> = checks
            .iter()
            .map(|check| run_check(*check, &snapshot, &self.config.thresholds))
            .collect();
        let (overall, score) = HealthStatus::overall(results.iter().map(|r| r.status));

        let sample = TrendSample {
            recovery_ms: snapshot.recovery.avg_recovery_ms,
            memory_percent: snapshot.memory_percent,
            recent_errors: snapshot.recovery.recent_errors as f64,
            cache_hit_rate: snapshot.cache.hit_rate,
        };

        let mut alerts = Vec::new();
        for result in &results {
            let Some(severity) = AlertSeverity::for_status(result.status) else {
                continue;
            };
            let alert_type = if result.status == HealthStatus::Failure {
                AlertType::ComponentFailure
            } else {
                AlertType::ThresholdBreach
            };
            let message = format!("{}: {}", result.check, result.message);
            if let Some(alert) = self.alerts.raise(alert_type, severity, Some(result.check), message) {
                alerts.push(alert);
            }
        }

        let trends = match kind {
            ReportKind::Full => self.analyze_trends(sample),
            ReportKind::Quick => None,
        };
        if let Some(analysis) = trends.filter(TrendAnalysis::predicts_degradation) {
            let message = format!(
                "degradation predicted: memory {:?}, recovery time {:?}, hit rate {:?}",
                analysis.memory, analysis.recovery_time, analysis.cache_hit_rate
            );
            if let Some(alert) =
                self.alerts
                    .raise(AlertType::PredictiveWarning, AlertSeverity::Medium, None, message)
            {
                alerts.push(alert);
            }
        }

        let report = HealthReport {
            kind,
            overall,
            score,
            checks: results,
            alerts,
            trends,
            sample,
            timestamp: SystemTime::now(),
            duration: start.elapsed(),
        };
        debug!(kind = ?kind, overall = %overall, score, alerts = report.alerts.len(), "Health check complete");

        if kind == ReportKind::Full {
            self.full_reports.lock().push(report.clone());
        }
        *self.latest.write() = Some(report.clone());
        self.notify(&report);
        self.forward_alerts(&report.alerts).await;
        report
    }

    fn analyze_trends(&self, current: TrendSample) -> Option<TrendAnalysis> {
        let window = self.config.trend_window.max(2);
        let mut samples: Vec<TrendSample> = self
            .full_reports
            .lock()
            .last_n(window - 1)
            .into_iter()
            .map(|r| r.sample)
            .collect();
        samples.push(current);
        trends::analyze(&samples, window)
    }

    async fn forward_alerts(&self, alerts: &[Alert]) {
        if !self.config.forward_alerts {
            return;
        }
        for alert in alerts.iter().filter(|a| a.severity.is_actionable()) {
            self.forwarded.fetch_add(1, Ordering::Relaxed);
            let mut context = ErrorContext::new(ContextKind::HealthAlert)
                .severity(alert.severity.as_recovery_severity())
                .detail("alert_id", alert.id);
            if let Some(check) = alert.check {
                context = context.component(check.name());
            }
            let outcome = self
                .recovery
                .handle_error(&Error::HealthAlert(alert.message.clone()), context)
                .await;
            info!(
                alert = alert.id,
                strategy = ?outcome.strategy,
                success = outcome.success,
                "Alert forwarded to recovery"
            );
        }
    }

    fn notify(&self, report: &HealthReport) {
        let subscribers: Vec<HealthCallback> =
            self.subscribers.read().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in subscribers {
            if absorb(|| callback(report)).is_err() {
                warn!("Health subscriber panicked");
            }
        }
    }

    pub fn subscribe(&self, callback: HealthCallback) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push((id, callback));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn current_health(&self) -> Option<HealthStatus> {
        self.latest.read().as_ref().map(|r| r.overall)
    }

    pub fn latest_report(&self) -> Option<HealthReport> {
        self.latest.read().clone()
    }

    pub fn full_reports(&self) -> Vec<HealthReport> {
        self.full_reports.lock().to_vec()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.history()
    }

    pub fn stats(&self) -> HealthStats {
        HealthStats {
            full_checks: self.full_checks.load(Ordering::Relaxed),
            quick_checks: self.quick_checks.load(Ordering::Relaxed),
            alerts: self.alerts.stats(),
            alerts_forwarded: self.forwarded.load(Ordering::Relaxed),
            subscribers: self.subscribers.read().len(),
            current: self.current_health(),
        }
    }

    /// Start the full and quick check timers.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let weak = Arc::downgrade(self);
        let period = self.config.full_interval;
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(monitor) = weak.upgrade() else { break };
                monitor.perform_full_health_check().await;
            }
        }));

        let weak = Arc::downgrade(self);
        let period = self.config.quick_interval;
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(monitor) = weak.upgrade() else { break };
                monitor.perform_quick_check().await;
            }
        }));
        info!(
            full_secs = self.config.full_interval.as_secs(),
            quick_secs = self.config.quick_interval.as_secs(),
            "Health monitoring started"
        );
    }

    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
