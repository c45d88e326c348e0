//! Individual health checks.
//!
//! Each check reads one slice of a [`ComponentSnapshot`] and maps it onto a
//! five-level status through [`HealthThresholds`].

use crate::cache::{CacheHealth, CacheOrchestratorStats};
use crate::integrity::IntegrityStats;
use crate::recovery::{RecoveryStats, SystemState};
use crate::redundancy::{RedundancyHealth, RedundancyStats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    Failure,
    Critical,
    Warning,
    Good,
    Excellent,
}

impl HealthStatus {
    pub fn score(&self) -> u8 {
        match self {
            HealthStatus::Excellent => 5,
            HealthStatus::Good => 4,
            HealthStatus::Warning => 3,
            HealthStatus::Critical => 2,
            HealthStatus::Failure => 1,
        }
    }

    /// Status nearest to a (possibly fractional) score.
    pub fn from_score(score: f64) -> Self {
        match score.round() as i64 {
            s if s >= 5 => HealthStatus::Excellent,
            4 => HealthStatus::Good,
            3 => HealthStatus::Warning,
            2 => HealthStatus::Critical,
            _ => HealthStatus::Failure,
        }
    }

    /// Weighted average of the statuses' scores, rounded to a status.
    pub fn overall(statuses: impl IntoIterator<Item = HealthStatus>) -> (HealthStatus, f64) {
        let (sum, count) = statuses
            .into_iter()
            .fold((0u32, 0u32), |(sum, count), s| (sum + s.score() as u32, count + 1));
        if count == 0 {
            return (HealthStatus::Good, HealthStatus::Good.score() as f64);
        }
        let score = sum as f64 / count as f64;
        (HealthStatus::from_score(score), score)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CheckType {
    SystemOverview,
    DataIntegrity,
    CachePerformance,
    Memory,
    ErrorRates,
    PerformanceMetrics,
    RedundancyStatus,
    RecoveryReadiness,
}

impl CheckType {
    pub const ALL: [CheckType; 8] = [
        CheckType::SystemOverview,
        CheckType::DataIntegrity,
        CheckType::CachePerformance,
        CheckType::Memory,
        CheckType::ErrorRates,
        CheckType::PerformanceMetrics,
        CheckType::RedundancyStatus,
        CheckType::RecoveryReadiness,
    ];

    /// Subset run by the frequent quick check.
    pub const QUICK: [CheckType; 3] = [
        CheckType::SystemOverview,
        CheckType::Memory,
        CheckType::ErrorRates,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CheckType::SystemOverview => "system_overview",
            CheckType::DataIntegrity => "data_integrity",
            CheckType::CachePerformance => "cache_performance",
            CheckType::Memory => "memory",
            CheckType::ErrorRates => "error_rates",
            CheckType::PerformanceMetrics => "performance_metrics",
            CheckType::RedundancyStatus => "redundancy_status",
            CheckType::RecoveryReadiness => "recovery_readiness",
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Memory percentages at which status drops to Good, Warning, Critical, Failure
    pub memory_percent: [f64; 4],
    /// Recent error counts at which status drops to Good, Warning, Critical, Failure
    pub recent_errors: [usize; 4],
    /// Hit rates below which status drops to Good, Warning, Critical
    pub cache_hit_rate: [f64; 3],
    /// Invalid-result shares at which status drops to Good, Warning, Critical, Failure
    pub integrity_error_rate: [f64; 4],
    /// Average recovery times (ms) at which status drops to Good, Warning, Critical, Failure
    pub recovery_ms: [f64; 4],
    /// Open breakers at which status drops to Good, Warning, Critical, Failure
    pub open_breakers: [usize; 4],
    /// Gets required before the hit rate is judged
    pub min_cache_requests: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            memory_percent: [50.0, 70.0, 85.0, 95.0],
            recent_errors: [1, 5, 20, 50],
            cache_hit_rate: [0.8, 0.5, 0.2],
            integrity_error_rate: [0.01, 0.05, 0.2, 0.5],
            recovery_ms: [100.0, 1_000.0, 5_000.0, 30_000.0],
            open_breakers: [1, 2, 3, 5],
            min_cache_requests: 20,
        }
    }
}

/// Map a value onto a status; `bounds` ascend and mark where each worse
/// status begins.
fn rising<T: PartialOrd + Copy>(value: T, bounds: [T; 4]) -> HealthStatus {
    if value >= bounds[3] {
        HealthStatus::Failure
    } else if value >= bounds[2] {
        HealthStatus::Critical
    } else if value >= bounds[1] {
        HealthStatus::Warning
    } else if value >= bounds[0] {
        HealthStatus::Good
    } else {
        HealthStatus::Excellent
    }
}

/// Everything the checks read, gathered once per report.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentSnapshot {
    pub integrity: IntegrityStats,
    pub cache: CacheOrchestratorStats,
    pub redundancy: RedundancyStats,
    pub recovery: RecoveryStats,
    pub memory_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub check: CheckType,
    pub status: HealthStatus,
    pub message: String,
    pub metrics: BTreeMap<String, f64>,
}

impl CheckResult {
    fn new(check: CheckType, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            check,
            status,
            message: message.into(),
            metrics: BTreeMap::new(),
        }
    }

    fn metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }
}

pub fn run_check(
    check: CheckType,
    snapshot: &ComponentSnapshot,
    thresholds: &HealthThresholds,
) -> CheckResult {
    match check {
        CheckType::SystemOverview => {
            let state = snapshot.recovery.state;
            let status = match state {
                SystemState::Healthy => HealthStatus::Excellent,
                SystemState::Degraded => HealthStatus::Warning,
                SystemState::Critical => HealthStatus::Critical,
                SystemState::Emergency | SystemState::Offline => HealthStatus::Failure,
            };
            CheckResult::new(check, status, format!("system state {:?}", state))
                .metric("errors_handled", snapshot.recovery.errors_handled as f64)
        }

        CheckType::DataIntegrity => {
            let rate = snapshot.integrity.recent_error_rate;
            let status = rising(rate, thresholds.integrity_error_rate);
            CheckResult::new(
                check,
                status,
                format!(
                    "{:.1}% of {} recent validations invalid",
                    rate * 100.0,
                    snapshot.integrity.recent_results
                ),
            )
            .metric("recent_error_rate", rate)
            .metric("healing_attempts", snapshot.integrity.healing_attempts as f64)
        }

        CheckType::CachePerformance => {
            let cache = &snapshot.cache;
            let [good, warning, critical] = thresholds.cache_hit_rate;
            let status = if cache.health == CacheHealth::Emergency {
                HealthStatus::Failure
            } else if cache.caches.is_empty() || cache.gets < thresholds.min_cache_requests {
                HealthStatus::Good
            } else if cache.hit_rate < critical {
                HealthStatus::Critical
            } else if cache.hit_rate < warning {
                HealthStatus::Warning
            } else if cache.hit_rate < good {
                HealthStatus::Good
            } else {
                HealthStatus::Excellent
            };
            CheckResult::new(
                check,
                status,
                format!(
                    "hit rate {:.1}% over {} gets, cache health {:?}",
                    cache.hit_rate * 100.0,
                    cache.gets,
                    cache.health
                ),
            )
            .metric("hit_rate", cache.hit_rate)
            .metric("error_rate", cache.error_rate)
        }

        CheckType::Memory => {
            let percent = snapshot.memory_percent;
            CheckResult::new(
                check,
                rising(percent, thresholds.memory_percent),
                format!("memory at {:.1}% of budget", percent),
            )
            .metric("memory_percent", percent)
        }

        CheckType::ErrorRates => {
            let recent = snapshot.recovery.recent_errors;
            CheckResult::new(
                check,
                rising(recent, thresholds.recent_errors),
                format!("{} recent errors", recent),
            )
            .metric("recent_errors", recent as f64)
        }

        CheckType::PerformanceMetrics => {
            let recovery_ms = snapshot.recovery.avg_recovery_ms;
            CheckResult::new(
                check,
                rising(recovery_ms, thresholds.recovery_ms),
                format!(
                    "average recovery {:.1} ms, fallback response {:.0} us",
                    recovery_ms, snapshot.cache.fallback_avg_response_us
                ),
            )
            .metric("avg_recovery_ms", recovery_ms)
            .metric("fallback_avg_response_us", snapshot.cache.fallback_avg_response_us)
        }

        CheckType::RedundancyStatus => {
            let health = snapshot.redundancy.health;
            let status = match health {
                RedundancyHealth::Healthy => HealthStatus::Excellent,
                RedundancyHealth::Degraded => HealthStatus::Warning,
                RedundancyHealth::Critical => HealthStatus::Critical,
                RedundancyHealth::Emergency => HealthStatus::Failure,
            };
            CheckResult::new(
                check,
                status,
                format!(
                    "redundancy {:?}, serving {}",
                    health, snapshot.redundancy.current_layer
                ),
            )
            .metric("layer_switches", snapshot.redundancy.layer_switches as f64)
        }

        CheckType::RecoveryReadiness => {
            let open = snapshot.recovery.open_breakers + snapshot.cache.caches.iter().filter(|c| !c.enabled).count();
            CheckResult::new(
                check,
                rising(open, thresholds.open_breakers),
                format!("{} open breakers or disabled caches", open),
            )
            .metric("open_breakers", open as f64)
        }
    }
}
