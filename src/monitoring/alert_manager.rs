//! Alert creation with per-(type, severity) cooldowns.

use super::health_checker::{CheckType, HealthStatus};
use crate::recovery::Severity;
use crate::utils::BoundedHistory;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertType {
    ThresholdBreach,
    ComponentFailure,
    PredictiveWarning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    /// Severity of the alert a check status produces, if any.
    pub fn for_status(status: HealthStatus) -> Option<Self> {
        match status {
            HealthStatus::Excellent | HealthStatus::Good => None,
            HealthStatus::Warning => Some(AlertSeverity::Low),
            HealthStatus::Critical => Some(AlertSeverity::High),
            HealthStatus::Failure => Some(AlertSeverity::Critical),
        }
    }

    /// Alerts at or above this level are forwarded into recovery.
    pub fn is_actionable(&self) -> bool {
        *self >= AlertSeverity::High
    }

    pub fn as_recovery_severity(&self) -> Severity {
        match self {
            AlertSeverity::Low => Severity::Low,
            AlertSeverity::Medium => Severity::Medium,
            AlertSeverity::High => Severity::High,
            AlertSeverity::Critical => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCooldowns {
    pub critical: Duration,
    pub high: Duration,
    pub medium: Duration,
    pub low: Duration,
}

impl AlertCooldowns {
    pub fn for_severity(&self, severity: AlertSeverity) -> Duration {
        match severity {
            AlertSeverity::Critical => self.critical,
            AlertSeverity::High => self.high,
            AlertSeverity::Medium => self.medium,
            AlertSeverity::Low => self.low,
        }
    }
}

impl Default for AlertCooldowns {
    fn default() -> Self {
        Self {
            critical: Duration::from_secs(30),
            high: Duration::from_secs(60),
            medium: Duration::from_secs(120),
            low: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: u64,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub check: Option<CheckType>,
    pub message: String,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AlertStats {
    pub raised: u64,
    pub suppressed: u64,
}

pub struct AlertManager {
    cooldowns: AlertCooldowns,
    last_raised: Mutex<HashMap<(AlertType, AlertSeverity), Instant>>,
    history: Mutex<BoundedHistory<Alert>>,
    next_id: AtomicU64,
    raised: AtomicU64,
    suppressed: AtomicU64,
}

impl AlertManager {
    pub fn new(cooldowns: AlertCooldowns, history_capacity: usize) -> Self {
        Self {
            cooldowns,
            last_raised: Mutex::new(HashMap::new()),
            history: Mutex::new(BoundedHistory::new(history_capacity)),
            next_id: AtomicU64::new(1),
            raised: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Raise an alert unless one of the same type and severity is still
    /// cooling down.
    pub fn raise(
        &self,
        alert_type: AlertType,
        severity: AlertSeverity,
        check: Option<CheckType>,
        message: impl Into<String>,
    ) -> Option<Alert> {
        let now = Instant::now();
        {
            let mut last = self.last_raised.lock();
            let cooldown = self.cooldowns.for_severity(severity);
            if let Some(at) = last.get(&(alert_type, severity)) {
                if now.duration_since(*at) < cooldown {
                    self.suppressed.fetch_add(1, Ordering::Relaxed);
                    debug!(?alert_type, ?severity, "Alert suppressed by cooldown");
                    return None;
                }
            }
            last.insert((alert_type, severity), now);
        }

        let alert = Alert {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            alert_type,
            severity,
            check,
            message: message.into(),
            timestamp: SystemTime::now(),
        };
        self.raised.fetch_add(1, Ordering::Relaxed);
        warn!(
            id = alert.id,
            alert_type = ?alert_type,
            severity = ?severity,
            check = ?check,
            message = %alert.message,
            "Health alert raised"
        );
        self.history.lock().push(alert.clone());
        Some(alert)
    }

    pub fn history(&self) -> Vec<Alert> {
        self.history.lock().to_vec()
    }

    pub fn stats(&self) -> AlertStats {
        AlertStats {
            raised: self.raised.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
        }
    }

    pub fn reset_cooldowns(&self) {
        self.last_raised.lock().clear();
    }
}
