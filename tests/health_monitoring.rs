//! Health checks, alert forwarding and subscriptions through the core.

mod common;

use common::*;
use resilient_dataset::monitoring::{HealthReport, ReportKind};
use resilient_dataset::{
    CheckType, CoreConfig, HealthStatus, MemoryProbe, MemoryStore, ResilientCore,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Memory probe reporting whatever the test sets.
struct FixedProbe(AtomicU64);

impl FixedProbe {
    fn new(percent: f64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(percent.to_bits())))
    }

    fn set(&self, percent: f64) {
        self.0.store(percent.to_bits(), Ordering::SeqCst);
    }
}

impl MemoryProbe for FixedProbe {
    fn memory_percent(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::SeqCst))
    }
}

async fn core_with_probe(probe: Arc<FixedProbe>) -> Arc<ResilientCore> {
    let core = ResilientCore::builder(SwitchableLoader::new(LoaderMode::Healthy))
        .store(Arc::new(MemoryStore::new()))
        .config(CoreConfig::testing())
        .memory_probe(probe)
        .build()
        .unwrap();
    core.initialize().await;
    core.redundancy().wait_for_writeback().await;
    core
}

#[tokio::test]
async fn test_healthy_system_raises_no_actionable_alerts() {
    let core = core_with_probe(FixedProbe::new(10.0)).await;

    let report = core.force_health_check().await;
    assert_eq!(report.kind, ReportKind::Full);
    assert_eq!(report.checks.len(), CheckType::ALL.len());
    assert_eq!(
        report.check(CheckType::Memory).unwrap().status,
        HealthStatus::Excellent
    );
    assert_eq!(
        report.check(CheckType::RedundancyStatus).unwrap().status,
        HealthStatus::Excellent
    );
    assert!(report.overall >= HealthStatus::Good);

    let stats = core.get_system_stats();
    assert_eq!(stats.health.alerts_forwarded, 0);
    assert_eq!(stats.recovery.errors_handled, 0);
    assert_eq!(core.get_current_health().status, Some(report.overall));
}

#[tokio::test]
async fn test_memory_failure_is_forwarded_to_recovery() {
    let probe = FixedProbe::new(97.0);
    let core = core_with_probe(probe.clone()).await;

    let report = core.force_health_check().await;
    assert_eq!(
        report.check(CheckType::Memory).unwrap().status,
        HealthStatus::Failure
    );
    assert!(!report.alerts.is_empty());

    let stats = core.get_system_stats();
    assert!(stats.health.alerts_forwarded >= 1);
    assert!(stats.recovery.by_category.contains_key("memory_pressure"));
    assert!(stats.cache.memory_pressure_events >= 1);

    // Same alert again inside its cooldown is suppressed, not re-forwarded.
    let forwarded = stats.health.alerts_forwarded;
    core.force_health_check().await;
    let stats = core.get_system_stats().health;
    assert_eq!(stats.alerts_forwarded, forwarded);
    assert!(stats.alerts.suppressed >= 1);

    probe.set(20.0);
    let recovered = core.force_health_check().await;
    assert_eq!(
        recovered.check(CheckType::Memory).unwrap().status,
        HealthStatus::Excellent
    );
}

#[tokio::test]
async fn test_background_checks_notify_subscribers() {
    let core = core_with_probe(FixedProbe::new(10.0)).await;
    let full = Arc::new(AtomicUsize::new(0));
    let quick = Arc::new(AtomicUsize::new(0));

    let subscription = {
        let full = full.clone();
        let quick = quick.clone();
        core.subscribe_to_health(Arc::new(move |report: &HealthReport| {
            match report.kind {
                ReportKind::Full => full.fetch_add(1, Ordering::SeqCst),
                ReportKind::Quick => quick.fetch_add(1, Ordering::SeqCst),
            };
        }))
    };
    core.start();

    let seen = wait_until(Duration::from_secs(3), || {
        let (full, quick) = (full.clone(), quick.clone());
        async move { full.load(Ordering::SeqCst) >= 1 && quick.load(Ordering::SeqCst) >= 1 }
    })
    .await;
    assert!(seen);
    assert!(core.get_current_health().status.is_some());

    assert!(subscription.unsubscribe());
    let after = full.load(Ordering::SeqCst) + quick.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(full.load(Ordering::SeqCst) + quick.load(Ordering::SeqCst), after);
    assert!(core.get_system_stats().health.full_checks >= 2);
    core.shutdown();
}

#[tokio::test]
async fn test_panicking_subscriber_does_not_break_checks() {
    let core = core_with_probe(FixedProbe::new(10.0)).await;
    let calls = Arc::new(AtomicUsize::new(0));

    let _bad = core.subscribe_to_health(Arc::new(|_: &HealthReport| panic!("subscriber bug")));
    let _good = {
        let calls = calls.clone();
        core.subscribe_to_health(Arc::new(move |_: &HealthReport| {
            calls.fetch_add(1, Ordering::SeqCst);
        }))
    };

    core.health().perform_quick_check().await;
    core.force_health_check().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(core.health().full_reports().len(), 1);
}
