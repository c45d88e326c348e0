//! Error reporting, escalation and the process-wide error funnels.

mod common;

use common::*;
use resilient_dataset::integrity::{ValidationCategory, ValidationCode, ValidationRule};
use resilient_dataset::recovery::Classification;
use resilient_dataset::{
    CacheStrategy, ContextKind, Error, ErrorCategory, ErrorContext, RecoveryStrategy, Severity,
    SystemState, ValidationLevel,
};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_cache_error_rebuilds_cache() {
    let core = test_core(SwitchableLoader::new(LoaderMode::Healthy), None);
    core.initialize().await;

    let error = Error::Cache {
        cache: "L1".to_string(),
        reason: "eviction storm".to_string(),
    };
    let outcome = core
        .report_error(&error, ErrorContext::default().component("cache:L1"))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.category, Some(ErrorCategory::CacheFailure));
    assert_eq!(outcome.strategy, RecoveryStrategy::CacheRebuild);
    assert!(!outcome.escalated);
    assert_eq!(outcome.state, SystemState::Healthy);

    let stats = core.get_system_stats().recovery;
    assert_eq!(stats.errors_handled, 1);
    assert_eq!(stats.by_category.get("cache_failure"), Some(&1));
}

#[tokio::test]
async fn test_custom_classifier_routes_unknown_errors() {
    let core = test_core(SwitchableLoader::new(LoaderMode::Healthy), None);
    core.initialize().await;

    core.recovery().register_classifier(
        "quota",
        Arc::new(|error: &Error, _: &ErrorContext| {
            error.to_string().contains("quota").then(|| {
                Classification::new(
                    ErrorCategory::SystemOverload,
                    Severity::High,
                    0.9,
                    RecoveryStrategy::GracefulDegradation,
                )
            })
        }),
    );

    let outcome = core
        .report_error(
            &Error::Generic("tenant quota exhausted".to_string()),
            ErrorContext::default(),
        )
        .await;
    assert!(outcome.success);
    assert_eq!(outcome.category, Some(ErrorCategory::SystemOverload));
    assert_eq!(outcome.severity, Some(Severity::High));
    assert_eq!(core.cache().strategy(), CacheStrategy::Conservative);
    assert_eq!(core.get_system_stats().recovery.custom_classifiers, 1);
}

#[tokio::test]
async fn test_repeated_failures_escalate_along_the_chain() {
    let loader = SwitchableLoader::new(LoaderMode::Failing);
    let core = test_core(loader.clone(), None);
    core.initialize().await;
    let initial_calls = loader.calls();

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        let outcome = core
            .report_error(
                &Error::Network("upstream unreachable".to_string()),
                ErrorContext::default().component("loader"),
            )
            .await;
        outcomes.push(outcome);
    }

    let strategies: Vec<_> = outcomes.iter().map(|o| o.strategy).collect();
    assert_eq!(
        strategies,
        vec![
            RecoveryStrategy::RestartComponent,
            RecoveryStrategy::RestartComponent,
            RecoveryStrategy::RestartComponent,
            RecoveryStrategy::CacheRebuild,
        ]
    );
    assert!(outcomes[..3].iter().all(|o| !o.success));
    assert!(outcomes[3].success && outcomes[3].escalated);
    assert!(loader.calls() >= initial_calls + 3);
    assert!(!core.recovery().is_breaker_open(ErrorCategory::NetworkFailure));
    assert!(!core.get_all_records().is_empty());
}

#[tokio::test]
#[serial]
async fn test_supervised_task_errors_are_recovered() {
    let core = test_core(SwitchableLoader::new(LoaderMode::Healthy), None);
    core.initialize().await;

    let failing = core.recovery().spawn_supervised("loader-refresh", async {
        Err(Error::Timeout("refresh took too long".to_string()))
    });
    failing.await.unwrap();

    let panicking = core.recovery().spawn_supervised("reindex", async {
        let shards: Vec<u32> = Vec::new();
        if shards.is_empty() {
            panic!("index out of range");
        }
        Ok(())
    });
    panicking.await.unwrap();

    let history = core.recovery().recent_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].category, Some(ErrorCategory::NetworkFailure));
    assert!(history[0].success);
    assert!(history[1].message.contains("index out of range"));
    assert_eq!(core.get_system_stats().recovery.errors_handled, 2);
}

#[tokio::test]
#[serial]
async fn test_global_panic_hook_reports_to_recovery() {
    let core = test_core(SwitchableLoader::new(LoaderMode::Healthy), None);
    core.initialize().await;

    assert!(core.install_global_handlers());
    assert!(!core.install_global_handlers());

    let joined = std::thread::spawn(|| panic!("worker exploded")).join();
    assert!(joined.is_err());

    let recovery = core.recovery().clone();
    let reported = wait_until(Duration::from_secs(2), || {
        let recovery = recovery.clone();
        async move {
            recovery
                .recent_history()
                .iter()
                .any(|r| r.message.contains("worker exploded"))
        }
    })
    .await;
    assert!(reported);
    assert!(core.get_system_stats().recovery.errors_handled >= 1);
}

#[tokio::test]
#[serial]
async fn test_locally_contained_panics_skip_global_handlers() {
    let core = test_core(SwitchableLoader::new(LoaderMode::Healthy), None);
    core.initialize().await;
    assert!(core.install_global_handlers());
    let strategy_before = core.cache().strategy();

    core.integrity().register_rule(ValidationRule::new(
        "exploding_rule",
        ValidationLevel::Basic,
        ValidationCategory::Content,
        |_, _, _| panic!("rule exploded"),
    ));
    let records = core.get_all_records();
    let result = core
        .integrity()
        .validate(&records[0], ValidationLevel::Basic, None);
    assert!(result.has_code(ValidationCode::RuleFailure));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(core.get_system_stats().recovery.errors_handled, 0);
    assert_eq!(core.cache().strategy(), strategy_before);

    let supervised = core.recovery().spawn_supervised("rebuild", async {
        let pending: Vec<u32> = Vec::new();
        if pending.is_empty() {
            panic!("rebuild failed");
        }
        Ok(())
    });
    supervised.await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let stats = core.get_system_stats().recovery;
    assert_eq!(stats.errors_handled, 1);
    let history = core.recovery().recent_history();
    assert_eq!(history.len(), 1);
    assert!(history[0].message.contains("rebuild failed"));
    assert!(!history.iter().any(|r| r.message.contains("rule exploded")));
}

#[tokio::test]
async fn test_manual_context_severity_is_respected() {
    let core = test_core(SwitchableLoader::new(LoaderMode::Healthy), None);
    core.initialize().await;

    let context = ErrorContext::new(ContextKind::Manual)
        .component("integrity")
        .severity(Severity::Critical)
        .detail("record", "hablar");
    let outcome = core
        .report_error(&Error::Validation("bad paradigm".to_string()), context)
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.category, Some(ErrorCategory::ValidationFailure));
    assert_eq!(outcome.severity, Some(Severity::Critical));
    assert_eq!(outcome.strategy, RecoveryStrategy::RestartComponent);
}
