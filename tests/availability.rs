//! The dataset stays servable through primary, store and total outages.

mod common;

use common::*;
use resilient_dataset::redundancy::emergency_records;
use resilient_dataset::{JsonFileStore, LayerKind, MemoryStore, RedundancyHealth};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_primary_outage_serves_persisted_snapshot() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("snapshot.json");

    {
        let core = test_core(
            SwitchableLoader::new(LoaderMode::Healthy),
            Some(Arc::new(JsonFileStore::new(&store_path))),
        );
        assert_eq!(core.initialize().await, RedundancyHealth::Degraded);
        core.redundancy().wait_for_writeback().await;
        assert_eq!(core.get_current_health().redundancy, RedundancyHealth::Healthy);
        core.shutdown();
    }
    assert!(store_path.exists());

    let core = test_core(
        SwitchableLoader::new(LoaderMode::Failing),
        Some(Arc::new(JsonFileStore::new(&store_path))),
    );
    assert_eq!(core.initialize().await, RedundancyHealth::Critical);
    assert_eq!(core.redundancy().current_layer(), LayerKind::Tertiary);
    assert_eq!(core.get_all_records().as_ref(), &sample_dataset());
}

#[tokio::test]
async fn test_total_outage_serves_emergency_dataset() {
    let core = test_core(SwitchableLoader::new(LoaderMode::Failing), None);
    assert_eq!(core.initialize().await, RedundancyHealth::Emergency);

    let records = core.get_all_records();
    assert!(!records.is_empty());
    assert_eq!(records.as_ref(), &emergency_records());
    assert_eq!(core.redundancy().current_layer(), LayerKind::Emergency);
}

#[tokio::test]
async fn test_corrupt_primary_is_never_served() {
    let core = test_core(SwitchableLoader::new(LoaderMode::Corrupt), None);
    core.initialize().await;

    let records = core.get_all_records();
    assert!(records.iter().all(|r| r.is_structurally_sound()));
    assert_eq!(records.as_ref(), &emergency_records());
}

#[tokio::test]
async fn test_refresh_after_outage() {
    let loader = SwitchableLoader::new(LoaderMode::Failing);
    let core = test_core(loader.clone(), None);
    core.initialize().await;
    assert_eq!(core.redundancy().current_layer(), LayerKind::Emergency);

    assert!(core.force_refresh().await.is_err());
    assert!(!core.get_all_records().is_empty());

    loader.set_mode(LoaderMode::Healthy);
    let health = core.force_refresh().await.unwrap();
    assert_eq!(health, RedundancyHealth::Degraded);
    assert_eq!(core.redundancy().current_layer(), LayerKind::Primary);
    assert_eq!(core.get_all_records().len(), sample_dataset().len());
}

#[tokio::test]
async fn test_concurrent_initialization_loads_once() {
    let loader = SwitchableLoader::new(LoaderMode::Healthy);
    let core = test_core(loader.clone(), Some(Arc::new(MemoryStore::new())));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let core = core.clone();
        handles.push(tokio::spawn(async move { core.initialize().await }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_background_recovery_restores_primary() {
    let loader = SwitchableLoader::new(LoaderMode::Healthy);
    let core = test_core(loader.clone(), Some(Arc::new(MemoryStore::new())));
    core.initialize().await;
    core.start();

    assert_eq!(core.redundancy().force_next_layer(), LayerKind::Secondary);
    assert!(!core.get_all_records().is_empty());

    let redundancy = core.redundancy().clone();
    let recovered = wait_until(Duration::from_secs(3), || {
        let redundancy = redundancy.clone();
        async move { redundancy.current_layer() == LayerKind::Primary }
    })
    .await;
    assert!(recovered);
    assert!(loader.calls() >= 2);
    assert!(core.get_system_stats().redundancy.recoveries >= 1);
    core.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_during_layer_churn() {
    let loader = SwitchableLoader::new(LoaderMode::Healthy);
    let core = test_core(loader.clone(), Some(Arc::new(MemoryStore::new())));
    core.initialize().await;
    core.start();
    loader.set_mode(LoaderMode::Failing);

    let mut handles = Vec::new();
    for task in 0..16 {
        let core = core.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..200 {
                if task == 0 && i % 50 == 0 {
                    core.redundancy().force_next_layer();
                }
                let records = core.get_all_records();
                assert!(!records.is_empty());
                assert!(records.iter().all(|r| r.is_structurally_sound()));
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    core.shutdown();
}
