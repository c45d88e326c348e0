//! Tiered cache behavior in front of the redundancy fallback.

mod common;

use common::*;
use resilient_dataset::{CacheOptions, CacheTier, CoreConfig, MemoryCache, ResilientCore};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn untracked() -> CacheOptions {
    CacheOptions {
        no_preload: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_dataset_keys_resolve_through_fallback() {
    let core = test_core(SwitchableLoader::new(LoaderMode::Healthy), None);
    core.initialize().await;

    let record = core.cache_get("record:hablar", &untracked()).await.unwrap();
    assert_eq!(record["id"], "hablar");

    let again = core.cache_get("record:hablar", &untracked()).await.unwrap();
    assert_eq!(again, record);

    let tagged = core
        .cache_get("records:tag:rioplatense", &untracked())
        .await
        .unwrap();
    assert_eq!(tagged.as_array().unwrap().len(), sample_dataset().len());

    let stats = core.get_system_stats().cache;
    assert_eq!(stats.fallback_hits, 2);
    assert_eq!(stats.hits, 1);
    assert!(core.cache_get("weather:today", &untracked()).await.is_none());
}

#[tokio::test]
async fn test_fallback_can_be_skipped() {
    let core = test_core(SwitchableLoader::new(LoaderMode::Healthy), None);
    core.initialize().await;

    let skip = CacheOptions {
        skip_fallback: true,
        no_preload: true,
        ..Default::default()
    };
    assert!(core.cache_get("record:hablar", &skip).await.is_none());

    let l1_only = CacheOptions::tiers([CacheTier::L1]);
    assert!(core.cache_get("record:hablar", &l1_only).await.is_none());
    assert_eq!(core.get_system_stats().cache.fallback_hits, 0);
}

#[tokio::test]
async fn test_broken_tier_is_bypassed_once_its_breaker_opens() {
    let broken = BrokenCache::new();
    let core = ResilientCore::builder(SwitchableLoader::new(LoaderMode::Healthy))
        .config(CoreConfig::testing())
        .cache("redis", broken.clone(), CacheTier::L2, 0)
        .build()
        .unwrap();
    core.initialize().await;

    for record in sample_dataset() {
        let key = format!("record:{}", record.id);
        let value = core.cache_get(&key, &untracked()).await.unwrap();
        assert_eq!(value["id"], record.id.as_str());
    }
    assert_eq!(core.cache().open_breakers(), 1);

    let calls = broken.calls.load(Ordering::SeqCst);
    for record in sample_dataset() {
        let key = format!("record:{}", record.id);
        assert!(core.cache_get(&key, &untracked()).await.is_some());
    }
    assert!(core.cache_set("greeting", json!("hola"), &untracked()).await);
    assert_eq!(broken.calls.load(Ordering::SeqCst), calls);

    // Half-open probe after the breaker timeout fails and reopens it.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(core.cache_get("records", &untracked()).await.is_some());
    assert_eq!(broken.calls.load(Ordering::SeqCst), calls + 1);
    assert_eq!(core.cache().open_breakers(), 1);
}

#[tokio::test]
async fn test_refresh_drops_stale_dataset_entries() {
    let core = test_core(SwitchableLoader::new(LoaderMode::Healthy), None);
    core.initialize().await;

    assert!(core.cache_set("record:hablar", json!("stale"), &untracked()).await);
    assert_eq!(
        core.cache_get("record:hablar", &untracked()).await,
        Some(json!("stale"))
    );

    core.force_refresh().await.unwrap();
    let fresh = core.cache_get("record:hablar", &untracked()).await.unwrap();
    assert_eq!(fresh["id"], "hablar");
}

#[tokio::test]
async fn test_memory_pressure_limits_writes_to_l1() {
    let core = ResilientCore::builder(SwitchableLoader::new(LoaderMode::Healthy))
        .config(CoreConfig::testing())
        .cache("shared", Arc::new(MemoryCache::new(64)), CacheTier::L2, 0)
        .build()
        .unwrap();
    core.initialize().await;

    assert!(core.cache_set("before", json!(1), &untracked()).await);
    core.cache().handle_memory_pressure().await;
    assert!(core.cache().is_under_memory_pressure());

    let l2_only = CacheOptions {
        tiers: Some(vec![CacheTier::L2]),
        skip_fallback: true,
        no_preload: true,
        ..Default::default()
    };
    assert!(core.cache_get("before", &l2_only).await.is_none());

    assert!(core.cache_set("after", json!(2), &untracked()).await);
    assert!(core.cache_get("after", &l2_only).await.is_none());
    assert_eq!(core.cache_get("after", &untracked()).await, Some(json!(2)));
}
