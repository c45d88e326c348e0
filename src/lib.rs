//! Resilience core for serving a structured reference dataset.
//!
//! Five cooperating components keep the dataset available and correct:
//! multi-layer redundant storage with an emergency layer that cannot fail,
//! integrity validation and healing, a tiered cache orchestrator, automatic
//! error recovery with escalation, and periodic health monitoring with
//! alerting. [`ResilientCore`] wires them together.
//!
//! ```no_run
//! use resilient_dataset::{CacheOptions, CoreConfig, JsonFileLoader, ResilientCore};
//! use std::sync::Arc;
//!
//! # async fn run() -> resilient_dataset::Result<()> {
//! let core = ResilientCore::builder(Arc::new(JsonFileLoader::new("dataset.json")))
//!     .config(CoreConfig::production())
//!     .build()?;
//! core.initialize().await;
//! core.start();
//!
//! let records = core.get_all_records();
//! let cached = core.cache_get("records", &CacheOptions::default()).await;
//! # let _ = (records, cached);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod integrity;
pub mod logging;
pub mod monitoring;
pub mod record;
pub mod recovery;
pub mod redundancy;
pub mod service;
pub mod utils;

pub use cache::{
    CacheHealth, CacheOptions, CacheOrchestrator, CacheStore, CacheStrategy, CacheTier,
    MemoryCache, StoreCache,
};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use config::CoreConfig;
pub use error::{Error, Result};
pub use integrity::{IntegrityGuard, ValidationLevel, ValidationResult};
pub use logging::{init_from_config, init_logging, LoggingConfig};
pub use monitoring::{
    AlertSeverity, AlertType, CheckType, HealthMonitor, HealthReport, HealthStatus, MemoryProbe,
    Subscription,
};
pub use record::{LeafEntry, Record, SubGroup};
pub use recovery::{
    AutoRecovery, ContextKind, ErrorCategory, ErrorContext, RecoveryOutcome, RecoveryStrategy,
    Severity, SystemState,
};
pub use redundancy::{
    DatasetLoader, FnLoader, JsonFileLoader, JsonFileStore, LayerKind, MemoryStore,
    PersistentStore, RedundancyHealth, RedundancyManager,
};
pub use service::{ResilientCore, ResilientCoreBuilder, SystemHealth, SystemStats};
