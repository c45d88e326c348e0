//! Recovery strategy execution against the managed components.

use super::{Classification, ErrorCategory, ErrorContext, RecoveryStrategy};
use crate::cache::{CacheOrchestrator, CacheOptions, CacheStrategy};
use crate::error::{Error, Result};
use crate::integrity::IntegrityGuard;
use crate::redundancy::RedundancyManager;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// A pluggable replacement for one of the built-in strategies.
///
/// `Ok(false)` reports an ordinary failure. `Err` signals that recovery
/// itself broke and triggers emergency escalation.
#[async_trait]
pub trait StrategyHandler: Send + Sync {
    async fn execute(&self, classification: &Classification, context: &ErrorContext) -> Result<bool>;
}

/// The components recovery acts on.
#[derive(Clone)]
pub struct Components {
    pub integrity: Arc<IntegrityGuard>,
    pub redundancy: Arc<RedundancyManager>,
    pub cache: Arc<CacheOrchestrator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Integrity,
    Redundancy,
    Cache,
}

impl Target {
    fn resolve(category: ErrorCategory, context: &ErrorContext) -> Self {
        match context.component.as_deref() {
            Some(c) if c.contains("integrity") => return Target::Integrity,
            Some(c) if c.contains("redundancy") || c.contains("loader") => return Target::Redundancy,
            Some(c) if c.contains("cache") => return Target::Cache,
            _ => {}
        }
        match category {
            ErrorCategory::DataCorruption | ErrorCategory::ValidationFailure => Target::Integrity,
            ErrorCategory::NetworkFailure | ErrorCategory::InitializationFailure => Target::Redundancy,
            ErrorCategory::CacheFailure
            | ErrorCategory::MemoryPressure
            | ErrorCategory::PerformanceDegradation
            | ErrorCategory::SystemOverload => Target::Cache,
        }
    }
}

impl Components {
    pub(super) async fn execute(
        &self,
        strategy: RecoveryStrategy,
        classification: &Classification,
        context: &ErrorContext,
    ) -> Result<bool> {
        match strategy {
            RecoveryStrategy::RestartComponent => {
                self.restart_component(Target::resolve(classification.category, context))
                    .await
            }
            RecoveryStrategy::CacheRebuild => {
                let invalidated = self.cache.invalidate("*", &CacheOptions::default()).await;
                let rebuilt = self.cache.reinitialize().await;
                if let Err(e) = &rebuilt {
                    warn!(error = %e, "Cache rebuild incomplete");
                }
                Ok(invalidated && rebuilt.is_ok())
            }
            RecoveryStrategy::FallbackData => {
                let layer = self.redundancy.force_next_layer();
                info!(layer = %layer, "Serving from fallback layer");
                Ok(true)
            }
            RecoveryStrategy::MemoryCleanup => {
                self.cache.handle_memory_pressure().await;
                self.integrity.clear_cache();
                Ok(true)
            }
            RecoveryStrategy::GracefulDegradation => {
                self.cache.set_strategy(CacheStrategy::Conservative);
                Ok(true)
            }
            RecoveryStrategy::EmergencyMode => {
                self.activate_emergency_mode();
                Ok(true)
            }
            RecoveryStrategy::SystemRestart => {
                self.restart_all().await?;
                Ok(true)
            }
        }
    }

    async fn restart_component(&self, target: Target) -> Result<bool> {
        info!(component = ?target, "Restarting component");
        match target {
            Target::Integrity => {
                self.integrity.reinitialize();
                Ok(true)
            }
            Target::Redundancy => match self.redundancy.reinitialize().await {
                Ok(_) => Ok(true),
                Err(e) => {
                    warn!(error = %e, "Redundancy restart left only the emergency layer");
                    Ok(false)
                }
            },
            Target::Cache => match self.cache.reinitialize().await {
                Ok(()) => Ok(true),
                Err(e) => {
                    warn!(error = %e, "Cache restart failed");
                    Ok(false)
                }
            },
        }
    }

    pub(super) fn activate_emergency_mode(&self) {
        self.cache.enter_emergency_mode();
        self.redundancy.force_emergency();
    }

    /// Restart integrity, then redundancy, then cache. Stops at the first
    /// component that cannot come back.
    pub(super) async fn restart_all(&self) -> Result<()> {
        self.integrity.reinitialize();
        self.redundancy
            .reinitialize()
            .await
            .map_err(|e| Error::Recovery(format!("redundancy restart failed: {}", e)))?;
        self.cache
            .reinitialize()
            .await
            .map_err(|e| Error::Recovery(format!("cache restart failed: {}", e)))?;
        info!("All components restarted");
        Ok(())
    }
}
