use crate::cache::CacheOrchestrator;
use crate::redundancy::RedundancyManager;
use std::sync::Arc;

/// Source of the memory percentage used by health checks.
pub trait MemoryProbe: Send + Sync {
    /// Current usage as a percentage of the available budget.
    fn memory_percent(&self) -> f64;
}

/// Estimates usage from cache footprints plus the served dataset against a
/// fixed byte budget.
pub struct EstimatedMemoryProbe {
    cache: Arc<CacheOrchestrator>,
    redundancy: Arc<RedundancyManager>,
    budget_bytes: usize,
}

impl EstimatedMemoryProbe {
    pub fn new(
        cache: Arc<CacheOrchestrator>,
        redundancy: Arc<RedundancyManager>,
        budget_bytes: usize,
    ) -> Self {
        Self {
            cache,
            redundancy,
            budget_bytes: budget_bytes.max(1),
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.cache.estimated_bytes() + self.redundancy.dataset_bytes()
    }
}

impl MemoryProbe for EstimatedMemoryProbe {
    fn memory_percent(&self) -> f64 {
        (self.used_bytes() as f64 / self.budget_bytes as f64 * 100.0).min(100.0)
    }
}
