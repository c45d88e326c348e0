//! Aggregate configuration for every component.

use crate::cache::{CacheConfig, CacheStrategy};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{Error, Result};
use crate::integrity::{IntegrityConfig, ValidationLevel};
use crate::logging::LoggingConfig;
use crate::monitoring::HealthCheckConfig;
use crate::recovery::RecoveryConfig;
use crate::redundancy::RedundancyConfig;
use crate::utils::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub redundancy: RedundancyConfig,
    pub integrity: IntegrityConfig,
    pub cache: CacheConfig,
    pub recovery: RecoveryConfig,
    pub health: HealthCheckConfig,
    pub logging: LoggingConfig,
}

impl CoreConfig {
    pub fn production() -> Self {
        let mut config = Self {
            integrity: IntegrityConfig::production(),
            ..Default::default()
        };
        config.logging.json = true;
        config
    }

    pub fn development() -> Self {
        let mut config = Self {
            integrity: IntegrityConfig::development(),
            ..Default::default()
        };
        config.logging.level = "debug".to_string();
        config.health.full_interval = Duration::from_secs(30);
        config.health.quick_interval = Duration::from_secs(10);
        config
    }

    /// Short intervals and timeouts so background behavior shows up quickly.
    pub fn testing() -> Self {
        let breaker = CircuitBreakerConfig {
            failure_threshold: 5,
            timeout: Duration::from_millis(200),
        };
        let mut config = Self {
            integrity: IntegrityConfig::testing(),
            ..Default::default()
        };
        config.redundancy.breaker = breaker.clone();
        config.redundancy.validation_interval = Duration::from_millis(100);
        config.redundancy.recovery = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            jitter: false,
            ..Default::default()
        };
        config.cache.breaker = breaker.clone();
        config.cache.preload_interval = Duration::from_millis(50);
        config.cache.health_check_interval = Duration::from_millis(200);
        config.cache.memory_pressure_cooldown = Duration::from_millis(200);
        config.recovery.breaker = breaker;
        config.health.full_interval = Duration::from_millis(300);
        config.health.quick_interval = Duration::from_millis(100);
        config.logging.level = "debug".to_string();
        config
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid config {}: {}", path.display(), e)))
    }

    /// Apply `RESILIENT_*` environment variables on top of this config.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(level) = lookup("RESILIENT_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(json) = lookup("RESILIENT_LOG_JSON") {
            self.logging.json = match json.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(Error::Config(format!("invalid RESILIENT_LOG_JSON '{}'", other)))
                }
            };
        }

        if let Some(level) = lookup("RESILIENT_VALIDATION_LEVEL") {
            self.integrity.level = level.parse::<ValidationLevel>()?;
        }

        if let Some(strategy) = lookup("RESILIENT_CACHE_STRATEGY") {
            self.cache.strategy = strategy.parse::<CacheStrategy>()?;
        }

        if let Some(secs) = lookup("RESILIENT_HEALTH_INTERVAL_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| Error::Config(format!("invalid RESILIENT_HEALTH_INTERVAL_SECS '{}'", secs)))?;
            self.health.full_interval = Duration::from_secs(secs);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let breakers = [
            ("redundancy", &self.redundancy.breaker),
            ("cache", &self.cache.breaker),
            ("recovery", &self.recovery.breaker),
        ];
        for (name, breaker) in breakers {
            if breaker.failure_threshold == 0 {
                return Err(Error::Config(format!("{} breaker threshold must be positive", name)));
            }
        }

        if self.redundancy.sample_size == 0 {
            return Err(Error::Config("redundancy sample size must be positive".into()));
        }
        if self.integrity.max_cached_results == 0 || self.integrity.history_size == 0 {
            return Err(Error::Config("integrity capacities must be positive".into()));
        }
        if self.cache.max_tracked_keys == 0 || self.cache.max_preload_queue == 0 {
            return Err(Error::Config("cache preload capacities must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.cache.ewma_alpha) || self.cache.ewma_alpha == 0.0 {
            return Err(Error::Config("cache EWMA alpha must be in (0, 1]".into()));
        }
        if !(0.0..=1.0).contains(&self.cache.trim_fraction) {
            return Err(Error::Config("cache trim fraction must be in [0, 1]".into()));
        }
        if self.recovery.history_capacity == 0 || self.health.history_capacity == 0 {
            return Err(Error::Config("history capacities must be positive".into()));
        }
        let background = [
            ("redundancy validation", self.redundancy.validation_interval),
            ("cache preload", self.cache.preload_interval),
            ("cache health check", self.cache.health_check_interval),
        ];
        for (name, interval) in background {
            if interval.is_zero() {
                return Err(Error::Config(format!("{} interval must be positive", name)));
            }
        }
        if self.health.full_interval.is_zero() || self.health.quick_interval.is_zero() {
            return Err(Error::Config("health check intervals must be positive".into()));
        }
        if self.health.quick_interval > self.health.full_interval {
            return Err(Error::Config(
                "quick health interval must not exceed the full interval".into(),
            ));
        }
        if self.health.memory_budget_bytes == 0 {
            return Err(Error::Config("memory budget must be positive".into()));
        }
        Ok(())
    }
}
