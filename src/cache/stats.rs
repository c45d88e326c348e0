use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Exponentially weighted moving average of response times.
#[derive(Debug)]
pub struct ResponseTimeAverage {
    alpha: f64,
    micros: Mutex<Option<f64>>,
}

impl ResponseTimeAverage {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            micros: Mutex::new(None),
        }
    }

    /// `avg = avg * (1 - alpha) + sample * alpha`; the first sample seeds it.
    pub fn record(&self, sample: Duration) {
        let sample = sample.as_secs_f64() * 1_000_000.0;
        let mut avg = self.micros.lock();
        *avg = Some(match *avg {
            Some(current) => current * (1.0 - self.alpha) + sample * self.alpha,
            None => sample,
        });
    }

    pub fn micros(&self) -> f64 {
        self.micros.lock().unwrap_or(0.0)
    }

    pub fn reset(&self) {
        *self.micros.lock() = None;
    }
}

pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub errors: AtomicU64,
    pub sets: AtomicU64,
    pub skipped: AtomicU64,
    pub response_time: ResponseTimeAverage,
}

impl CacheStats {
    pub fn new(alpha: f64) -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            response_time: ResponseTimeAverage::new(alpha),
        }
    }

    pub fn record_hit(&self, elapsed: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.response_time.record(elapsed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let total = hits + self.misses.load(Ordering::Relaxed) as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }

    /// Errors over all operations that reached the store.
    pub fn error_rate(&self) -> f64 {
        let errors = self.errors.load(Ordering::Relaxed) as f64;
        let total = errors + self.operations() as f64;
        if total > 0.0 {
            errors / total
        } else {
            0.0
        }
    }

    /// Successful operations.
    pub fn operations(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
            + self.misses.load(Ordering::Relaxed)
            + self.sets.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.response_time.reset();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub name: String,
    pub tier: super::CacheTier,
    pub priority: u32,
    pub enabled: bool,
    pub breaker: crate::circuit_breaker::CircuitState,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub sets: u64,
    pub skipped: u64,
    pub hit_rate: f64,
    pub error_rate: f64,
    pub avg_response_us: f64,
    pub entries: usize,
    pub approx_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ewma_weights_new_samples() {
        let avg = ResponseTimeAverage::new(0.1);
        avg.record(Duration::from_micros(100));
        assert!((avg.micros() - 100.0).abs() < 1e-6);
        avg.record(Duration::from_micros(200));
        assert!((avg.micros() - 110.0).abs() < 1e-6);
    }

    #[test]
    fn test_rates() {
        let stats = CacheStats::new(0.1);
        assert_eq!(stats.hit_rate(), 0.0);
        stats.record_hit(Duration::from_micros(5));
        stats.record_miss();
        stats.record_error();
        stats.record_set();
        assert!((stats.hit_rate() - 0.5).abs() < 1e-9);
        assert!((stats.error_rate() - 0.25).abs() < 1e-9);
        stats.reset();
        assert_eq!(stats.operations(), 0);
    }
}
