//! Directional trend detection over consecutive full reports.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Rising,
    Falling,
    Flat,
}

/// Numeric metrics compared between reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendSample {
    pub recovery_ms: f64,
    pub memory_percent: f64,
    pub recent_errors: f64,
    pub cache_hit_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendAnalysis {
    pub recovery_time: Trend,
    pub memory: Trend,
    pub errors: Trend,
    pub cache_hit_rate: Trend,
}

impl TrendAnalysis {
    /// Rising memory or recovery time while the hit rate falls.
    pub fn predicts_degradation(&self) -> bool {
        (self.memory == Trend::Rising || self.recovery_time == Trend::Rising)
            && self.cache_hit_rate == Trend::Falling
    }
}

/// A metric trends when it moves the same way across a strict majority of
/// consecutive pairs.
pub fn direction(values: &[f64]) -> Trend {
    let pairs = values.len().saturating_sub(1);
    if pairs == 0 {
        return Trend::Flat;
    }
    let (mut up, mut down) = (0, 0);
    for pair in values.windows(2) {
        if pair[1] > pair[0] {
            up += 1;
        } else if pair[1] < pair[0] {
            down += 1;
        }
    }
    if up * 2 > pairs {
        Trend::Rising
    } else if down * 2 > pairs {
        Trend::Falling
    } else {
        Trend::Flat
    }
}

/// Analyze samples ordered oldest first. Needs at least `min_samples`.
pub fn analyze(samples: &[TrendSample], min_samples: usize) -> Option<TrendAnalysis> {
    if samples.len() < min_samples.max(2) {
        return None;
    }
    let series = |f: fn(&TrendSample) -> f64| samples.iter().map(f).collect::<Vec<_>>();
    Some(TrendAnalysis {
        recovery_time: direction(&series(|s| s.recovery_ms)),
        memory: direction(&series(|s| s.memory_percent)),
        errors: direction(&series(|s| s.recent_errors)),
        cache_hit_rate: direction(&series(|s| s.cache_hit_rate)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(memory: f64, hit_rate: f64) -> TrendSample {
        TrendSample {
            memory_percent: memory,
            cache_hit_rate: hit_rate,
            ..Default::default()
        }
    }

    #[test]
    fn test_direction_majority() {
        assert_eq!(direction(&[1.0, 2.0, 3.0]), Trend::Rising);
        assert_eq!(direction(&[3.0, 2.0, 1.0]), Trend::Falling);
        assert_eq!(direction(&[1.0, 2.0, 1.0]), Trend::Flat);
        assert_eq!(direction(&[1.0, 2.0, 2.0]), Trend::Flat);
        assert_eq!(direction(&[1.0]), Trend::Flat);
    }

    #[test]
    fn test_predictive_combination() {
        let samples = [sample(40.0, 0.9), sample(45.0, 0.8), sample(48.0, 0.7)];
        let analysis = analyze(&samples, 3).unwrap();
        assert!(analysis.predicts_degradation());

        let steady = [sample(40.0, 0.9), sample(45.0, 0.9), sample(48.0, 0.9)];
        assert!(!analyze(&steady, 3).unwrap().predicts_degradation());
        assert!(analyze(&samples[..2], 3).is_none());
    }
}
