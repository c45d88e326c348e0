//! Access-pattern tally and the background preload queue.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// How eagerly related keys are preloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheStrategy {
    Aggressive,
    Balanced,
    Conservative,
    Emergency,
}

impl CacheStrategy {
    /// Repetitions of an access pattern before its neighbours are preloaded.
    pub fn preload_threshold(&self) -> Option<u32> {
        match self {
            CacheStrategy::Aggressive => Some(2),
            CacheStrategy::Balanced => Some(3),
            CacheStrategy::Conservative => Some(5),
            CacheStrategy::Emergency => None,
        }
    }

    pub fn batch_size(&self) -> usize {
        match self {
            CacheStrategy::Aggressive => 10,
            CacheStrategy::Balanced => 5,
            CacheStrategy::Conservative => 2,
            CacheStrategy::Emergency => 0,
        }
    }

    /// One step more cautious.
    pub fn reduce(&self) -> Self {
        match self {
            CacheStrategy::Aggressive => CacheStrategy::Balanced,
            CacheStrategy::Balanced => CacheStrategy::Conservative,
            CacheStrategy::Conservative | CacheStrategy::Emergency => CacheStrategy::Emergency,
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheStrategy::Aggressive => "aggressive",
            CacheStrategy::Balanced => "balanced",
            CacheStrategy::Conservative => "conservative",
            CacheStrategy::Emergency => "emergency",
        };
        f.write_str(name)
    }
}

impl FromStr for CacheStrategy {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aggressive" => Ok(CacheStrategy::Aggressive),
            "balanced" => Ok(CacheStrategy::Balanced),
            "conservative" => Ok(CacheStrategy::Conservative),
            "emergency" => Ok(CacheStrategy::Emergency),
            other => Err(crate::error::Error::Config(format!(
                "unknown cache strategy '{}'",
                other
            ))),
        }
    }
}

/// Text before the last `:`; keys without one have no namespace.
pub fn namespace(key: &str) -> Option<&str> {
    key.rfind(':').map(|i| &key[..i])
}

pub struct AccessTracker {
    patterns: DashMap<String, u32>,
    seen: DashMap<String, ()>,
    queue: Mutex<VecDeque<String>>,
    max_tracked: usize,
    max_queue: usize,
}

impl AccessTracker {
    pub fn new(max_tracked: usize, max_queue: usize) -> Self {
        Self {
            patterns: DashMap::new(),
            seen: DashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            max_tracked: max_tracked.max(1),
            max_queue: max_queue.max(1),
        }
    }

    /// Tally one access. Returns the keys queued for preloading, if the
    /// pattern just crossed `threshold`.
    pub fn record(&self, key: &str, signature: &str, threshold: Option<u32>) -> Vec<String> {
        if self.seen.len() >= self.max_tracked && !self.seen.contains_key(key) {
            self.seen.clear();
            self.patterns.clear();
        }
        self.seen.insert(key.to_string(), ());

        let count = {
            let mut count = self.patterns.entry(format!("{}|{}", key, signature)).or_insert(0);
            *count += 1;
            *count
        };

        match threshold {
            Some(threshold) if count == threshold => self.enqueue_related(key),
            _ => Vec::new(),
        }
    }

    fn enqueue_related(&self, key: &str) -> Vec<String> {
        let Some(ns) = namespace(key) else {
            return Vec::new();
        };
        let related: Vec<String> = self
            .seen
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k != key && namespace(k) == Some(ns))
            .collect();

        let mut queue = self.queue.lock();
        let mut queued = Vec::new();
        for candidate in related {
            if queue.len() >= self.max_queue {
                break;
            }
            if !queue.contains(&candidate) {
                queue.push_back(candidate.clone());
                queued.push(candidate);
            }
        }
        queued
    }

    pub fn next_batch(&self, size: usize) -> Vec<String> {
        let mut queue = self.queue.lock();
        let take = size.min(queue.len());
        queue.drain(..take).collect()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn clear_queue(&self) -> usize {
        let mut queue = self.queue.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    pub fn forget(&self, pattern: &super::store::KeyPattern) {
        self.queue.lock().retain(|k| !pattern.matches(k));
    }

    pub fn tracked_patterns(&self) -> usize {
        self.patterns.len()
    }

    pub fn reset(&self) {
        self.patterns.clear();
        self.seen.clear();
        self.clear_queue();
    }
}
