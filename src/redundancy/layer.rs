use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Fallback layers, in serving priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    Primary,
    Secondary,
    Tertiary,
    Emergency,
}

impl LayerKind {
    pub const ORDER: [LayerKind; 4] = [
        LayerKind::Primary,
        LayerKind::Secondary,
        LayerKind::Tertiary,
        LayerKind::Emergency,
    ];

    /// Layers that can fail; the emergency layer cannot.
    pub const FALLIBLE: [LayerKind; 3] = [LayerKind::Primary, LayerKind::Secondary, LayerKind::Tertiary];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayerKind::Primary => "primary",
            LayerKind::Secondary => "secondary",
            LayerKind::Tertiary => "tertiary",
            LayerKind::Emergency => "emergency",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RedundancyHealth {
    Healthy,
    Degraded,
    Critical,
    Emergency,
}

impl RedundancyHealth {
    pub fn from_healthy_layers(count: usize) -> Self {
        match count {
            0 => RedundancyHealth::Emergency,
            1 => RedundancyHealth::Critical,
            2 => RedundancyHealth::Degraded,
            _ => RedundancyHealth::Healthy,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Layer {
    pub kind: LayerKind,
    pub records: Arc<Vec<Record>>,
    pub healthy: bool,
    pub last_updated: Option<SystemTime>,
    pub failures: u32,
    pub last_error: Option<String>,
}

impl Layer {
    pub fn empty(kind: LayerKind) -> Self {
        Self {
            kind,
            records: Arc::new(Vec::new()),
            healthy: false,
            last_updated: None,
            failures: 0,
            last_error: None,
        }
    }

    pub fn populate(&mut self, records: Arc<Vec<Record>>) {
        self.records = records;
        self.healthy = true;
        self.last_updated = Some(SystemTime::now());
        self.last_error = None;
    }

    /// Keeps the data; only the health flag changes.
    pub fn mark_unhealthy(&mut self, reason: impl Into<String>) {
        self.healthy = false;
        self.failures += 1;
        self.last_error = Some(reason.into());
    }

    pub fn stats(&self) -> LayerStats {
        LayerStats {
            kind: self.kind,
            healthy: self.healthy,
            records: self.records.len(),
            failures: self.failures,
            last_updated: self.last_updated,
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerStats {
    pub kind: LayerKind,
    pub healthy: bool,
    pub records: usize,
    pub failures: u32,
    pub last_updated: Option<SystemTime>,
    pub last_error: Option<String>,
}

/// All four layers plus the one currently serving.
#[derive(Debug)]
pub(crate) struct LayerTable {
    layers: [Layer; 4],
    pub current: LayerKind,
}

impl LayerTable {
    pub fn new(emergency: Vec<Record>) -> Self {
        let mut emergency_layer = Layer::empty(LayerKind::Emergency);
        emergency_layer.populate(Arc::new(emergency));
        Self {
            layers: [
                Layer::empty(LayerKind::Primary),
                Layer::empty(LayerKind::Secondary),
                Layer::empty(LayerKind::Tertiary),
                emergency_layer,
            ],
            current: LayerKind::Emergency,
        }
    }

    pub fn get(&self, kind: LayerKind) -> &Layer {
        &self.layers[kind.index()]
    }

    pub fn get_mut(&mut self, kind: LayerKind) -> &mut Layer {
        &mut self.layers[kind.index()]
    }

    pub fn healthy_count(&self) -> usize {
        LayerKind::FALLIBLE
            .iter()
            .filter(|k| self.get(**k).healthy)
            .count()
    }

    pub fn health(&self) -> RedundancyHealth {
        RedundancyHealth::from_healthy_layers(self.healthy_count())
    }

    /// First healthy fallible layer in priority order.
    pub fn best_healthy(&self) -> Option<LayerKind> {
        LayerKind::FALLIBLE
            .iter()
            .copied()
            .find(|k| self.get(*k).healthy)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_counts_fallible_layers() {
        assert_eq!(RedundancyHealth::from_healthy_layers(3), RedundancyHealth::Healthy);
        assert_eq!(RedundancyHealth::from_healthy_layers(2), RedundancyHealth::Degraded);
        assert_eq!(RedundancyHealth::from_healthy_layers(1), RedundancyHealth::Critical);
        assert_eq!(RedundancyHealth::from_healthy_layers(0), RedundancyHealth::Emergency);
    }

    #[test]
    fn test_fresh_table_serves_emergency() {
        let table = LayerTable::new(vec![]);
        assert_eq!(table.current, LayerKind::Emergency);
        assert!(table.get(LayerKind::Emergency).healthy);
        assert_eq!(table.health(), RedundancyHealth::Emergency);
        assert_eq!(table.best_healthy(), None);
    }
}
