use crate::record::RecordSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityConfig {
    /// Validation level used when callers do not ask for one
    pub level: ValidationLevel,

    /// Attempt healing automatically when validating datasets for serving
    pub auto_heal: bool,

    /// Freshness window for cached validation results
    pub cache_ttl: Duration,

    /// Maximum cached validation results before the oldest are dropped
    pub max_cached_results: usize,

    /// Retained validation results and healing attempts
    pub history_size: usize,

    /// Enumerated vocabularies for content checks
    pub schema: RecordSchema,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            level: ValidationLevel::Standard,
            auto_heal: true,
            cache_ttl: Duration::from_secs(300),
            max_cached_results: 10_000,
            history_size: 100,
            schema: RecordSchema::default(),
        }
    }
}

impl IntegrityConfig {
    /// Balanced validation for serving traffic
    pub fn production() -> Self {
        Self {
            level: ValidationLevel::Standard,
            schema: RecordSchema::lexical(),
            ..Default::default()
        }
    }

    /// Maximum validation
    pub fn development() -> Self {
        Self {
            level: ValidationLevel::Strict,
            cache_ttl: Duration::from_secs(30),
            schema: RecordSchema::lexical(),
            ..Default::default()
        }
    }

    pub fn testing() -> Self {
        Self {
            level: ValidationLevel::Standard,
            max_cached_results: 256,
            history_size: 32,
            ..Default::default()
        }
    }
}

/// Cumulative validation levels. Running a level runs every rule of that
/// level and below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValidationLevel {
    /// Structure and required fields
    Basic,
    /// Enumerated values and duplicate forms
    Standard,
    /// Cross-field linguistic checks (character set, whitespace)
    Comprehensive,
    /// Cross-record reference checks
    Strict,
}

impl ValidationLevel {
    pub const ALL: [ValidationLevel; 4] = [
        ValidationLevel::Basic,
        ValidationLevel::Standard,
        ValidationLevel::Comprehensive,
        ValidationLevel::Strict,
    ];

    pub fn includes(&self, other: ValidationLevel) -> bool {
        other <= *self
    }

    pub fn includes_reference_validation(&self) -> bool {
        *self >= ValidationLevel::Strict
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationLevel::Basic => "basic",
            ValidationLevel::Standard => "standard",
            ValidationLevel::Comprehensive => "comprehensive",
            ValidationLevel::Strict => "strict",
        };
        f.write_str(name)
    }
}

impl FromStr for ValidationLevel {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(ValidationLevel::Basic),
            "standard" => Ok(ValidationLevel::Standard),
            "comprehensive" => Ok(ValidationLevel::Comprehensive),
            "strict" => Ok(ValidationLevel::Strict),
            other => Err(crate::error::Error::Config(format!(
                "unknown validation level '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_cumulative() {
        assert!(ValidationLevel::Strict.includes(ValidationLevel::Basic));
        assert!(ValidationLevel::Standard.includes(ValidationLevel::Standard));
        assert!(!ValidationLevel::Standard.includes(ValidationLevel::Comprehensive));
        assert!(ValidationLevel::Strict.includes_reference_validation());
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(
            "Comprehensive".parse::<ValidationLevel>().unwrap(),
            ValidationLevel::Comprehensive
        );
        assert!("paranoid".parse::<ValidationLevel>().is_err());
        for level in ValidationLevel::ALL {
            assert_eq!(level.to_string().parse::<ValidationLevel>().unwrap(), level);
        }
    }
}
