//! Error classification.
//!
//! Typed errors are mapped structurally first. Everything else goes through
//! a table of message and context patterns; the most confident match wins.

use super::{ErrorCategory, ErrorContext, RecoveryStrategy, Severity};
use crate::error::Error;
use serde::Serialize;
use std::sync::Arc;

/// Confidence assigned to structurally classified errors.
pub const STRUCTURED_CONFIDENCE: f64 = 0.95;

/// Confidence of the fallback classification.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub confidence: f64,
    pub suggested: RecoveryStrategy,
}

impl Classification {
    pub fn new(
        category: ErrorCategory,
        severity: Severity,
        confidence: f64,
        suggested: RecoveryStrategy,
    ) -> Self {
        Self {
            category,
            severity,
            confidence,
            suggested,
        }
    }

    fn for_category(category: ErrorCategory, confidence: f64) -> Self {
        Self::new(
            category,
            category.default_severity(),
            confidence,
            category.default_strategy(),
        )
    }

    pub fn fallback() -> Self {
        Self::new(
            ErrorCategory::PerformanceDegradation,
            Severity::Medium,
            DEFAULT_CONFIDENCE,
            RecoveryStrategy::GracefulDegradation,
        )
    }
}

pub type ClassifierFn =
    Arc<dyn Fn(&Error, &ErrorContext) -> Option<Classification> + Send + Sync>;

struct PatternRule {
    name: &'static str,
    needles: &'static [&'static str],
    category: ErrorCategory,
    confidence: f64,
}

const PATTERNS: &[PatternRule] = &[
    PatternRule {
        name: "corruption",
        needles: &["corrupt", "checksum", "malformed", "invalid json", "unexpected token"],
        category: ErrorCategory::DataCorruption,
        confidence: 0.85,
    },
    PatternRule {
        name: "memory",
        needles: &["out of memory", "memory", "heap", "allocation"],
        category: ErrorCategory::MemoryPressure,
        confidence: 0.8,
    },
    PatternRule {
        name: "cache",
        needles: &["cache", "evict"],
        category: ErrorCategory::CacheFailure,
        confidence: 0.75,
    },
    PatternRule {
        name: "network",
        needles: &["network", "timeout", "timed out", "connection", "fetch", "unreachable"],
        category: ErrorCategory::NetworkFailure,
        confidence: 0.75,
    },
    PatternRule {
        name: "initialization",
        needles: &["initializ", "not loaded", "failed to load", "startup"],
        category: ErrorCategory::InitializationFailure,
        confidence: 0.7,
    },
    PatternRule {
        name: "validation",
        needles: &["validation", "invalid", "missing field", "duplicate"],
        category: ErrorCategory::ValidationFailure,
        confidence: 0.65,
    },
    PatternRule {
        name: "overload",
        needles: &["overload", "too many", "queue full", "rate limit"],
        category: ErrorCategory::SystemOverload,
        confidence: 0.7,
    },
    PatternRule {
        name: "performance",
        needles: &["slow", "latency", "performance", "response time"],
        category: ErrorCategory::PerformanceDegradation,
        confidence: 0.6,
    },
];

/// Components named in an error context imply a category when nothing in
/// the message does.
fn component_category(component: &str) -> Option<ErrorCategory> {
    match component {
        "cache" | "cache_performance" => Some(ErrorCategory::CacheFailure),
        "integrity" | "data_integrity" => Some(ErrorCategory::ValidationFailure),
        "redundancy" | "redundancy_status" => Some(ErrorCategory::InitializationFailure),
        "memory" => Some(ErrorCategory::MemoryPressure),
        "performance" | "performance_metrics" => Some(ErrorCategory::PerformanceDegradation),
        "error_rates" | "system_overview" => Some(ErrorCategory::SystemOverload),
        _ => None,
    }
}

#[derive(Default)]
pub struct ErrorClassifier {
    custom: Vec<(String, ClassifierFn)>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a classifier consulted alongside the built-in table.
    pub fn register(&mut self, name: impl Into<String>, classifier: ClassifierFn) {
        self.custom.push((name.into(), classifier));
    }

    pub fn custom_count(&self) -> usize {
        self.custom.len()
    }

    pub fn classify(&self, error: &Error, context: &ErrorContext) -> Classification {
        let mut best: Option<Classification> = error
            .category_hint()
            .map(|c| Classification::for_category(c, STRUCTURED_CONFIDENCE));

        let message = error.to_string().to_lowercase();
        for rule in PATTERNS {
            if rule.needles.iter().any(|n| message.contains(n)) {
                consider(&mut best, Classification::for_category(rule.category, rule.confidence));
                tracing::trace!(rule = rule.name, "Classifier pattern matched");
            }
        }

        if let Some(category) = context.component.as_deref().and_then(component_category) {
            consider(&mut best, Classification::for_category(category, 0.6));
        }

        for (name, classifier) in &self.custom {
            if let Some(candidate) = classifier(error, context) {
                tracing::trace!(classifier = %name, "Custom classifier matched");
                consider(&mut best, candidate);
            }
        }

        let mut classification = best.unwrap_or_else(Classification::fallback);
        if let Some(severity) = context.severity {
            classification.severity = classification.severity.max(severity);
        }
        classification
    }
}

fn consider(best: &mut Option<Classification>, candidate: Classification) {
    match best {
        Some(current) if current.confidence >= candidate.confidence => {}
        _ => *best = Some(candidate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::ContextKind;

    fn ctx() -> ErrorContext {
        ErrorContext::new(ContextKind::Operation)
    }

    #[test]
    fn test_structured_hint_wins() {
        let classifier = ErrorClassifier::new();
        let c = classifier.classify(&Error::Network("timeout".into()), &ctx());
        assert_eq!(c.category, ErrorCategory::NetworkFailure);
        assert_eq!(c.confidence, STRUCTURED_CONFIDENCE);
    }

    #[test]
    fn test_message_patterns() {
        let classifier = ErrorClassifier::new();
        let c = classifier.classify(&Error::Generic("allocator: out of memory".into()), &ctx());
        assert_eq!(c.category, ErrorCategory::MemoryPressure);
        assert_eq!(c.suggested, RecoveryStrategy::MemoryCleanup);

        let c = classifier.classify(&Error::Generic("checksum mismatch".into()), &ctx());
        assert_eq!(c.category, ErrorCategory::DataCorruption);
    }

    #[test]
    fn test_unmatched_uses_default() {
        let classifier = ErrorClassifier::new();
        let c = classifier.classify(&Error::Generic("something odd".into()), &ctx());
        assert_eq!(c, Classification::fallback());
    }

    #[test]
    fn test_context_component_and_severity() {
        let classifier = ErrorClassifier::new();
        let context = ErrorContext::new(ContextKind::HealthAlert)
            .component("cache_performance")
            .severity(Severity::Critical);
        let c = classifier.classify(&Error::HealthAlert("hit rate low".into()), &context);
        assert_eq!(c.category, ErrorCategory::CacheFailure);
        assert_eq!(c.severity, Severity::Critical);
    }

    #[test]
    fn test_custom_classifier_competes_on_confidence() {
        let mut classifier = ErrorClassifier::new();
        classifier.register(
            "quota",
            Arc::new(|error: &Error, _: &ErrorContext| {
                error.to_string().contains("quota").then(|| {
                    Classification::new(
                        ErrorCategory::SystemOverload,
                        Severity::High,
                        0.99,
                        RecoveryStrategy::GracefulDegradation,
                    )
                })
            }),
        );
        let c = classifier.classify(&Error::Network("quota exceeded".into()), &ctx());
        assert_eq!(c.category, ErrorCategory::SystemOverload);
        assert_eq!(classifier.custom_count(), 1);
    }
}
