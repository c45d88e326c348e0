//! Data Integrity Guard
//!
//! Validates records at four cumulative levels and heals healable errors
//! with re-validated, roll-back-on-regression strategies. Rule and healing
//! failures are always absorbed here; nothing in this module propagates an
//! error to the caller.

pub mod healing;
pub mod rules;
pub mod validation_config;

pub use healing::{HealingAttempt, HealingFn, HealingReport};
pub use rules::{
    ValidationCategory, ValidationCode, ValidationError, ValidationRule, ValidationSeverity,
    Violation,
};
pub use validation_config::{IntegrityConfig, ValidationLevel};

use crate::record::Record;
use crate::utils::{absorb, BoundedHistory};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};
use tracing::{debug, info, warn};

/// Per-record validation outcome
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub record_id: String,
    pub level: ValidationLevel,
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub checksum: u32,
    pub timestamp: SystemTime,
}

impl ValidationResult {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn has_code(&self, code: ValidationCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub total_errors: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub duration_us: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchValidation {
    pub valid: bool,
    pub results: Vec<ValidationResult>,
    pub summary: ValidationSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityStats {
    pub total_validations: u64,
    pub cache_hits: u64,
    pub invalid_results: u64,
    pub rule_failures: u64,
    pub healing_attempts: u64,
    pub healing_successes: u64,
    pub cached_results: usize,
    /// Fraction of invalid results among the retained recent results.
    pub recent_error_rate: f64,
    pub recent_results: usize,
}

#[derive(Debug, Default)]
struct IntegrityCounters {
    validations: AtomicU64,
    cache_hits: AtomicU64,
    invalid: AtomicU64,
    rule_failures: AtomicU64,
    healing_attempts: AtomicU64,
    healing_successes: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    id: String,
    level: ValidationLevel,
    checksum: u32,
}

struct CachedValidation {
    result: ValidationResult,
    cached_at: Instant,
}

pub struct IntegrityGuard {
    config: IntegrityConfig,
    rules: RwLock<Vec<ValidationRule>>,
    strategies: HashMap<ValidationCode, (&'static str, HealingFn)>,
    cache: DashMap<CacheKey, CachedValidation>,
    results: Mutex<BoundedHistory<ValidationResult>>,
    healing_history: Mutex<BoundedHistory<HealingAttempt>>,
    counters: IntegrityCounters,
}

impl IntegrityGuard {
    pub fn new(config: IntegrityConfig) -> Self {
        let history_size = config.history_size;
        Self {
            config,
            rules: RwLock::new(rules::default_rules()),
            strategies: healing::default_strategies(),
            cache: DashMap::new(),
            results: Mutex::new(BoundedHistory::new(history_size)),
            healing_history: Mutex::new(BoundedHistory::new(history_size)),
            counters: IntegrityCounters::default(),
        }
    }

    pub fn config(&self) -> &IntegrityConfig {
        &self.config
    }

    pub fn default_level(&self) -> ValidationLevel {
        self.config.level
    }

    /// Add a custom rule; it runs after the built-in rules of every level.
    pub fn register_rule(&self, rule: ValidationRule) {
        debug!(rule = %rule.name, level = %rule.level, "Registered validation rule");
        self.rules.write().push(rule);
    }

    pub fn validate(
        &self,
        record: &Record,
        level: ValidationLevel,
        all_records: Option<&[Record]>,
    ) -> ValidationResult {
        self.counters.validations.fetch_add(1, Ordering::Relaxed);
        let checksum = record.checksum();

        // Cross-record results depend on the rest of the dataset.
        let cacheable = !(level.includes_reference_validation() && all_records.is_some());
        let key = CacheKey {
            id: record.id.clone(),
            level,
            checksum,
        };

        if cacheable {
            if let Some(cached) = self.cache.get(&key) {
                if cached.cached_at.elapsed() < self.config.cache_ttl {
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return cached.result.clone();
                }
            }
        }

        let errors = self.run_rules(record, level, all_records);
        let result = ValidationResult {
            record_id: record.id.clone(),
            level,
            valid: errors.is_empty(),
            errors,
            checksum,
            timestamp: SystemTime::now(),
        };

        if !result.valid {
            self.counters.invalid.fetch_add(1, Ordering::Relaxed);
            debug!(
                record = %result.record_id,
                level = %level,
                errors = result.errors.len(),
                "Record failed validation"
            );
        }

        if cacheable {
            self.store_cached(key, &result);
        }
        self.results.lock().push(result.clone());
        result
    }

    pub fn validate_batch(&self, records: &[Record], level: ValidationLevel) -> BatchValidation {
        let start = Instant::now();
        let results: Vec<ValidationResult> = records
            .iter()
            .map(|r| self.validate(r, level, Some(records)))
            .collect();

        let mut summary = ValidationSummary {
            total: results.len(),
            ..Default::default()
        };
        for result in &results {
            if result.valid {
                summary.valid += 1;
            } else {
                summary.invalid += 1;
            }
            for error in &result.errors {
                summary.total_errors += 1;
                *summary
                    .by_category
                    .entry(format!("{:?}", error.category))
                    .or_default() += 1;
                *summary
                    .by_severity
                    .entry(format!("{:?}", error.severity))
                    .or_default() += 1;
            }
        }
        summary.duration_us = start.elapsed().as_micros() as u64;

        BatchValidation {
            valid: summary.invalid == 0,
            results,
            summary,
        }
    }

    pub fn heal(&self, record: &Record, result: &ValidationResult) -> HealingReport {
        self.heal_in_context(record, result, None)
    }

    /// Attempt every applicable strategy, keeping a mutation only when
    /// re-validation shows fewer errors. The input is never modified.
    pub fn heal_in_context(
        &self,
        record: &Record,
        result: &ValidationResult,
        all_records: Option<&[Record]>,
    ) -> HealingReport {
        let original_error_count = result.errors.len();
        let mut working = record.clone();
        let mut current_errors = result.errors.clone();
        let mut attempts = Vec::new();
        let mut tried = Vec::new();

        for error in &result.errors {
            if !error.is_healable() || tried.contains(&error.code) {
                continue;
            }
            tried.push(error.code);

            let Some((name, strategy)) = self.strategies.get(&error.code).copied() else {
                debug!(record = %record.id, code = %error.code, "No healing strategy registered");
                continue;
            };

            self.counters.healing_attempts.fetch_add(1, Ordering::Relaxed);
            let snapshot = working.clone();
            let errors_before = current_errors.len();

            let changed = absorb(|| strategy(&mut working, error, &self.config.schema))
            .unwrap_or_else(|_| {
                warn!(record = %record.id, strategy = name, "Healing strategy panicked");
                false
            });

            let mut attempt = HealingAttempt {
                record_id: record.id.clone(),
                code: error.code,
                rule: error.rule.clone(),
                strategy: name.to_string(),
                success: false,
                rolled_back: false,
                errors_before,
                errors_after: errors_before,
                timestamp: SystemTime::now(),
            };

            if changed {
                let revalidated = self.run_rules(&working, result.level, all_records);
                attempt.errors_after = revalidated.len();
                if revalidated.len() < errors_before {
                    attempt.success = true;
                    current_errors = revalidated;
                    self.counters.healing_successes.fetch_add(1, Ordering::Relaxed);
                } else {
                    working = snapshot;
                    attempt.rolled_back = true;
                }
            }

            self.healing_history.lock().push(attempt.clone());
            attempts.push(attempt);
        }

        if current_errors.len() > original_error_count {
            warn!(record = %record.id, "Healing regressed validation; restoring original");
            working = record.clone();
            current_errors = result.errors.clone();
        }

        let healed = working != *record;
        if healed {
            info!(
                record = %record.id,
                before = original_error_count,
                after = current_errors.len(),
                "Record healed"
            );
        }

        HealingReport {
            healed,
            record: working,
            original_error_count,
            remaining_errors: current_errors,
            attempts,
        }
    }

    /// Validate and heal a dataset; records that remain invalid after healing
    /// are kept only if they still pass the basic structural rules.
    pub fn sanitize(&self, records: &[Record], level: ValidationLevel) -> Vec<Record> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let result = self.validate(record, level, Some(records));
            if result.valid {
                out.push(record.clone());
                continue;
            }
            let candidate = if self.config.auto_heal {
                self.heal_in_context(record, &result, Some(records)).record
            } else {
                record.clone()
            };
            if self.run_rules(&candidate, ValidationLevel::Basic, None).is_empty() {
                out.push(candidate);
            } else {
                warn!(record = %record.id, "Dropping structurally invalid record");
            }
        }
        out
    }

    fn run_rules(
        &self,
        record: &Record,
        level: ValidationLevel,
        all_records: Option<&[Record]>,
    ) -> Vec<ValidationError> {
        let rules = self.rules.read();
        let mut errors = Vec::new();

        for rule in rules.iter().filter(|r| level.includes(r.level)) {
            let outcome = absorb(|| (rule.check)(record, all_records, &self.config.schema));

            match outcome {
                Ok(Ok(None)) => {}
                Ok(Ok(Some(violation))) => errors.push(ValidationError {
                    rule: rule.name.clone(),
                    code: violation.code,
                    message: violation.message,
                    severity: violation.severity,
                    category: rule.category,
                    context: violation.context,
                }),
                Ok(Err(err)) => errors.push(self.rule_failure(rule, err.to_string())),
                Err(_) => errors.push(self.rule_failure(rule, "rule panicked".to_string())),
            }
        }
        errors
    }

    fn rule_failure(&self, rule: &ValidationRule, reason: String) -> ValidationError {
        self.counters.rule_failures.fetch_add(1, Ordering::Relaxed);
        warn!(rule = %rule.name, %reason, "Validation rule failed");
        let mut context = BTreeMap::new();
        context.insert("reason".to_string(), reason.clone());
        ValidationError {
            rule: rule.name.clone(),
            code: ValidationCode::RuleFailure,
            message: format!("Rule '{}' failed: {}", rule.name, reason),
            severity: ValidationSeverity::Medium,
            category: ValidationCategory::Corruption,
            context,
        }
    }

    fn store_cached(&self, key: CacheKey, result: &ValidationResult) {
        if self.cache.len() >= self.config.max_cached_results {
            let ttl = self.config.cache_ttl;
            self.cache.retain(|_, v| v.cached_at.elapsed() < ttl);
            if self.cache.len() >= self.config.max_cached_results {
                self.cache.clear();
            }
        }
        self.cache.insert(
            key,
            CachedValidation {
                result: result.clone(),
                cached_at: Instant::now(),
            },
        );
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drop cached state and retained history.
    pub fn reinitialize(&self) {
        self.cache.clear();
        self.results.lock().clear();
        self.healing_history.lock().clear();
        info!("Integrity guard reinitialized");
    }

    pub fn recent_results(&self) -> Vec<ValidationResult> {
        self.results.lock().to_vec()
    }

    pub fn healing_history(&self) -> Vec<HealingAttempt> {
        self.healing_history.lock().to_vec()
    }

    pub fn stats(&self) -> IntegrityStats {
        let (recent_results, recent_invalid) = {
            let results = self.results.lock();
            (results.len(), results.iter().filter(|r| !r.valid).count())
        };
        IntegrityStats {
            total_validations: self.counters.validations.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            invalid_results: self.counters.invalid.load(Ordering::Relaxed),
            rule_failures: self.counters.rule_failures.load(Ordering::Relaxed),
            healing_attempts: self.counters.healing_attempts.load(Ordering::Relaxed),
            healing_successes: self.counters.healing_successes.load(Ordering::Relaxed),
            cached_results: self.cache.len(),
            recent_error_rate: if recent_results == 0 {
                0.0
            } else {
                recent_invalid as f64 / recent_results as f64
            },
            recent_results,
        }
    }
}

impl Default for IntegrityGuard {
    fn default() -> Self {
        Self::new(IntegrityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::record::{LeafEntry, RecordSchema, SubGroup};
    use proptest::prelude::*;

    fn duplicate_record() -> Record {
        Record::new(
            "x",
            vec![SubGroup::new(
                ["r1"],
                vec![LeafEntry::new("a", "b", "v"), LeafEntry::new("a", "b", "v")],
            )],
        )
    }

    #[test]
    fn test_duplicate_entry_scenario() {
        let guard = IntegrityGuard::default();
        let record = duplicate_record();

        let result = guard.validate(&record, ValidationLevel::Standard, None);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].message, "Duplicate form detected");

        let report = guard.heal(&record, &result);
        assert!(report.healed);
        assert_eq!(report.record.subgroups[0].entries.len(), 1);
        assert!(report.remaining_errors.is_empty());

        let revalidated = guard.validate(&report.record, ValidationLevel::Standard, None);
        assert!(revalidated.valid);
    }

    #[test]
    fn test_basic_level_skips_content_rules() {
        let guard = IntegrityGuard::default();
        let result = guard.validate(&duplicate_record(), ValidationLevel::Basic, None);
        assert!(result.valid);
    }

    #[test]
    fn test_failing_rule_becomes_corruption_error() {
        let guard = IntegrityGuard::default();
        guard.register_rule(ValidationRule::new(
            "always_errors",
            ValidationLevel::Basic,
            ValidationCategory::Content,
            |_, _, _| Err(Error::Generic("boom".into())),
        ));
        guard.register_rule(ValidationRule::new(
            "always_panics",
            ValidationLevel::Basic,
            ValidationCategory::Content,
            |_, _, _| panic!("rule exploded"),
        ));

        let record = Record::new("ok", vec![SubGroup::new(["r"], vec![LeafEntry::new("a", "b", "v")])]);
        let result = guard.validate(&record, ValidationLevel::Basic, None);
        assert_eq!(result.errors.len(), 2);
        for error in &result.errors {
            assert_eq!(error.category, ValidationCategory::Corruption);
            assert_eq!(error.severity, ValidationSeverity::Medium);
            assert_eq!(error.code, ValidationCode::RuleFailure);
        }
        assert_eq!(guard.stats().rule_failures, 2);
    }

    #[test]
    fn test_results_are_cached_by_checksum() {
        let guard = IntegrityGuard::default();
        let record = duplicate_record();
        guard.validate(&record, ValidationLevel::Standard, None);
        guard.validate(&record, ValidationLevel::Standard, None);
        assert_eq!(guard.stats().cache_hits, 1);

        let mut changed = record.clone();
        changed.subgroups[0].entries.pop();
        let result = guard.validate(&changed, ValidationLevel::Standard, None);
        assert!(result.valid);
        assert_eq!(guard.stats().cache_hits, 1);
    }

    #[test]
    fn test_strict_detects_duplicate_ids() {
        let guard = IntegrityGuard::default();
        let base = Record::new("dup", vec![SubGroup::new(["r"], vec![LeafEntry::new("a", "b", "v")])]);
        let records = vec![base.clone(), base];
        let batch = guard.validate_batch(&records, ValidationLevel::Strict);
        assert!(!batch.valid);
        assert_eq!(batch.summary.invalid, 2);
        assert_eq!(batch.summary.by_category.get("Reference"), Some(&2));
    }

    #[test]
    fn test_healing_rolls_back_when_not_improving() {
        let guard = IntegrityGuard::new(IntegrityConfig {
            schema: RecordSchema::lexical(),
            ..IntegrityConfig::default()
        });
        // The only entry is role-less; removing it would empty the sub-group.
        let record = Record::new(
            "hablar",
            vec![SubGroup::new(["la_general"], vec![LeafEntry::new("indicative", "pres", "hablo")])],
        );
        let result = guard.validate(&record, ValidationLevel::Standard, None);
        assert!(result.has_code(ValidationCode::MissingRoleForFinite));

        let report = guard.heal(&record, &result);
        assert!(!report.healed);
        assert_eq!(report.record, record);
        assert_eq!(report.remaining_errors.len(), result.errors.len());
    }

    #[test]
    fn test_sanitize_drops_unrecoverable_records() {
        let guard = IntegrityGuard::default();
        let good = Record::new("g", vec![SubGroup::new(["r"], vec![LeafEntry::new("a", "b", "v")])]);
        let broken = Record::new("", vec![]);
        let out = guard.sanitize(&[good.clone(), duplicate_record(), broken], ValidationLevel::Standard);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], good);
        assert_eq!(out[1].subgroups[0].entries.len(), 1);
    }

    fn arb_entry() -> impl Strategy<Value = LeafEntry> {
        (
            prop::sample::select(vec!["indicative", "nonfinite", "a", " b"]),
            prop::sample::select(vec!["pres", "inf", "x"]),
            prop::sample::select(vec!["hablo", "habl\u{200B}o", "hablÃ©", " v ", ""]),
            prop::option::of(prop::sample::select(vec!["1s", "3p", "zz"])),
        )
            .prop_map(|(c, s, v, r)| LeafEntry {
                category: c.to_string(),
                sub_category: s.to_string(),
                value: v.to_string(),
                role: r.map(str::to_string),
            })
    }

    fn arb_record() -> impl Strategy<Value = Record> {
        prop::collection::vec(
            (
                prop::collection::vec(prop::sample::select(vec!["la_general", "zz", "la_general "]), 0..3),
                prop::collection::vec(arb_entry(), 0..5),
            ),
            0..3,
        )
        .prop_map(|groups| Record {
            id: "r".to_string(),
            subgroups: groups
                .into_iter()
                .map(|(tags, entries)| SubGroup {
                    tags: tags.into_iter().map(str::to_string).collect(),
                    entries,
                })
                .collect(),
        })
    }

    proptest! {
        #[test]
        fn prop_healing_never_regresses(record in arb_record()) {
            let guard = IntegrityGuard::new(IntegrityConfig {
                schema: RecordSchema::lexical(),
                ..IntegrityConfig::testing()
            });
            let result = guard.validate(&record, ValidationLevel::Comprehensive, None);
            let report = guard.heal(&record, &result);

            let after = guard.validate(&report.record, ValidationLevel::Comprehensive, None);
            prop_assert!(after.errors.len() <= result.errors.len());
            if !report.healed {
                prop_assert_eq!(&report.record, &record);
            }
        }
    }
}
