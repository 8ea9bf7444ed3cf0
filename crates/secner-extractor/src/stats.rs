//! Run statistics
//!
//! Cross-call counters for the extraction pipeline. The tracker is passed in
//! by the caller; it observes results and never changes them. Use one tracker
//! per worker and [`StatisticsTracker::merge`] them afterwards, or share one
//! through [`SharedStatistics`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use secner_core::StatisticsConfig;

use crate::{EntitySet, Source};

// ============================================================================
// Run records
// ============================================================================

/// What one extract-and-merge call produced
#[derive(Debug, Clone, Copy)]
pub struct RunRecord<'a> {
    pub pattern_candidates: usize,
    pub neural_candidates: usize,
    pub dropped_candidates: usize,
    pub neural_failed: bool,
    pub entities: &'a EntitySet,
}

/// Observer of pipeline runs
pub trait StatsSink {
    fn record_run(&mut self, run: &RunRecord<'_>);
}

/// Sink that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStats;

impl StatsSink for NoopStats {
    fn record_run(&mut self, _run: &RunRecord<'_>) {}
}

// ============================================================================
// Statistics Tracker
// ============================================================================

/// Accumulated counters across runs
#[derive(Debug, Clone)]
pub struct StatisticsTracker {
    total_runs: usize,
    pattern_candidates: usize,
    neural_candidates: usize,
    merged_entities: usize,
    merged_from_pattern: usize,
    merged_from_neural: usize,
    dropped_candidates: usize,
    neural_failures: usize,
    label_counts: BTreeMap<String, usize>,
    precision_estimates: BTreeMap<String, f32>,
    default_precision: f32,
    started_at: Option<DateTime<Utc>>,
}

impl StatisticsTracker {
    /// Tracker with the default precision table
    pub fn new() -> Self {
        Self::from_config(&StatisticsConfig::default())
    }

    pub fn from_config(config: &StatisticsConfig) -> Self {
        Self {
            total_runs: 0,
            pattern_candidates: 0,
            neural_candidates: 0,
            merged_entities: 0,
            merged_from_pattern: 0,
            merged_from_neural: 0,
            dropped_candidates: 0,
            neural_failures: 0,
            label_counts: BTreeMap::new(),
            precision_estimates: config.precision_estimates.clone(),
            default_precision: config.default_precision.clamp(0.0, 1.0),
            started_at: None,
        }
    }

    /// Set or replace the precision estimate for a label
    pub fn set_precision_estimate(&mut self, label: impl Into<String>, precision: f32) {
        self.precision_estimates
            .insert(label.into(), precision.clamp(0.0, 1.0));
    }

    pub fn precision_estimate(&self, label: &str) -> f32 {
        self.precision_estimates
            .get(label)
            .copied()
            .unwrap_or(self.default_precision)
    }

    pub fn total_runs(&self) -> usize {
        self.total_runs
    }

    pub fn pattern_candidates(&self) -> usize {
        self.pattern_candidates
    }

    pub fn neural_candidates(&self) -> usize {
        self.neural_candidates
    }

    pub fn merged_entities(&self) -> usize {
        self.merged_entities
    }

    pub fn dropped_candidates(&self) -> usize {
        self.dropped_candidates
    }

    pub fn neural_failures(&self) -> usize {
        self.neural_failures
    }

    pub fn label_count(&self, label: &str) -> usize {
        self.label_counts.get(label).copied().unwrap_or(0)
    }

    pub fn label_counts(&self) -> &BTreeMap<String, usize> {
        &self.label_counts
    }

    /// Merged entities weighted by their label's precision estimate
    pub fn estimated_true_positives(&self) -> f32 {
        self.label_counts
            .iter()
            .map(|(label, count)| *count as f32 * self.precision_estimate(label))
            .sum()
    }

    /// Label-count weighted precision estimate over everything merged so far
    pub fn estimated_precision(&self) -> f32 {
        if self.merged_entities == 0 {
            0.0
        } else {
            self.estimated_true_positives() / self.merged_entities as f32
        }
    }

    /// Fold another tracker (e.g. from a different worker) into this one.
    ///
    /// Precision estimates from `self` take precedence.
    pub fn merge(&mut self, other: &StatisticsTracker) {
        self.total_runs += other.total_runs;
        self.pattern_candidates += other.pattern_candidates;
        self.neural_candidates += other.neural_candidates;
        self.merged_entities += other.merged_entities;
        self.merged_from_pattern += other.merged_from_pattern;
        self.merged_from_neural += other.merged_from_neural;
        self.dropped_candidates += other.dropped_candidates;
        self.neural_failures += other.neural_failures;

        for (label, count) in &other.label_counts {
            *self.label_counts.entry(label.clone()).or_insert(0) += count;
        }
        for (label, precision) in &other.precision_estimates {
            self.precision_estimates
                .entry(label.clone())
                .or_insert(*precision);
        }

        self.started_at = match (self.started_at, other.started_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    /// Clear counters, keep the precision table
    pub fn reset(&mut self) {
        let mut fresh = Self::from_config(&StatisticsConfig {
            enabled: true,
            precision_estimates: BTreeMap::new(),
            default_precision: self.default_precision,
        });
        fresh.precision_estimates = std::mem::take(&mut self.precision_estimates);
        *self = fresh;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_runs: self.total_runs,
            pattern_candidates: self.pattern_candidates,
            neural_candidates: self.neural_candidates,
            merged_entities: self.merged_entities,
            merged_from_pattern: self.merged_from_pattern,
            merged_from_neural: self.merged_from_neural,
            dropped_candidates: self.dropped_candidates,
            neural_failures: self.neural_failures,
            label_counts: self.label_counts.clone(),
            estimated_precision: self.estimated_precision(),
            started_at: self.started_at,
        }
    }

    /// Human-readable summary
    pub fn report(&self) -> String {
        let mut out = format!(
            "=== Extraction Statistics ===\n\n\
             Runs: {}\n\
             Candidates: pattern {} | neural {} | dropped {}\n\
             Merged entities: {} (pattern {} | neural {})\n\
             Neural failures: {}\n\
             Estimated precision: {:.1}%\n\n\
             Per label:\n",
            self.total_runs,
            self.pattern_candidates,
            self.neural_candidates,
            self.dropped_candidates,
            self.merged_entities,
            self.merged_from_pattern,
            self.merged_from_neural,
            self.neural_failures,
            self.estimated_precision() * 100.0,
        );
        for (label, count) in &self.label_counts {
            out.push_str(&format!(
                "  {:<16} {:>6}  (est. precision {:.0}%)\n",
                label,
                count,
                self.precision_estimate(label) * 100.0
            ));
        }
        out
    }
}

impl Default for StatisticsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSink for StatisticsTracker {
    fn record_run(&mut self, run: &RunRecord<'_>) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }

        self.total_runs += 1;
        self.pattern_candidates += run.pattern_candidates;
        self.neural_candidates += run.neural_candidates;
        self.dropped_candidates += run.dropped_candidates;
        if run.neural_failed {
            self.neural_failures += 1;
        }

        for span in run.entities {
            self.merged_entities += 1;
            match span.source {
                Source::Pattern => self.merged_from_pattern += 1,
                Source::Neural => self.merged_from_neural += 1,
            }
            *self.label_counts.entry(span.label.clone()).or_insert(0) += 1;
        }
    }
}

/// Serializable view of a tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_runs: usize,
    pub pattern_candidates: usize,
    pub neural_candidates: usize,
    pub merged_entities: usize,
    pub merged_from_pattern: usize,
    pub merged_from_neural: usize,
    pub dropped_candidates: usize,
    pub neural_failures: usize,
    pub label_counts: BTreeMap<String, usize>,
    pub estimated_precision: f32,
    pub started_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Shared tracker
// ============================================================================

/// Tracker shared between concurrent workers
#[derive(Debug, Clone, Default)]
pub struct SharedStatistics {
    inner: Arc<Mutex<StatisticsTracker>>,
}

impl SharedStatistics {
    pub fn new(tracker: StatisticsTracker) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tracker)),
        }
    }

    // A panic elsewhere must not take statistics down with it
    fn lock(&self) -> MutexGuard<'_, StatisticsTracker> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, run: &RunRecord<'_>) {
        self.lock().record_run(run);
    }

    /// Fold a per-worker tracker into the shared one
    pub fn absorb(&self, other: &StatisticsTracker) {
        self.lock().merge(other);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.lock().snapshot()
    }

    pub fn report(&self) -> String {
        self.lock().report()
    }

    /// Copy of the current counters
    pub fn tracker(&self) -> StatisticsTracker {
        self.lock().clone()
    }
}

impl StatsSink for SharedStatistics {
    fn record_run(&mut self, run: &RunRecord<'_>) {
        self.record(run);
    }
}

// ============================================================================
// Tests
// ============================================================================
