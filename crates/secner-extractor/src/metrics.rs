//! Extraction quality against gold annotations
//!
//! Scores entities per document and per label, and turns the measured
//! precision into the estimates a [`StatisticsTracker`] reports with.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::pipeline::Document;
use crate::stats::StatisticsTracker;
use crate::Entity;

// ============================================================================
// Entity Metrics
// ============================================================================

/// Confusion counts for one evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetrics {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

fn ratio(hits: usize, total: usize) -> f32 {
    if total == 0 {
        0.0
    } else {
        hits as f32 / total as f32
    }
}

impl EntityMetrics {
    pub fn predicted_total(&self) -> usize {
        self.true_positives + self.false_positives
    }

    pub fn gold_total(&self) -> usize {
        self.true_positives + self.false_negatives
    }

    pub fn precision(&self) -> f32 {
        ratio(self.true_positives, self.predicted_total())
    }

    pub fn recall(&self) -> f32 {
        ratio(self.true_positives, self.gold_total())
    }

    /// Harmonic mean of precision and recall, as 2TP / (2TP + FP + FN)
    pub fn f1_score(&self) -> f32 {
        ratio(
            2 * self.true_positives,
            2 * self.true_positives + self.false_positives + self.false_negatives,
        )
    }

    /// Accumulate another document's counts
    pub fn add(&mut self, other: &EntityMetrics) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
    }
}

// ============================================================================
// Gold Standard
// ============================================================================

/// A gold standard annotation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GoldSpan {
    pub start: usize,
    pub end: usize,
    pub label: String,
    pub text: String,
}

impl From<&Entity> for GoldSpan {
    fn from(e: &Entity) -> Self {
        Self {
            start: e.start,
            end: e.end,
            label: e.label.clone(),
            text: e.text.clone(),
        }
    }
}

/// A document together with its gold annotations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatedDocument {
    pub document: Document,
    pub gold: Vec<GoldSpan>,
}

// ============================================================================
// Evaluator
// ============================================================================

/// How a prediction is paired with a gold annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanMatch {
    /// Same surface text anywhere in the document
    #[default]
    Text,
    /// Same byte offsets
    Offsets,
}

/// Scores predicted entities against gold annotations
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    span_match: SpanMatch,
    require_label: bool,
}

impl Evaluator {
    /// Text matching with labels required
    pub fn new() -> Self {
        Self {
            span_match: SpanMatch::Text,
            require_label: true,
        }
    }

    /// Require identical offsets
    pub fn strict(mut self) -> Self {
        self.span_match = SpanMatch::Offsets;
        self
    }

    pub fn with_type_matching(mut self, require_label: bool) -> Self {
        self.require_label = require_label;
        self
    }

    fn pairs(&self, entity: &Entity, gold: &GoldSpan) -> bool {
        if self.require_label && entity.label != gold.label {
            return false;
        }
        match self.span_match {
            SpanMatch::Text => entity.text == gold.text,
            SpanMatch::Offsets => (entity.start, entity.end) == (gold.start, gold.end),
        }
    }

    /// Score one document; each gold annotation is claimed at most once
    pub fn evaluate(&self, predicted: &[Entity], gold: &[GoldSpan]) -> EntityMetrics {
        let mut unclaimed: Vec<&GoldSpan> = gold.iter().collect();
        let mut true_positives = 0;

        for entity in predicted {
            if let Some(pos) = unclaimed.iter().position(|g| self.pairs(entity, g)) {
                unclaimed.remove(pos);
                true_positives += 1;
            }
        }

        EntityMetrics {
            true_positives,
            false_positives: predicted.len() - true_positives,
            false_negatives: unclaimed.len(),
        }
    }

    /// Score one document separately for every label seen on either side
    pub fn evaluate_by_label(
        &self,
        predicted: &[Entity],
        gold: &[GoldSpan],
    ) -> BTreeMap<String, EntityMetrics> {
        let mut groups: BTreeMap<&str, (Vec<Entity>, Vec<GoldSpan>)> = BTreeMap::new();
        for entity in predicted {
            groups
                .entry(entity.label.as_str())
                .or_default()
                .0
                .push(entity.clone());
        }
        for span in gold {
            groups
                .entry(span.label.as_str())
                .or_default()
                .1
                .push(span.clone());
        }

        groups
            .into_iter()
            .map(|(label, (preds, golds))| (label.to_string(), self.evaluate(&preds, &golds)))
            .collect()
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Calibration
// ============================================================================

/// Measured precision for every label that was predicted at least once
pub fn measured_precision(
    per_label: &BTreeMap<String, EntityMetrics>,
) -> impl Iterator<Item = (&str, f32)> + '_ {
    per_label
        .iter()
        .filter(|(_, metrics)| metrics.predicted_total() > 0)
        .map(|(label, metrics)| (label.as_str(), metrics.precision()))
}

/// Replace a tracker's precision estimates with measured values.
///
/// Labels with no predictions keep their configured estimate.
pub fn calibrate_precision(
    tracker: &mut StatisticsTracker,
    per_label: &BTreeMap<String, EntityMetrics>,
) {
    for (label, precision) in measured_precision(per_label) {
        tracker.set_precision_estimate(label, precision);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Source;

    fn create_entity(text: &str, label: &str, start: usize) -> Entity {
        Entity {
            text: text.to_string(),
            label: label.to_string(),
            start,
            end: start + text.len(),
            source: Source::Pattern,
            confidence: 1.0,
        }
    }

    fn create_gold(text: &str, label: &str, start: usize) -> GoldSpan {
        GoldSpan {
            text: text.to_string(),
            label: label.to_string(),
            start,
            end: start + text.len(),
        }
    }

    #[test]
    fn test_entity_metrics_precision_recall_f1() {
        let metrics = EntityMetrics {
            true_positives: 6,
            false_positives: 2,
            false_negatives: 4,
        };

        assert_eq!(metrics.predicted_total(), 8);
        assert_eq!(metrics.gold_total(), 10);
        assert!((metrics.precision() - 0.75).abs() < 0.001);
        assert!((metrics.recall() - 0.6).abs() < 0.001);
        // 2PR / (P + R) = 0.9 / 1.35
        assert!((metrics.f1_score() - 2.0 / 3.0).abs() < 0.001);
    }

    #[test]
    fn test_empty_metrics_are_zero() {
        let metrics = EntityMetrics::default();
        assert_eq!(metrics.precision(), 0.0);
        assert_eq!(metrics.recall(), 0.0);
        assert_eq!(metrics.f1_score(), 0.0);
    }

    #[test]
    fn test_evaluate_perfect() {
        let predicted = vec![
            create_entity("CVE-2024-1234", "VULNERABILITY", 0),
            create_entity("CWE-79", "WEAKNESS", 22),
        ];
        let gold = vec![
            create_gold("CVE-2024-1234", "VULNERABILITY", 0),
            create_gold("CWE-79", "WEAKNESS", 22),
        ];

        let metrics = Evaluator::new().evaluate(&predicted, &gold);
        assert_eq!(metrics.true_positives, 2);
        assert!((metrics.precision() - 1.0).abs() < 0.001);
        assert!((metrics.recall() - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_gold_claimed_once() {
        let predicted = vec![
            create_entity("Cisco", "VENDOR", 0),
            create_entity("Cisco", "VENDOR", 20),
        ];
        let gold = vec![create_gold("Cisco", "VENDOR", 0)];

        let metrics = Evaluator::new().evaluate(&predicted, &gold);
        assert_eq!(metrics.true_positives, 1);
        assert_eq!(metrics.false_positives, 1);
        assert_eq!(metrics.false_negatives, 0);
    }

    #[test]
    fn test_evaluate_strict_offsets() {
        let predicted = vec![create_entity("Siemens", "VENDOR", 10)];
        let gold = vec![create_gold("Siemens", "VENDOR", 0)];

        assert_eq!(Evaluator::new().evaluate(&predicted, &gold).true_positives, 1);
        assert_eq!(
            Evaluator::new()
                .strict()
                .evaluate(&predicted, &gold)
                .true_positives,
            0
        );
    }

    #[test]
    fn test_evaluate_without_type_matching() {
        let predicted = vec![create_entity("Modbus", "PRODUCT", 0)];
        let gold = vec![create_gold("Modbus", "PROTOCOL", 0)];

        assert_eq!(Evaluator::new().evaluate(&predicted, &gold).true_positives, 0);
        assert_eq!(
            Evaluator::new()
                .with_type_matching(false)
                .evaluate(&predicted, &gold)
                .true_positives,
            1
        );
    }

    #[test]
    fn test_evaluate_by_label_and_calibrate() {
        let predicted = vec![
            create_entity("Siemens", "VENDOR", 0),
            create_entity("SIMATIC", "VENDOR", 8),
            create_entity("CVE-2024-1234", "VULNERABILITY", 20),
        ];
        let gold = vec![
            create_gold("Siemens", "VENDOR", 0),
            create_gold("CVE-2024-1234", "VULNERABILITY", 20),
            create_gold("DNP3", "PROTOCOL", 40),
        ];

        let per_label = Evaluator::new().strict().evaluate_by_label(&predicted, &gold);
        assert_eq!(per_label.len(), 3);
        assert!((per_label["VENDOR"].precision() - 0.5).abs() < 0.001);
        assert_eq!(per_label["PROTOCOL"].false_negatives, 1);

        let mut tracker = StatisticsTracker::new();
        let protocol_before = tracker.precision_estimate("PROTOCOL");
        calibrate_precision(&mut tracker, &per_label);

        assert!((tracker.precision_estimate("VENDOR") - 0.5).abs() < 0.001);
        assert!((tracker.precision_estimate("VULNERABILITY") - 1.0).abs() < 0.001);
        assert_eq!(tracker.precision_estimate("PROTOCOL"), protocol_before);
    }

    #[test]
    fn test_metrics_add() {
        let mut total = EntityMetrics::default();
        let doc = EntityMetrics {
            true_positives: 1,
            false_positives: 1,
            false_negatives: 0,
        };
        total.add(&doc);
        total.add(&doc);
        assert_eq!(total.predicted_total(), 4);
        assert!((total.precision() - 0.5).abs() < 0.001);
    }
}
