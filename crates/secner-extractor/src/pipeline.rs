//! Hybrid extraction pipeline
//!
//! text -> {pattern rules, neural recognizer} -> validation -> merge -> entities
//!
//! A failing neural recognizer never fails the call; its candidates are
//! simply missing from the merge.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use secner_core::{ExtractorConfig, Result, StatisticsConfig};

use crate::merge::SpanMerger;
use crate::metrics::{measured_precision, AnnotatedDocument, EntityMetrics, Evaluator};
use crate::neural::NeuralRecognizer;
use crate::patterns::PatternRecognizerSet;
use crate::stats::{RunRecord, StatisticsTracker, StatsSink};
use crate::validate::{validate_spans, ExtractionWarning};
use crate::{Entity, EntitySet, Span};

/// One document of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub sector: Option<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            sector: None,
        }
    }

    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }
}

/// Result of one extract-and-merge call
#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    /// Output records, ordered by start offset
    pub entities: Vec<Entity>,
    pub entity_set: EntitySet,
    /// Candidates dropped before merging
    pub warnings: Vec<ExtractionWarning>,
    pub pattern_candidates: usize,
    pub neural_candidates: usize,
    pub neural_failed: bool,
}

/// Pattern rules plus an optional neural recognizer, merged per document
pub struct HybridExtractor {
    patterns: Arc<PatternRecognizerSet>,
    neural: Option<Arc<dyn NeuralRecognizer>>,
    merger: SpanMerger,
    default_sector: Option<String>,
    neural_enabled: bool,
    stats_config: StatisticsConfig,
}

impl HybridExtractor {
    /// Pattern-only extractor over a compiled rule set
    pub fn new(patterns: Arc<PatternRecognizerSet>) -> Self {
        Self {
            patterns,
            neural: None,
            merger: SpanMerger::new(),
            default_sector: None,
            neural_enabled: true,
            stats_config: StatisticsConfig::default(),
        }
    }

    /// Pattern-only extractor over the built-in rules
    pub fn with_defaults() -> Result<Self> {
        Ok(Self::new(Arc::new(PatternRecognizerSet::with_defaults()?)))
    }

    /// Build from configuration; loads the rule file when one is configured
    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        let patterns = match &config.rules_path {
            Some(path) => {
                tracing::info!("Loading pattern rules from {}", path.display());
                PatternRecognizerSet::from_file(path)?
            }
            None => PatternRecognizerSet::with_defaults()?,
        };

        let mut extractor = Self::new(Arc::new(patterns));
        extractor.default_sector = config.default_sector.clone();
        extractor.neural_enabled = config.neural_enabled;
        Ok(extractor)
    }

    /// Attach a neural recognizer
    pub fn with_neural(mut self, neural: Arc<dyn NeuralRecognizer>) -> Self {
        self.neural = Some(neural);
        self
    }

    /// Sector used when a call passes none
    pub fn with_default_sector(mut self, sector: impl Into<String>) -> Self {
        self.default_sector = Some(sector.into());
        self
    }

    /// Statistics settings for per-worker trackers in batch runs
    pub fn with_statistics_config(mut self, config: StatisticsConfig) -> Self {
        self.stats_config = config;
        self
    }

    pub fn patterns(&self) -> &Arc<PatternRecognizerSet> {
        &self.patterns
    }

    /// Extract and merge without recording statistics
    pub fn extract(&self, text: &str, sector: Option<&str>) -> Extraction {
        let sector = sector.or(self.default_sector.as_deref());

        let pattern_spans = self.patterns.extract_for_sector(text, sector);
        let pattern_candidates = pattern_spans.len();
        let (neural_spans, neural_failed) = self.run_neural(text);
        let neural_candidates = neural_spans.len();

        let (mut candidates, mut warnings) = validate_spans("pattern", text, pattern_spans);
        let neural_name = self.neural.as_ref().map(|n| n.name()).unwrap_or("neural");
        let (neural_valid, neural_warnings) = validate_spans(neural_name, text, neural_spans);
        candidates.extend(neural_valid);
        warnings.extend(neural_warnings);

        let entity_set = self.merger.merge(candidates);
        let entities = entity_set.to_entities(text);

        tracing::debug!(
            "Extracted {} entities ({} pattern, {} neural candidates, {} dropped)",
            entities.len(),
            pattern_candidates,
            neural_candidates,
            warnings.len()
        );

        Extraction {
            entities,
            entity_set,
            warnings,
            pattern_candidates,
            neural_candidates,
            neural_failed,
        }
    }

    /// Extract, merge, and report the run to `stats`
    pub fn extract_with_stats<S: StatsSink + ?Sized>(
        &self,
        text: &str,
        sector: Option<&str>,
        stats: &mut S,
    ) -> Extraction {
        let extraction = self.extract(text, sector);
        stats.record_run(&RunRecord {
            pattern_candidates: extraction.pattern_candidates,
            neural_candidates: extraction.neural_candidates,
            dropped_candidates: extraction.warnings.len(),
            neural_failed: extraction.neural_failed,
            entities: &extraction.entity_set,
        });
        extraction
    }

    /// Process documents in parallel.
    ///
    /// Each worker keeps its own tracker; trackers are merged at the end.
    /// Results are returned in input order.
    pub fn extract_batch(&self, documents: &[Document]) -> (Vec<Extraction>, StatisticsTracker) {
        let new_tracker = || StatisticsTracker::from_config(&self.stats_config);

        let (mut results, tracker) = documents
            .par_iter()
            .enumerate()
            .fold(
                || (Vec::new(), new_tracker()),
                |(mut out, mut tracker), (idx, doc)| {
                    let sector = doc.sector.as_deref();
                    let extraction = if self.stats_config.enabled {
                        self.extract_with_stats(&doc.text, sector, &mut tracker)
                    } else {
                        self.extract(&doc.text, sector)
                    };
                    out.push((idx, extraction));
                    (out, tracker)
                },
            )
            .reduce(
                || (Vec::new(), new_tracker()),
                |(mut out, mut tracker), (other_out, other_tracker)| {
                    out.extend(other_out);
                    tracker.merge(&other_tracker);
                    (out, tracker)
                },
            );

        results.sort_by_key(|(idx, _)| *idx);
        tracing::info!("Processed batch of {} documents", documents.len());
        (results.into_iter().map(|(_, e)| e).collect(), tracker)
    }

    /// Score the extractor against annotated documents.
    ///
    /// Measured per-label precision replaces the configured estimates, so
    /// trackers of later batch runs report calibrated precision.
    pub fn calibrate(
        &mut self,
        samples: &[AnnotatedDocument],
        evaluator: &Evaluator,
    ) -> BTreeMap<String, EntityMetrics> {
        let documents: Vec<Document> = samples.iter().map(|s| s.document.clone()).collect();
        let (extractions, _) = self.extract_batch(&documents);

        let mut per_label: BTreeMap<String, EntityMetrics> = BTreeMap::new();
        for (sample, extraction) in samples.iter().zip(&extractions) {
            let scored = evaluator.evaluate_by_label(&extraction.entities, &sample.gold);
            for (label, metrics) in scored {
                per_label.entry(label).or_default().add(&metrics);
            }
        }

        for (label, precision) in measured_precision(&per_label) {
            self.stats_config
                .precision_estimates
                .insert(label.to_string(), precision);
        }
        tracing::info!(
            "Calibrated precision for {} labels from {} documents",
            per_label.len(),
            samples.len()
        );
        per_label
    }

    fn run_neural(&self, text: &str) -> (Vec<Span>, bool) {
        let neural = match &self.neural {
            Some(neural) if self.neural_enabled => neural,
            _ => return (Vec::new(), false),
        };

        match neural.extract(text) {
            Ok(spans) => (spans, false),
            Err(e) => {
                tracing::warn!(
                    "Neural recognizer '{}' failed, continuing with pattern candidates: {}",
                    neural.name(),
                    e
                );
                (Vec::new(), true)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::GoldSpan;
    use crate::stats::NoopStats;
    use crate::{labels, Source};
    use secner_core::SecnerError;

    fn failing(_text: &str) -> Result<Vec<Span>> {
        Err(SecnerError::Recognizer("CUDA out of memory".to_string()))
    }

    #[test]
    fn test_end_to_end_identifiers() {
        let extractor = HybridExtractor::with_defaults().unwrap();
        let text = "CVE-2024-1234 affects CWE-79.";
        let extraction = extractor.extract(text, None);

        let found: Vec<(&str, &str, f32)> = extraction
            .entities
            .iter()
            .map(|e| (e.label.as_str(), e.text.as_str(), e.confidence))
            .collect();
        assert_eq!(
            found,
            vec![
                (labels::VULNERABILITY, "CVE-2024-1234", 1.0),
                (labels::WEAKNESS, "CWE-79", 1.0),
            ]
        );
        assert_eq!(extraction.pattern_candidates, 2);
        assert!(extraction.warnings.is_empty());
    }

    #[test]
    fn test_neural_candidates_merge_with_patterns() {
        let neural = |text: &str| -> Result<Vec<Span>> {
            let start = text.find("Siemens").unwrap_or(0);
            Ok(vec![
                // Same-label, shorter than the pattern vendor match: loses
                Span::neural(start, start + 4, labels::VENDOR, 0.6),
                Span::neural(start, start + 7, "ORGANIZATION", 0.9),
            ])
        };
        let extractor = HybridExtractor::with_defaults()
            .unwrap()
            .with_neural(Arc::new(neural));

        let text = "Siemens SIMATIC S7-1500 CPU";
        let extraction = extractor.extract(text, Some("ics"));

        let vendors: Vec<&Entity> = extraction
            .entities
            .iter()
            .filter(|e| e.label == labels::VENDOR)
            .collect();
        assert_eq!(vendors.len(), 1);
        assert_eq!(vendors[0].source, Source::Pattern);
        assert!(extraction
            .entities
            .iter()
            .any(|e| e.label == "ORGANIZATION" && e.source == Source::Neural));
        assert!(extraction
            .entities
            .iter()
            .any(|e| e.label == labels::EQUIPMENT && e.text == text));
        assert_eq!(extraction.neural_candidates, 2);
    }

    #[test]
    fn test_neural_failure_yields_pattern_results() {
        let extractor = HybridExtractor::with_defaults()
            .unwrap()
            .with_neural(Arc::new(failing));

        let mut stats = StatisticsTracker::new();
        let extraction = extractor.extract_with_stats("CVE-2023-4966 in Citrix", None, &mut stats);

        assert!(extraction.neural_failed);
        assert_eq!(extraction.neural_candidates, 0);
        assert_eq!(extraction.entities.len(), 2);
        assert_eq!(stats.neural_failures(), 1);
    }

    #[test]
    fn test_invalid_neural_spans_become_warnings() {
        let neural = |_text: &str| -> Result<Vec<Span>> {
            Ok(vec![
                Span::neural(0, 500, labels::PRODUCT, 0.9),
                Span::neural(0, 5, labels::PRODUCT, 0.9),
            ])
        };
        let extractor = HybridExtractor::with_defaults()
            .unwrap()
            .with_neural(Arc::new(neural));

        let extraction = extractor.extract("nginx is fine", None);
        assert_eq!(extraction.warnings.len(), 1);
        assert_eq!(extraction.warnings[0].span.end, 500);
        assert!(extraction
            .entities
            .iter()
            .any(|e| e.label == labels::PRODUCT && e.text == "nginx"));
    }

    #[test]
    fn test_neural_disabled_by_config() {
        let config = ExtractorConfig {
            neural_enabled: false,
            ..ExtractorConfig::default()
        };
        let extractor = HybridExtractor::from_config(&config)
            .unwrap()
            .with_neural(Arc::new(failing));

        let extraction = extractor.extract("CWE-89", None);
        assert!(!extraction.neural_failed);
        assert_eq!(extraction.entities.len(), 1);
    }

    #[test]
    fn test_default_sector_applies() {
        let extractor = HybridExtractor::with_defaults()
            .unwrap()
            .with_default_sector("it");
        let text = "ICSA-24-100-01";

        assert!(extractor.extract(text, None).entities.is_empty());
        assert_eq!(extractor.extract(text, Some("ics")).entities.len(), 1);
    }

    #[test]
    fn test_stats_do_not_change_output() {
        let extractor = HybridExtractor::with_defaults().unwrap();
        let text = "Rockwell Automation ControlLogix 5580 over EtherNet/IP";

        let plain = extractor.extract(text, None);
        let observed = extractor.extract_with_stats(text, None, &mut NoopStats);
        assert_eq!(plain.entities, observed.entities);
    }

    #[test]
    fn test_batch_preserves_order_and_aggregates_stats() {
        let extractor = HybridExtractor::with_defaults().unwrap();
        let documents: Vec<Document> = (0..32)
            .map(|i| {
                Document::new(
                    format!("doc-{}", i),
                    format!("CVE-2024-{:04} and CWE-{}", i + 1000, i),
                )
            })
            .collect();

        let (results, stats) = extractor.extract_batch(&documents);

        assert_eq!(results.len(), 32);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.entities[0].text, format!("CVE-2024-{:04}", i + 1000));
        }
        assert_eq!(stats.total_runs(), 32);
        assert_eq!(stats.label_count(labels::VULNERABILITY), 32);
        assert_eq!(stats.label_count(labels::WEAKNESS), 32);
    }

    #[test]
    fn test_batch_without_statistics() {
        let extractor = HybridExtractor::with_defaults()
            .unwrap()
            .with_statistics_config(StatisticsConfig {
                enabled: false,
                ..StatisticsConfig::default()
            });

        let (results, stats) = extractor.extract_batch(&[Document::new("a", "CWE-22")]);
        assert_eq!(results[0].entities.len(), 1);
        assert_eq!(stats.total_runs(), 0);
    }

    #[test]
    fn test_calibrate_feeds_batch_trackers() {
        let mut extractor = HybridExtractor::with_defaults().unwrap();
        let samples = vec![AnnotatedDocument {
            document: Document::new("gold-1", "CVE-2024-1234 affects CWE-79."),
            gold: vec![GoldSpan {
                start: 0,
                end: 13,
                label: labels::VULNERABILITY.to_string(),
                text: "CVE-2024-1234".to_string(),
            }],
        }];

        let per_label = extractor.calibrate(&samples, &Evaluator::new());
        assert_eq!(per_label[labels::VULNERABILITY].true_positives, 1);
        assert_eq!(per_label[labels::WEAKNESS].false_positives, 1);

        let (_, stats) = extractor.extract_batch(&[Document::new("a", "CWE-22")]);
        assert_eq!(stats.precision_estimate(labels::VULNERABILITY), 1.0);
        assert_eq!(stats.precision_estimate(labels::WEAKNESS), 0.0);
        // Labels absent from the gold run keep their configured estimate
        assert!((stats.precision_estimate(labels::VENDOR) - 0.85).abs() < 0.001);
    }

    #[test]
    fn test_from_config_with_missing_rule_file() {
        let config = ExtractorConfig {
            rules_path: Some("/nonexistent/rules.toml".into()),
            ..ExtractorConfig::default()
        };
        assert!(HybridExtractor::from_config(&config).is_err());
    }
}
