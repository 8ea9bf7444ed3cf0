//! secner Extractor - Security entity extraction pipeline
//!
//! Combines deterministic pattern rules (CVE/CWE identifiers, protocols,
//! versions, ...) with an opaque neural recognizer, then resolves the
//! overlapping candidates into one conflict-free annotation set:
//! - [`patterns`]: data-driven regex rule table
//! - [`neural`]: neural recognizer interface and model-output adapter
//! - [`merge`]: type-aware span merging
//! - [`stats`]: run statistics
//! - [`pipeline`]: end-to-end hybrid extraction

use serde::{Deserialize, Serialize};

pub use secner_core::{Result, SecnerError};

/// Well-known labels emitted by the built-in pattern rules.
///
/// Labels are open strings; a neural model may emit anything.
pub mod labels {
    pub const VULNERABILITY: &str = "VULNERABILITY";
    pub const WEAKNESS: &str = "WEAKNESS";
    pub const ATTACK_PATTERN: &str = "ATTACK_PATTERN";
    pub const ADVISORY: &str = "ADVISORY";
    pub const VENDOR: &str = "VENDOR";
    pub const PRODUCT: &str = "PRODUCT";
    pub const PROTOCOL: &str = "PROTOCOL";
    pub const VERSION: &str = "VERSION";
    pub const EQUIPMENT: &str = "EQUIPMENT";
}

// ============================================================================
// Spans
// ============================================================================

/// Which recognizer proposed a span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Pattern,
    Neural,
}

impl Source {
    /// Tie-break priority when identical spans come from both sources
    /// (higher wins)
    pub fn priority(&self) -> u8 {
        match self {
            Self::Pattern => 1,
            Self::Neural => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Neural => "neural",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A candidate or accepted entity mention.
///
/// Offsets are half-open UTF-8 byte offsets into the source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub label: String,
    pub confidence: f32,
    pub source: Source,
}

impl Span {
    pub fn new(
        start: usize,
        end: usize,
        label: impl Into<String>,
        confidence: f32,
        source: Source,
    ) -> Self {
        Self {
            start,
            end,
            label: label.into(),
            confidence,
            source,
        }
    }

    /// Deterministic pattern span (confidence 1.0)
    pub fn pattern(start: usize, end: usize, label: impl Into<String>) -> Self {
        Self::new(start, end, label, 1.0, Source::Pattern)
    }

    /// Neural span with the model's confidence
    pub fn neural(start: usize, end: usize, label: impl Into<String>, confidence: f32) -> Self {
        Self::new(start, end, label, confidence, Source::Neural)
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Two spans overlap unless one lies entirely before the other
    pub fn overlaps(&self, other: &Span) -> bool {
        !(self.end <= other.start || self.start >= other.end)
    }

    /// Whether `other` lies entirely within this span
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Identity used for duplicate detection
    pub fn key(&self) -> (usize, usize, &str) {
        (self.start, self.end, self.label.as_str())
    }

    /// The covered slice, if the offsets are valid for `text`
    pub fn text<'a>(&self, text: &'a str) -> Option<&'a str> {
        if self.is_empty() {
            return None;
        }
        text.get(self.start..self.end)
    }

    /// Whether the offsets are a non-empty, in-bounds, char-aligned range of `text`
    pub fn is_valid_for(&self, text: &str) -> bool {
        self.text(text).is_some()
    }
}

// ============================================================================
// Output records
// ============================================================================

/// Output record handed to downstream pipeline code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub start: usize,
    pub end: usize,
    pub label: String,
    pub text: String,
    pub source: Source,
    pub confidence: f32,
}

impl Entity {
    /// Build the record from a span; `None` if the span does not fit `text`
    pub fn from_span(span: &Span, text: &str) -> Option<Self> {
        span.text(text).map(|slice| Self {
            start: span.start,
            end: span.end,
            label: span.label.clone(),
            text: slice.to_string(),
            source: span.source,
            confidence: span.confidence,
        })
    }
}

/// Conflict-free annotation set, sorted by `start`.
///
/// No two spans with the same label overlap. Only [`merge::SpanMerger`]
/// constructs non-empty sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntitySet {
    spans: Vec<Span>,
}

impl EntitySet {
    pub(crate) fn from_sorted(spans: Vec<Span>) -> Self {
        Self { spans }
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Span> {
        self.spans.iter()
    }

    /// Spans carrying `label`, in order
    pub fn by_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a Span> + 'a {
        self.spans.iter().filter(move |s| s.label == label)
    }

    /// Distinct labels present, sorted
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.spans.iter().map(|s| s.label.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        labels
    }

    pub fn into_spans(self) -> Vec<Span> {
        self.spans
    }

    /// Output records with the covered text slice
    pub fn to_entities(&self, text: &str) -> Vec<Entity> {
        self.spans
            .iter()
            .filter_map(|span| {
                let entity = Entity::from_span(span, text);
                if entity.is_none() {
                    tracing::warn!(
                        "Span {}..{} ({}) does not fit text of length {}",
                        span.start,
                        span.end,
                        span.label,
                        text.len()
                    );
                }
                entity
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a EntitySet {
    type Item = &'a Span;
    type IntoIter = std::slice::Iter<'a, Span>;

    fn into_iter(self) -> Self::IntoIter {
        self.spans.iter()
    }
}

pub mod merge;
pub mod metrics;
pub mod neural;
pub mod patterns;
pub mod pipeline;
pub mod rules;
pub mod stats;
pub mod validate;

pub use merge::SpanMerger;
pub use metrics::{AnnotatedDocument, EntityMetrics, Evaluator, GoldSpan};
pub use neural::{ModelBackend, ModelRecognizer, NeuralRecognizer};
pub use patterns::PatternRecognizerSet;
pub use pipeline::{Document, Extraction, HybridExtractor};
pub use rules::{Exclusion, RuleSpec};
pub use stats::{SharedStatistics, StatisticsTracker, StatsSink};
pub use validate::{validate_spans, DropReason, ExtractionWarning};
