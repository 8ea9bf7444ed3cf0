//! Candidate validation
//!
//! Recognizers may hand back spans that do not fit the text. Such spans are
//! dropped and reported as [`ExtractionWarning`]s; they never fail the call.

use serde::Serialize;

use crate::Span;

/// Why a candidate span was dropped
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DropReason {
    #[error("span {start}..{end} is empty or inverted")]
    EmptyOrInverted { start: usize, end: usize },

    #[error("span {start}..{end} exceeds text length {len}")]
    OutOfBounds { start: usize, end: usize, len: usize },

    #[error("span {start}..{end} splits a UTF-8 character")]
    NotCharBoundary { start: usize, end: usize },

    #[error("confidence {confidence} is outside (0, 1]")]
    ConfidenceOutOfRange { confidence: f32 },
}

/// A dropped candidate and the recognizer that produced it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionWarning {
    pub recognizer: String,
    pub span: Span,
    pub reason: DropReason,
}

impl std::fmt::Display for ExtractionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} dropped {} candidate: {}",
            self.recognizer, self.span.label, self.reason
        )
    }
}

/// Check one span against the text
pub fn check_span(span: &Span, text: &str) -> Option<DropReason> {
    if span.start >= span.end {
        return Some(DropReason::EmptyOrInverted {
            start: span.start,
            end: span.end,
        });
    }
    if span.end > text.len() {
        return Some(DropReason::OutOfBounds {
            start: span.start,
            end: span.end,
            len: text.len(),
        });
    }
    if !text.is_char_boundary(span.start) || !text.is_char_boundary(span.end) {
        return Some(DropReason::NotCharBoundary {
            start: span.start,
            end: span.end,
        });
    }
    // NaN fails both comparisons
    if !(span.confidence > 0.0 && span.confidence <= 1.0) {
        return Some(DropReason::ConfidenceOutOfRange {
            confidence: span.confidence,
        });
    }
    None
}

/// Split candidates into valid spans and warnings for the dropped ones
pub fn validate_spans(
    recognizer: &str,
    text: &str,
    spans: Vec<Span>,
) -> (Vec<Span>, Vec<ExtractionWarning>) {
    let mut valid = Vec::with_capacity(spans.len());
    let mut warnings = Vec::new();

    for span in spans {
        match check_span(&span, text) {
            None => valid.push(span),
            Some(reason) => {
                let warning = ExtractionWarning {
                    recognizer: recognizer.to_string(),
                    span,
                    reason,
                };
                tracing::warn!("{}", warning);
                warnings.push(warning);
            }
        }
    }

    (valid, warnings)
}
