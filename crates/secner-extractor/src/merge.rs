//! Type-aware span merging
//!
//! Turns the union of candidate spans from any number of recognizers into one
//! [`EntitySet`] in which no two spans with the same label overlap.
//!
//! Rules:
//! - identical `(start, end, label)` candidates collapse to one, preferring
//!   the pattern source, then the higher confidence
//! - spans with different labels never conflict; nesting and crossing are kept
//! - overlapping spans with the same label conflict; the strictly longer span
//!   wins, and on equal length the span that sorts first (leftmost start) wins
//!
//! The merger is a pure function of its input. Input order does not matter.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::{EntitySet, Span};

/// Stateless merge engine
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanMerger;

impl SpanMerger {
    pub fn new() -> Self {
        Self
    }

    /// Merge candidates from several recognizers
    pub fn merge_sources(&self, sources: &[&[Span]]) -> EntitySet {
        let candidates: Vec<Span> = sources.iter().flat_map(|s| s.iter().cloned()).collect();
        self.merge(candidates)
    }

    /// Merge one candidate list into a conflict-free set
    pub fn merge(&self, candidates: Vec<Span>) -> EntitySet {
        let total = candidates.len();
        let mut ordered = dedup_exact(candidates);
        ordered.sort_by(evaluation_order);

        let mut kept: Vec<Span> = Vec::with_capacity(ordered.len());
        for candidate in ordered {
            let mut displaced: Vec<usize> = Vec::new();
            let mut discarded = false;

            for (idx, existing) in kept.iter().enumerate() {
                if existing.label != candidate.label || !existing.overlaps(&candidate) {
                    continue;
                }
                if candidate.len() > existing.len() {
                    displaced.push(idx);
                } else {
                    discarded = true;
                    break;
                }
            }

            if discarded {
                continue;
            }
            // Indices were collected in ascending order
            for idx in displaced.into_iter().rev() {
                kept.remove(idx);
            }
            kept.push(candidate);
        }

        let mut spans = enforce_no_same_label_overlap(kept);
        spans.sort_by(output_order);

        tracing::debug!("Merged {} candidates into {} entities", total, spans.len());
        EntitySet::from_sorted(spans)
    }
}

/// Collapse identical `(start, end, label)` candidates regardless of source
fn dedup_exact(candidates: Vec<Span>) -> Vec<Span> {
    let mut best: HashMap<(usize, usize, String), Span> = HashMap::with_capacity(candidates.len());

    for span in candidates {
        let key = (span.start, span.end, span.label.clone());
        match best.get_mut(&key) {
            Some(existing) => {
                if preference(&span, existing) == Ordering::Greater {
                    *existing = span;
                }
            }
            None => {
                best.insert(key, span);
            }
        }
    }

    best.into_values().collect()
}

/// Which copy of an exact duplicate survives
fn preference(a: &Span, b: &Span) -> Ordering {
    a.source
        .priority()
        .cmp(&b.source.priority())
        .then_with(|| a.confidence.total_cmp(&b.confidence))
}

/// Start ascending, length descending, then label.
///
/// `(start, end, label)` is unique after [`dedup_exact`], so this is a total
/// order and the result does not depend on sort stability.
fn evaluation_order(a: &Span, b: &Span) -> Ordering {
    a.start
        .cmp(&b.start)
        .then_with(|| b.len().cmp(&a.len()))
        .then_with(|| a.label.cmp(&b.label))
}

fn output_order(a: &Span, b: &Span) -> Ordering {
    a.start
        .cmp(&b.start)
        .then_with(|| a.end.cmp(&b.end))
        .then_with(|| a.label.cmp(&b.label))
}

/// Post-condition check. Never fires for the algorithm above; if it does,
/// the later-evaluated offender is dropped and processing continues.
fn enforce_no_same_label_overlap(kept: Vec<Span>) -> Vec<Span> {
    let mut accepted: Vec<Span> = Vec::with_capacity(kept.len());

    for span in kept {
        let conflict = accepted
            .iter()
            .find(|a| a.label == span.label && a.overlaps(&span));
        if let Some(existing) = conflict {
            tracing::error!(
                "Merge invariant violation: {} {}..{} overlaps {}..{}; dropping the later span",
                span.label,
                span.start,
                span.end,
                existing.start,
                existing.end
            );
            continue;
        }
        accepted.push(span);
    }

    accepted
}

// ============================================================================
// Tests
// ============================================================================
