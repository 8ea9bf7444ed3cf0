//! Neural recognizer interface
//!
//! The pipeline treats a neural recognizer as an opaque oracle: text in,
//! zero or more [`Span`]s out. Spans may overlap, including same-label
//! overlaps; conflict resolution happens in [`crate::merge`].
//!
//! [`ModelRecognizer`] adapts any inference backend that returns JSON
//! predictions (a local ONNX runner, an HTTP model server, ...).

use std::collections::{BTreeMap, HashMap};

use anyhow::Context;
use serde::Deserialize;

use secner_core::{ExtractorConfig, Result};

use crate::Span;

/// Opaque neural entity recognizer
pub trait NeuralRecognizer: Send + Sync {
    fn extract(&self, text: &str) -> Result<Vec<Span>>;

    /// Name used in warnings and logs
    fn name(&self) -> &str {
        "neural"
    }
}

impl<F> NeuralRecognizer for F
where
    F: Fn(&str) -> Result<Vec<Span>> + Send + Sync,
{
    fn extract(&self, text: &str) -> Result<Vec<Span>> {
        self(text)
    }
}

// ============================================================================
// Model adapter
// ============================================================================

/// Inference backend returning raw JSON predictions for a text.
///
/// Backend failures surface as [`secner_core::SecnerError::Other`] with the
/// recognizer name attached.
pub trait ModelBackend: Send + Sync {
    fn predict(&self, text: &str) -> anyhow::Result<String>;
}

/// Score assumed when the model omits one
const DEFAULT_SCORE: f32 = 0.8;

/// One prediction as emitted by the model
#[derive(Debug, Deserialize)]
struct Prediction {
    label: String,
    #[serde(default, alias = "confidence")]
    score: Option<f32>,
    #[serde(default)]
    start: Option<usize>,
    #[serde(default)]
    end: Option<usize>,
    #[serde(default)]
    text: Option<String>,
}

/// Neural recognizer over a [`ModelBackend`]
pub struct ModelRecognizer<B> {
    backend: B,
    name: String,
    min_confidence: f32,
    label_map: BTreeMap<String, String>,
}

impl<B: ModelBackend> ModelRecognizer<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            name: "neural".to_string(),
            min_confidence: 0.5,
            label_map: BTreeMap::new(),
        }
    }

    /// Apply threshold and label map from configuration
    pub fn from_config(backend: B, config: &ExtractorConfig) -> Self {
        Self::new(backend)
            .with_min_confidence(config.neural_min_confidence)
            .with_label_map(config.label_map.clone())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_min_confidence(mut self, threshold: f32) -> Self {
        self.min_confidence = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_label_map(mut self, label_map: BTreeMap<String, String>) -> Self {
        self.label_map = label_map;
        self
    }

    /// Decode the backend's JSON into spans over `text`.
    ///
    /// Predictions without offsets are located by their `text`; repeated
    /// mentions resolve to successive occurrences. Predictions that cannot be
    /// placed, or score below the threshold, are skipped.
    pub fn decode(&self, response: &str, text: &str) -> Result<Vec<Span>> {
        let predictions: Vec<Prediction> = serde_json::from_str(response)?;
        let mut cursors: HashMap<String, usize> = HashMap::new();
        let mut spans = Vec::with_capacity(predictions.len());

        for prediction in predictions {
            let score = prediction.score.unwrap_or(DEFAULT_SCORE);
            if score.is_nan() || score < self.min_confidence {
                continue;
            }
            // Model scores are in (0, 1]
            let confidence = score.clamp(f32::MIN_POSITIVE, 1.0);

            let range = match (prediction.start, prediction.end, &prediction.text) {
                (Some(start), Some(end), _) => Some((start, end)),
                (_, _, Some(mention)) if !mention.is_empty() => {
                    let from = cursors.get(mention).copied().unwrap_or(0);
                    let found = text
                        .get(from..)
                        .and_then(|rest| rest.find(mention.as_str()))
                        .map(|offset| (from + offset, from + offset + mention.len()));
                    if let Some((_, end)) = found {
                        cursors.insert(mention.clone(), end);
                    }
                    found
                }
                _ => None,
            };

            let Some((start, end)) = range else {
                tracing::debug!(
                    "{}: could not place {} prediction {:?}",
                    self.name,
                    prediction.label,
                    prediction.text
                );
                continue;
            };

            let label = self
                .label_map
                .get(&prediction.label)
                .cloned()
                .unwrap_or(prediction.label);
            spans.push(Span::neural(start, end, label, confidence));
        }

        Ok(spans)
    }
}

impl<B: ModelBackend> NeuralRecognizer for ModelRecognizer<B> {
    fn extract(&self, text: &str) -> Result<Vec<Span>> {
        let response = self
            .backend
            .predict(text)
            .with_context(|| format!("model backend for '{}' failed", self.name))?;
        self.decode(&response, text)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Tests
// ============================================================================
