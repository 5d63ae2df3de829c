mod preprocess;
#[cfg(feature = "onnx")]
mod onnx;

pub use preprocess::{Preprocessor, TensorLayout};
#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;

use crate::error::InferenceError;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How far a probability vector may drift from summing to 1.
const DISTRIBUTION_TOLERANCE: f32 = 1e-2;

/// Trait for image classifiers
///
/// Implementations are treated as blocking and non-reentrant: the scheduler
/// owns the classifier on a single worker thread and never calls it
/// concurrently.
pub trait Classifier: Send {
    /// Classify a frame already resized to [`Classifier::input_size`]
    fn classify(&mut self, input: &RgbImage) -> Result<ClassificationResult, InferenceError>;

    /// Get the model's expected input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);
}

/// Outcome of one successful classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Highest-scoring class
    pub label: String,
    /// Score of `label`, in [0, 1]
    pub confidence: f32,
    /// Full softmax distribution
    pub scores: BTreeMap<String, f32>,
    pub produced_at: DateTime<Utc>,
}

impl ClassificationResult {
    /// Build a result from a probability distribution over `labels`.
    ///
    /// The distribution must be non-negative, finite and sum to ~1. The
    /// label is the argmax; ties go to the earlier class.
    pub fn from_probabilities(
        labels: &[String],
        probabilities: &[f32],
    ) -> Result<Self, InferenceError> {
        if labels.len() != probabilities.len() {
            return Err(InferenceError::InvalidOutput(format!(
                "{} scores for {} labels",
                probabilities.len(),
                labels.len()
            )));
        }
        if !is_distribution(probabilities) {
            return Err(InferenceError::InvalidOutput(
                "scores are not a probability distribution".to_string(),
            ));
        }

        let mut best = 0;
        for (i, &p) in probabilities.iter().enumerate() {
            if p > probabilities[best] {
                best = i;
            }
        }

        let scores: BTreeMap<String, f32> = labels
            .iter()
            .cloned()
            .zip(probabilities.iter().copied())
            .collect();
        if scores.len() != labels.len() {
            return Err(InferenceError::InvalidOutput("duplicate class labels".to_string()));
        }

        Ok(Self {
            label: labels[best].clone(),
            confidence: probabilities[best],
            scores,
            produced_at: Utc::now(),
        })
    }

    /// Label formatted for people: `leaf_curl` becomes `Leaf Curl`.
    pub fn display_label(&self) -> String {
        self.label
            .split('_')
            .filter(|w| !w.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Whether `values` already look like softmax output.
pub fn is_distribution(values: &[f32]) -> bool {
    if values.is_empty() || values.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return false;
    }
    let sum: f32 = values.iter().sum();
    (sum - 1.0).abs() <= DISTRIBUTION_TOLERANCE
}
