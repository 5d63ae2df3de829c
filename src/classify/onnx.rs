use super::preprocess::{Preprocessor, TensorLayout};
use super::{is_distribution, softmax, ClassificationResult, Classifier};
use crate::error::InferenceError;
use anyhow::{anyhow, Result};
use image::RgbImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

/// Image classifier running an ONNX model through ONNX Runtime.
///
/// The model must take a single float image tensor normalized to [0, 1]
/// and return one score per label. Raw logits are passed through softmax;
/// outputs that already form a distribution are used as-is.
pub struct OnnxClassifier {
    session: Session,
    preprocessor: Preprocessor,
    layout: TensorLayout,
    labels: Vec<String>,
}

impl OnnxClassifier {
    /// Load a classifier from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `labels` - Class names in model output order
    /// * `input_size` - Square input edge in pixels
    /// * `layout` - Input tensor channel ordering
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        labels: Vec<String>,
        input_size: u32,
        layout: TensorLayout,
    ) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading classifier from {}", path.display());

        let session = Session::builder()
            .map_err(|e| anyhow!("{e}"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("{e}"))?
            .with_intra_threads(4)
            .map_err(|e| anyhow!("{e}"))?
            .commit_from_file(path)
            .map_err(|e| anyhow!("Failed to load model from {}: {e}", path.display()))?;

        tracing::info!("Classifier loaded with {} classes", labels.len());

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(input_size, input_size),
            layout,
            labels,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn classify(&mut self, input: &RgbImage) -> Result<ClassificationResult, InferenceError> {
        let _span = tracing::debug_span!("onnx_classify").entered();

        let tensor = self.preprocessor.to_tensor(input, self.layout);
        let shape = [
            tensor.shape()[0],
            tensor.shape()[1],
            tensor.shape()[2],
            tensor.shape()[3],
        ];
        let value = Tensor::from_array((shape, tensor.into_raw_vec()))
            .map_err(|e| anyhow!("Failed to build input tensor: {e}"))?;

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![value])
            .map_err(|e| anyhow!("Failed to run inference: {e}"))?;
        drop(_infer_span);

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow!("Failed to read model output: {e}"))?;

        let probabilities = if is_distribution(raw) {
            raw.to_vec()
        } else {
            softmax(raw)
        };

        ClassificationResult::from_probabilities(&self.labels, &probabilities)
    }

    fn input_size(&self) -> (u32, u32) {
        self.preprocessor.target_size()
    }
}
