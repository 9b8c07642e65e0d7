//! Facial emotion classifier via ONNX Runtime.
//!
//! Runs a FER2013-style CNN on 48x48 grayscale face crops and returns raw
//! per-label scores. Validation into an [`EmotionVector`](crate::EmotionVector)
//! happens at the oracle boundary, not here.

use crate::detector::gray_image;
use crate::types::EmotionLabel;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const FER_INPUT_SIZE: u32 = 48;
const FER_SCALE: f32 = 255.0;
/// Raw outputs further than this from a distribution are treated as logits.
const DISTRIBUTION_EPSILON: f32 = 1e-3;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0}; place a 7-class FER ONNX model in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty face crop")]
    EmptyCrop,
    #[error("model produced {actual} scores for {expected} configured labels")]
    OutputSize { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// CNN emotion classifier.
pub struct EmotionClassifier {
    session: Session,
    /// Label name for each model output, in output order.
    labels: Vec<String>,
}

impl EmotionClassifier {
    /// Load the classifier, pairing outputs with the canonical label order.
    pub fn load(model_path: &str) -> Result<Self, ClassifierError> {
        let labels = EmotionLabel::ALL.iter().map(|l| l.as_str().to_string()).collect();
        Self::load_with_labels(model_path, labels)
    }

    /// Load the classifier with an explicit output label order.
    ///
    /// Labels are kept as given; unknown names surface later as malformed output.
    pub fn load_with_labels(model_path: &str, labels: Vec<String>) -> Result<Self, ClassifierError> {
        if !Path::new(model_path).exists() {
            return Err(ClassifierError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            labels = ?labels,
            "loaded emotion classifier"
        );

        Ok(Self { session, labels })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Classify the `(x, y, w, h)` region of a grayscale frame.
    pub fn classify(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        region: (u32, u32, u32, u32),
    ) -> Result<Vec<(String, f32)>, ClassifierError> {
        let image = gray_image(frame, width, height)
            .map_err(|e| ClassifierError::InferenceFailed(e.to_string()))?;
        let (x, y, w, h) = region;
        if w == 0 || h == 0 || x >= width || y >= height {
            return Err(ClassifierError::EmptyCrop);
        }
        let crop = imageops::crop_imm(&image, x, y, w, h).to_image();
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("scores: {e}")))?;

        if raw.len() != self.labels.len() {
            return Err(ClassifierError::OutputSize {
                expected: self.labels.len(),
                actual: raw.len(),
            });
        }

        let probs = to_distribution(raw);
        Ok(self.labels.iter().cloned().zip(probs).collect())
    }
}

/// Resize a face crop to the model input and scale to [0, 1] (NCHW, 1 channel).
fn preprocess(crop: &GrayImage) -> Array4<f32> {
    let resized = imageops::resize(crop, FER_INPUT_SIZE, FER_INPUT_SIZE, FilterType::Triangle);
    let size = FER_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = pixel.0[0] as f32 / FER_SCALE;
    }
    tensor
}

/// Pass probabilities through; softmax anything that is not a distribution.
fn to_distribution(raw: &[f32]) -> Vec<f32> {
    let in_range = raw.iter().all(|v| (0.0..=1.0).contains(v));
    let sum: f32 = raw.iter().sum();
    if in_range && (sum - 1.0).abs() <= DISTRIBUTION_EPSILON {
        return raw.to_vec();
    }
    softmax(raw)
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    if total > 0.0 && total.is_finite() {
        exps.into_iter().map(|e| e / total).collect()
    } else {
        // NaN input; leave it for validation to reject
        logits.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probabilities_pass_through() {
        let raw = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(to_distribution(&raw), raw.to_vec());
    }

    #[test]
    fn test_logits_are_softmaxed() {
        let raw = [2.0, 1.0, 0.1, -1.0, 0.0, 0.5, 3.0];
        let probs = to_distribution(&raw);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        // Order preserved
        let argmax = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i);
        assert_eq!(argmax, Some(6));
    }

    #[test]
    fn test_softmax_is_shift_invariant() {
        let a = softmax(&[1.0, 2.0, 3.0]);
        let b = softmax(&[1001.0, 1002.0, 1003.0]);
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_softmax_nan_left_for_validation() {
        let out = softmax(&[f32::NAN, 1.0]);
        assert!(out[0].is_nan());
    }

    #[test]
    fn test_preprocess_shape_and_scale() {
        let crop = GrayImage::from_pixel(96, 120, image::Luma([255]));
        let tensor = preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 1, 48, 48]);
        assert!(tensor.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }
}
