//! emoscope-core: face detection, emotion classification, and smoothing.
//!
//! Uses SCRFD for face detection and a FER2013-style CNN for emotion
//! classification, both running via ONNX Runtime for CPU inference.

pub mod classifier;
pub mod detector;
pub mod oracle;
pub mod smoothing;
pub mod types;

pub use classifier::EmotionClassifier;
pub use detector::FaceDetector;
pub use oracle::{normalize, AnalysisTarget, EmotionOracle, OnnxOracle, OracleError, RawDetection};
pub use smoothing::{passes_confidence_gate, SmoothingFilter};
pub use types::{BoundingBox, Detection, EmotionLabel, EmotionVector};

use std::path::PathBuf;

/// SCRFD face detection model file name.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// Emotion classification model file name.
pub const CLASSIFIER_MODEL_FILE: &str = "emotion_fer2013.onnx";

/// Default model directory: `$XDG_DATA_HOME/emoscope/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("emoscope/models")
}
