//! The face/emotion oracle boundary.
//!
//! Models are opaque and fallible. Everything they return passes through
//! [`normalize`] before the rest of the system sees it.

use crate::classifier::{ClassifierError, EmotionClassifier};
use crate::detector::{DetectorError, FaceDetector};
use crate::types::{BoundingBox, Detection, EmotionVector};
use thiserror::Error;

/// Per-frame oracle failure. Every variant is recoverable by skipping the frame.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("no face detected")]
    NoFace,
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("malformed oracle output: {0}")]
    Malformed(String),
}

impl From<DetectorError> for OracleError {
    fn from(e: DetectorError) -> Self {
        OracleError::Inference(format!("detector: {e}"))
    }
}

impl From<ClassifierError> for OracleError {
    fn from(e: ClassifierError) -> Self {
        match e {
            ClassifierError::EmptyCrop => OracleError::NoFace,
            ClassifierError::OutputSize { expected, actual } => OracleError::Malformed(format!(
                "{actual} scores for {expected} labels"
            )),
            other => OracleError::Inference(format!("classifier: {other}")),
        }
    }
}

/// Unvalidated model result for one face.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub scores: Vec<(String, f32)>,
}

/// External face/emotion model.
pub trait EmotionOracle {
    /// Analyze one grayscale frame. `Ok(vec![])` means no faces.
    fn analyze(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<RawDetection>, OracleError>;
}

/// Validate a raw model result into the fixed [`Detection`] shape.
pub fn normalize(raw: &RawDetection) -> Result<Detection, OracleError> {
    if raw.bbox.is_degenerate() {
        return Err(OracleError::Malformed(format!("degenerate box {:?}", raw.bbox)));
    }
    let emotions = EmotionVector::from_scores(raw.scores.iter().map(|(k, v)| (k.as_str(), *v)))
        .map_err(|e| OracleError::Malformed(e.to_string()))?;
    Ok(Detection { bbox: raw.bbox, emotions })
}

/// What the classifier looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisTarget {
    /// Detect faces, classify each crop.
    #[default]
    Faces,
    /// Classify the whole frame as a single face, no detector.
    FullFrame,
}

impl std::str::FromStr for AnalysisTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "faces" | "face" => Ok(AnalysisTarget::Faces),
            "full-frame" | "full_frame" | "frame" => Ok(AnalysisTarget::FullFrame),
            other => Err(format!("unknown analysis target {other:?} (expected faces or full-frame)")),
        }
    }
}

/// Production oracle: SCRFD face detection + CNN emotion classification.
pub struct OnnxOracle {
    detector: Option<FaceDetector>,
    classifier: EmotionClassifier,
}

impl OnnxOracle {
    /// Build an oracle for `target`. A detector is required for [`AnalysisTarget::Faces`].
    pub fn new(
        target: AnalysisTarget,
        detector: Option<FaceDetector>,
        classifier: EmotionClassifier,
    ) -> Result<Self, OracleError> {
        match (target, detector) {
            (AnalysisTarget::Faces, None) => Err(OracleError::Inference(
                "face analysis requires a face detector".into(),
            )),
            (AnalysisTarget::Faces, Some(d)) => Ok(Self { detector: Some(d), classifier }),
            (AnalysisTarget::FullFrame, _) => Ok(Self { detector: None, classifier }),
        }
    }

    pub fn target(&self) -> AnalysisTarget {
        if self.detector.is_some() {
            AnalysisTarget::Faces
        } else {
            AnalysisTarget::FullFrame
        }
    }
}

impl EmotionOracle for OnnxOracle {
    fn analyze(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<RawDetection>, OracleError> {
        let Some(detector) = self.detector.as_mut() else {
            let scores = self.classifier.classify(frame, width, height, (0, 0, width, height))?;
            return Ok(vec![RawDetection {
                bbox: BoundingBox::full_frame(width, height),
                scores,
            }]);
        };

        let faces = detector.detect(frame, width, height)?;
        tracing::trace!(faces = faces.len(), "faces detected");

        let classifier = &mut self.classifier;
        classify_faces(&faces, width, height, |region| {
            classifier.classify(frame, width, height, region)
        })
    }
}

/// Classify each face on its own. A failed face is dropped with a warning;
/// the call fails only when every face did.
fn classify_faces<F>(
    faces: &[BoundingBox],
    width: u32,
    height: u32,
    mut classify: F,
) -> Result<Vec<RawDetection>, OracleError>
where
    F: FnMut((u32, u32, u32, u32)) -> Result<Vec<(String, f32)>, ClassifierError>,
{
    let mut results = Vec::with_capacity(faces.len());
    let mut last_err = None;
    for face in faces {
        let Some(region) = face.clamp_to(width, height) else {
            tracing::debug!(?face, "face box outside frame, skipping");
            continue;
        };
        match classify(region) {
            Ok(scores) => results.push(RawDetection { bbox: *face, scores }),
            Err(e) => {
                tracing::warn!(error = %e, ?face, "face classification failed, skipping face");
                last_err = Some(OracleError::from(e));
            }
        }
    }
    match last_err {
        Some(e) if results.is_empty() => Err(e),
        _ => Ok(results),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EmotionLabel;

    fn bbox() -> BoundingBox {
        BoundingBox { x: 10.0, y: 20.0, width: 30.0, height: 40.0, confidence: 0.9 }
    }

    fn scores(values: [f32; 7]) -> Vec<(String, f32)> {
        EmotionLabel::ALL
            .iter()
            .zip(values)
            .map(|(l, v)| (l.as_str().to_string(), v))
            .collect()
    }

    #[test]
    fn test_normalize_valid() {
        let raw = RawDetection {
            bbox: bbox(),
            scores: scores([0.05, 0.05, 0.05, 0.7, 0.05, 0.05, 0.05]),
        };
        let det = normalize(&raw).unwrap();
        assert_eq!(det.bbox, bbox());
        assert_eq!(det.emotions.dominant().0, EmotionLabel::Happy);
    }

    #[test]
    fn test_normalize_missing_key_is_malformed() {
        let mut s = scores([0.05, 0.05, 0.05, 0.7, 0.05, 0.05, 0.05]);
        s.pop();
        let raw = RawDetection { bbox: bbox(), scores: s };
        assert!(matches!(normalize(&raw), Err(OracleError::Malformed(_))));
    }

    #[test]
    fn test_normalize_extra_key_is_malformed() {
        let mut s = scores([0.05, 0.05, 0.05, 0.7, 0.05, 0.05, 0.05]);
        s.push(("contempt".to_string(), 0.0));
        let raw = RawDetection { bbox: bbox(), scores: s };
        assert!(matches!(normalize(&raw), Err(OracleError::Malformed(_))));
    }

    #[test]
    fn test_normalize_degenerate_box_is_malformed() {
        let raw = RawDetection {
            bbox: BoundingBox { width: -1.0, ..bbox() },
            scores: scores([0.05, 0.05, 0.05, 0.7, 0.05, 0.05, 0.05]),
        };
        assert!(matches!(normalize(&raw), Err(OracleError::Malformed(_))));
    }

    #[test]
    fn test_failed_face_does_not_drop_others() {
        let faces = [bbox(), BoundingBox { x: 50.0, ..bbox() }];
        let out = classify_faces(&faces, 100, 100, |(x, ..)| {
            if x == 50 {
                Err(ClassifierError::InferenceFailed("bad crop".into()))
            } else {
                Ok(scores([0.05, 0.05, 0.05, 0.7, 0.05, 0.05, 0.05]))
            }
        })
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox, bbox());
    }

    #[test]
    fn test_all_faces_failing_fails_the_call() {
        let out = classify_faces(&[bbox()], 100, 100, |_| Err(ClassifierError::EmptyCrop));
        assert!(matches!(out, Err(OracleError::NoFace)));

        // Boxes outside the frame are skipped, not errors
        let outside = BoundingBox { x: 500.0, y: 500.0, ..bbox() };
        let out = classify_faces(&[outside], 100, 100, |_| unreachable!());
        assert!(out.unwrap().is_empty());
    }

    #[test]
    fn test_classifier_errors_map_to_oracle_errors() {
        assert!(matches!(OracleError::from(ClassifierError::EmptyCrop), OracleError::NoFace));
        assert!(matches!(
            OracleError::from(ClassifierError::OutputSize { expected: 7, actual: 8 }),
            OracleError::Malformed(_)
        ));
        assert!(matches!(
            OracleError::from(ClassifierError::InferenceFailed("x".into())),
            OracleError::Inference(_)
        ));
    }

    #[test]
    fn test_analysis_target_parse() {
        assert_eq!("faces".parse::<AnalysisTarget>(), Ok(AnalysisTarget::Faces));
        assert_eq!("Full-Frame".parse::<AnalysisTarget>(), Ok(AnalysisTarget::FullFrame));
        assert!("both".parse::<AnalysisTarget>().is_err());
    }
}
