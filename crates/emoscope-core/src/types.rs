use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tolerance on the probability sum of a valid [`EmotionVector`].
pub const PROBABILITY_SUM_TOLERANCE: f32 = 0.05;

/// The closed emotion vocabulary shared by the classifier, the smoothing
/// filter, and the CSV log.
///
/// Declaration order is the canonical order: it is the classifier's default
/// output order and the CSV column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl EmotionLabel {
    pub const COUNT: usize = 7;

    /// All labels in canonical order.
    pub const ALL: [EmotionLabel; Self::COUNT] = [
        EmotionLabel::Angry,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Surprise,
        EmotionLabel::Neutral,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Angry => "angry",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Surprise => "surprise",
            EmotionLabel::Neutral => "neutral",
        }
    }

    /// Position in canonical order.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown emotion label: {0:?}")]
pub struct UnknownLabel(pub String);

impl FromStr for EmotionLabel {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        EmotionLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == wanted)
            .ok_or_else(|| UnknownLabel(s.to_string()))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum VectorError {
    #[error("unknown emotion key {0:?}")]
    UnknownKey(String),
    #[error("duplicate emotion key {0}")]
    DuplicateKey(EmotionLabel),
    #[error("missing emotion key {0}")]
    MissingKey(EmotionLabel),
    #[error("probability for {label} is not in [0, 1]: {value}")]
    OutOfRange { label: EmotionLabel, value: f32 },
    #[error("probabilities sum to {0}, expected ~1.0")]
    BadSum(f32),
}

/// Probability distribution over the seven emotions of one detection.
///
/// Only constructible through validation, so every instance has exactly the
/// seven known keys, each in [0, 1], summing to ~1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmotionVector {
    probs: [f32; EmotionLabel::COUNT],
}

impl EmotionVector {
    /// Build a vector from `(label name, probability)` pairs in any order.
    pub fn from_scores<'a, I>(scores: I) -> Result<Self, VectorError>
    where
        I: IntoIterator<Item = (&'a str, f32)>,
    {
        let mut slots: [Option<f32>; EmotionLabel::COUNT] = [None; EmotionLabel::COUNT];

        for (name, value) in scores {
            let label: EmotionLabel = name
                .parse()
                .map_err(|_| VectorError::UnknownKey(name.to_string()))?;
            let slot = &mut slots[label.index()];
            if slot.is_some() {
                return Err(VectorError::DuplicateKey(label));
            }
            *slot = Some(value);
        }

        let mut probs = [0.0f32; EmotionLabel::COUNT];
        for label in EmotionLabel::ALL {
            probs[label.index()] = slots[label.index()].ok_or(VectorError::MissingKey(label))?;
        }
        Self::from_canonical(probs)
    }

    /// Build a vector from probabilities already in canonical order.
    pub fn from_canonical(probs: [f32; EmotionLabel::COUNT]) -> Result<Self, VectorError> {
        for label in EmotionLabel::ALL {
            let value = probs[label.index()];
            // NaN fails both comparisons
            if !(0.0..=1.0).contains(&value) {
                return Err(VectorError::OutOfRange { label, value });
            }
        }

        let sum: f32 = probs.iter().sum();
        if (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
            return Err(VectorError::BadSum(sum));
        }

        Ok(Self { probs })
    }

    pub fn get(&self, label: EmotionLabel) -> f32 {
        self.probs[label.index()]
    }

    /// Probabilities in canonical order.
    pub fn as_array(&self) -> &[f32; EmotionLabel::COUNT] {
        &self.probs
    }

    /// The most probable label and its probability.
    ///
    /// Equal probabilities resolve to the earliest label in canonical order.
    pub fn dominant(&self) -> (EmotionLabel, f32) {
        let mut best = (EmotionLabel::ALL[0], self.probs[0]);
        for label in EmotionLabel::ALL.into_iter().skip(1) {
            let p = self.probs[label.index()];
            if p > best.1 {
                best = (label, p);
            }
        }
        best
    }
}

/// Bounding box for a detected face, in working-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Box covering a whole `width` x `height` frame.
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            confidence: 1.0,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        ![self.x, self.y, self.width, self.height].iter().all(|v| v.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
    }

    /// Integer pixel rectangle `(x, y, w, h)` clamped to a `width` x `height` frame.
    ///
    /// Returns `None` when nothing of the box lies inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.floor().clamp(0.0, width as f32) as u32;
        let y0 = self.y.floor().clamp(0.0, height as f32) as u32;
        let x1 = (self.x + self.width).ceil().clamp(0.0, width as f32) as u32;
        let y1 = (self.y + self.height).ceil().clamp(0.0, height as f32) as u32;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// One validated face/emotion result for a single frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub emotions: EmotionVector,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_except(label: EmotionLabel, p: f32) -> [f32; 7] {
        let rest = (1.0 - p) / 6.0;
        let mut probs = [rest; 7];
        probs[label.index()] = p;
        probs
    }

    #[test]
    fn test_label_roundtrip_strings() {
        for label in EmotionLabel::ALL {
            assert_eq!(label.as_str().parse::<EmotionLabel>().unwrap(), label);
        }
        assert_eq!(" Happy ".parse::<EmotionLabel>().unwrap(), EmotionLabel::Happy);
        assert!("contempt".parse::<EmotionLabel>().is_err());
    }

    #[test]
    fn test_canonical_order_matches_indices() {
        for (i, label) in EmotionLabel::ALL.iter().enumerate() {
            assert_eq!(label.index(), i);
        }
    }

    #[test]
    fn test_from_scores_any_order() {
        let scores = [
            ("neutral", 0.1),
            ("happy", 0.7),
            ("sad", 0.05),
            ("angry", 0.05),
            ("fear", 0.03),
            ("disgust", 0.02),
            ("surprise", 0.05),
        ];
        let v = EmotionVector::from_scores(scores).unwrap();
        assert!((v.get(EmotionLabel::Happy) - 0.7).abs() < 1e-6);
        assert_eq!(v.dominant().0, EmotionLabel::Happy);
    }

    #[test]
    fn test_from_scores_missing_key() {
        let scores = [
            ("angry", 0.2),
            ("disgust", 0.2),
            ("fear", 0.2),
            ("happy", 0.2),
            ("sad", 0.1),
            ("surprise", 0.1),
        ];
        assert_eq!(
            EmotionVector::from_scores(scores),
            Err(VectorError::MissingKey(EmotionLabel::Neutral))
        );
    }

    #[test]
    fn test_from_scores_unknown_and_duplicate_keys() {
        let unknown = [("contempt", 1.0)];
        assert!(matches!(
            EmotionVector::from_scores(unknown),
            Err(VectorError::UnknownKey(k)) if k == "contempt"
        ));

        let dup = [("happy", 0.5), ("happy", 0.5)];
        assert_eq!(
            EmotionVector::from_scores(dup),
            Err(VectorError::DuplicateKey(EmotionLabel::Happy))
        );
    }

    #[test]
    fn test_rejects_out_of_range_and_nan() {
        let mut probs = uniform_except(EmotionLabel::Sad, 0.4);
        probs[0] = -0.1;
        assert!(matches!(
            EmotionVector::from_canonical(probs),
            Err(VectorError::OutOfRange { label: EmotionLabel::Angry, .. })
        ));

        let mut probs = uniform_except(EmotionLabel::Sad, 0.4);
        probs[3] = f32::NAN;
        assert!(matches!(
            EmotionVector::from_canonical(probs),
            Err(VectorError::OutOfRange { label: EmotionLabel::Happy, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_sum() {
        // Percent-scaled output is not a distribution
        assert!(matches!(
            EmotionVector::from_canonical([0.5; 7]),
            Err(VectorError::BadSum(_))
        ));
    }

    #[test]
    fn test_dominant_tie_prefers_canonical_order() {
        let v = EmotionVector::from_canonical([0.0, 0.0, 0.0, 0.5, 0.5, 0.0, 0.0]).unwrap();
        assert_eq!(v.dominant(), (EmotionLabel::Happy, 0.5));
    }

    #[test]
    fn test_bbox_clamp() {
        let b = BoundingBox { x: -10.0, y: 5.0, width: 50.0, height: 500.0, confidence: 0.9 };
        assert_eq!(b.clamp_to(100, 100), Some((0, 5, 40, 95)));

        let outside = BoundingBox { x: 200.0, y: 200.0, width: 10.0, height: 10.0, confidence: 0.9 };
        assert_eq!(outside.clamp_to(100, 100), None);
    }

    #[test]
    fn test_bbox_degenerate() {
        let ok = BoundingBox::full_frame(480, 360);
        assert!(!ok.is_degenerate());
        let zero = BoundingBox { width: 0.0, ..ok };
        assert!(zero.is_degenerate());
        let nan = BoundingBox { x: f32::NAN, ..ok };
        assert!(nan.is_degenerate());
    }
}
