use emoscope_core::smoothing::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_SMOOTHING_FRAMES};
use emoscope_core::{AnalysisTarget, EmotionLabel};
use std::path::PathBuf;
use std::str::FromStr;

/// How the live overlay is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Label changes printed to stdout; `q` on stdin stops.
    Terminal,
    /// OpenCV window (requires the `display` feature).
    Window,
}

/// Runtime configuration, loaded once from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0, camera index 0).
    pub camera_device: String,
    /// Capture size requested from the driver.
    pub capture_width: u32,
    pub capture_height: u32,
    /// Working resolution frames are downscaled to before analysis.
    pub frame_width: u32,
    pub frame_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// CSV output, truncated on every run.
    pub log_path: PathBuf,
    /// Minimum dominant probability for a detection to be accepted.
    pub confidence_threshold: f32,
    /// Smoothing window length; 0 logs raw labels.
    pub smoothing_frames: usize,
    pub analysis: AnalysisTarget,
    /// Classifier output order.
    pub emotion_labels: Vec<String>,
    /// Frames discarded after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    pub display: DisplayMode,
}

impl Config {
    /// Load configuration from `EMOSCOPE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let analysis = match get("EMOSCOPE_ANALYSIS") {
            Some(v) => v.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, "ignoring EMOSCOPE_ANALYSIS");
                AnalysisTarget::default()
            }),
            None => AnalysisTarget::default(),
        };

        let display = match get("EMOSCOPE_DISPLAY").as_deref().map(str::trim) {
            Some("terminal") => DisplayMode::Terminal,
            Some("window") => DisplayMode::Window,
            Some(other) => {
                tracing::warn!(value = other, "unknown EMOSCOPE_DISPLAY, using default");
                default_display()
            }
            None => default_display(),
        };

        let emotion_labels = get("EMOSCOPE_EMOTION_LABELS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|labels| !labels.is_empty())
            .unwrap_or_else(|| EmotionLabel::ALL.iter().map(|l| l.as_str().to_string()).collect());

        let confidence_threshold = parse_or(&get, "EMOSCOPE_CONFIDENCE_THRESHOLD", DEFAULT_CONFIDENCE_THRESHOLD);

        Self {
            camera_device: get("EMOSCOPE_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            capture_width: parse_or(&get, "EMOSCOPE_CAPTURE_WIDTH", 640u32),
            capture_height: parse_or(&get, "EMOSCOPE_CAPTURE_HEIGHT", 480u32),
            frame_width: parse_or(&get, "EMOSCOPE_FRAME_WIDTH", 480u32).max(1),
            frame_height: parse_or(&get, "EMOSCOPE_FRAME_HEIGHT", 360u32).max(1),
            model_dir: get("EMOSCOPE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(emoscope_core::default_model_dir),
            log_path: get("EMOSCOPE_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("emotions_log.csv")),
            confidence_threshold: if confidence_threshold.is_nan() {
                DEFAULT_CONFIDENCE_THRESHOLD
            } else {
                confidence_threshold.clamp(0.0, 1.0)
            },
            smoothing_frames: parse_or(&get, "EMOSCOPE_SMOOTHING_FRAMES", DEFAULT_SMOOTHING_FRAMES),
            analysis,
            emotion_labels,
            warmup_frames: parse_or(&get, "EMOSCOPE_WARMUP_FRAMES", 4usize),
            display,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(emoscope_core::DETECTOR_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the emotion classification model.
    pub fn classifier_model_path(&self) -> String {
        self.model_dir
            .join(emoscope_core::CLASSIFIER_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    get(key).and_then(|v| parse_value(key, &v)).unwrap_or(default)
}

/// Parse one variable, warning when the value is unusable.
fn parse_value<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %value, "invalid value, using default");
            None
        }
    }
}

fn default_display() -> DisplayMode {
    if cfg!(feature = "display") {
        DisplayMode::Window
    } else {
        DisplayMode::Terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config_from(&[]);
        assert_eq!(cfg.camera_device, "/dev/video0");
        assert_eq!((cfg.frame_width, cfg.frame_height), (480, 360));
        assert_eq!(cfg.log_path, PathBuf::from("emotions_log.csv"));
        assert!((cfg.confidence_threshold - 0.6).abs() < 1e-6);
        assert_eq!(cfg.smoothing_frames, 5);
        assert_eq!(cfg.analysis, AnalysisTarget::Faces);
        assert_eq!(cfg.emotion_labels.len(), 7);
        assert_eq!(cfg.emotion_labels[0], "angry");
        assert_eq!(cfg.warmup_frames, 4);
    }

    #[test]
    fn test_overrides() {
        let cfg = config_from(&[
            ("EMOSCOPE_CAMERA_DEVICE", "/dev/video2"),
            ("EMOSCOPE_CONFIDENCE_THRESHOLD", "0.75"),
            ("EMOSCOPE_SMOOTHING_FRAMES", "0"),
            ("EMOSCOPE_ANALYSIS", "full-frame"),
            ("EMOSCOPE_EMOTION_LABELS", "Neutral, happy,sad,surprise,fear,disgust,angry"),
            ("EMOSCOPE_DISPLAY", "terminal"),
            ("EMOSCOPE_MODEL_DIR", "/opt/models"),
        ]);
        assert_eq!(cfg.camera_device, "/dev/video2");
        assert!((cfg.confidence_threshold - 0.75).abs() < 1e-6);
        assert_eq!(cfg.smoothing_frames, 0);
        assert_eq!(cfg.analysis, AnalysisTarget::FullFrame);
        assert_eq!(cfg.emotion_labels[0], "neutral");
        assert_eq!(cfg.display, DisplayMode::Terminal);
        assert_eq!(cfg.detector_model_path(), "/opt/models/det_10g.onnx");
        assert_eq!(cfg.classifier_model_path(), "/opt/models/emotion_fer2013.onnx");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let cfg = config_from(&[
            ("EMOSCOPE_CONFIDENCE_THRESHOLD", "high"),
            ("EMOSCOPE_SMOOTHING_FRAMES", "-3"),
            ("EMOSCOPE_ANALYSIS", "everything"),
            ("EMOSCOPE_EMOTION_LABELS", " , "),
            ("EMOSCOPE_FRAME_WIDTH", "0"),
        ]);
        assert!((cfg.confidence_threshold - 0.6).abs() < 1e-6);
        assert_eq!(cfg.smoothing_frames, 5);
        assert_eq!(cfg.analysis, AnalysisTarget::Faces);
        assert_eq!(cfg.emotion_labels.len(), 7);
        assert_eq!(cfg.frame_width, 1);
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value::<u32>("EMOSCOPE_WARMUP_FRAMES", " 12 "), Some(12));
        assert_eq!(parse_value::<u32>("EMOSCOPE_WARMUP_FRAMES", "twelve"), None);
        assert_eq!(parse_value::<f32>("EMOSCOPE_CONFIDENCE_THRESHOLD", ""), None);

        let get = |k: &str| (k == "EMOSCOPE_WARMUP_FRAMES").then(|| "lots".to_string());
        assert_eq!(parse_or(&get, "EMOSCOPE_WARMUP_FRAMES", 4usize), 4);
        assert_eq!(parse_or(&get, "EMOSCOPE_SMOOTHING_FRAMES", 5usize), 5);
    }

    #[test]
    fn test_threshold_clamped() {
        let cfg = config_from(&[("EMOSCOPE_CONFIDENCE_THRESHOLD", "1.5")]);
        assert_eq!(cfg.confidence_threshold, 1.0);
    }
}
