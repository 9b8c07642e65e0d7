use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use emoscope_core::{AnalysisTarget, EmotionClassifier, FaceDetector, OnnxOracle};
use emoscope_hw::{frame, Camera, FrameSource};
use tracing_subscriber::EnvFilter;

mod config;
mod pipeline;
mod present;
mod sink;

use config::{Config, DisplayMode};
use pipeline::{LabelAnchor, Pipeline, PipelineSettings};
use present::{Presenter, TerminalPresenter};
use sink::CsvSink;

/// Label position in full-frame mode, where there is no face box.
const FULL_FRAME_LABEL_ANCHOR: (i32, i32) = (50, 50);

#[derive(Parser)]
#[command(name = "emoscope", about = "Real-time facial emotion capture and CSV logging")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture from the camera, log emotions until `q` (default)
    Run,
    /// List V4L2 capture devices
    Devices,
    /// Open the camera, load models, grab one frame, print a status report
    Check,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config),
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
        Commands::Check => check(&config),
    }
}

fn load_oracle(config: &Config) -> Result<OnnxOracle> {
    let classifier = EmotionClassifier::load_with_labels(
        &config.classifier_model_path(),
        config.emotion_labels.clone(),
    )
    .context("loading emotion classifier")?;

    let detector = match config.analysis {
        AnalysisTarget::Faces => Some(
            FaceDetector::load(&config.detector_model_path()).context("loading face detector")?,
        ),
        AnalysisTarget::FullFrame => None,
    };

    Ok(OnnxOracle::new(config.analysis, detector, classifier)?)
}

fn presenter(config: &Config) -> Result<Box<dyn Presenter>> {
    match config.display {
        DisplayMode::Terminal => Ok(Box::new(TerminalPresenter::stdout())),
        #[cfg(feature = "display")]
        DisplayMode::Window => Ok(Box::new(present::WindowPresenter::open()?)),
        #[cfg(not(feature = "display"))]
        DisplayMode::Window => bail!("window display requires building with --features display"),
    }
}

fn run(config: &Config) -> Result<()> {
    let oracle = load_oracle(config)?;
    let presenter = presenter(config)?;

    let camera = Camera::open(&config.camera_device, config.capture_width, config.capture_height)
        .with_context(|| format!("opening camera {}", config.camera_device))?;
    let mut capture = camera.into_capture()?;

    if config.warmup_frames > 0 {
        tracing::info!(count = config.warmup_frames, "discarding warmup frames");
        for _ in 0..config.warmup_frames {
            if let Err(e) = capture.next_frame() {
                tracing::warn!(error = %e, "warmup frame failed");
            }
        }
    }

    let sink = CsvSink::create(&config.log_path)?;

    let settings = PipelineSettings {
        working_size: (config.frame_width, config.frame_height),
        confidence_threshold: config.confidence_threshold,
        smoothing_window: config.smoothing_frames,
        label_anchor: match config.analysis {
            AnalysisTarget::Faces => LabelAnchor::AboveBox,
            AnalysisTarget::FullFrame => {
                LabelAnchor::Fixed(FULL_FRAME_LABEL_ANCHOR.0, FULL_FRAME_LABEL_ANCHOR.1)
            }
        },
    };

    tracing::info!(
        threshold = settings.confidence_threshold,
        smoothing = settings.smoothing_window,
        analysis = ?oracle.target(),
        "capture loop running; press q to stop"
    );

    let mut pipeline = Pipeline::new(capture, oracle, sink, presenter, settings);
    let summary = pipeline.run()?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    let sink = pipeline.sink();
    println!("{} rows written to {}", sink.rows_written(), sink.path().display());
    Ok(())
}

/// `{"path", "loaded": true, ...details}` or `{"path", "loaded": false, "error"}`.
fn load_status<E: std::fmt::Display>(
    path: &str,
    loaded: Result<serde_json::Value, E>,
) -> serde_json::Value {
    match loaded {
        Ok(details) => {
            let mut status = serde_json::json!({ "path": path, "loaded": true });
            if let (Some(map), serde_json::Value::Object(details)) = (status.as_object_mut(), details) {
                map.extend(details);
            }
            status
        }
        Err(e) => serde_json::json!({ "path": path, "loaded": false, "error": e.to_string() }),
    }
}

fn check(config: &Config) -> Result<()> {
    let detector_path = config.detector_model_path();
    let detector = load_status(
        &detector_path,
        FaceDetector::load(&detector_path).map(|_| serde_json::json!({})),
    );

    let classifier_path = config.classifier_model_path();
    let classifier = load_status(
        &classifier_path,
        EmotionClassifier::load_with_labels(&classifier_path, config.emotion_labels.clone())
            .map(|c| serde_json::json!({ "labels": c.labels() })),
    );
    let models = serde_json::json!({ "detector": detector, "classifier": classifier });

    let camera = match Camera::open(&config.camera_device, config.capture_width, config.capture_height) {
        Ok(camera) => {
            let (width, height, fourcc) = (camera.width, camera.height, format!("{:?}", camera.fourcc));
            let grabbed = camera
                .into_capture()
                .and_then(|mut c| c.next_frame())
                .map(|f| {
                    serde_json::json!({
                        "brightness": f.avg_brightness(),
                        "dark": frame::is_dark_frame(&f.data, 0.95),
                    })
                })
                .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }));
            serde_json::json!({
                "device": config.camera_device,
                "width": width,
                "height": height,
                "fourcc": fourcc,
                "frame": grabbed,
            })
        }
        Err(e) => serde_json::json!({ "device": config.camera_device, "error": e.to_string() }),
    };

    let report = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "camera": camera,
        "models": models,
        "log_path": config.log_path,
        "analysis": format!("{:?}", config.analysis),
        "confidence_threshold": config.confidence_threshold,
        "smoothing_frames": config.smoothing_frames,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
