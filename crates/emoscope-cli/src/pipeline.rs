//! The capture/processing loop.
//!
//! One synchronous iteration per frame: grab, downscale, analyze, gate,
//! smooth, log, present. The loop runs until the source fails or the user
//! presses the stop key; a bad frame never ends it.

use crate::present::{Control, Overlay, Presenter};
use crate::sink::{LogRecord, RecordSink, SinkError};
use emoscope_core::{normalize, passes_confidence_gate, Detection, EmotionOracle, SmoothingFilter};
use emoscope_hw::{CameraError, Frame, FrameSource};
use serde::Serialize;
use thiserror::Error;

/// Vertical offset of a label above its box.
const LABEL_OFFSET_Y: i32 = 10;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("emotion log: {0}")]
    Sink(#[from] SinkError),
}

/// Where overlay labels are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelAnchor {
    /// Box drawn, label just above its top-left corner.
    AboveBox,
    /// No box, label at a fixed point.
    Fixed(i32, i32),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Working resolution (width, height).
    pub working_size: (u32, u32),
    pub confidence_threshold: f32,
    /// 0 disables smoothing.
    pub smoothing_window: usize,
    pub label_anchor: LabelAnchor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    SourceExhausted,
    DeviceLost(String),
    UserRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped(StopReason),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub frames: u64,
    /// Frames whose analysis failed outright.
    pub frames_skipped: u64,
    pub detections: u64,
    /// Faces dropped because the model output for them was malformed.
    pub malformed: u64,
    /// Detections below the confidence threshold.
    pub rejected: u64,
    pub rows_written: u64,
    pub stop_reason: Option<StopReason>,
}

pub struct Pipeline<S, O, K, P> {
    /// `None` once released.
    source: Option<S>,
    oracle: O,
    sink: K,
    presenter: P,
    filter: Option<SmoothingFilter>,
    settings: PipelineSettings,
    state: LoopState,
    summary: RunSummary,
}

impl<S, O, K, P> Pipeline<S, O, K, P>
where
    S: FrameSource,
    O: EmotionOracle,
    K: RecordSink,
    P: Presenter,
{
    /// Starts in [`LoopState::Running`]; `source` must already be open.
    pub fn new(source: S, oracle: O, sink: K, presenter: P, settings: PipelineSettings) -> Self {
        let filter = (settings.smoothing_window > 0).then(|| SmoothingFilter::new(settings.smoothing_window));
        Self {
            source: Some(source),
            oracle,
            sink,
            presenter,
            filter,
            settings,
            state: LoopState::Running,
            summary: RunSummary::default(),
        }
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Run one iteration. A no-op once stopped.
    pub fn step(&mut self) -> Result<LoopState, PipelineError> {
        if let LoopState::Stopped(_) = self.state {
            return Ok(self.state.clone());
        }
        let Some(source) = self.source.as_mut() else {
            return Ok(self.stop(StopReason::SourceExhausted));
        };

        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(CameraError::EndOfStream) => {
                tracing::info!("frame source exhausted");
                return Ok(self.stop(StopReason::SourceExhausted));
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to grab frame");
                return Ok(self.stop(StopReason::DeviceLost(e.to_string())));
            }
        };
        self.summary.frames += 1;

        let (w, h) = self.settings.working_size;
        let frame = match frame.downscale(w, h) {
            Ok(small) => small,
            Err(e) => {
                tracing::warn!(error = %e, seq = frame.sequence, "downscale failed, showing raw frame");
                self.summary.frames_skipped += 1;
                return Ok(self.present(&frame, &[]));
            }
        };

        let detections = self.analyze(&frame);
        let mut overlays = Vec::with_capacity(detections.len());

        for det in &detections {
            self.summary.detections += 1;
            let Some((dominant, p)) = passes_confidence_gate(&det.emotions, self.settings.confidence_threshold) else {
                self.summary.rejected += 1;
                tracing::debug!(
                    seq = frame.sequence,
                    dominant = %det.emotions.dominant().0,
                    confidence = det.emotions.dominant().1,
                    "below confidence threshold"
                );
                continue;
            };

            let label = match self.filter.as_mut() {
                Some(filter) => filter.observe(dominant),
                None => dominant,
            };
            tracing::trace!(seq = frame.sequence, %dominant, confidence = p, %label, "accepted");

            self.sink.append(&LogRecord::now(label, det.emotions))?;
            self.summary.rows_written += 1;

            overlays.push(self.overlay(det, label));
        }

        Ok(self.present(&frame, &overlays))
    }

    /// Step until stopped, then release the source and finalize the sink.
    ///
    /// Cleanup happens on every exit path, including a sink failure.
    pub fn run(&mut self) -> Result<RunSummary, PipelineError> {
        let outcome = loop {
            match self.step() {
                Ok(LoopState::Running) => continue,
                Ok(LoopState::Stopped(_)) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.source = None;
        let finished = self.sink.finish();

        outcome?;
        finished?;

        tracing::info!(
            frames = self.summary.frames,
            skipped = self.summary.frames_skipped,
            rows = self.summary.rows_written,
            reason = ?self.summary.stop_reason,
            "capture loop stopped"
        );
        Ok(self.summary.clone())
    }

    /// Query the oracle and validate each face on its own.
    ///
    /// An oracle failure skips the frame; a malformed face skips only that face.
    fn analyze(&mut self, frame: &Frame) -> Vec<Detection> {
        let raw = match self.oracle.analyze(&frame.data, frame.width, frame.height) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, seq = frame.sequence, "skipping frame");
                self.summary.frames_skipped += 1;
                return Vec::new();
            }
        };

        let mut detections = Vec::with_capacity(raw.len());
        for r in &raw {
            match normalize(r) {
                Ok(det) => detections.push(det),
                Err(e) => {
                    tracing::warn!(error = %e, seq = frame.sequence, "skipping face");
                    self.summary.malformed += 1;
                }
            }
        }
        detections
    }

    fn overlay(&self, det: &Detection, label: emoscope_core::EmotionLabel) -> Overlay {
        match self.settings.label_anchor {
            LabelAnchor::AboveBox => Overlay {
                bbox: Some(det.bbox),
                label,
                anchor: (det.bbox.x as i32, det.bbox.y as i32 - LABEL_OFFSET_Y),
            },
            LabelAnchor::Fixed(x, y) => Overlay {
                bbox: None,
                label,
                anchor: (x, y),
            },
        }
    }

    fn present(&mut self, frame: &Frame, overlays: &[Overlay]) -> LoopState {
        match self.presenter.present(frame, overlays) {
            Ok(Control::Stop) => {
                tracing::info!("stop requested");
                self.stop(StopReason::UserRequested)
            }
            Ok(Control::Continue) => LoopState::Running,
            Err(e) => {
                tracing::warn!(error = %e, "presentation failed");
                LoopState::Running
            }
        }
    }

    fn stop(&mut self, reason: StopReason) -> LoopState {
        self.summary.stop_reason = Some(reason.clone());
        self.state = LoopState::Stopped(reason);
        self.state.clone()
    }
}
