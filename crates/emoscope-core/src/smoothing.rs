//! Temporal smoothing of per-frame emotion labels.
//!
//! Single-frame predictions flicker. The filter keeps the last N accepted
//! dominant labels and reports the most frequent one.

use crate::types::{EmotionLabel, EmotionVector};
use std::collections::VecDeque;

pub const DEFAULT_SMOOTHING_FRAMES: usize = 5;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Majority vote over a bounded FIFO window of recent labels.
#[derive(Debug, Clone)]
pub struct SmoothingFilter {
    window: VecDeque<EmotionLabel>,
    capacity: usize,
}

impl SmoothingFilter {
    /// A zero capacity is treated as 1 (no smoothing).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Record `label` and return the most frequent label in the window.
    ///
    /// Ties go to the label that reaches the maximum count first when the
    /// window is read oldest to newest.
    pub fn observe(&mut self, label: EmotionLabel) -> EmotionLabel {
        self.window.push_back(label);
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }

        let mut counts = [0usize; EmotionLabel::COUNT];
        for l in &self.window {
            counts[l.index()] += 1;
        }

        let mut best = label;
        let mut best_count = 0;
        for &l in &self.window {
            let c = counts[l.index()];
            if c > best_count {
                best = l;
                best_count = c;
            }
        }
        best
    }

    /// Window contents, oldest first.
    pub fn window(&self) -> impl ExactSizeIterator<Item = EmotionLabel> + '_ {
        self.window.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }
}

impl Default for SmoothingFilter {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING_FRAMES)
    }
}

/// Accept a detection only when its dominant probability reaches `threshold`.
///
/// The boundary is inclusive. Returns the dominant label and its probability.
pub fn passes_confidence_gate(
    emotions: &EmotionVector,
    threshold: f32,
) -> Option<(EmotionLabel, f32)> {
    let (label, p) = emotions.dominant();
    (p >= threshold).then_some((label, p))
}
