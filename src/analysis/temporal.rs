//! Temporal Consistency Tracker
//!
//! Follows the per-frame subtitle candidate through a video's sampled frames,
//! which must arrive in timestamp order. Consecutive candidates are compared
//! by box overlap and normalized text similarity, and runs of consecutive
//! frames with a candidate are recorded. Run statistics separate one long
//! static caption (a single run) from intermittent dialogue (several runs),
//! which a flat persistence ratio cannot.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::text::normalize_text;
use super::{mean, std_dev};
use crate::capture::FrameDims;
use crate::vision::{BoundingBox, Candidate};

pub const TEMPORAL_FEATURE_COUNT: usize = 11;

/// Declared order of [`TemporalFeatures::to_array`]
pub const TEMPORAL_FEATURE_NAMES: [&str; TEMPORAL_FEATURE_COUNT] = [
    "frames_with_text",
    "total_frames",
    "persistence_ratio",
    "avg_movement",
    "position_std_x",
    "position_std_y",
    "avg_text_similarity",
    "inverse_text_similarity",
    "longest_run",
    "num_runs",
    "avg_run_length",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Temporal aggregation on/off. When off the decision uses spatial
    /// evidence only.
    pub enabled: bool,
    /// Minimum IOU for consecutive candidates to count as the same line
    pub match_iou: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            match_iou: 0.3,
        }
    }
}

/// Per-video temporal statistics
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TemporalFeatures {
    pub frames_with_text: f32,
    pub total_frames: f32,
    pub persistence_ratio: f32,
    /// Mean center displacement between consecutive candidates, as a
    /// fraction of the frame diagonal
    pub avg_movement: f32,
    pub position_std_x: f32,
    pub position_std_y: f32,
    pub avg_text_similarity: f32,
    pub inverse_text_similarity: f32,
    pub longest_run: f32,
    pub num_runs: f32,
    pub avg_run_length: f32,
}

impl TemporalFeatures {
    pub fn to_array(&self) -> [f32; TEMPORAL_FEATURE_COUNT] {
        [
            self.frames_with_text,
            self.total_frames,
            self.persistence_ratio,
            self.avg_movement,
            self.position_std_x,
            self.position_std_y,
            self.avg_text_similarity,
            self.inverse_text_similarity,
            self.longest_run,
            self.num_runs,
            self.avg_run_length,
        ]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("frame at {:.3}s arrived after frame at {:.3}s", .current.as_secs_f64(), .previous.as_secs_f64())]
    OutOfOrder { previous: Duration, current: Duration },
}

#[derive(Debug, Clone)]
struct TrackedLine {
    text: String,
    bbox: BoundingBox,
    center: (f32, f32),
}

/// Sequential state machine over one video's frames
#[derive(Debug)]
pub struct TemporalTracker {
    config: TrackerConfig,
    last_timestamp: Option<Duration>,
    /// Candidate of the immediately preceding frame, if it had one
    previous: Option<TrackedLine>,
    total_frames: usize,
    frames_with_text: usize,
    current_run: usize,
    runs: Vec<usize>,
    centers_x: Vec<f32>,
    centers_y: Vec<f32>,
    movements: Vec<f32>,
    similarities: Vec<f32>,
    best_sample: Option<(f32, String)>,
}

impl TemporalTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            last_timestamp: None,
            previous: None,
            total_frames: 0,
            frames_with_text: 0,
            current_run: 0,
            runs: Vec::new(),
            centers_x: Vec::new(),
            centers_y: Vec::new(),
            movements: Vec::new(),
            similarities: Vec::new(),
            best_sample: None,
        }
    }

    /// Feed the next frame's candidate (or its absence)
    pub fn observe(
        &mut self,
        timestamp: Duration,
        candidate: Option<&Candidate>,
        dims: FrameDims,
    ) -> Result<(), TrackerError> {
        if let Some(previous) = self.last_timestamp {
            if timestamp < previous {
                return Err(TrackerError::OutOfOrder {
                    previous,
                    current: timestamp,
                });
            }
        }
        self.last_timestamp = Some(timestamp);
        self.total_frames += 1;

        let Some(candidate) = candidate else {
            self.close_run();
            self.previous = None;
            return Ok(());
        };

        self.frames_with_text += 1;
        self.current_run += 1;

        let bbox = candidate.detection.bbox;
        let center = dims.normalized_center(&bbox);
        let text = normalize_text(&candidate.detection.text);
        self.centers_x.push(center.0);
        self.centers_y.push(center.1);

        if let Some(prev) = &self.previous {
            let distance = (center.0 - prev.center.0).hypot(center.1 - prev.center.1);
            self.movements.push(distance / std::f32::consts::SQRT_2);

            if prev.bbox.iou(&bbox) >= self.config.match_iou {
                self.similarities
                    .push(strsim::normalized_levenshtein(&prev.text, &text) as f32);
            }
        }

        if self
            .best_sample
            .as_ref()
            .map_or(true, |(score, _)| candidate.score > *score)
        {
            self.best_sample = Some((candidate.score, candidate.detection.text.trim().to_string()));
        }

        self.previous = Some(TrackedLine { text, bbox, center });
        Ok(())
    }

    fn close_run(&mut self) {
        if self.current_run > 0 {
            self.runs.push(self.current_run);
            self.current_run = 0;
        }
    }

    pub fn frames_observed(&self) -> usize {
        self.total_frames
    }

    /// Text of the highest-scoring candidate seen so far
    pub fn sample_text(&self) -> Option<&str> {
        self.best_sample.as_ref().map(|(_, text)| text.as_str())
    }

    /// Statistics over every frame observed so far, including an open run
    pub fn features(&self) -> TemporalFeatures {
        let mut runs = self.runs.clone();
        if self.current_run > 0 {
            runs.push(self.current_run);
        }

        let total = self.total_frames as f32;
        let avg_similarity = mean(&self.similarities);
        let run_lengths: Vec<f32> = runs.iter().map(|r| *r as f32).collect();

        TemporalFeatures {
            frames_with_text: self.frames_with_text as f32,
            total_frames: total,
            persistence_ratio: if self.total_frames > 0 {
                self.frames_with_text as f32 / total
            } else {
                0.0
            },
            avg_movement: mean(&self.movements),
            position_std_x: std_dev(&self.centers_x),
            position_std_y: std_dev(&self.centers_y),
            avg_text_similarity: avg_similarity,
            inverse_text_similarity: if self.similarities.is_empty() {
                0.0
            } else {
                1.0 - avg_similarity
            },
            longest_run: runs.iter().copied().max().unwrap_or(0) as f32,
            num_runs: runs.len() as f32,
            avg_run_length: mean(&run_lengths),
        }
    }
}
