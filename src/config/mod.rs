//! Detector Configuration
//!
//! Every tunable of the pipeline, stored in TOML format. All sections fall
//! back to their defaults, so a partial file only needs the values it changes.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::analysis::TrackerConfig;
use crate::capture::{FfmpegConfig, SamplingConfig};
use crate::classifier::TrainingConfig;
use crate::decision::{DecisionConfig, RuleWeights};
use crate::vision::{GateConfig, RegionSelectorConfig, TesseractConfig};

/// Detector settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Frame sampling plan
    pub sampling: SamplingConfig,
    /// Region search
    pub regions: RegionSelectorConfig,
    /// Candidate gate
    pub gate: GateConfig,
    /// Temporal tracking
    pub tracker: TrackerConfig,
    /// Decision strategy
    pub decision: DecisionConfig,
    /// Timeouts and concurrency
    pub runtime: RuntimeConfig,
    /// Trained model location
    pub model: ModelConfig,
    /// Offline classifier training
    pub training: TrainingConfig,
    /// External tools
    pub tools: ToolsConfig,
}

/// Timeouts and concurrency limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Budget for one whole video
    pub video_timeout_ms: u64,
    /// Budget for one frame (decode plus region search)
    pub frame_timeout_ms: u64,
    /// Frames processed at once within one video
    pub frame_concurrency: usize,
    /// Videos evaluated at once in a batch
    pub video_concurrency: usize,
    /// Largest tolerated share of frames that fail to decode
    pub max_frame_failure_ratio: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            video_timeout_ms: 120_000,
            frame_timeout_ms: 15_000,
            frame_concurrency: 4,
            video_concurrency: 2,
            max_frame_failure_ratio: 0.5,
        }
    }
}

impl RuntimeConfig {
    pub fn video_timeout(&self) -> Duration {
        Duration::from_millis(self.video_timeout_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Overrides the per-user models directory
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: FfmpegConfig,
    pub tesseract: TesseractConfig,
}

fn unit(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

impl DetectorConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let sampling = &self.sampling;
        ensure!(sampling.frame_count > 0, "sampling.frame_count must be at least 1");
        ensure!(
            unit(sampling.start_fraction) && unit(sampling.end_fraction),
            "sampling fractions must be within [0, 1]"
        );
        ensure!(
            sampling.start_fraction <= sampling.end_fraction,
            "sampling.start_fraction must not exceed sampling.end_fraction"
        );

        let regions = &self.regions;
        ensure!(!regions.regions.is_empty(), "regions.regions must not be empty");
        for spec in &regions.regions {
            spec.validate().map_err(anyhow::Error::msg)?;
        }
        ensure!(
            regions.min_region_width > 0 && regions.min_region_height > 0,
            "minimum region size must be at least 1x1 pixels"
        );
        ensure!(
            unit(regions.early_exit_min_confidence as f64),
            "regions.early_exit_min_confidence must be within [0, 1]"
        );

        let gate = &self.gate;
        ensure!(gate.min_aspect_ratio > 0.0, "gate.min_aspect_ratio must be positive");
        ensure!(unit(gate.min_area_ratio as f64), "gate.min_area_ratio must be within [0, 1]");
        ensure!(
            gate.aspect_saturation > 0.0 && gate.area_saturation > 0.0,
            "gate saturation points must be positive"
        );
        let gate_weights = [
            gate.confidence_weight,
            gate.aspect_weight,
            gate.centering_weight,
            gate.area_weight,
            gate.position_weight,
        ];
        ensure!(
            gate_weights.iter().all(|w| *w >= 0.0) && gate_weights.iter().sum::<f32>() > 0.0,
            "gate weights must be non-negative and not all zero"
        );

        ensure!(unit(self.tracker.match_iou as f64), "tracker.match_iou must be within [0, 1]");

        validate_rule_weights(&self.decision.rule)?;
        self.training.validate()?;

        let runtime = &self.runtime;
        ensure!(
            runtime.video_timeout_ms > 0 && runtime.frame_timeout_ms > 0,
            "runtime timeouts must be positive"
        );
        ensure!(
            runtime.frame_concurrency > 0 && runtime.video_concurrency > 0,
            "runtime concurrency limits must be at least 1"
        );
        ensure!(
            unit(runtime.max_frame_failure_ratio),
            "runtime.max_frame_failure_ratio must be within [0, 1]"
        );
        if runtime.frame_timeout_ms > runtime.video_timeout_ms {
            warn!(
                "runtime.frame_timeout_ms ({}) exceeds runtime.video_timeout_ms ({})",
                runtime.frame_timeout_ms, runtime.video_timeout_ms
            );
        }

        Ok(())
    }
}

fn validate_rule_weights(rule: &RuleWeights) -> Result<()> {
    ensure!(
        rule.spatial_weight >= 0.0 && rule.temporal_weight >= 0.0,
        "decision.rule weights must be non-negative"
    );
    ensure!(
        rule.spatial_weight + rule.temporal_weight > 0.0,
        "decision.rule weights must not both be zero"
    );
    ensure!(
        unit(rule.persistence_share as f64)
            && unit(rule.decision_threshold as f64)
            && unit(rule.temporal_floor as f64),
        "decision.rule shares and thresholds must be within [0, 1]"
    );
    ensure!(
        rule.persistence_saturation > 0.0 && rule.run_saturation > 0.0,
        "decision.rule saturation points must be positive"
    );
    Ok(())
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<DetectorConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: DetectorConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    Ok(config)
}

/// Load `path` if given, else the per-user config file if present, else defaults
pub fn load_or_default(path: Option<&Path>) -> Result<DetectorConfig> {
    if let Some(path) = path {
        return load_config(path);
    }

    match crate::storage::default_config_path() {
        Ok(default_path) if default_path.exists() => load_config(&default_path),
        Ok(_) => {
            debug!("No config file found, using defaults");
            Ok(DetectorConfig::default())
        }
        Err(e) => {
            warn!("Could not resolve config directory: {:#}", e);
            Ok(DetectorConfig::default())
        }
    }
}

/// Save configuration to file
pub fn save_config(config: &DetectorConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file {}", path.display()))?;
    Ok(())
}
