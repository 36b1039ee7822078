//! Per-video evaluation
//!
//! Frames are decoded and searched concurrently on the blocking pool, bounded
//! by a per-video semaphore and a per-frame timeout. The whole video has one
//! deadline: when it passes, unfinished frames are abandoned and the decision
//! is made from the frames that completed. Temporal tracking is a sequential
//! pass over the completed frames in timestamp order.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Decision, DecisionStrategy, EvaluationError, StrategyKind};
use crate::analysis::{
    aggregate_features, extract_spatial_features, FeatureVector, TemporalFeatures, TemporalTracker,
};
use crate::capture::{sample_timestamps, FrameSource, SourceError, VideoInfo};
use crate::config::DetectorConfig;
use crate::vision::{Candidate, CandidateGate, Detection, RegionSelector, TextDetector};

/// Outcome of evaluating one video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub video: PathBuf,
    pub has_subtitles: bool,
    pub confidence: f32,
    /// Best candidate text; empty unless subtitles were found
    pub sample_text: String,
    pub strategy: StrategyKind,
    #[serde(flatten)]
    pub frames: FrameStats,
}

impl Evaluation {
    /// The `(has_subtitles, confidence, sample_text)` triple
    pub fn verdict(&self) -> (bool, f32, &str) {
        (self.has_subtitles, self.confidence, &self.sample_text)
    }
}

/// Frame accounting for one evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    pub frames_sampled: usize,
    pub frames_processed: usize,
    pub frames_failed: usize,
    pub frames_timed_out: usize,
    /// The video deadline passed before every frame finished
    pub truncated: bool,
}

/// Everything the decision strategies consume
#[derive(Debug, Clone)]
pub struct VideoEvidence {
    pub features: FeatureVector,
    pub temporal: TemporalFeatures,
    /// Highest gate score over all frames
    pub max_spatial_score: f32,
    pub sample_text: Option<String>,
    pub temporal_enabled: bool,
    pub frames_with_detections: usize,
}

struct FrameObservation {
    timestamp: Duration,
    detections: Vec<Detection>,
    candidate: Option<Candidate>,
}

enum FrameOutcome {
    Observed(FrameObservation),
    Unavailable { timestamp: Duration, reason: String },
    TimedOut(Duration),
    /// Stopped early because the frame was no longer wanted
    Abandoned(Duration),
}

/// Stateless per-frame work shared by all frame tasks
struct FramePipeline {
    source: Arc<dyn FrameSource>,
    detector: Arc<dyn TextDetector>,
    selector: RegionSelector,
    gate: CandidateGate,
}

impl FramePipeline {
    fn process_frame(
        &self,
        video: &Path,
        timestamp: Duration,
        info: &VideoInfo,
        cancel: &CancellationToken,
    ) -> FrameOutcome {
        if cancel.is_cancelled() {
            return FrameOutcome::Abandoned(timestamp);
        }
        let frame = match self.source.frame_at(video, timestamp, info) {
            Ok(frame) => frame,
            Err(SourceError::FrameUnavailable { reason, .. }) => {
                return FrameOutcome::Unavailable { timestamp, reason };
            }
            Err(e) => {
                return FrameOutcome::Unavailable {
                    timestamp,
                    reason: e.to_string(),
                };
            }
        };

        if frame.dims() != Some(info.dims) {
            return FrameOutcome::Unavailable {
                timestamp,
                reason: format!(
                    "decoded {}x{} frame, video reports {}x{}",
                    frame.width(),
                    frame.height(),
                    info.dims.width,
                    info.dims.height
                ),
            };
        }

        let Some(selection) = self.selector.select_until(&frame, self.detector.as_ref(), cancel) else {
            return FrameOutcome::Abandoned(timestamp);
        };
        let candidate = self.gate.select(&selection.detections, info.dims);

        FrameOutcome::Observed(FrameObservation {
            timestamp,
            detections: selection.detections,
            candidate,
        })
    }
}

/// Evaluates videos with one frame source, one detector and one strategy.
/// Cheap to clone; clones share the pipeline and the model.
#[derive(Clone)]
pub struct VideoEvaluator {
    pipeline: Arc<FramePipeline>,
    config: Arc<DetectorConfig>,
    strategy: DecisionStrategy,
}

impl VideoEvaluator {
    pub fn new(
        source: Arc<dyn FrameSource>,
        detector: Arc<dyn TextDetector>,
        config: DetectorConfig,
        strategy: DecisionStrategy,
    ) -> Self {
        let pipeline = FramePipeline {
            source,
            detector,
            selector: RegionSelector::new(config.regions.clone()),
            gate: CandidateGate::new(config.gate.clone()),
        };
        Self {
            pipeline: Arc::new(pipeline),
            config: Arc::new(config),
            strategy,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn strategy(&self) -> &DecisionStrategy {
        &self.strategy
    }

    /// Evaluate one video end to end
    pub async fn evaluate(&self, video: &Path, cancel: CancellationToken) -> Result<Evaluation, EvaluationError> {
        self.strategy.check_schema()?;

        let (evidence, frames) = self.collect_evidence(video, cancel).await?;

        let decision = if evidence.frames_with_detections == 0 {
            debug!("No text detected in {}", video.display());
            Decision {
                has_subtitles: false,
                confidence: 0.0,
            }
        } else {
            self.strategy.decide(&evidence)?
        };

        let sample_text = if decision.has_subtitles {
            evidence.sample_text.unwrap_or_default()
        } else {
            String::new()
        };

        info!(
            "{}: subtitles={} confidence={:.3} strategy={} frames={}/{} failed={} timed_out={}{}",
            video.display(),
            decision.has_subtitles,
            decision.confidence,
            self.strategy.kind(),
            frames.frames_processed,
            frames.frames_sampled,
            frames.frames_failed,
            frames.frames_timed_out,
            if frames.truncated { " (truncated)" } else { "" }
        );

        Ok(Evaluation {
            video: video.to_path_buf(),
            has_subtitles: decision.has_subtitles,
            confidence: decision.confidence,
            sample_text,
            strategy: self.strategy.kind(),
            frames,
        })
    }

    /// Run the pipeline up to the feature vector
    pub async fn collect_evidence(
        &self,
        video: &Path,
        cancel: CancellationToken,
    ) -> Result<(VideoEvidence, FrameStats), EvaluationError> {
        let runtime = &self.config.runtime;
        let deadline = Instant::now() + runtime.video_timeout();

        let info = self.probe(video, deadline, &cancel).await?;
        let timestamps = sample_timestamps(info.duration, &self.config.sampling);
        let mut stats = FrameStats {
            frames_sampled: timestamps.len(),
            ..Default::default()
        };
        debug!(
            "Sampling {} frames from {} ({}x{})",
            timestamps.len(),
            video.display(),
            info.dims.width,
            info.dims.height
        );

        // Blocking frame work cannot be aborted, only told to stop between steps
        let frames_cancel = cancel.child_token();
        let _stop_frames = frames_cancel.clone().drop_guard();

        let permits = Arc::new(Semaphore::new(runtime.frame_concurrency.max(1)));
        let frame_timeout = runtime.frame_timeout();
        let mut tasks = JoinSet::new();

        for timestamp in timestamps {
            let pipeline = Arc::clone(&self.pipeline);
            let permits = Arc::clone(&permits);
            let video = video.to_path_buf();
            let frame_cancel = frames_cancel.child_token();

            tasks.spawn(async move {
                let Ok(permit) = permits.acquire_owned().await else {
                    return FrameOutcome::Unavailable {
                        timestamp,
                        reason: "frame pool closed".to_string(),
                    };
                };
                // The permit lives as long as the blocking work, even past a timeout
                let worker_cancel = frame_cancel.clone();
                let work = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    pipeline.process_frame(&video, timestamp, &info, &worker_cancel)
                });
                match tokio::time::timeout(frame_timeout, work).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => FrameOutcome::Unavailable {
                        timestamp,
                        reason: format!("frame worker failed: {}", e),
                    },
                    Err(_) => {
                        frame_cancel.cancel();
                        FrameOutcome::TimedOut(timestamp)
                    }
                }
            });
        }

        let mut outcomes = Vec::with_capacity(stats.frames_sampled);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    frames_cancel.cancel();
                    tasks.abort_all();
                    return Err(EvaluationError::Cancelled(video.to_path_buf()));
                }
                next = tokio::time::timeout_at(deadline, tasks.join_next()) => match next {
                    Ok(Some(Ok(outcome))) => outcomes.push(outcome),
                    Ok(Some(Err(e))) => {
                        warn!("Frame task for {} failed: {}", video.display(), e);
                        stats.frames_failed += 1;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        stats.truncated = true;
                        warn!(
                            "Deadline reached for {} with {}/{} frames complete; continuing with partial results",
                            video.display(),
                            outcomes.len(),
                            stats.frames_sampled
                        );
                        frames_cancel.cancel();
                        tasks.abort_all();
                        break;
                    }
                }
            }
        }

        let mut observations = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                FrameOutcome::Observed(observation) => observations.push(observation),
                FrameOutcome::Unavailable { timestamp, reason } => {
                    warn!(
                        "Skipping frame at {:.3}s of {}: {}",
                        timestamp.as_secs_f64(),
                        video.display(),
                        reason
                    );
                    stats.frames_failed += 1;
                }
                FrameOutcome::TimedOut(timestamp) | FrameOutcome::Abandoned(timestamp) => {
                    warn!(
                        "Frame at {:.3}s of {} exceeded {:?}",
                        timestamp.as_secs_f64(),
                        video.display(),
                        frame_timeout
                    );
                    stats.frames_timed_out += 1;
                }
            }
        }
        stats.frames_processed = observations.len();

        let attempted = stats.frames_processed + stats.frames_failed;
        let limit = runtime.max_frame_failure_ratio;
        if attempted > 0 && stats.frames_failed as f64 / attempted as f64 > limit {
            return Err(EvaluationError::TooManyFrameFailures {
                failed: stats.frames_failed,
                attempted,
                limit,
            });
        }
        if stats.frames_processed == 0 && stats.frames_sampled > 0 {
            return Err(EvaluationError::NoFramesEvaluated {
                path: video.to_path_buf(),
                sampled: stats.frames_sampled,
                timed_out: stats.frames_timed_out,
            });
        }

        observations.sort_by_key(|o| o.timestamp);
        let evidence = self.build_evidence(&observations, &info)?;
        Ok((evidence, stats))
    }

    fn build_evidence(
        &self,
        observations: &[FrameObservation],
        info: &VideoInfo,
    ) -> Result<VideoEvidence, EvaluationError> {
        let mut tracker = TemporalTracker::new(self.config.tracker.clone());
        let mut spatial = Vec::with_capacity(observations.len());
        let mut max_spatial_score = 0.0f32;
        let mut frames_with_detections = 0;

        for observation in observations {
            spatial.push(extract_spatial_features(&observation.detections, info.dims));
            if !observation.detections.is_empty() {
                frames_with_detections += 1;
            }
            if let Some(candidate) = &observation.candidate {
                max_spatial_score = max_spatial_score.max(candidate.score);
            }
            tracker
                .observe(observation.timestamp, observation.candidate.as_ref(), info.dims)
                .map_err(|e| EvaluationError::Internal(e.to_string()))?;
        }

        let temporal_enabled = self.config.tracker.enabled;
        let temporal = if temporal_enabled {
            tracker.features()
        } else {
            TemporalFeatures::default()
        };

        Ok(VideoEvidence {
            features: aggregate_features(&spatial, &temporal),
            temporal,
            max_spatial_score,
            sample_text: tracker.sample_text().map(str::to_string),
            temporal_enabled,
            frames_with_detections,
        })
    }

    async fn probe(
        &self,
        video: &Path,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<VideoInfo, EvaluationError> {
        let unknown = |reason: String| EvaluationError::ResolutionUnknown {
            path: video.to_path_buf(),
            reason,
        };

        let pipeline = Arc::clone(&self.pipeline);
        let path = video.to_path_buf();
        let probe = tokio::task::spawn_blocking(move || pipeline.source.probe(&path));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EvaluationError::Cancelled(video.to_path_buf())),
            result = tokio::time::timeout_at(deadline, probe) => match result {
                Ok(Ok(Ok(info))) => Ok(info),
                Ok(Ok(Err(SourceError::ResolutionUnknown { reason, .. }))) => Err(unknown(reason)),
                Ok(Ok(Err(other))) => Err(unknown(other.to_string())),
                Ok(Err(e)) => Err(EvaluationError::Internal(format!("probe task failed: {}", e))),
                Err(_) => Err(unknown("probe timed out".to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::AGGREGATED_SPATIAL_COUNT;
    use crate::classifier::tests::single_feature_model;
    use crate::decision::RuleWeights;
    use crate::testing::{ScriptedDetector, ScriptedSource};
    use crate::vision::BoundingBox;

    const LINE: BoundingBox = BoundingBox::new(340, 150, 600, 40);
    const TEXT: &str = "Where are you going?";

    fn config() -> DetectorConfig {
        let mut config = DetectorConfig::default();
        config.runtime.video_timeout_ms = 30_000;
        config.runtime.frame_timeout_ms = 10_000;
        config
    }

    fn source(config: &DetectorConfig) -> ScriptedSource {
        ScriptedSource::new(1280, 720, Duration::from_secs(30), &config.sampling)
    }

    /// Detector answering for the 1280x720 bottom band
    fn bottom_band() -> ScriptedDetector {
        ScriptedDetector::new(1280, 216)
    }

    fn rule_based() -> DecisionStrategy {
        DecisionStrategy::RuleBased(RuleWeights::default())
    }

    fn evaluator(
        source: ScriptedSource,
        detector: ScriptedDetector,
        config: DetectorConfig,
        strategy: DecisionStrategy,
    ) -> VideoEvaluator {
        VideoEvaluator::new(Arc::new(source), Arc::new(detector), config, strategy)
    }

    async fn run(evaluator: &VideoEvaluator) -> Result<Evaluation, EvaluationError> {
        evaluator
            .evaluate(Path::new("clip.mp4"), CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_persistent_subtitle_is_detected() {
        let config = config();
        let detector = bottom_band().with_line(5..25, TEXT, LINE, 0.9);
        let eval = evaluator(source(&config), detector, config, rule_based());

        let result = run(&eval).await.unwrap();
        let (has, confidence, sample) = result.verdict();
        assert!(has);
        assert!(confidence > 0.9);
        assert_eq!(sample, TEXT);
        assert_eq!(result.frames.frames_processed, 30);
        assert!(!result.frames.truncated);
    }

    #[tokio::test]
    async fn test_short_burst_is_rejected() {
        let config = config();
        let detector = bottom_band().with_line(3..5, "BREAKING NEWS", LINE, 0.95);
        let eval = evaluator(source(&config), detector, config, rule_based());

        let result = run(&eval).await.unwrap();
        assert!(!result.has_subtitles);
        assert!(result.confidence < 0.5);
        assert_eq!(result.sample_text, "");
    }

    #[tokio::test]
    async fn test_no_text_is_negative_for_any_strategy() {
        // a model that would say "yes" to an all-zero vector
        let eager = DecisionStrategy::Classifier(Arc::new(single_feature_model(0, 1.0, 5.0)));
        for strategy in [rule_based(), eager] {
            let config = config();
            let eval = evaluator(source(&config), bottom_band(), config, strategy);
            let result = run(&eval).await.unwrap();
            assert_eq!(result.verdict(), (false, 0.0, ""));
        }
    }

    #[tokio::test]
    async fn test_classifier_strategy() {
        let model = single_feature_model(AGGREGATED_SPATIAL_COUNT + 2, 10.0, -3.0);
        let config = config();
        let detector = bottom_band().with_line(5..25, TEXT, LINE, 0.9);
        let eval = evaluator(
            source(&config),
            detector,
            config,
            DecisionStrategy::Classifier(Arc::new(model)),
        );

        let result = run(&eval).await.unwrap();
        assert!(result.has_subtitles);
        assert_eq!(result.strategy, StrategyKind::Classifier);
        assert!(result.confidence > 0.95);
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_fatal() {
        let mut model = single_feature_model(0, 1.0, 0.0);
        model.feature_dim = 40;
        model.weights.truncate(40);
        model.feature_means.truncate(40);
        model.feature_scales.truncate(40);
        let config = config();
        let eval = evaluator(
            source(&config),
            bottom_band(),
            config,
            DecisionStrategy::Classifier(Arc::new(model)),
        );

        assert!(matches!(run(&eval).await, Err(EvaluationError::SchemaMismatch(_))));
    }

    #[tokio::test]
    async fn test_unknown_resolution_is_fatal() {
        let eval = evaluator(ScriptedSource::unprobeable(), bottom_band(), config(), rule_based());
        assert!(matches!(
            run(&eval).await,
            Err(EvaluationError::ResolutionUnknown { .. })
        ));
    }

    #[tokio::test]
    async fn test_some_frame_failures_are_tolerated() {
        let config = config();
        let source = source(&config).failing_frames(0..5).wrong_size_frames([29]);
        let detector = bottom_band().with_line(5..25, TEXT, LINE, 0.9);
        let eval = evaluator(source, detector, config, rule_based());

        let result = run(&eval).await.unwrap();
        assert!(result.has_subtitles);
        assert_eq!(result.frames.frames_failed, 6);
        assert_eq!(result.frames.frames_processed, 24);
    }

    #[tokio::test]
    async fn test_too_many_frame_failures() {
        let config = config();
        let source = source(&config).failing_frames(0..20);
        let eval = evaluator(source, bottom_band(), config, rule_based());

        match run(&eval).await {
            Err(EvaluationError::TooManyFrameFailures { failed, attempted, .. }) => {
                assert_eq!(failed, 20);
                assert_eq!(attempted, 30);
            }
            other => panic!("expected TooManyFrameFailures, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_detector_failures_are_not_fatal() {
        let config = config();
        let detector = bottom_band().failing_on(0..30);
        let eval = evaluator(source(&config), detector, config, rule_based());

        let result = run(&eval).await.unwrap();
        assert_eq!(result.verdict(), (false, 0.0, ""));
        assert_eq!(result.frames.frames_failed, 0);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let config = config();
        let eval = evaluator(source(&config), bottom_band(), config, rule_based());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = eval.evaluate(Path::new("clip.mp4"), cancel).await;
        assert!(matches!(result, Err(EvaluationError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_deadline_truncates_instead_of_failing() {
        let mut config = config();
        config.runtime.video_timeout_ms = 300;
        config.runtime.frame_concurrency = 1;
        let detector = bottom_band()
            .with_line(0..30, TEXT, LINE, 0.9)
            .with_delay(Duration::from_millis(100));
        let eval = evaluator(source(&config), detector, config, rule_based());

        let result = run(&eval).await.unwrap();
        assert!(result.frames.truncated);
        assert!(result.frames.frames_processed < 30);
    }

    #[tokio::test]
    async fn test_video_with_no_finished_frame_is_an_error() {
        let mut config = config();
        config.sampling.frame_count = 4;
        config.runtime.frame_timeout_ms = 20;
        let detector = bottom_band()
            .with_line(0..4, TEXT, LINE, 0.9)
            .with_delay(Duration::from_millis(200));
        let eval = evaluator(source(&config), detector, config, rule_based());

        match run(&eval).await {
            Err(EvaluationError::NoFramesEvaluated { sampled, timed_out, .. }) => {
                assert_eq!(sampled, 4);
                assert_eq!(timed_out, 4);
            }
            other => panic!("expected NoFramesEvaluated, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timed_out_frames_stop_searching() {
        let mut config = config();
        config.sampling.frame_count = 2;
        config.runtime.frame_concurrency = 2;
        config.runtime.frame_timeout_ms = 30;
        // no text anywhere, so an uninterrupted search would try all six regions
        let detector = Arc::new(bottom_band().with_delay(Duration::from_millis(100)));
        let eval = VideoEvaluator::new(
            Arc::new(source(&config)),
            detector.clone(),
            config,
            rule_based(),
        );

        let result = run(&eval).await;
        assert!(matches!(result, Err(EvaluationError::NoFramesEvaluated { .. })));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(detector.calls(), 2);
    }

    #[tokio::test]
    async fn test_cancelling_one_video_leaves_others_running() {
        let mut config = config();
        config.sampling.frame_count = 10;
        config.runtime.frame_concurrency = 1;
        let detector = bottom_band()
            .with_line(0..10, TEXT, LINE, 0.9)
            .with_delay(Duration::from_millis(50));
        let eval = evaluator(source(&config), detector, config, rule_based());

        let doomed = CancellationToken::new();
        let trigger = doomed.clone();
        let (cancelled, finished, _) = tokio::join!(
            eval.evaluate(Path::new("a.mp4"), doomed),
            eval.evaluate(Path::new("b.mp4"), CancellationToken::new()),
            async move {
                tokio::time::sleep(Duration::from_millis(120)).await;
                trigger.cancel();
            }
        );

        assert!(matches!(cancelled, Err(EvaluationError::Cancelled(_))));
        let finished = finished.unwrap();
        assert!(finished.has_subtitles);
        assert_eq!(finished.frames.frames_processed, 10);
    }

    #[tokio::test]
    async fn test_collect_evidence_shape() {
        let config = config();
        let detector = bottom_band().with_line(5..25, TEXT, LINE, 0.9);
        let eval = evaluator(source(&config), detector, config, rule_based());

        let (evidence, stats) = eval
            .collect_evidence(Path::new("clip.mp4"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(evidence.features.len(), crate::analysis::FEATURE_DIM);
        assert_eq!(evidence.frames_with_detections, 20);
        assert!((evidence.temporal.persistence_ratio - 0.667).abs() < 1e-3);
        assert_eq!(evidence.temporal.num_runs, 1.0);
        assert_eq!(evidence.temporal.avg_run_length, 20.0);
        assert_eq!(stats.frames_sampled, 30);
    }
}
