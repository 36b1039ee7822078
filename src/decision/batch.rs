//! Many-video evaluation through a bounded pool

use futures_util::{stream, StreamExt};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Evaluation, EvaluationError, VideoEvaluator};

/// Evaluate `videos` with at most `concurrency` in flight.
///
/// Results come back in input order. Each video runs under its own child of
/// `cancel`, so cancelling one never touches the others while cancelling the
/// parent stops them all.
pub async fn evaluate_batch(
    evaluator: &VideoEvaluator,
    videos: Vec<PathBuf>,
    concurrency: usize,
    cancel: CancellationToken,
) -> Vec<(PathBuf, Result<Evaluation, EvaluationError>)> {
    let total = videos.len();
    info!("Evaluating {} videos, {} at a time", total, concurrency.max(1));

    let results: Vec<_> = stream::iter(videos)
        .map(|video| {
            let evaluator = evaluator.clone();
            let token = cancel.child_token();
            async move {
                let result = evaluator.evaluate(&video, token).await;
                (video, result)
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    info!("Batch finished: {} evaluated, {} failed", total - failed, failed);
    results
}
