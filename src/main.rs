//! Subtitle Sentinel - command line front end

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures_util::{stream, StreamExt};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use subtitle_sentinel::capture::FfmpegFrameSource;
use subtitle_sentinel::classifier::{load_dataset, train_classifier, write_dataset, LabeledVideo};
use subtitle_sentinel::config::{self, DetectorConfig};
use subtitle_sentinel::decision::{DecisionStrategy, RuleWeights};
use subtitle_sentinel::storage::{self, ModelStore};
use subtitle_sentinel::vision::TesseractDetector;
use subtitle_sentinel::{evaluate_batch, StrategyKind, VideoEvaluator};

/// Burned-in subtitle detection for video files
#[derive(Parser, Debug)]
#[command(name = "subtitle-sentinel", version)]
#[command(about = "Detects hard-coded subtitles in video files")]
struct Cli {
    /// Configuration file (defaults to the per-user config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding trained models
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decide whether each video has burned-in subtitles
    Evaluate {
        #[arg(required = true)]
        videos: Vec<PathBuf>,

        /// Force a decision strategy; an explicit `classifier` fails without a model
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,

        /// One JSON object per video on stdout
        #[arg(long)]
        json: bool,
    },
    /// Build a training dataset from labeled videos
    Extract {
        /// JSON array of `{ "path": ..., "label": bool }`
        #[arg(long)]
        labels: PathBuf,

        /// Output JSON Lines file
        #[arg(long)]
        out: PathBuf,
    },
    /// Train a classifier and add it to the model store
    Train {
        #[arg(long)]
        dataset: PathBuf,
    },
    /// Write the default configuration
    InitConfig {
        /// Target file (defaults to the per-user config.toml)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    Classifier,
    RuleBased,
}

impl From<StrategyArg> for StrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Classifier => StrategyKind::Classifier,
            StrategyArg::RuleBased => StrategyKind::RuleBased,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LabelEntry {
    path: PathBuf,
    label: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Command::InitConfig { path, force } = &cli.command {
        init_config(path.as_deref(), *force)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = config::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = &cli.model_dir {
        config.model.dir = Some(dir.clone());
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling running evaluations");
            on_signal.cancel();
        }
    });

    match cli.command {
        Command::Evaluate { videos, strategy, json } => evaluate(config, videos, strategy, json, cancel).await,
        Command::Extract { labels, out } => extract(config, &labels, &out, cancel).await,
        Command::Train { dataset } => train(&config, &dataset),
        Command::InitConfig { .. } => Ok(ExitCode::SUCCESS),
    }
}

fn open_model_store(config: &DetectorConfig) -> Result<ModelStore> {
    match &config.model.dir {
        Some(dir) => ModelStore::with_dir(dir.clone()),
        None => ModelStore::new(),
    }
}

fn build_evaluator(config: DetectorConfig, strategy: DecisionStrategy) -> VideoEvaluator {
    let source = FfmpegFrameSource::new(config.tools.ffmpeg.clone());
    let detector = TesseractDetector::new(config.tools.tesseract.clone());
    VideoEvaluator::new(Arc::new(source), Arc::new(detector), config, strategy)
}

async fn evaluate(
    mut config: DetectorConfig,
    videos: Vec<PathBuf>,
    strategy: Option<StrategyArg>,
    json: bool,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    let strict = matches!(strategy, Some(StrategyArg::Classifier));
    if let Some(strategy) = strategy {
        config.decision.strategy = strategy.into();
    }

    let store = if config.decision.strategy == StrategyKind::Classifier {
        match open_model_store(&config) {
            Ok(store) => Some(store),
            Err(e) if strict => return Err(e.context("Failed to open model store")),
            Err(e) => {
                warn!("Model store unavailable: {:#}", e);
                None
            }
        }
    } else {
        None
    };
    let strategy = DecisionStrategy::resolve(&config.decision, store.as_ref(), strict)?;
    info!("Using {} strategy", strategy.kind());

    let concurrency = config.runtime.video_concurrency;
    let evaluator = build_evaluator(config, strategy);
    let results = evaluate_batch(&evaluator, videos, concurrency, cancel).await;

    let mut failures = 0;
    for (video, result) in results {
        match result {
            Ok(evaluation) if json => println!("{}", serde_json::to_string(&evaluation)?),
            Ok(evaluation) => {
                let (has_subtitles, confidence, sample) = evaluation.verdict();
                if has_subtitles {
                    println!("{}: subtitles (confidence {:.2}) \"{}\"", video.display(), confidence, sample);
                } else {
                    println!("{}: no subtitles (confidence {:.2})", video.display(), confidence);
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("{}: evaluation failed: {}", video.display(), e);
            }
        }
    }

    Ok(if failures > 0 { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

async fn extract(config: DetectorConfig, labels: &Path, out: &Path, cancel: CancellationToken) -> Result<ExitCode> {
    let content =
        std::fs::read_to_string(labels).with_context(|| format!("Failed to read labels {}", labels.display()))?;
    let entries: Vec<LabelEntry> =
        serde_json::from_str(&content).with_context(|| format!("Invalid labels file {}", labels.display()))?;
    if entries.is_empty() {
        bail!("{} lists no videos", labels.display());
    }

    let concurrency = config.runtime.video_concurrency.max(1);
    // The decision strategy is never consulted while extracting
    let evaluator = build_evaluator(config, DecisionStrategy::RuleBased(RuleWeights::default()));

    let results: Vec<_> = stream::iter(entries)
        .map(|entry| {
            let evaluator = evaluator.clone();
            let token = cancel.child_token();
            async move {
                let evidence = evaluator.collect_evidence(&entry.path, token).await;
                (entry, evidence)
            }
        })
        .buffered(concurrency)
        .collect()
        .await;

    let mut rows = Vec::with_capacity(results.len());
    let mut failures = 0;
    for (entry, evidence) in results {
        match evidence {
            Ok((evidence, _)) => rows.push(LabeledVideo {
                video_id: entry.path.display().to_string(),
                label: entry.label,
                features: evidence.features,
            }),
            Err(e) => {
                failures += 1;
                eprintln!("{}: extraction failed: {}", entry.path.display(), e);
            }
        }
    }

    write_dataset(out, &rows)?;
    info!("Wrote {} rows to {} ({} videos failed)", rows.len(), out.display(), failures);

    Ok(if failures > 0 { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn train(config: &DetectorConfig, dataset: &Path) -> Result<ExitCode> {
    let rows = load_dataset(dataset)?;
    info!("Loaded {} rows from {}", rows.len(), dataset.display());

    let model = train_classifier(&rows, &config.training)?;
    let store = open_model_store(config)?;
    let entry = store.save(&model)?;

    let metadata = model.metadata();
    println!("model {} saved to {}", entry.artifact_id, store.models_dir().join(&entry.filename).display());
    println!(
        "  cv F1 {:.3} ± {:.3}, validation F1 {:.3}, threshold {:.2}",
        metadata.cv_f1_mean,
        metadata.cv_f1_std,
        metadata.validation_f1,
        model.threshold()
    );
    println!(
        "  test accuracy {:.3}, precision {:.3}, recall {:.3}, F1 {:.3} ({} videos)",
        metadata.test.accuracy, metadata.test.precision, metadata.test.recall, metadata.test.f1, metadata.test.support
    );

    Ok(ExitCode::SUCCESS)
}

fn init_config(path: Option<&Path>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => storage::default_config_path()?,
    };
    if path.exists() && !force {
        bail!("{} already exists (use --force to replace it)", path.display());
    }

    config::save_config(&DetectorConfig::default(), &path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
