//! autolayout: detect layout regions in a reference image.
//!
//! Sends the image to a segmentation workflow (or reads masks from
//! disk with `--masks`), refines each mask into a bounding box, and
//! prints the regions in reading order.
//!
//! # Usage
//!
//! ```text
//! autolayout --prompt "card, photo" page.jpg
//! autolayout --masks m0.png m1.png --json page.jpg
//! autolayout --masks m0.png --debug-mask 0 --debug-dir out/ page.jpg
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use autolayout_detect::{
    Credentials, DetectOutcome, DetectRequest, DetectState, Detector, DetectorConfig,
    ExecutionMode, Progress, SegmentationClient, StaticSegmentationClient, Thresholds,
    debug_index_from_raw,
};
use autolayout_pipeline::{
    CollectingObserver, MorphologyKind, PipelineConfig, RawMask, ResampleFilter, SegmentedMask,
    Snapshot,
};
use autolayout_roboflow::{RoboflowClient, RoboflowConfig};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Detect layout regions in a reference image.
#[derive(Parser)]
#[command(name = "autolayout", version)]
struct Cli {
    /// Path to the source image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// What to look for; comma-separated prompts are sent as a list.
    #[arg(long, default_value = "card")]
    prompt: String,

    /// Opening kernel as a fraction of the working width (0.005-0.05).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_SHAVE_RATIO)]
    shave_ratio: f64,

    /// Longest axis of the working grid in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MAX_PROCESSING_SIZE, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    max_processing_size: u32,

    /// Closing kernel at full resolution.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CLOSE_BASE_KERNEL)]
    close_base_kernel: u32,

    /// Minimum region area as a fraction of the source area.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MIN_AREA_RATIO)]
    min_area_ratio: f64,

    /// Vertical window, in source pixels, that groups regions into a row.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_ROW_TOLERANCE)]
    row_tolerance: u32,

    /// Mask intensity above which a pixel is foreground.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_THRESHOLD)]
    threshold: u8,

    /// Filter used to resample raster masks.
    #[arg(long, value_enum, default_value_t = Filter::Triangle)]
    resample_filter: Filter,

    /// Erode/dilate implementation.
    #[arg(long, value_enum, default_value_t = Morph::SlidingWindow)]
    morphology: Morph,

    /// Title regions with the service's class label when it has one.
    #[arg(long)]
    keep_labels: bool,

    /// Refine masks on the rayon pool.
    #[arg(long)]
    parallel: bool,

    /// Minimum detection confidence reported by the service.
    #[arg(long, default_value_t = Thresholds::DEFAULT_CONFIDENCE)]
    confidence: f32,

    /// Zero-based mask whose refinement stages are captured. Negative
    /// disables.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    debug_mask: i64,

    /// Directory receiving PNG snapshots of the debugged mask.
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    /// Full detector config as a JSON string.
    ///
    /// When provided, all other refinement flags are ignored. The JSON
    /// must be a valid `DetectorConfig` serialization; missing fields
    /// take their defaults.
    #[arg(long)]
    config_json: Option<String>,

    /// Print the outcome as JSON instead of a report.
    #[arg(long)]
    json: bool,

    /// Read masks from these files instead of calling the service.
    #[arg(long, num_args = 1..)]
    masks: Vec<PathBuf>,

    /// Roboflow API key.
    #[arg(long, env = "ROBOFLOW_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Roboflow workspace slug.
    #[arg(long, env = "ROBOFLOW_WORKSPACE")]
    workspace: Option<String>,

    /// Roboflow workflow id.
    #[arg(long, env = "ROBOFLOW_WORKFLOW")]
    workflow: Option<String>,

    /// Roboflow service root.
    #[arg(long, default_value = RoboflowConfig::DEFAULT_BASE_URL)]
    base_url: String,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = RoboflowConfig::DEFAULT_TIMEOUT.as_secs())]
    timeout_secs: u64,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Mask resampling filter selection.
#[derive(Clone, Copy, ValueEnum)]
enum Filter {
    /// Nearest-neighbor (fastest, blocky).
    Nearest,
    /// Bilinear interpolation.
    Triangle,
    /// Bicubic Catmull-Rom.
    CatmullRom,
    /// Gaussian.
    Gaussian,
    /// Lanczos with 3 lobes.
    Lanczos3,
}

/// Morphology implementation selection.
#[derive(Clone, Copy, ValueEnum)]
enum Morph {
    /// Separable running-count passes.
    SlidingWindow,
    /// Direct window evaluation.
    Naive,
}

/// Build a [`DetectorConfig`] from CLI arguments.
///
/// If `--config-json` is provided it is parsed directly and the
/// individual refinement flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<DetectorConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    let pipeline = PipelineConfig {
        shave_ratio: cli.shave_ratio,
        max_processing_size: cli.max_processing_size,
        close_base_kernel: cli.close_base_kernel,
        min_area_ratio: cli.min_area_ratio,
        row_tolerance: cli.row_tolerance,
        threshold: cli.threshold,
        resample_filter: match cli.resample_filter {
            Filter::Nearest => ResampleFilter::Nearest,
            Filter::Triangle => ResampleFilter::Triangle,
            Filter::CatmullRom => ResampleFilter::CatmullRom,
            Filter::Gaussian => ResampleFilter::Gaussian,
            Filter::Lanczos3 => ResampleFilter::Lanczos3,
        },
        morphology: match cli.morphology {
            Morph::SlidingWindow => MorphologyKind::SlidingWindow,
            Morph::Naive => MorphologyKind::Naive,
        },
        keep_labels: cli.keep_labels,
    };

    Ok(DetectorConfig {
        pipeline,
        execution: if cli.parallel {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        },
        thresholds: Thresholds {
            confidence: cli.confidence,
            ..Thresholds::default()
        },
        ..DetectorConfig::default()
    })
}

fn credentials_from_cli(cli: &Cli) -> Credentials {
    [
        (autolayout_roboflow::API_KEY, &cli.api_key),
        (autolayout_roboflow::WORKSPACE, &cli.workspace),
        (autolayout_roboflow::WORKFLOW, &cli.workflow),
    ]
    .into_iter()
    .filter_map(|(key, value)| value.clone().map(|v| (key.to_owned(), v)))
    .collect()
}

/// Read each mask file, labelled with its file stem.
fn read_masks(paths: &[PathBuf]) -> Result<Vec<SegmentedMask>, String> {
    paths
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path)
                .map_err(|e| format!("Error reading mask {}: {e}", path.display()))?;
            let mask = SegmentedMask::new(RawMask::Encoded(bytes));
            Ok(match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => mask.with_label(stem),
                None => mask,
            })
        })
        .collect()
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Log every published state until the detector is dropped. Yields the
/// last state seen.
fn watch_progress(
    mut progress: tokio::sync::watch::Receiver<Progress>,
) -> tokio::task::JoinHandle<Option<DetectState>> {
    tokio::spawn(async move {
        let mut last = None;
        while progress.changed().await.is_ok() {
            let p = progress.borrow_and_update().clone();
            tracing::info!(state = ?p.state, "{}", p.message);
            last = Some(p.state);
        }
        last
    })
}

/// Run one detection, logging every state change.
async fn run<C: SegmentationClient>(
    client: C,
    config: DetectorConfig,
    request: DetectRequest,
) -> DetectOutcome {
    let detector = Detector::new(client, config);
    let watcher = watch_progress(detector.subscribe());

    let outcome = detector.detect(request).await;
    // Closing the channel ends the watcher once it has seen the final state.
    drop(detector);
    if let Err(e) = watcher.await {
        tracing::warn!(error = %e, "progress watcher failed");
    }
    outcome
}

/// File name for a snapshot: sequence number plus a slug of the title.
fn snapshot_file_name(seq: usize, title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    format!("{seq:02}-{}.png", slug.trim_matches('-'))
}

fn write_snapshots(dir: &Path, snapshots: &[Snapshot]) -> Result<(), String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("Error creating {}: {e}", dir.display()))?;
    for (seq, snapshot) in snapshots.iter().enumerate() {
        let path = dir.join(snapshot_file_name(seq + 1, &snapshot.title));
        snapshot
            .raster
            .save(&path)
            .map_err(|e| format!("Error writing {}: {e}", path.display()))?;
        eprintln!("Snapshot written to {}", path.display());
    }
    Ok(())
}

fn print_report(outcome: &DetectOutcome) {
    if let Some(ref diagnostics) = outcome.diagnostics {
        println!("{}", diagnostics.report());
        println!();
    }

    println!("{:<10} {:<24} {:>8} {:>8} {:>8} {:>8}", "Id", "Title", "X", "Y", "W", "H");
    println!("{}", "-".repeat(72));
    for region in &outcome.regions {
        let c = region.coords;
        println!(
            "{:<10} {:<24} {:>8} {:>8} {:>8} {:>8}",
            region.id, region.title, c.x, c.y, c.w, c.h
        );
    }
    println!();
    println!("{:?}: {}", outcome.status.kind, outcome.status.message);
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let image_bytes = match std::fs::read(&cli.image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    let observer = Arc::new(CollectingObserver::new());
    let mut request = DetectRequest::new(image_bytes, cli.prompt.clone())
        .with_shave_ratio(config.pipeline.shave_ratio)
        .with_credentials(credentials_from_cli(&cli));
    let debug_index = debug_index_from_raw(cli.debug_mask);
    if debug_index.is_some() {
        request = request.with_debug(debug_index, observer.clone());
    }

    let outcome = if cli.masks.is_empty() {
        let client = match RoboflowClient::new(RoboflowConfig {
            base_url: cli.base_url.clone(),
            timeout: Duration::from_secs(cli.timeout_secs),
            ..RoboflowConfig::default()
        }) {
            Ok(client) => client,
            Err(e) => {
                eprintln!("Error creating Roboflow client: {e}");
                return ExitCode::FAILURE;
            }
        };
        run(client, config, request).await
    } else {
        let masks = match read_masks(&cli.masks) {
            Ok(masks) => masks,
            Err(msg) => {
                eprintln!("{msg}");
                return ExitCode::FAILURE;
            }
        };
        run(StaticSegmentationClient::new(masks), config, request).await
    };

    if let Some(ref dir) = cli.debug_dir {
        let snapshots = observer.take();
        if snapshots.is_empty() {
            eprintln!("No snapshots captured; check --debug-mask");
        } else if let Err(msg) = write_snapshots(dir, &snapshots) {
            eprintln!("{msg}");
        }
    }

    if cli.json {
        match serde_json::to_string_pretty(&outcome) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing outcome: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_report(&outcome);
    }

    if outcome.is_failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
