//! goggles - rank a directory of photos by fused detection score

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use fast_goggles::{load_bias_rules, BackendOptions, BatchEvent, DetectorSet, GogglesConfig, ImageProcessor};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory of images to process.
    #[arg(long)]
    input: PathBuf,
    /// Directory for per-image results and summary.json.
    #[arg(long, default_value = "results")]
    output: PathBuf,
    /// Config file (.toml or JSON).
    #[arg(long, env = "GOGGLES_CONFIG")]
    config: Option<PathBuf>,
    /// Emotion label that earns score.
    #[arg(long)]
    desired_emotion: Option<String>,
    /// Bias rules file (JSON or TOML list of {name, biasamount}).
    #[arg(long)]
    bias_config: Option<PathBuf>,
    /// Directory of precomputed detector output for the fixture backend.
    #[arg(long)]
    fixture_dir: Option<PathBuf>,
    /// Pose backend (null|fixture).
    #[arg(long)]
    pose_backend: Option<String>,
    /// Object backend (null|fixture|tract).
    #[arg(long)]
    object_backend: Option<String>,
    /// Face backend (null|fixture).
    #[arg(long)]
    face_backend: Option<String>,
    /// Emotion classifier (null|fixture).
    #[arg(long)]
    emotion_backend: Option<String>,
    /// ONNX model for the tract object backend.
    #[arg(long)]
    object_model: Option<PathBuf>,
    /// External RAW decoder executable.
    #[arg(long)]
    dcraw: Option<PathBuf>,
    /// Let detector backends log their own diagnostics.
    #[arg(long)]
    verbose_detectors: bool,
    /// Report per-file and per-stage timing at the end of the batch.
    #[arg(long)]
    process_time_debug: bool,
    /// Number of ranked results to print (0 prints all).
    #[arg(long, default_value_t = 10)]
    top: usize,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn apply_args(cfg: &mut GogglesConfig, args: &Args) -> Result<()> {
    if let Some(emotion) = &args.desired_emotion {
        cfg.desired_emotion = emotion.trim().to_string();
    }
    if let Some(path) = &args.bias_config {
        cfg.bias_rules = load_bias_rules(path)?;
    }
    if let Some(dir) = &args.fixture_dir {
        cfg.detectors.fixture_dir = Some(dir.clone());
    }
    if let Some(name) = &args.pose_backend {
        cfg.detectors.pose = name.clone();
    }
    if let Some(name) = &args.object_backend {
        cfg.detectors.objects = name.clone();
    }
    if let Some(name) = &args.face_backend {
        cfg.detectors.faces = name.clone();
    }
    if let Some(name) = &args.emotion_backend {
        cfg.detectors.emotions = name.clone();
    }
    if let Some(model) = &args.object_model {
        cfg.detectors.object_model = Some(model.clone());
    }
    if let Some(dcraw) = &args.dcraw {
        cfg.raw.dcraw_path = dcraw.clone();
    }
    if args.verbose_detectors {
        cfg.detectors.verbose = true;
    }
    cfg.validate()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::for_terminal(&args.ui);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = GogglesConfig::load_from(args.config.as_deref())?;
        apply_args(&mut cfg, &args)?;
        cfg
    };

    let detectors = {
        let _stage = ui.stage("Initialise detectors");
        let options = BackendOptions {
            verbose: cfg.detectors.verbose,
            ..BackendOptions::default()
        };
        let mut detectors = DetectorSet::from_settings(&cfg.detectors, &options)?;
        detectors.warm_up()?;
        log::info!("detectors: {}", detectors.describe());
        detectors
    };

    let mut processor = ImageProcessor::new(
        &args.input,
        &args.output,
        &cfg,
        detectors,
        args.process_time_debug,
    )?;

    let mut progress = None;
    let ranked = processor.process_directory_with(|event| match event {
        BatchEvent::Started { total } => progress = Some(ui.batch(total)),
        BatchEvent::Image { index, path } => {
            if let Some(progress) = &progress {
                let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                progress.image(index, &name);
            }
        }
        BatchEvent::Finished { processed, skipped } => {
            if let Some(progress) = &progress {
                progress.finish(processed, skipped);
            }
        }
    })?;

    let shown = if args.top == 0 {
        ranked.len()
    } else {
        args.top.min(ranked.len())
    };
    println!("Top {} of {} images for '{}':", shown, ranked.len(), cfg.desired_emotion);
    for (rank, record) in ranked.iter().take(shown).enumerate() {
        let c = &record.score_components;
        println!(
            "{:>3}. {:<40} score={:.4} emotion={:.3} objects={:.3} faces={:.3}",
            rank + 1,
            record.image_name,
            record.score,
            c.emotion_score,
            c.object_score,
            c.face_quality_score
        );
    }

    if !processor.skipped().is_empty() {
        println!("Skipped {} images:", processor.skipped().len());
        for skipped in processor.skipped() {
            println!("  {}: {}", skipped.path.display(), skipped.reason);
        }
    }
    println!("Results written to {}", processor.output_dir().display());
    Ok(())
}
