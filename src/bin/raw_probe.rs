//! raw_probe - check that RAW files convert and decode, one file or a directory

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use fast_goggles::ingest::{classify_path, decode_rgb, ImageKind};
use fast_goggles::{GogglesConfig, RawConverter};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// RAW file, or a directory whose RAW files are all probed.
    path: PathBuf,
    /// Copy each converted image into this directory as <stem>.png.
    #[arg(long)]
    save: Option<PathBuf>,
    /// External RAW decoder executable.
    #[arg(long)]
    dcraw: Option<PathBuf>,
    /// Skip the direct-decode fallback.
    #[arg(long)]
    no_direct: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn raw_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).with_context(|| format!("failed to read {}", path.display()))? {
        let entry_path = entry?.path();
        if classify_path(&entry_path) == Some(ImageKind::Raw) {
            files.push(entry_path);
        }
    }
    files.sort();
    Ok(files)
}

fn probe(converter: &RawConverter, path: &Path, save: Option<&Path>) -> Result<(u32, u32)> {
    let converted = converter.convert_to_decodable(path)?;
    let rgb = decode_rgb(&converted)?;
    if let Some(dir) = save {
        let stem = path
            .file_stem()
            .ok_or_else(|| anyhow!("{} has no file stem", path.display()))?;
        let out = dir.join(format!("{}.png", stem.to_string_lossy()));
        rgb.save(&out)
            .with_context(|| format!("failed to save {}", out.display()))?;
        println!("    saved {}", out.display());
    }
    Ok(rgb.dimensions())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::for_terminal(&args.ui);

    let mut settings = GogglesConfig::load()?.raw;
    if let Some(dcraw) = args.dcraw {
        settings.dcraw_path = dcraw;
    }
    if let Some(dir) = &args.save {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let converter = RawConverter::new(settings).with_direct_fallback(!args.no_direct);

    let files = raw_files(&args.path)?;
    if files.is_empty() {
        return Err(anyhow!("no RAW files found at {}", args.path.display()));
    }

    let mut failed = 0usize;
    for file in &files {
        let _stage = ui.stage(&format!("Convert {}", file.display()));
        match probe(&converter, file, args.save.as_deref()) {
            Ok((width, height)) => println!("OK   {} ({}x{})", file.display(), width, height),
            Err(e) => {
                failed += 1;
                println!("FAIL {}: {:#}", file.display(), e);
            }
        }
    }

    println!("{} of {} files converted", files.len() - failed, files.len());
    if failed > 0 {
        return Err(anyhow!("{} files failed to convert", failed));
    }
    Ok(())
}
