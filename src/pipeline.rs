//! Batch orchestration over an input directory.
//!
//! Images are processed one at a time: ingest, pose, objects, faces, scoring,
//! persist. A failure at any step skips that image only. Each image returns an
//! [`ImageOutcome`] which the processor merges into its ledger and timing.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};

use crate::config::GogglesConfig;
use crate::detect::DetectorSet;
use crate::face::FaceAssessor;
use crate::ingest::{classify_path, Ingestor, RawConverter, TempFiles};
use crate::model::{BiasRule, ImageRecord};
use crate::pose::PoseDeduplicator;
use crate::scoring::{rank, ScoreFusion};
use crate::timing::{ImageTiming, Stage, TimingStats};

pub const SUMMARY_FILE: &str = "summary.json";
const RESULTS_SUFFIX: &str = "_results.json";

/// An image that was left out of the results, and why.
#[derive(Clone, Debug, PartialEq)]
pub struct SkippedImage {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of processing one image.
pub struct ImageOutcome {
    pub path: PathBuf,
    pub record: Result<ImageRecord>,
    pub timing: ImageTiming,
}

/// Progress notifications for a batch run.
#[derive(Clone, Copy, Debug)]
pub enum BatchEvent<'a> {
    Started { total: usize },
    Image { index: usize, path: &'a Path },
    Finished { processed: usize, skipped: usize },
}

/// Where a per-image result document goes: `<stem>_results.json`, or
/// `<file name>_results.json` when another input shares the stem.
pub fn results_path(output_dir: &Path, image: &Path, stem_is_shared: bool) -> PathBuf {
    let base = if stem_is_shared {
        image.file_name()
    } else {
        image.file_stem()
    };
    let base = base.map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    output_dir.join(format!("{base}{RESULTS_SUFFIX}"))
}

/// Stems carried by more than one of `images` (e.g. `IMG_1.NEF` and `IMG_1.JPG`).
pub fn shared_stems(images: &[PathBuf]) -> HashSet<OsString> {
    let mut seen = HashSet::new();
    let mut shared = HashSet::new();
    for stem in images.iter().filter_map(|p| p.file_stem()) {
        if !seen.insert(stem) {
            shared.insert(stem.to_os_string());
        }
    }
    shared
}

/// Supported images directly inside `dir`, ordered by file name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read input directory {}", dir.display()))?;
    let mut images = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let path = entry.path();
        if path.is_file() && classify_path(&path).is_some() {
            images.push(path);
        }
    }
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

pub struct ImageProcessor {
    input_dir: PathBuf,
    output_dir: PathBuf,
    detectors: DetectorSet,
    ingestor: Ingestor,
    dedup: PoseDeduplicator,
    faces: FaceAssessor,
    fusion: ScoreFusion,
    desired_emotion: String,
    bias_rules: Vec<BiasRule>,
    landmark_min_visibility: f64,
    object_min_confidence: f32,
    timing: Option<TimingStats>,
    skipped: Vec<SkippedImage>,
    shared_stems: HashSet<OsString>,
    temp: TempFiles,
}

impl ImageProcessor {
    /// Create the output directory and wire up every stage from `config`.
    pub fn new(
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        config: &GogglesConfig,
        detectors: DetectorSet,
        process_time_debug: bool,
    ) -> Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;

        Ok(Self {
            input_dir: input_dir.into(),
            output_dir,
            detectors,
            ingestor: Ingestor::new(RawConverter::new(config.raw.clone())),
            dedup: PoseDeduplicator::new(config.dedup.clone()),
            faces: FaceAssessor::new(config.face.clone()),
            fusion: ScoreFusion::new(config.fusion.clone()),
            desired_emotion: config.desired_emotion.clone(),
            bias_rules: config.bias_rules.clone(),
            landmark_min_visibility: config.landmark_min_visibility,
            object_min_confidence: config.detectors.object_min_confidence,
            timing: process_time_debug.then(TimingStats::new),
            skipped: Vec::new(),
            shared_stems: HashSet::new(),
            temp: TempFiles::new(),
        })
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Images skipped so far, in processing order.
    pub fn skipped(&self) -> &[SkippedImage] {
        &self.skipped
    }

    /// Timing collected so far, when enabled.
    pub fn timing(&self) -> Option<&TimingStats> {
        self.timing.as_ref()
    }

    pub fn process_directory(&mut self) -> Result<Vec<ImageRecord>> {
        self.process_directory_with(|_| {})
    }

    /// Process every supported image and return the records ranked by score.
    ///
    /// Only an unreadable input directory or an unwritable summary fails the batch.
    pub fn process_directory_with<F>(&mut self, mut on_event: F) -> Result<Vec<ImageRecord>>
    where
        F: FnMut(BatchEvent<'_>),
    {
        let images = list_images(&self.input_dir)?;
        self.shared_stems = shared_stems(&images);
        log::info!(
            "processing {} images from {}",
            images.len(),
            self.input_dir.display()
        );
        on_event(BatchEvent::Started {
            total: images.len(),
        });

        let mut records = Vec::with_capacity(images.len());
        let skipped_before = self.skipped.len();
        for (index, path) in images.iter().enumerate() {
            on_event(BatchEvent::Image { index, path });
            let outcome = self.process_image(path);
            if let Some(record) = self.absorb(outcome) {
                records.push(record);
            }
        }

        write_json(&self.output_dir.join(SUMMARY_FILE), &records)?;
        let skipped = self.skipped.len() - skipped_before;
        log::info!("processed {} images, skipped {}", records.len(), skipped);
        on_event(BatchEvent::Finished {
            processed: records.len(),
            skipped,
        });

        if let Some(timing) = &self.timing {
            timing.log_report();
        }

        rank(&mut records);
        Ok(records)
    }

    /// Run every stage on one image and persist its result document.
    ///
    /// Temporary files from RAW conversion are removed before returning.
    pub fn process_image(&mut self, path: &Path) -> ImageOutcome {
        let start = Instant::now();
        let mut timing = ImageTiming::default();
        let record = self.run_stages(path, &mut timing);
        let removed = self.temp.cleanup();
        if removed > 0 {
            log::debug!("removed {} temporary files for {}", removed, path.display());
        }
        timing.elapsed = start.elapsed();
        ImageOutcome {
            path: path.to_path_buf(),
            record,
            timing,
        }
    }

    fn run_stages(&mut self, path: &Path, timing: &mut ImageTiming) -> Result<ImageRecord> {
        let image_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", path.display()))?;
        let mut record = ImageRecord::new(image_name);

        let frame = timing.time(Stage::Ingest, || self.ingestor.load(path, &mut self.temp))?;

        record.poses = timing.time(Stage::Pose, || {
            self.dedup.detect_people(&frame, self.detectors.pose.as_mut())
        })?;
        if self.landmark_min_visibility > 0.0 {
            for pose in &mut record.poses {
                pose.retain_visible(self.landmark_min_visibility);
            }
            record.poses.retain(|pose| !pose.is_empty());
        }

        let view = frame.inference_view();
        let mut objects = timing
            .time(Stage::Objects, || self.detectors.objects.detect(&view))
            .with_context(|| format!("object detection failed on {}", path.display()))?;
        objects.retain(|object| object.confidence >= self.object_min_confidence);
        record.objects = objects;

        record.faces = timing.time(Stage::Faces, || {
            self.faces.detect_faces(
                &frame,
                self.detectors.faces.as_mut(),
                self.detectors.emotions.as_mut(),
            )
        })?;

        timing.time(Stage::Scoring, || {
            self.fusion
                .apply(&mut record, &self.desired_emotion, &self.bias_rules)
        });

        let stem_is_shared = path
            .file_stem()
            .is_some_and(|stem| self.shared_stems.contains(stem));
        let out = results_path(&self.output_dir, path, stem_is_shared);
        timing.time(Stage::Persist, || write_json(&out, &record))?;
        log::debug!(
            "{}: score {:.4} ({} poses, {} objects, {} faces)",
            record.image_name,
            record.score,
            record.poses.len(),
            record.objects.len(),
            record.faces.len()
        );
        Ok(record)
    }

    /// Merge one outcome into the ledger and timing; return the record if it succeeded.
    fn absorb(&mut self, outcome: ImageOutcome) -> Option<ImageRecord> {
        if let Some(timing) = &mut self.timing {
            timing.merge(&outcome.path, &outcome.timing);
        }
        match outcome.record {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("skipping {}: {:#}", outcome.path.display(), e);
                self.skipped.push(SkippedImage {
                    path: outcome.path,
                    reason: format!("{e:#}"),
                });
                None
            }
        }
    }
}

impl Drop for ImageProcessor {
    fn drop(&mut self) {
        self.temp.cleanup();
    }
}
