//! Optional per-file and per-stage timing.
//!
//! Each image's processing returns an [`ImageTiming`]; the orchestrator merges
//! it into [`TimingStats`], which is reported once at the end of the batch.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Processing stages that are timed separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Ingest,
    Pose,
    Objects,
    Faces,
    Scoring,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Pose => "pose",
            Stage::Objects => "objects",
            Stage::Faces => "faces",
            Stage::Scoring => "scoring",
            Stage::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing gathered while processing one image.
#[derive(Clone, Debug, Default)]
pub struct ImageTiming {
    pub elapsed: Duration,
    pub stages: Vec<(Stage, Duration)>,
}

impl ImageTiming {
    /// Run `f` and record its duration under `stage`.
    pub fn time<T>(&mut self, stage: Stage, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.stages.push((stage, start.elapsed()));
        out
    }
}

/// Whole-batch timing: seconds per file and cumulative seconds per stage.
#[derive(Clone, Debug, Default)]
pub struct TimingStats {
    pub file_times: BTreeMap<PathBuf, f64>,
    pub component_times: BTreeMap<Stage, f64>,
}

impl TimingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, path: &Path, timing: &ImageTiming) {
        self.file_times
            .insert(path.to_path_buf(), timing.elapsed.as_secs_f64());
        for (stage, duration) in &timing.stages {
            *self.component_times.entry(*stage).or_insert(0.0) += duration.as_secs_f64();
        }
    }

    pub fn total_seconds(&self) -> f64 {
        self.file_times.values().sum()
    }

    /// Files ordered slowest first, at most `limit`.
    pub fn slowest(&self, limit: usize) -> Vec<(&Path, f64)> {
        let mut files: Vec<(&Path, f64)> = self
            .file_times
            .iter()
            .map(|(p, s)| (p.as_path(), *s))
            .collect();
        files.sort_by(|a, b| b.1.total_cmp(&a.1));
        files.truncate(limit);
        files
    }

    /// Human-readable report lines.
    pub fn report_lines(&self) -> Vec<String> {
        let count = self.file_times.len();
        let total = self.total_seconds();
        let mut lines = vec![format!("timing: {} files in {:.3}s", count, total)];
        if count == 0 {
            return lines;
        }
        lines.push(format!("timing: average {:.3}s per file", total / count as f64));
        for (path, secs) in self.slowest(5) {
            lines.push(format!("timing:   {:.3}s {}", secs, path.display()));
        }
        let stage_total: f64 = self.component_times.values().sum();
        for (stage, secs) in &self.component_times {
            let share = if stage_total > 0.0 {
                secs / stage_total * 100.0
            } else {
                0.0
            };
            lines.push(format!("timing: stage {:<8} {:.3}s ({:.1}%)", stage.as_str(), secs, share));
        }
        lines
    }

    pub fn log_report(&self) {
        for line in self.report_lines() {
            log::info!("{}", line);
        }
    }
}
