use anyhow::Result;

use crate::detect::result::{Classification, RawFace, RelativeLandmark};
use crate::frame::{FaceCrop, InferenceView};
use crate::model::ObjectDetection;

/// Detection capabilities the engine consumes from external backends.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DetectionCapability {
    Pose,
    ObjectDetection,
    FaceDetection,
    EmotionClassification,
}

impl DetectionCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionCapability::Pose => "pose",
            DetectionCapability::ObjectDetection => "objects",
            DetectionCapability::FaceDetection => "faces",
            DetectionCapability::EmotionClassification => "emotions",
        }
    }
}

/// Explicit settings handed to backend constructors.
///
/// Backends read verbosity and thresholds from here rather than from
/// process-wide environment or global log levels.
#[derive(Clone, Debug)]
pub struct BackendOptions {
    /// Emit per-inference debug lines.
    pub verbose: bool,
    /// Minimum score a model backend keeps.
    pub confidence_threshold: f32,
    /// IoU above which overlapping boxes of one class are suppressed.
    pub iou_threshold: f32,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        }
    }
}

/// Single-person pose landmark detector.
///
/// Returns at most one person per call, with coordinates relative (0..1) to
/// the view it was given.
pub trait PoseBackend: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, view: &InferenceView<'_>) -> Result<Option<Vec<RelativeLandmark>>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Object detector. Boxes are in frame pixel coordinates.
pub trait ObjectBackend: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, view: &InferenceView<'_>) -> Result<Vec<ObjectDetection>>;

    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Face box detector. Boxes are unclipped and may extend past the frame.
pub trait FaceBackend: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, view: &InferenceView<'_>) -> Result<Vec<RawFace>>;

    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Dominant-emotion classifier for a single face crop.
///
/// `Ok(Classification::Degraded)` is an expected "no answer"; `Err` is a fault.
pub trait EmotionClassifier: Send {
    fn name(&self) -> &'static str;

    fn classify(&mut self, crop: &FaceCrop<'_>) -> Result<Classification>;

    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
