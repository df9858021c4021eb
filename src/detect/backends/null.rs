use anyhow::Result;

use crate::detect::backend::{EmotionClassifier, FaceBackend, ObjectBackend, PoseBackend};
use crate::detect::result::{Classification, RawFace, RelativeLandmark};
use crate::frame::{FaceCrop, InferenceView};
use crate::model::ObjectDetection;

/// Backend used when a capability is not configured. Never detects anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PoseBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn detect(&mut self, _view: &InferenceView<'_>) -> Result<Option<Vec<RelativeLandmark>>> {
        Ok(None)
    }
}

impl ObjectBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn detect(&mut self, _view: &InferenceView<'_>) -> Result<Vec<ObjectDetection>> {
        Ok(Vec::new())
    }
}

impl FaceBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn detect(&mut self, _view: &InferenceView<'_>) -> Result<Vec<RawFace>> {
        Ok(Vec::new())
    }
}

impl EmotionClassifier for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn classify(&mut self, _crop: &FaceCrop<'_>) -> Result<Classification> {
        Ok(Classification::Degraded("no emotion classifier configured".into()))
    }
}
