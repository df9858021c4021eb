use anyhow::{anyhow, Context, Result};

use crate::config::DetectorSettings;

use super::backend::{
    BackendOptions, DetectionCapability, EmotionClassifier, FaceBackend, ObjectBackend,
    PoseBackend,
};
use super::backends::{FixtureBackend, NullBackend};

/// The four external collaborators one batch run uses.
pub struct DetectorSet {
    pub pose: Box<dyn PoseBackend>,
    pub objects: Box<dyn ObjectBackend>,
    pub faces: Box<dyn FaceBackend>,
    pub emotions: Box<dyn EmotionClassifier>,
}

impl DetectorSet {
    pub fn new(
        pose: Box<dyn PoseBackend>,
        objects: Box<dyn ObjectBackend>,
        faces: Box<dyn FaceBackend>,
        emotions: Box<dyn EmotionClassifier>,
    ) -> Self {
        Self {
            pose,
            objects,
            faces,
            emotions,
        }
    }

    /// Every capability answered by the null backend.
    pub fn null() -> Self {
        Self::new(
            Box::new(NullBackend),
            Box::new(NullBackend),
            Box::new(NullBackend),
            Box::new(NullBackend),
        )
    }

    /// Build the set named in configuration.
    pub fn from_settings(settings: &DetectorSettings, options: &BackendOptions) -> Result<Self> {
        let fixture = |capability: DetectionCapability| -> Result<FixtureBackend> {
            let dir = settings.fixture_dir.as_ref().ok_or_else(|| {
                anyhow!(
                    "{} backend 'fixture' requires detectors.fixture_dir",
                    capability.as_str()
                )
            })?;
            Ok(FixtureBackend::new(dir, options.verbose))
        };

        let pose: Box<dyn PoseBackend> = match settings.pose.as_str() {
            "null" => Box::new(NullBackend),
            "fixture" => Box::new(fixture(DetectionCapability::Pose)?),
            other => return Err(unknown_backend(DetectionCapability::Pose, other)),
        };
        let objects: Box<dyn ObjectBackend> = match settings.objects.as_str() {
            "null" => Box::new(NullBackend),
            "fixture" => Box::new(fixture(DetectionCapability::ObjectDetection)?),
            #[cfg(feature = "backend-tract")]
            "tract" => {
                let model = settings
                    .object_model
                    .as_ref()
                    .ok_or_else(|| anyhow!("objects backend 'tract' requires detectors.object_model"))?;
                Box::new(
                    super::backends::TractObjectBackend::new(
                        model,
                        settings.object_input_size,
                        options.clone(),
                    )
                    .context("initialise tract object backend")?,
                )
            }
            other => return Err(unknown_backend(DetectionCapability::ObjectDetection, other)),
        };
        let faces: Box<dyn FaceBackend> = match settings.faces.as_str() {
            "null" => Box::new(NullBackend),
            "fixture" => Box::new(fixture(DetectionCapability::FaceDetection)?),
            other => return Err(unknown_backend(DetectionCapability::FaceDetection, other)),
        };
        let emotions: Box<dyn EmotionClassifier> = match settings.emotions.as_str() {
            "null" => Box::new(NullBackend),
            "fixture" => Box::new(fixture(DetectionCapability::EmotionClassification)?),
            other => {
                return Err(unknown_backend(
                    DetectionCapability::EmotionClassification,
                    other,
                ))
            }
        };

        Ok(Self::new(pose, objects, faces, emotions))
    }

    /// Warm up every backend once before the batch starts.
    pub fn warm_up(&mut self) -> Result<()> {
        self.pose.warm_up().context("warm up pose backend")?;
        self.objects.warm_up().context("warm up object backend")?;
        self.faces.warm_up().context("warm up face backend")?;
        self.emotions.warm_up().context("warm up emotion classifier")?;
        Ok(())
    }

    /// `capability=backend` pairs for logging.
    pub fn describe(&self) -> String {
        format!(
            "{}={} {}={} {}={} {}={}",
            DetectionCapability::Pose.as_str(),
            self.pose.name(),
            DetectionCapability::ObjectDetection.as_str(),
            self.objects.name(),
            DetectionCapability::FaceDetection.as_str(),
            self.faces.name(),
            DetectionCapability::EmotionClassification.as_str(),
            self.emotions.name(),
        )
    }
}

fn unknown_backend(capability: DetectionCapability, name: &str) -> anyhow::Error {
    anyhow!(
        "unknown {} backend '{}' (available: {})",
        capability.as_str(),
        name,
        available_backends(capability).join(", ")
    )
}

fn available_backends(capability: DetectionCapability) -> Vec<&'static str> {
    let mut names = vec!["null", "fixture"];
    if cfg!(feature = "backend-tract") && capability == DetectionCapability::ObjectDetection {
        names.push("tract");
    }
    names
}
