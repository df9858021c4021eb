//! Replays detector output recorded ahead of time.
//!
//! For an input `photos/IMG_0001.NEF` the backend reads
//! `<fixture_dir>/IMG_0001.NEF.json` if it exists, else `<fixture_dir>/IMG_0001.json`:
//!
//! ```json
//! {
//!   "people":  [[{"landmark_id": 11, "x": 120.0, "y": 80.0, "z": 0.0, "visibility": 0.9}]],
//!   "objects": [{"label": "dog", "confidence": 0.8, "box": [10, 10, 90, 90]}],
//!   "faces":   [{"box": [40, 20, 140, 120], "emotion": "happy"}],
//!   "fail":    ["objects"]
//! }
//! ```
//!
//! People are in frame pixel coordinates. The pose side answers like a
//! single-person detector: the full frame yields the first person, a
//! sub-region yields the first person whose torso lies inside it. A missing
//! fixture file means nothing was detected. Stages listed in `fail` return an
//! error, and a face with `"classifier_fault": true` makes the classifier fail.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detect::backend::{EmotionClassifier, FaceBackend, ObjectBackend, PoseBackend};
use crate::detect::result::{Classification, RawFace, RelativeLandmark};
use crate::frame::{FaceCrop, InferenceView, Region};
use crate::model::{Landmark, ObjectDetection, PixelBox};
use crate::pose::KEY_LANDMARKS;

#[derive(Debug, Default, Deserialize)]
struct FixtureFile {
    #[serde(default)]
    people: Vec<Vec<Landmark>>,
    #[serde(default)]
    objects: Vec<ObjectDetection>,
    #[serde(default)]
    faces: Vec<FixtureFace>,
    #[serde(default)]
    fail: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FixtureFace {
    #[serde(rename = "box")]
    bbox: PixelBox,
    #[serde(default)]
    emotion: Option<String>,
    #[serde(default = "default_face_confidence")]
    confidence: f32,
    #[serde(default)]
    classifier_fault: bool,
}

fn default_face_confidence() -> f32 {
    1.0
}

/// Fixture-replay backend. One instance serves one capability; each keeps
/// only the most recently loaded fixture.
#[derive(Debug)]
pub struct FixtureBackend {
    dir: PathBuf,
    verbose: bool,
    cached: Option<(PathBuf, Arc<FixtureFile>)>,
}

impl FixtureBackend {
    pub fn new(dir: impl Into<PathBuf>, verbose: bool) -> Self {
        Self {
            dir: dir.into(),
            verbose,
            cached: None,
        }
    }

    /// `<file name>.json` when present (distinguishes `IMG_1.NEF` from
    /// `IMG_1.JPG`), otherwise `<stem>.json`.
    pub fn fixture_path(&self, source: &Path) -> Result<PathBuf> {
        let file_name = source
            .file_name()
            .ok_or_else(|| anyhow!("image path {} has no file name", source.display()))?;
        let mut exact = file_name.to_os_string();
        exact.push(".json");
        let exact = self.dir.join(exact);
        if exact.exists() {
            return Ok(exact);
        }
        let stem = source
            .file_stem()
            .ok_or_else(|| anyhow!("image path {} has no file stem", source.display()))?;
        let mut name = stem.to_os_string();
        name.push(".json");
        Ok(self.dir.join(name))
    }

    fn load(&mut self, source: &Path) -> Result<Arc<FixtureFile>> {
        if let Some((cached_source, fixture)) = &self.cached {
            if cached_source == source {
                return Ok(fixture.clone());
            }
        }
        let path = self.fixture_path(source)?;
        let fixture = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read fixture {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("invalid fixture {}", path.display()))?
        } else {
            if self.verbose {
                log::debug!("no fixture for {} at {}", source.display(), path.display());
            }
            FixtureFile::default()
        };
        let fixture = Arc::new(fixture);
        self.cached = Some((source.to_path_buf(), fixture.clone()));
        Ok(fixture)
    }

    fn check_fault(fixture: &FixtureFile, stage: &str, source: &Path) -> Result<()> {
        if fixture.fail.iter().any(|s| s.eq_ignore_ascii_case(stage)) {
            return Err(anyhow!(
                "{} detector failed on {} (fixture fault)",
                stage,
                source.display()
            ));
        }
        Ok(())
    }
}

fn person_inside(person: &[Landmark], region: Region) -> bool {
    let inside = |lm: &Landmark| {
        lm.x >= region.x as f64
            && lm.y >= region.y as f64
            && lm.x <= (region.x + region.width) as f64
            && lm.y <= (region.y + region.height) as f64
    };
    let torso: Vec<&Landmark> = person
        .iter()
        .filter(|lm| KEY_LANDMARKS.contains(&lm.landmark_id))
        .collect();
    if torso.is_empty() {
        !person.is_empty() && person.iter().all(inside)
    } else {
        torso.into_iter().all(inside)
    }
}

fn to_relative(person: &[Landmark], region: Region) -> Vec<RelativeLandmark> {
    let w = region.width.max(1) as f64;
    let h = region.height.max(1) as f64;
    person
        .iter()
        .map(|lm| RelativeLandmark {
            landmark_id: lm.landmark_id,
            x: (lm.x - region.x as f64) / w,
            y: (lm.y - region.y as f64) / h,
            z: lm.z,
            visibility: lm.visibility,
        })
        .collect()
}

impl PoseBackend for FixtureBackend {
    fn name(&self) -> &'static str {
        "fixture"
    }

    fn detect(&mut self, view: &InferenceView<'_>) -> Result<Option<Vec<RelativeLandmark>>> {
        let fixture = self.load(view.source())?;
        Self::check_fault(&fixture, "pose", view.source())?;
        let region = view.region();
        let person = if view.is_full_frame() {
            fixture.people.first()
        } else {
            fixture.people.iter().find(|p| person_inside(p, region))
        };
        Ok(person.map(|p| to_relative(p, region)))
    }
}

impl ObjectBackend for FixtureBackend {
    fn name(&self) -> &'static str {
        "fixture"
    }

    fn detect(&mut self, view: &InferenceView<'_>) -> Result<Vec<ObjectDetection>> {
        let fixture = self.load(view.source())?;
        Self::check_fault(&fixture, "objects", view.source())?;
        Ok(fixture.objects.clone())
    }
}

impl FaceBackend for FixtureBackend {
    fn name(&self) -> &'static str {
        "fixture"
    }

    fn detect(&mut self, view: &InferenceView<'_>) -> Result<Vec<RawFace>> {
        let fixture = self.load(view.source())?;
        Self::check_fault(&fixture, "faces", view.source())?;
        Ok(fixture
            .faces
            .iter()
            .map(|f| RawFace {
                bbox: f.bbox,
                confidence: f.confidence,
            })
            .collect())
    }
}

impl EmotionClassifier for FixtureBackend {
    fn name(&self) -> &'static str {
        "fixture"
    }

    fn classify(&mut self, crop: &FaceCrop<'_>) -> Result<Classification> {
        let fixture = self.load(crop.source())?;
        let (width, height) = crop.frame_size();
        let face = fixture
            .faces
            .iter()
            .find(|f| f.bbox.clip_to(width, height) == crop.bbox());
        let Some(face) = face else {
            return Ok(Classification::Degraded(format!(
                "no recorded face at {:?}",
                <[i32; 4]>::from(crop.bbox())
            )));
        };
        if face.classifier_fault {
            return Err(anyhow!(
                "emotion classifier failed on {}",
                crop.source().display()
            ));
        }
        Ok(match &face.emotion {
            Some(label) => Classification::Label(label.clone()),
            None => Classification::Degraded("no dominant emotion recorded".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use image::RgbImage;

    fn lm(id: u8, x: f64, y: f64) -> Landmark {
        Landmark {
            landmark_id: id,
            x,
            y,
            z: 0.0,
            visibility: 1.0,
        }
    }

    fn write_fixture(dir: &Path, stem: &str, json: &str) {
        std::fs::write(dir.join(format!("{stem}.json")), json).unwrap();
    }

    #[test]
    fn person_inside_uses_torso_landmarks() {
        let person = vec![lm(0, 500.0, 500.0), lm(11, 10.0, 10.0), lm(24, 40.0, 40.0)];
        assert!(person_inside(&person, Region::from_corners(0, 0, 50, 50)));
        assert!(!person_inside(&person, Region::from_corners(20, 0, 50, 50)));
    }

    #[test]
    fn region_pose_is_relative_to_region() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(
            dir.path(),
            "img",
            r#"{"people": [[{"landmark_id": 11, "x": 150.0, "y": 50.0, "z": 0.0, "visibility": 1.0}]]}"#,
        );
        let frame = Frame::new(dir.path().join("img.png"), RgbImage::new(200, 200));
        let mut backend = FixtureBackend::new(dir.path(), false);

        let view = frame.region_view(Region::from_corners(100, 0, 200, 100));
        let pose = PoseBackend::detect(&mut backend, &view).unwrap().unwrap();
        assert_eq!(pose[0].x, 0.5);
        assert_eq!(pose[0].y, 0.5);

        let miss = frame.region_view(Region::from_corners(0, 100, 100, 200));
        assert!(PoseBackend::detect(&mut backend, &miss).unwrap().is_none());
    }

    #[test]
    fn fixture_named_after_full_file_name_wins_over_stem() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path(), "IMG_1", "{}");
        write_fixture(dir.path(), "IMG_1.NEF", "{}");
        let backend = FixtureBackend::new(dir.path(), false);

        assert_eq!(
            backend.fixture_path(Path::new("in/IMG_1.NEF")).unwrap(),
            dir.path().join("IMG_1.NEF.json")
        );
        assert_eq!(
            backend.fixture_path(Path::new("in/IMG_1.JPG")).unwrap(),
            dir.path().join("IMG_1.json")
        );
    }

    #[test]
    fn missing_fixture_means_no_detections_and_faults_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path(), "broken", r#"{"fail": ["faces"]}"#);
        let mut backend = FixtureBackend::new(dir.path(), false);

        let empty = Frame::new(dir.path().join("nothing.jpg"), RgbImage::new(10, 10));
        assert!(FaceBackend::detect(&mut backend, &empty.inference_view())
            .unwrap()
            .is_empty());

        let broken = Frame::new(dir.path().join("broken.jpg"), RgbImage::new(10, 10));
        assert!(FaceBackend::detect(&mut backend, &broken.inference_view()).is_err());
        assert!(ObjectBackend::detect(&mut backend, &broken.inference_view())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn classifier_distinguishes_label_degraded_and_fault() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(
            dir.path(),
            "faces",
            r#"{"faces": [
                {"box": [0, 0, 40, 40], "emotion": "happy"},
                {"box": [50, 0, 90, 40]},
                {"box": [0, 50, 40, 90], "emotion": "sad", "classifier_fault": true}
            ]}"#,
        );
        let frame = Frame::new(dir.path().join("faces.png"), RgbImage::new(100, 100));
        let mut backend = FixtureBackend::new(dir.path(), false);

        let happy = backend
            .classify(&frame.face_crop(PixelBox::new(0, 0, 40, 40)))
            .unwrap();
        assert_eq!(happy, Classification::Label("happy".into()));

        let degraded = backend
            .classify(&frame.face_crop(PixelBox::new(50, 0, 90, 40)))
            .unwrap();
        assert!(matches!(degraded, Classification::Degraded(_)));

        assert!(backend
            .classify(&frame.face_crop(PixelBox::new(0, 50, 40, 90)))
            .is_err());
    }
}
