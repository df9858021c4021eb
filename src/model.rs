//! Detection and ranking records.
//!
//! Every detector output is a typed record. The JSON documents written per
//! image are the serde form of [`ImageRecord`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Emotion label recorded when the classifier produced no usable label.
pub const UNKNOWN_EMOTION: &str = "unknown";

/// Highest landmark id a pose may carry (33 landmarks, ids 0..=32).
pub const MAX_LANDMARK_ID: u8 = 32;

/// Pixel rectangle `(x1, y1)..(x2, y2)`. Serialised as `[x1, y1, x2, y2]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct PixelBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl PixelBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from an origin and a size, the layout face detectors report.
    pub fn from_xywh(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self::new(x, y, x.saturating_add(w), y.saturating_add(h))
    }

    pub fn width(&self) -> i64 {
        (self.x2 as i64 - self.x1 as i64).max(0)
    }

    pub fn height(&self) -> i64 {
        (self.y2 as i64 - self.y1 as i64).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }

    /// True when any edge lies outside `[0, width] x [0, height]`.
    pub fn exceeds(&self, width: u32, height: u32) -> bool {
        self.x1 < 0 || self.y1 < 0 || self.x2 as i64 > width as i64 || self.y2 as i64 > height as i64
    }

    /// Intersection with the frame `[0, width] x [0, height]`.
    pub fn clip_to(&self, width: u32, height: u32) -> PixelBox {
        let w = width.min(i32::MAX as u32) as i32;
        let h = height.min(i32::MAX as u32) as i32;
        let x1 = self.x1.clamp(0, w);
        let y1 = self.y1.clamp(0, h);
        PixelBox {
            x1,
            y1,
            x2: self.x2.clamp(x1, w),
            y2: self.y2.clamp(y1, h),
        }
    }
}

impl From<[i32; 4]> for PixelBox {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<PixelBox> for [i32; 4] {
    fn from(b: PixelBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One body keypoint in original-frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub landmark_id: u8,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub visibility: f64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoseError {
    #[error("landmark id {0} appears more than once")]
    DuplicateLandmark(u8),
    #[error("landmark id {0} is out of range 0..={max}", max = MAX_LANDMARK_ID)]
    LandmarkOutOfRange(u8),
}

/// One inferred person. Landmark ids are unique within a detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoseDetection {
    landmarks: Vec<Landmark>,
}

impl PoseDetection {
    pub fn new(landmarks: Vec<Landmark>) -> Result<Self, PoseError> {
        let mut seen = HashSet::with_capacity(landmarks.len());
        for lm in &landmarks {
            if lm.landmark_id > MAX_LANDMARK_ID {
                return Err(PoseError::LandmarkOutOfRange(lm.landmark_id));
            }
            if !seen.insert(lm.landmark_id) {
                return Err(PoseError::DuplicateLandmark(lm.landmark_id));
            }
        }
        Ok(Self { landmarks })
    }

    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    pub fn landmark(&self, id: u8) -> Option<&Landmark> {
        self.landmarks.iter().find(|lm| lm.landmark_id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    /// Drop landmarks whose visibility is below `min_visibility`.
    pub fn retain_visible(&mut self, min_visibility: f64) {
        self.landmarks.retain(|lm| lm.visibility >= min_visibility);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectDetection {
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: PixelBox,
}

/// A retained face with its quality signals. `bbox` is already clipped to the frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    #[serde(rename = "box")]
    pub bbox: PixelBox,
    pub emotion: String,
    pub is_partial: bool,
    pub face_completeness: f64,
    pub face_quality: f64,
    pub face_size_ratio: f64,
}

impl FaceDetection {
    pub fn emotion_matches(&self, desired: &str) -> bool {
        self.emotion.eq_ignore_ascii_case(desired)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub emotion_score: f64,
    pub object_score: f64,
    pub face_quality_score: f64,
    pub final_score: f64,
}

/// Configured multiplier applied when an object label matches `name`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiasRule {
    pub name: String,
    pub biasamount: f64,
}

impl BiasRule {
    pub fn matches(&self, label: &str) -> bool {
        self.name.eq_ignore_ascii_case(label)
    }
}

/// Everything known about one processed image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_name: String,
    pub poses: Vec<PoseDetection>,
    pub objects: Vec<ObjectDetection>,
    pub faces: Vec<FaceDetection>,
    pub score: f64,
    pub score_components: ScoreComponents,
}

impl ImageRecord {
    pub fn new(image_name: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            poses: Vec::new(),
            objects: Vec::new(),
            faces: Vec::new(),
            score: 0.0,
            score_components: ScoreComponents::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lm(id: u8) -> Landmark {
        Landmark {
            landmark_id: id,
            x: 1.0,
            y: 2.0,
            z: 0.0,
            visibility: 0.9,
        }
    }

    #[test]
    fn pose_rejects_duplicate_ids() {
        let err = PoseDetection::new(vec![lm(11), lm(12), lm(11)]).unwrap_err();
        assert_eq!(err, PoseError::DuplicateLandmark(11));
        assert_eq!(
            PoseDetection::new(vec![lm(33)]).unwrap_err(),
            PoseError::LandmarkOutOfRange(33)
        );
    }

    #[test]
    fn clip_takes_intersection_with_frame() {
        let b = PixelBox::from_xywh(-50, 10, 100, 100);
        assert!(b.exceeds(200, 200));
        let clipped = b.clip_to(200, 200);
        assert_eq!(clipped, PixelBox::new(0, 10, 50, 110));
        assert_eq!(clipped.area(), 5000);

        let outside = PixelBox::new(300, 300, 400, 400).clip_to(200, 200);
        assert_eq!(outside.area(), 0);
    }

    #[test]
    fn record_serialises_to_documented_schema() {
        let mut record = ImageRecord::new("a.jpg");
        record.poses.push(PoseDetection::new(vec![lm(0)]).unwrap());
        record.objects.push(ObjectDetection {
            label: "dog".into(),
            confidence: 0.5,
            bbox: PixelBox::new(1, 2, 3, 4),
        });
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["poses"][0][0]["landmark_id"], 0);
        assert_eq!(value["objects"][0]["box"], serde_json::json!([1, 2, 3, 4]));
        assert!(value["score_components"]["final_score"].is_number());
    }
}
