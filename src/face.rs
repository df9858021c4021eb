//! Face quality from box geometry.
//!
//! A face box may extend past the frame. The assessor measures how much of it
//! is visible, clips it, drops faces too small or too cut off to classify, and
//! derives a bounded quality score from completeness and relative size.

use anyhow::{Context, Result};

use crate::detect::{Classification, EmotionClassifier, FaceBackend, RawFace};
use crate::frame::Frame;
use crate::model::{FaceDetection, PixelBox, UNKNOWN_EMOTION};

#[derive(Clone, Debug, PartialEq)]
pub struct FaceQualityParams {
    /// Clipped boxes narrower or shorter than this (pixels) are dropped.
    pub min_side_px: i64,
    /// Faces with less than this fraction inside the frame are dropped.
    pub min_completeness: f64,
    /// Size ratios strictly below this are penalised.
    pub small_face_ratio: f64,
    pub small_face_penalty: f64,
    /// Size ratios within `[boost_min_ratio, boost_max_ratio]` are boosted.
    pub boost_min_ratio: f64,
    pub boost_max_ratio: f64,
    pub boost_factor: f64,
}

impl Default for FaceQualityParams {
    fn default() -> Self {
        Self {
            min_side_px: 20,
            min_completeness: 0.5,
            small_face_ratio: 0.01,
            small_face_penalty: 0.5,
            boost_min_ratio: 0.05,
            boost_max_ratio: 0.3,
            boost_factor: 1.2,
        }
    }
}

/// Geometry verdict for one retained face.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceAssessment {
    pub is_partial: bool,
    pub face_completeness: f64,
    pub face_quality: f64,
    pub face_size_ratio: f64,
    pub clipped_box: PixelBox,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DropReason {
    TooSmall { width: i64, height: i64 },
    MostlyOutsideFrame { completeness: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FaceVerdict {
    Retained(FaceAssessment),
    Dropped(DropReason),
}

/// Assess one face box against a `frame_width` x `frame_height` frame.
pub fn assess(face_box: PixelBox, frame_width: u32, frame_height: u32, params: &FaceQualityParams) -> FaceVerdict {
    let is_partial = face_box.exceeds(frame_width, frame_height);
    let clipped = face_box.clip_to(frame_width, frame_height);

    let face_completeness = if is_partial {
        let total = face_box.area();
        if total > 0 {
            clipped.area() as f64 / total as f64
        } else {
            0.0
        }
    } else {
        1.0
    };

    if clipped.width() < params.min_side_px || clipped.height() < params.min_side_px {
        return FaceVerdict::Dropped(DropReason::TooSmall {
            width: clipped.width(),
            height: clipped.height(),
        });
    }
    if face_completeness < params.min_completeness {
        return FaceVerdict::Dropped(DropReason::MostlyOutsideFrame {
            completeness: face_completeness,
        });
    }

    let mut face_quality = 1.0;
    if is_partial {
        face_quality *= face_completeness;
    }

    let frame_area = frame_width as f64 * frame_height as f64;
    let face_size_ratio = if frame_area > 0.0 {
        clipped.area() as f64 / frame_area
    } else {
        0.0
    };
    if face_size_ratio < params.small_face_ratio {
        face_quality *= params.small_face_penalty;
    } else if (params.boost_min_ratio..=params.boost_max_ratio).contains(&face_size_ratio) {
        face_quality *= params.boost_factor;
    }

    FaceVerdict::Retained(FaceAssessment {
        is_partial,
        face_completeness,
        face_quality: face_quality.min(1.0),
        face_size_ratio,
        clipped_box: clipped,
    })
}

pub struct FaceAssessor {
    params: FaceQualityParams,
}

impl FaceAssessor {
    pub fn new(params: FaceQualityParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &FaceQualityParams {
        &self.params
    }

    /// Detect faces in `frame`, keep the usable ones and classify their emotion.
    ///
    /// Classifier problems never drop a face; they record `"unknown"`.
    pub fn detect_faces(
        &self,
        frame: &Frame,
        detector: &mut dyn FaceBackend,
        classifier: &mut dyn EmotionClassifier,
    ) -> Result<Vec<FaceDetection>> {
        let raw = detector
            .detect(&frame.inference_view())
            .with_context(|| format!("face detection failed on {}", frame.source().display()))?;
        Ok(raw
            .into_iter()
            .filter_map(|face| self.assess_face(frame, face, classifier))
            .collect())
    }

    fn assess_face(&self, frame: &Frame, face: RawFace, classifier: &mut dyn EmotionClassifier) -> Option<FaceDetection> {
        let assessment = match assess(face.bbox, frame.width(), frame.height(), &self.params) {
            FaceVerdict::Retained(a) => a,
            FaceVerdict::Dropped(reason) => {
                log::debug!(
                    "dropping face {:?} in {}: {:?}",
                    <[i32; 4]>::from(face.bbox),
                    frame.source().display(),
                    reason
                );
                return None;
            }
        };

        let crop = frame.face_crop(assessment.clipped_box);
        let emotion = match classifier.classify(&crop) {
            Ok(Classification::Label(label)) => label,
            Ok(Classification::Degraded(reason)) => {
                log::debug!(
                    "emotion unavailable for face in {}: {}",
                    frame.source().display(),
                    reason
                );
                UNKNOWN_EMOTION.to_string()
            }
            Err(e) => {
                log::warn!(
                    "emotion classifier {} failed on {}: {:#}",
                    classifier.name(),
                    frame.source().display(),
                    e
                );
                UNKNOWN_EMOTION.to_string()
            }
        };

        Some(FaceDetection {
            bbox: assessment.clipped_box,
            emotion,
            is_partial: assessment.is_partial,
            face_completeness: assessment.face_completeness,
            face_quality: assessment.face_quality,
            face_size_ratio: assessment.face_size_ratio,
        })
    }
}
