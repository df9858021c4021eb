use serde::{Deserialize, Serialize};

use crate::model::PixelBox;

/// Pose landmark as reported by a backend, relative to the view it saw.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelativeLandmark {
    pub landmark_id: u8,
    /// 0..1 across the view width (may fall slightly outside for clipped limbs).
    pub x: f64,
    /// 0..1 across the view height.
    pub y: f64,
    pub z: f64,
    pub visibility: f64,
}

/// Face box straight from the detector, before clipping or quality checks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawFace {
    pub bbox: PixelBox,
    pub confidence: f32,
}

/// Outcome of a classifier call that did not fault.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Dominant emotion label.
    Label(String),
    /// The classifier ran but had no usable answer; carries the reason.
    Degraded(String),
}
