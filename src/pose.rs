//! Multi-person pose recovery from a single-person landmark detector.
//!
//! The detector runs once on the full frame and once on each of five
//! overlapping sub-regions. Region results are mapped back to frame pixels
//! and kept only if they are not the same person as an already accepted
//! detection, judged by the shoulder and hip landmarks.

use anyhow::{Context, Result};

use crate::detect::{PoseBackend, RelativeLandmark};
use crate::frame::{Frame, Region};
use crate::model::{Landmark, PoseDetection};

/// Left/right shoulder and left/right hip.
pub const KEY_LANDMARKS: [u8; 4] = [11, 12, 23, 24];

#[derive(Clone, Debug, PartialEq)]
pub struct DedupParams {
    /// Mean key-landmark distance (pixels) below which two poses are the same person.
    pub threshold_px: f64,
    /// Regions narrower or shorter than this are not scanned.
    pub min_region_px: u32,
}

impl Default for DedupParams {
    fn default() -> Self {
        Self {
            threshold_px: 50.0,
            min_region_px: 100,
        }
    }
}

/// Top-left, top-right, bottom-left, bottom-right quadrants and the centre half.
pub fn scan_regions(width: u32, height: u32) -> [Region; 5] {
    let (hw, hh) = (width / 2, height / 2);
    [
        Region::from_corners(0, 0, hw, hh),
        Region::from_corners(hw, 0, width, hh),
        Region::from_corners(0, hh, hw, height),
        Region::from_corners(hw, hh, width, height),
        Region::from_corners(width / 4, height / 4, 3 * width / 4, 3 * height / 4),
    ]
}

/// Mean pixel distance over the key landmarks present in both poses, or
/// `None` when they share none.
pub fn key_landmark_distance(a: &PoseDetection, b: &PoseDetection) -> Option<f64> {
    let mut total = 0.0;
    let mut shared = 0usize;
    for id in KEY_LANDMARKS {
        if let (Some(p), Some(q)) = (a.landmark(id), b.landmark(id)) {
            total += (p.x - q.x).hypot(p.y - q.y);
            shared += 1;
        }
    }
    (shared > 0).then(|| total / shared as f64)
}

/// True when `candidate` is within `threshold_px` of any accepted pose.
/// Poses with no shared key landmarks are never duplicates.
pub fn is_duplicate(candidate: &PoseDetection, accepted: &[PoseDetection], threshold_px: f64) -> bool {
    accepted.iter().any(|existing| {
        key_landmark_distance(candidate, existing).is_some_and(|d| d < threshold_px)
    })
}

fn to_frame_pose(landmarks: Vec<RelativeLandmark>, region: Region) -> Result<PoseDetection> {
    let landmarks = landmarks
        .into_iter()
        .map(|lm| {
            let (x, y) = region.to_frame(lm.x, lm.y);
            Landmark {
                landmark_id: lm.landmark_id,
                x,
                y,
                z: lm.z,
                visibility: lm.visibility,
            }
        })
        .collect();
    Ok(PoseDetection::new(landmarks)?)
}

pub struct PoseDeduplicator {
    params: DedupParams,
}

impl PoseDeduplicator {
    pub fn new(params: DedupParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DedupParams {
        &self.params
    }

    /// Detect every distinct person in `frame`.
    pub fn detect_people(&self, frame: &Frame, backend: &mut dyn PoseBackend) -> Result<Vec<PoseDetection>> {
        let mut accepted = Vec::new();

        let full = frame.inference_view();
        if let Some(landmarks) = backend
            .detect(&full)
            .with_context(|| format!("pose detection failed on {}", frame.source().display()))?
        {
            accepted.push(to_frame_pose(landmarks, full.region())?);
        }

        for region in scan_regions(frame.width(), frame.height()) {
            if region.width < self.params.min_region_px || region.height < self.params.min_region_px {
                continue;
            }
            let view = frame.region_view(region);
            let Some(landmarks) = backend.detect(&view).with_context(|| {
                format!(
                    "pose detection failed on region {:?} of {}",
                    region,
                    frame.source().display()
                )
            })?
            else {
                continue;
            };
            let candidate = to_frame_pose(landmarks, region)?;
            if is_duplicate(&candidate, &accepted, self.params.threshold_px) {
                log::debug!("pose in region {:?} duplicates an accepted person", region);
                continue;
            }
            accepted.push(candidate);
        }

        Ok(accepted)
    }
}
