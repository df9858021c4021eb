//! Decoded frames and the restricted views detectors receive.
//!
//! - `Frame`: one decoded RGB image plus the path it was read from.
//! - `Region`: a pixel rectangle of a frame (full frame or a sub-region).
//! - `InferenceView`: the pixels of one region, handed to pose/object/face backends.
//! - `FaceCrop`: the clipped face pixels handed to the emotion classifier.
//!
//! Detectors only ever see views; they never own the frame.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::model::PixelBox;

/// Pixel rectangle inside a frame. `x`/`y` are the top-left corner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Build from corner coordinates `(xmin, ymin)..(xmax, ymax)`.
    pub fn from_corners(xmin: u32, ymin: u32, xmax: u32, ymax: u32) -> Self {
        Self {
            x: xmin,
            y: ymin,
            width: xmax.saturating_sub(xmin),
            height: ymax.saturating_sub(ymin),
        }
    }

    /// Map a coordinate relative to this region (0..1) back to frame pixels.
    pub fn to_frame(&self, rel_x: f64, rel_y: f64) -> (f64, f64) {
        (
            rel_x * self.width as f64 + self.x as f64,
            rel_y * self.height as f64 + self.y as f64,
        )
    }
}

/// One decoded image. `source` is the file the user supplied, even when the
/// pixels came from a converted RAW temp file.
pub struct Frame {
    source: PathBuf,
    image: RgbImage,
}

impl Frame {
    pub fn new(source: impl Into<PathBuf>, image: RgbImage) -> Self {
        Self {
            source: source.into(),
            image,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// View of the entire frame.
    pub fn inference_view(&self) -> InferenceView<'_> {
        InferenceView {
            source: &self.source,
            frame_width: self.width(),
            frame_height: self.height(),
            region: Region::full(self.width(), self.height()),
            pixels: Cow::Borrowed(&self.image),
        }
    }

    /// View of a sub-region. The region is clamped to the frame.
    pub fn region_view(&self, region: Region) -> InferenceView<'_> {
        let x = region.x.min(self.width());
        let y = region.y.min(self.height());
        let region = Region {
            x,
            y,
            width: region.width.min(self.width() - x),
            height: region.height.min(self.height() - y),
        };
        let pixels =
            image::imageops::crop_imm(&self.image, region.x, region.y, region.width, region.height)
                .to_image();
        InferenceView {
            source: &self.source,
            frame_width: self.width(),
            frame_height: self.height(),
            region,
            pixels: Cow::Owned(pixels),
        }
    }

    /// Crop a face box that has already been clipped to the frame.
    pub fn face_crop(&self, clipped: PixelBox) -> FaceCrop<'_> {
        let clipped = clipped.clip_to(self.width(), self.height());
        let pixels = image::imageops::crop_imm(
            &self.image,
            clipped.x1 as u32,
            clipped.y1 as u32,
            clipped.width() as u32,
            clipped.height() as u32,
        )
        .to_image();
        FaceCrop {
            source: &self.source,
            frame_width: self.width(),
            frame_height: self.height(),
            bbox: clipped,
            pixels,
        }
    }
}

/// Pixels of one region of a frame.
pub struct InferenceView<'a> {
    source: &'a Path,
    frame_width: u32,
    frame_height: u32,
    region: Region,
    pixels: Cow<'a, RgbImage>,
}

impl<'a> InferenceView<'a> {
    pub fn source(&self) -> &Path {
        self.source
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn is_full_frame(&self) -> bool {
        self.region == Region::full(self.frame_width, self.frame_height)
    }
}

/// Face pixels for emotion classification.
pub struct FaceCrop<'a> {
    source: &'a Path,
    frame_width: u32,
    frame_height: u32,
    bbox: PixelBox,
    pixels: RgbImage,
}

impl<'a> FaceCrop<'a> {
    pub fn source(&self) -> &Path {
        self.source
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    /// Clipped face box in frame coordinates.
    pub fn bbox(&self) -> PixelBox {
        self.bbox
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_maps_relative_coordinates_back_to_frame() {
        let region = Region::from_corners(200, 100, 400, 300);
        assert_eq!(region.width, 200);
        assert_eq!(region.to_frame(0.5, 0.25), (300.0, 150.0));
    }

    #[test]
    fn region_view_crops_and_clamps() {
        let frame = Frame::new("a.png", RgbImage::new(300, 200));
        let view = frame.region_view(Region::from_corners(150, 100, 400, 260));
        assert_eq!(view.region(), Region::from_corners(150, 100, 300, 200));
        assert_eq!((view.width(), view.height()), (150, 100));
        assert!(!view.is_full_frame());
        assert!(frame.inference_view().is_full_frame());
    }

    #[test]
    fn face_crop_matches_clipped_box() {
        let frame = Frame::new("a.png", RgbImage::new(100, 100));
        let crop = frame.face_crop(PixelBox::new(80, 10, 100, 40));
        assert_eq!(crop.pixels().dimensions(), (20, 30));
        assert_eq!(crop.bbox(), PixelBox::new(80, 10, 100, 40));
    }
}
