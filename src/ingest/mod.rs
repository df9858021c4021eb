//! Image ingestion.
//!
//! Turns a file from the input directory into a decoded [`Frame`]:
//! - standard rasters (jpg, jpeg, png) decode directly
//! - camera RAW files go through [`raw::RawConverter`] first
//!
//! Temporary files produced by RAW conversion are registered in
//! [`TempFiles`] and removed when the image is finished, whatever the outcome.

pub mod raw;

use std::path::Path;

use anyhow::{Context, Result};
use image::{ImageReader, RgbImage};
use tempfile::TempPath;

use crate::frame::Frame;

pub use raw::{dcraw_args, ConversionError, ConversionStage, RawConverter, RawSettings, StageFailure};

/// Camera RAW extensions (matched case-insensitively).
pub const RAW_EXTENSIONS: [&str; 10] = [
    "nef", "raw", "arw", "cr2", "cr3", "dng", "orf", "rw2", "pef", "srw",
];

/// Standard raster extensions (matched case-insensitively).
pub const RASTER_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageKind {
    Raster,
    Raw,
}

/// Classify a path by extension. `None` means the file is not an image we process.
pub fn classify_path(path: &Path) -> Option<ImageKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if RASTER_EXTENSIONS.contains(&ext.as_str()) {
        Some(ImageKind::Raster)
    } else if RAW_EXTENSIONS.contains(&ext.as_str()) {
        Some(ImageKind::Raw)
    } else {
        None
    }
}

/// Decode any raster the `image` crate understands into RGB8.
pub fn decode_rgb(path: &Path) -> Result<RgbImage> {
    let image = ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed to read {}", path.display()))?
        .decode()
        .with_context(|| format!("could not decode image at {}", path.display()))?;
    Ok(image.to_rgb8())
}

/// Temporary files owned by the image currently being processed.
#[derive(Default)]
pub struct TempFiles {
    paths: Vec<TempPath>,
}

impl TempFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, path: TempPath) {
        self.paths.push(path);
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Delete every tracked file. Failures are logged and otherwise ignored.
    pub fn cleanup(&mut self) -> usize {
        let mut removed = 0;
        for path in self.paths.drain(..) {
            let display = path.to_path_buf();
            match path.close() {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("failed to remove temporary file {}: {}", display.display(), e),
            }
        }
        removed
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        self.cleanup();
    }
}

pub struct Ingestor {
    converter: RawConverter,
}

impl Ingestor {
    pub fn new(converter: RawConverter) -> Self {
        Self { converter }
    }

    pub fn converter(&self) -> &RawConverter {
        &self.converter
    }

    /// Decode `path` into a frame. RAW conversions are tracked in `temp`.
    pub fn load(&self, path: &Path, temp: &mut TempFiles) -> Result<Frame> {
        let kind = classify_path(path)
            .with_context(|| format!("unsupported image type: {}", path.display()))?;
        let image = match kind {
            ImageKind::Raster => decode_rgb(path)?,
            ImageKind::Raw => {
                let converted = self.converter.convert_to_decodable(path)?;
                let decoded = decode_rgb(&converted);
                temp.track(converted);
                decoded.with_context(|| format!("converted RAW {} is unreadable", path.display()))?
            }
        };
        Ok(Frame::new(path, image))
    }
}
