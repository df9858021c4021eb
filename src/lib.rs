//! Fast Goggles: detection fusion and ranking for photo collections.
//!
//! A batch run takes a directory of photos (rasters and camera RAW files),
//! runs pose, object and face/emotion detectors over each image, fuses the
//! detections into a single score and writes per-image and summary JSON.
//! The returned records are ranked by score, highest first.
//!
//! # Module Structure
//!
//! - `ingest`: raster decode and the RAW conversion chain
//! - `frame`: decoded frames and the restricted views handed to detectors
//! - `detect`: detector capability traits and backends
//! - `pose`: multi-region pose scanning with duplicate suppression
//! - `face`: face geometry checks and quality scoring
//! - `scoring`: score fusion and ranking
//! - `pipeline`: the batch orchestrator
//! - `timing`: optional per-file and per-stage timing

pub mod config;
pub mod detect;
pub mod face;
pub mod frame;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod pose;
pub mod scoring;
pub mod timing;

pub use config::{load_bias_rules, DetectorSettings, GogglesConfig};
pub use detect::{BackendOptions, Classification, DetectorSet};
pub use face::{assess, FaceAssessment, FaceAssessor, FaceQualityParams, FaceVerdict};
pub use frame::{FaceCrop, Frame, InferenceView, Region};
pub use ingest::{ConversionError, Ingestor, RawConverter, RawSettings, TempFiles};
pub use model::{
    BiasRule, FaceDetection, ImageRecord, Landmark, ObjectDetection, PixelBox, PoseDetection,
    ScoreComponents,
};
pub use pipeline::{BatchEvent, ImageOutcome, ImageProcessor, SkippedImage};
pub use pose::{DedupParams, PoseDeduplicator};
pub use scoring::{rank, FusionParams, ScoreFusion};
pub use timing::{ImageTiming, Stage, TimingStats};
