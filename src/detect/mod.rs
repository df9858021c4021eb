mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{
    BackendOptions, DetectionCapability, EmotionClassifier, FaceBackend, ObjectBackend,
    PoseBackend,
};
pub use backends::{FixtureBackend, NullBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractObjectBackend;
pub use registry::DetectorSet;
pub use result::{Classification, RawFace, RelativeLandmark};
