pub mod fixture;
pub mod null;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use fixture::FixtureBackend;
pub use null::NullBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractObjectBackend;
