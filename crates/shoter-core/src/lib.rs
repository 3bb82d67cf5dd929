//! shoter-core — Photo pipeline for the shot and registration flows.
//!
//! Decodes a captured photo, bakes in its EXIF orientation, bounds its size,
//! finds the largest face with SCRFD (ONNX Runtime) and encodes both the
//! full frame and the face crop as base64 JPEG.

pub mod capture;
pub mod detector;
pub mod pipeline;
pub mod raster;
pub mod types;

pub use capture::{CaptureError, CapturedFrame};
pub use detector::{Detection, FaceDetector, ScrfdDetector, UnavailableDetector};
pub use pipeline::{PhotoPipeline, PipelineError, PipelineOptions};
pub use raster::{Raster, RasterLedger};
pub use types::{Angle, BoundingBox, FaceRegion, PhotoPayload, PhotoProcessingResult};

/// Default directory holding the SCRFD model file.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/shoter/models")
}
