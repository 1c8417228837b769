//! The face-analysis capability the pipeline drives.
//!
//! A [`DetectorFactory`] builds one [`FaceAnalyzer`] per resolution hint; the
//! analyzer detects faces and, where it can, attaches an embedding to each.

use crate::prepare::PixelBuffer;
use crate::types::Face;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download the model pack and place it under the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Returned by analyzers whose detection threshold is fixed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("detector does not expose a mutable threshold")]
pub struct ThresholdUnsupported;

/// A constructed detector bound to one resolution hint.
pub trait FaceAnalyzer: Send {
    /// Adjust the minimum score a candidate needs to be reported.
    fn set_threshold(&mut self, _threshold: f32) -> Result<(), ThresholdUnsupported> {
        Err(ThresholdUnsupported)
    }

    /// Detect faces in `image`. Boxes are in `image`'s pixel coordinates.
    fn detect(&mut self, image: &PixelBuffer) -> Result<Vec<Face>, DetectorError>;
}

/// Builds analyzers. Construction is assumed to be expensive.
pub trait DetectorFactory: Send + Sync {
    fn construct(&self, resolution_hint: (u32, u32)) -> Result<Box<dyn FaceAnalyzer>, DetectorError>;
}
