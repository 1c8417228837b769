//! Request-level entry point: bytes in, [`EmbedResponse`] out.

use crate::cache::DetectorCache;
use crate::capability::DetectorFactory;
use crate::pipeline::{EscalatingPipeline, PipelineError, PipelineLimits};
use crate::prepare::{self, DecodeError, PixelBuffer};
use crate::response::{self, EmbedResponse};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Decodes an upload, runs escalating detection, and builds the response.
///
/// Blocking; async callers should run it on a blocking thread. Safe to share
/// across threads, the detector cache serializes access per instance.
pub struct FaceEmbedder {
    pipeline: EscalatingPipeline,
}

impl FaceEmbedder {
    pub fn new(factory: Arc<dyn DetectorFactory>, limits: PipelineLimits) -> Self {
        let cache = Arc::new(DetectorCache::new(factory));
        Self::from_pipeline(EscalatingPipeline::new(cache, limits))
    }

    pub fn from_pipeline(pipeline: EscalatingPipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &EscalatingPipeline {
        &self.pipeline
    }

    pub fn embed_bytes(&self, bytes: &[u8]) -> Result<EmbedResponse, EmbedError> {
        let buffer = prepare::decode(bytes)?;
        tracing::debug!(
            bytes = bytes.len(),
            width = buffer.width(),
            height = buffer.height(),
            "decoded upload"
        );
        self.embed_image(&buffer)
    }

    pub fn embed_image(&self, buffer: &PixelBuffer) -> Result<EmbedResponse, EmbedError> {
        let detection = self.pipeline.detect(buffer)?;
        Ok(response::assemble(detection))
    }
}
