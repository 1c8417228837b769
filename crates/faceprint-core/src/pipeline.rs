//! Escalating multi-pass detection.
//!
//! Detection is retried over three image variants (fast-pass resized, full
//! size, upscaled) and, within each variant, over a fixed schedule of detector
//! configurations. The first configuration that finds a face wins. Every
//! detector invocation is recorded so callers can see why detection failed.

use crate::cache::{DetectorCache, DetectorConfig};
use crate::prepare::{bound_long_edge, upscale, PixelBuffer};
use crate::types::Face;
use serde::Serialize;
use std::sync::{Arc, PoisonError};
use thiserror::Error;

/// Detector input sizes, cheapest first.
pub const RESOLUTION_HINTS: [(u32, u32); 3] = [(640, 640), (960, 960), (1280, 1280)];

/// Score thresholds, strictest first.
pub const THRESHOLDS: [f32; 4] = [0.55, 0.45, 0.38, 0.32];

pub const DEFAULT_FIRST_PASS_MAX_EDGE: u32 = 2200;
pub const DEFAULT_ABS_MAX_EDGE: u32 = 3200;
pub const DEFAULT_UPSCALE_ON_FAIL: f32 = 1.35;

/// Upper bound on detector invocations for one image.
pub const MAX_ATTEMPTS: usize = 3 * RESOLUTION_HINTS.len() * THRESHOLDS.len();

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector {det_w}x{det_h} @ {threshold} unavailable: {source}")]
    DetectorUnavailable {
        det_w: u32,
        det_h: u32,
        threshold: f32,
        #[source]
        source: crate::capability::DetectorError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    First,
    Full,
    Upscale,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::First => "first",
            Phase::Full => "full",
            Phase::Upscale => "upscale",
        }
    }
}

/// One detector invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub phase: Phase,
    pub det_size: [u32; 2],
    pub det_thresh: f32,
    /// Dimensions of the image variant the detector ran on.
    pub width: u32,
    pub height: u32,
    pub faces: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Size ceilings and the last-resort upscale factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineLimits {
    pub first_pass_max_edge: u32,
    pub abs_max_edge: u32,
    pub upscale_on_fail: f32,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            first_pass_max_edge: DEFAULT_FIRST_PASS_MAX_EDGE,
            abs_max_edge: DEFAULT_ABS_MAX_EDGE,
            upscale_on_fail: DEFAULT_UPSCALE_ON_FAIL,
        }
    }
}

/// Result of escalation: the faces found, the variant they were found on, and
/// every attempt made. `faces` is empty when all attempts missed.
#[derive(Debug, Clone)]
pub struct Detection {
    pub faces: Vec<Face>,
    pub used_variant: PixelBuffer,
    pub trace: Vec<AttemptRecord>,
}

pub struct EscalatingPipeline {
    cache: Arc<DetectorCache>,
    limits: PipelineLimits,
}

impl EscalatingPipeline {
    pub fn new(cache: Arc<DetectorCache>, limits: PipelineLimits) -> Self {
        Self { cache, limits }
    }

    pub fn cache(&self) -> &DetectorCache {
        &self.cache
    }

    pub fn limits(&self) -> PipelineLimits {
        self.limits
    }

    /// Run the escalation schedule on `buffer`.
    ///
    /// Fails only when a detector instance cannot be constructed; detector
    /// misses and per-invocation errors are normal outcomes.
    pub fn detect(&self, buffer: &PixelBuffer) -> Result<Detection, PipelineError> {
        let img0 = bound_long_edge(buffer, self.limits.abs_max_edge);
        let mut trace = Vec::with_capacity(MAX_ATTEMPTS);

        let first = bound_long_edge(&img0, self.limits.first_pass_max_edge);
        if let Some(faces) = self.sweep(Phase::First, &first, &mut trace)? {
            return Ok(Detection {
                faces,
                used_variant: first,
                trace,
            });
        }

        if let Some(faces) = self.sweep(Phase::Full, &img0, &mut trace)? {
            return Ok(Detection {
                faces,
                used_variant: img0,
                trace,
            });
        }

        let upscaled = upscale(&img0, self.limits.upscale_on_fail);
        let faces = self
            .sweep(Phase::Upscale, &upscaled, &mut trace)?
            .unwrap_or_default();

        if faces.is_empty() {
            tracing::info!(
                attempts = trace.len(),
                width = upscaled.width(),
                height = upscaled.height(),
                "no face found after full escalation"
            );
        }

        Ok(Detection {
            faces,
            used_variant: upscaled,
            trace,
        })
    }

    /// Try every configuration on `image`, returning the first non-empty result.
    fn sweep(
        &self,
        phase: Phase,
        image: &PixelBuffer,
        trace: &mut Vec<AttemptRecord>,
    ) -> Result<Option<Vec<Face>>, PipelineError> {
        let (width, height) = image.dimensions();

        for &hint in RESOLUTION_HINTS.iter() {
            for &threshold in THRESHOLDS.iter() {
                let config = DetectorConfig::new(hint, threshold);
                let analyzer =
                    self.cache
                        .get(config)
                        .map_err(|source| PipelineError::DetectorUnavailable {
                            det_w: hint.0,
                            det_h: hint.1,
                            threshold,
                            source,
                        })?;

                let outcome = analyzer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .detect(image);

                let (faces, error) = match outcome {
                    Ok(faces) => (faces, None),
                    Err(e) => {
                        tracing::warn!(
                            phase = phase.as_str(),
                            det_w = hint.0,
                            det_h = hint.1,
                            threshold,
                            error = %e,
                            "detector invocation failed; treating as no face"
                        );
                        (Vec::new(), Some(e.to_string()))
                    }
                };

                trace.push(AttemptRecord {
                    phase,
                    det_size: [hint.0, hint.1],
                    det_thresh: threshold,
                    width,
                    height,
                    faces: faces.len(),
                    error,
                });

                if !faces.is_empty() {
                    tracing::info!(
                        phase = phase.as_str(),
                        det_w = hint.0,
                        det_h = hint.1,
                        threshold,
                        faces = faces.len(),
                        attempts = trace.len(),
                        "faces detected"
                    );
                    return Ok(Some(faces));
                }
            }
        }

        tracing::debug!(phase = phase.as_str(), width, height, "phase found no face");
        Ok(None)
    }
}
