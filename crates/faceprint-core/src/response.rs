//! Embedding normalization and the `/embed` response contract.

use crate::pipeline::{AttemptRecord, Detection};
use crate::select::pick_best;
use crate::types::Face;
use serde::Serialize;

pub const NO_FACE: &str = "NO_FACE";
pub const NO_EMBEDDING: &str = "NO_EMBEDDING";

const NORM_EPSILON: f64 = 1e-12;

/// L2-normalize `values`. A zero vector stays zero.
pub fn normalize(values: &[f32]) -> Vec<f32> {
    let norm = values
        .iter()
        .map(|&v| (v as f64) * (v as f64))
        .sum::<f64>()
        .sqrt();
    let denom = norm + NORM_EPSILON;
    values.iter().map(|&v| (v as f64 / denom) as f32).collect()
}

/// One face with a normalized embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacePayload {
    pub bbox: [f32; 4],
    pub det_score: f32,
    pub embedding: Vec<f32>,
}

impl FacePayload {
    /// `None` when the face carries no embedding.
    fn from_face(face: &Face) -> Option<Self> {
        let embedding = face.embedding.as_ref()?;
        Some(Self {
            bbox: face.bbox.to_array(),
            det_score: face.confidence,
            embedding: normalize(&embedding.values),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedResponse {
    pub faces: Vec<FacePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_count: Option<usize>,
    pub best_embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_bbox: Option<[f32; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_det_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub tried: Vec<AttemptRecord>,
    /// Size of the image variant the boxes refer to.
    pub used_image: ImageSize,
}

impl EmbedResponse {
    fn miss(message: &'static str, tried: Vec<AttemptRecord>, used_image: ImageSize) -> Self {
        Self {
            faces: Vec::new(),
            face_count: None,
            best_embedding: None,
            best_bbox: None,
            best_det_score: None,
            message: Some(message),
            tried,
            used_image,
        }
    }
}

/// Build the response for a finished detection.
///
/// The representative is chosen over all detected faces, including those
/// without an embedding. If it has none, the first face that does is used.
pub fn assemble(detection: Detection) -> EmbedResponse {
    let (width, height) = detection.used_variant.dimensions();
    let used_image = ImageSize { width, height };

    if detection.faces.is_empty() {
        return EmbedResponse::miss(NO_FACE, detection.trace, used_image);
    }

    let payload: Vec<FacePayload> = detection
        .faces
        .iter()
        .filter_map(FacePayload::from_face)
        .collect();

    let Some(fallback) = payload.first() else {
        tracing::info!(faces = detection.faces.len(), "faces detected but none carried an embedding");
        return EmbedResponse::miss(NO_EMBEDDING, detection.trace, used_image);
    };

    let best = pick_best(&detection.faces, width, height)
        .and_then(FacePayload::from_face)
        .unwrap_or_else(|| fallback.clone());

    EmbedResponse {
        face_count: Some(payload.len()),
        best_embedding: Some(best.embedding),
        best_bbox: Some(best.bbox),
        best_det_score: Some(best.det_score),
        message: None,
        faces: payload,
        tried: detection.trace,
        used_image,
    }
}
