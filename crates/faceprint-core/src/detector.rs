//! SCRFD face detector via ONNX Runtime.
//!
//! Implements the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model with 3-stride anchor-free decoding and NMS post-processing.
//! The input size and score threshold are fixed per instance.

use crate::capability::DetectorError;
use crate::types::{BoundingBox, Face};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

// --- Named constants (no magic numbers) ---
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_DEFAULT_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    input_width: usize,
    input_height: usize,
    threshold: f32,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model for a `(width, height)` input size.
    ///
    /// Both sides are rounded up to a multiple of the coarsest stride.
    pub fn load(
        model_path: &str,
        input_size: (u32, u32),
        intra_threads: usize,
    ) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let num_outputs = output_names.len();

        if num_outputs < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {num_outputs}"
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        let input_width = align_to_stride(input_size.0 as usize);
        let input_height = align_to_stride(input_size.1 as usize);

        tracing::info!(
            path = model_path,
            input_width,
            input_height,
            outputs = ?output_names,
            "loaded SCRFD model"
        );
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_width,
            input_height,
            threshold: SCRFD_DEFAULT_THRESHOLD,
            stride_indices,
        })
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    /// Detect faces in an RGB image, returning them sorted by confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Face>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input_width, input_height) = (self.input_width, self.input_height);
        let threshold = self.threshold;
        let stride_indices = self.stride_indices;

        let (input, letterbox) = preprocess(image, input_width, input_height);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            let grid = StrideGrid {
                stride,
                width: input_width / stride,
                height: input_height / stride,
            };
            all_detections.extend(decode_stride(scores, bboxes, kps, &grid, &letterbox, threshold));
        }

        let mut result = nms(all_detections, SCRFD_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(result)
    }
}

fn align_to_stride(side: usize) -> usize {
    let coarsest = SCRFD_STRIDES[SCRFD_STRIDES.len() - 1];
    side.max(coarsest).div_ceil(coarsest) * coarsest
}

/// Letterbox an RGB image into a NCHW float tensor normalized for SCRFD.
fn preprocess(image: &RgbImage, input_width: usize, input_height: usize) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let scale_w = input_width as f32 / width as f32;
    let scale_h = input_height as f32 / height as f32;
    let scale = scale_w.min(scale_h);

    let new_w = ((width as f32 * scale).round() as usize).clamp(1, input_width);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, input_height);
    let pad_x = (input_width - new_w) as f32 / 2.0;
    let pad_y = (input_height - new_h) as f32 / 2.0;

    let letterbox = LetterboxInfo { scale, pad_x, pad_y };

    let resized = image::imageops::resize(image, new_w as u32, new_h as u32, FilterType::Triangle);

    // Padding is filled with SCRFD_MEAN, which normalizes to 0.0.
    let pad_x_start = pad_x.floor() as usize;
    let pad_y_start = pad_y.floor() as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, input_height, input_width));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = pad_x_start + x as usize;
        let ty = pad_y_start + y as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Discover output tensor ordering by name.
///
/// SCRFD models may export tensors with named outputs ("score_8", "bbox_16", ...) or
/// generic numeric names. Otherwise falls back to the standard positional ordering:
///   [0-2] = scores (strides 8, 16, 32)
///   [3-5] = bboxes (strides 8, 16, 32)
///   [6-8] = kps    (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named.as_deref() {
        Some(&[s8, s16, s32]) => {
            tracing::debug!("SCRFD: using name-based output tensor mapping");
            [s8, s16, s32]
        }
        _ => {
            tracing::debug!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes, [6-8]=kps"
            );
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Anchor grid geometry for one stride level.
struct StrideGrid {
    stride: usize,
    width: usize,
    height: usize,
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    grid: &StrideGrid,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<Face> {
    let stride = grid.stride as f32;
    let num_anchors = grid.height * grid.width * SCRFD_ANCHORS_PER_CELL;
    let unmap_x = |x: f32| (x - letterbox.pad_x) / letterbox.scale;
    let unmap_y = |y: f32| (y - letterbox.pad_y) / letterbox.scale;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score < threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid.width) as f32 * stride;
        let anchor_cy = (anchor_idx / grid.width) as f32 * stride;

        // Decode bbox: [left, top, right, bottom] distances * stride
        let bbox_off = idx * 4;
        if bbox_off + 3 >= bboxes.len() {
            continue;
        }
        let bbox = BoundingBox::new(
            unmap_x(anchor_cx - bboxes[bbox_off] * stride),
            unmap_y(anchor_cy - bboxes[bbox_off + 1] * stride),
            unmap_x(anchor_cx + bboxes[bbox_off + 2] * stride),
            unmap_y(anchor_cy + bboxes[bbox_off + 3] * stride),
        );

        let kps_off = idx * 10;
        let landmarks = (kps_off + 9 < kps.len()).then(|| {
            std::array::from_fn(|i| {
                (
                    unmap_x(anchor_cx + kps[kps_off + i * 2] * stride),
                    unmap_y(anchor_cy + kps[kps_off + i * 2 + 1] * stride),
                )
            })
        });

        detections.push(Face {
            bbox,
            confidence: score,
            landmarks,
            embedding: None,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<Face>, iou_threshold: f32) -> Vec<Face> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..detections.len() {
            if !suppressed[j] && iou(&detections[i].bbox, &detections[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
        keep.push(i);
    }

    let mut detections: Vec<Option<Face>> = detections.into_iter().map(Some).collect();
    keep.into_iter().filter_map(|i| detections[i].take()).collect()
}

/// Compute Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter = BoundingBox::new(a.x1.max(b.x1), a.y1.max(b.y1), a.x2.min(b.x2), a.y2.min(b.y2));
    let inter_area = inter.area();
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_face(x: f32, y: f32, w: f32, h: f32, conf: f32) -> Face {
        Face::new(BoundingBox::new(x, y, x + w, y + h), conf)
    }

    #[test]
    fn test_iou_identical() {
        let a = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_face(5.0, 5.0, 100.0, 100.0, 0.8),
            make_face(0.0, 0.0, 100.0, 100.0, 0.9),
            make_face(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_align_to_stride() {
        assert_eq!(align_to_stride(640), 640);
        assert_eq!(align_to_stride(960), 960);
        assert_eq!(align_to_stride(1000), 1024);
        assert_eq!(align_to_stride(0), 32);
    }

    #[test]
    fn test_preprocess_letterbox_landscape() {
        let image = RgbImage::from_pixel(320, 160, image::Rgb([255, 255, 255]));
        let (tensor, letterbox) = preprocess(&image, 640, 640);

        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((letterbox.scale - 2.0).abs() < 1e-6);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 160.0);
        // Padding normalizes to zero; content to (255 - 127.5) / 128.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert!((tensor[[0, 2, 320, 320]] - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-2);
    }

    #[test]
    fn test_decode_stride_maps_back_through_letterbox() {
        // One 2x1 grid at stride 8 with a single hit on anchor 2 (cell x=1, y=0).
        let grid = StrideGrid { stride: 8, width: 2, height: 1 };
        let letterbox = LetterboxInfo { scale: 2.0, pad_x: 0.0, pad_y: 10.0 };
        let scores = [0.1, 0.2, 0.9, 0.3];
        let mut bboxes = [0.0f32; 16];
        bboxes[8..12].copy_from_slice(&[1.0, 0.0, 1.0, 2.0]);
        let kps = [0.0f32; 40];

        let faces = decode_stride(&scores, &bboxes, &kps, &grid, &letterbox, 0.5);
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        // anchor (8, 0): x1 = (8-8)/2, y1 = (0-10)/2, x2 = (8+8)/2, y2 = (16-10)/2
        assert_eq!(f.bbox, BoundingBox::new(0.0, -5.0, 8.0, 3.0));
        assert_eq!(f.landmarks.unwrap()[0], (4.0, -5.0));
        assert!(f.embedding.is_none());
    }

    #[test]
    fn test_decode_stride_respects_threshold() {
        let grid = StrideGrid { stride: 8, width: 1, height: 1 };
        let letterbox = LetterboxInfo { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let scores = [0.40, 0.33];
        let bboxes = [1.0f32; 8];
        let kps = [0.0f32; 20];

        assert_eq!(decode_stride(&scores, &bboxes, &kps, &grid, &letterbox, 0.45).len(), 0);
        assert_eq!(decode_stride(&scores, &bboxes, &kps, &grid, &letterbox, 0.38).len(), 1);
        assert_eq!(decode_stride(&scores, &bboxes, &kps, &grid, &letterbox, 0.32).len(), 2);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32",
            "bbox_8",  "bbox_16",  "bbox_32",
            "kps_8",   "kps_16",   "kps_32",
        ].iter().map(|s| s.to_string()).collect();

        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_discover_output_indices_shuffled_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        assert_eq!(discover_output_indices(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_load_missing_model() {
        let err = ScrfdDetector::load("/nonexistent/det_10g.onnx", (640, 640), 1).err().unwrap();
        assert!(matches!(err, DetectorError::ModelNotFound(_)));
    }
}
