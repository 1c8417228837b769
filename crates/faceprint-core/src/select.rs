//! Representative-face selection.
//!
//! Score = 0.70·confidence + 0.25·sqrt(relative area) + 0.05·(1 − normalized
//! distance from image centre). Confidence dominates; size favours the main
//! subject; centrality only breaks near-ties.

use crate::types::Face;

const CONFIDENCE_WEIGHT: f32 = 0.70;
const SIZE_WEIGHT: f32 = 0.25;
const CENTER_WEIGHT: f32 = 0.05;

/// Composite score of `face` inside an image of `image_width` × `image_height`.
pub fn score_face(face: &Face, image_width: u32, image_height: u32) -> f32 {
    let w = image_width.max(1) as f32;
    let h = image_height.max(1) as f32;

    let area_norm = (face.bbox.area() / (w * h)).clamp(0.0, 1.0);
    // Sub-linear so small subjects in group photos are not scored near zero.
    let size_term = area_norm.sqrt();

    let (cx, cy) = face.bbox.center();
    let dx = (cx - w / 2.0) / w;
    let dy = (cy - h / 2.0) / h;
    let center_term = 1.0 - (dx * dx + dy * dy).sqrt().clamp(0.0, 1.0);

    CONFIDENCE_WEIGHT * face.confidence + SIZE_WEIGHT * size_term + CENTER_WEIGHT * center_term
}

/// Highest-scoring face; the earliest one wins ties. `None` only for an empty slice.
pub fn pick_best(faces: &[Face], image_width: u32, image_height: u32) -> Option<&Face> {
    let mut best: Option<(&Face, f32)> = None;
    for face in faces {
        let score = score_face(face, image_width, image_height);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((face, score)),
        }
    }
    best.map(|(face, _)| face)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn face(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Face {
        Face::new(BoundingBox::new(x1, y1, x2, y2), confidence)
    }

    #[test]
    fn test_empty_has_no_best() {
        assert!(pick_best(&[], 100, 100).is_none());
    }

    #[test]
    fn test_single_face_is_best() {
        let faces = vec![face(0.0, 0.0, 1.0, 1.0, 0.1)];
        assert_eq!(pick_best(&faces, 100, 100), Some(&faces[0]));
    }

    #[test]
    fn test_score_matches_formula() {
        // 1000x1000 image, 100x100 face centred at (500, 500).
        let f = face(450.0, 450.0, 550.0, 550.0, 0.9);
        let expected = 0.70 * 0.9 + 0.25 * (0.01f32).sqrt() + 0.05 * 1.0;
        assert!((score_face(&f, 1000, 1000) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_confident_small_centered_vs_large_off_center() {
        // A: conf 0.9, 1% of the image, centred. B: conf 0.5, 30% of the image, off-centre.
        let (w, h) = (1000u32, 1000u32);
        let a = face(450.0, 450.0, 550.0, 550.0, 0.9);
        let side = (0.30f32 * 1_000_000.0).sqrt();
        let b = face(0.0, 0.0, side, side, 0.5);

        let score_of = |f: &Face, conf: f32, area_frac: f32| {
            let (cx, cy) = f.bbox.center();
            let dist = (((cx - 500.0) / 1000.0).powi(2) + ((cy - 500.0) / 1000.0).powi(2))
                .sqrt()
                .clamp(0.0, 1.0);
            0.70 * conf + 0.25 * area_frac.sqrt() + 0.05 * (1.0 - dist)
        };
        let sa = score_of(&a, 0.9, 0.01);
        let sb = score_of(&b, 0.5, 0.30);
        assert!((score_face(&a, w, h) - sa).abs() < 1e-4);
        assert!((score_face(&b, w, h) - sb).abs() < 1e-4);

        let faces = vec![b.clone(), a.clone()];
        let expected = if sa > sb { &a } else { &b };
        assert_eq!(pick_best(&faces, w, h), Some(expected));
        // A: 0.63 + 0.025 + 0.05 = 0.705; B: 0.35 + 0.137 + ~0.036 = ~0.523.
        assert_eq!(pick_best(&faces, w, h), Some(&a));
    }

    #[test]
    fn test_ties_go_to_first() {
        let first = face(10.0, 10.0, 20.0, 20.0, 0.7);
        let second = face(10.0, 10.0, 20.0, 20.0, 0.7);
        let faces = vec![first, second];
        let best = pick_best(&faces, 100, 100).unwrap();
        assert!(std::ptr::eq(best, &faces[0]));
    }

    #[test]
    fn test_size_breaks_confidence_tie() {
        let small = face(40.0, 40.0, 50.0, 50.0, 0.8);
        let large = face(20.0, 20.0, 80.0, 80.0, 0.8);
        let faces = vec![small, large];
        assert!(std::ptr::eq(pick_best(&faces, 100, 100).unwrap(), &faces[1]));
    }

    #[test]
    fn test_degenerate_box_scores_confidence_and_centre_only() {
        let f = face(60.0, 60.0, 40.0, 40.0, 0.5);
        let expected = 0.70 * 0.5 + 0.05 * 1.0;
        assert!((score_face(&f, 100, 100) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_area_is_clamped_for_oversized_boxes() {
        let f = face(-100.0, -100.0, 200.0, 200.0, 0.0);
        let expected = 0.25 * 1.0 + 0.05 * 1.0;
        assert!((score_face(&f, 100, 100) - expected).abs() < 1e-6);
    }
}
