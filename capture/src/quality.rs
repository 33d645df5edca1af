//! Face quality scoring
//!
//! Pure function of bbox geometry and detector confidence; no side effects,
//! no model calls. The score only has to order faces of the same track
//! consistently, so a simple size-weighted confidence is enough: larger
//! crops carry more recognizable detail up to the model's input resolution.

use facetrack::BoundingBox;

#[derive(Debug, Clone, Copy)]
pub struct FaceQualityService {
    reference_area: f32,
}

impl FaceQualityService {
    /// `inference_size` is the model's square input resolution; a face
    /// filling it completely carries full detail.
    pub fn new(inference_size: u32) -> Self {
        Self {
            reference_area: (inference_size as f32).powi(2),
        }
    }

    /// Score in `[0, 1]`; higher is better.
    pub fn score(&self, bbox: &BoundingBox, confidence: f32) -> f32 {
        if !bbox.is_valid() {
            return 0.0;
        }
        let size_term = (bbox.area() / self.reference_area).sqrt().min(1.0);
        (confidence.clamp(0.0, 1.0) * size_term).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_score_is_deterministic() {
        let service = FaceQualityService::new(640);
        let bbox = BoundingBox::new(100.0, 100.0, 180.0, 180.0);
        assert_eq!(service.score(&bbox, 0.8), service.score(&bbox, 0.8));
    }

    #[test]
    fn test_size_term_is_side_ratio_to_inference_size() {
        // A 100x100 face against a 640x640 input: sqrt(10000 / 409600).
        let service = FaceQualityService::new(640);
        let bbox = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        assert_abs_diff_eq!(service.score(&bbox, 1.0), 100.0 / 640.0, epsilon = 1e-5);
    }

    #[test]
    fn test_bigger_face_scores_higher() {
        let service = FaceQualityService::new(640);
        let small = BoundingBox::new(0.0, 0.0, 40.0, 40.0);
        let large = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        assert!(service.score(&large, 0.8) > service.score(&small, 0.8));
    }

    #[test]
    fn test_size_term_saturates_at_reference() {
        let service = FaceQualityService::new(640);
        let reference = BoundingBox::new(0.0, 0.0, 640.0, 640.0);
        let huge = BoundingBox::new(0.0, 0.0, 1500.0, 1500.0);
        assert_abs_diff_eq!(service.score(&reference, 1.0), 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(service.score(&huge, 1.0), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_smaller_inference_size_raises_scores() {
        let coarse = FaceQualityService::new(640);
        let fine = FaceQualityService::new(320);
        let bbox = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        assert!(fine.score(&bbox, 0.9) > coarse.score(&bbox, 0.9));
    }

    #[test]
    fn test_invalid_bbox_scores_zero() {
        let service = FaceQualityService::new(640);
        let degenerate = BoundingBox::new(10.0, 10.0, 10.0, 20.0);
        assert_eq!(service.score(&degenerate, 0.9), 0.0);
    }
}
