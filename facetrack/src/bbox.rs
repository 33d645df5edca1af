//! Bounding box operations, mean-area overlap and center distance

use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned bounding box in pixel coordinates, `x1 <= x2` and `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// True when the coordinates describe a non-degenerate box.
    pub fn is_valid(&self) -> bool {
        self.x1.is_finite()
            && self.y1.is_finite()
            && self.x2.is_finite()
            && self.y2.is_finite()
            && self.x2 > self.x1
            && self.y2 > self.y1
    }

    /// Overlap score between two boxes.
    ///
    /// Uses `intersection / mean(area1, area2)` rather than intersection over
    /// union. The association thresholds are calibrated for the mean-area
    /// variant; range is `[0, 1]` with 1.0 for identical boxes.
    pub fn overlap(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let area1 = self.area();
        let area2 = other.area();

        if area1 <= 0.0 || area2 <= 0.0 {
            return 0.0;
        }

        intersection / ((area1 + area2) / 2.0)
    }

    /// Euclidean distance between box centers, in pixels.
    pub fn center_distance(&self, other: &BoundingBox) -> f32 {
        let (cx1, cy1) = self.center();
        let (cx2, cy2) = other.center();
        (cx1 - cx2).hypot(cy1 - cy2)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BoundingBox({:.1}, {:.1}, {:.1}, {:.1})",
            self.x1, self.y1, self.x2, self.y2
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_bbox_properties() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 5.0);
        assert_eq!(bbox.width(), 10.0);
        assert_eq!(bbox.height(), 5.0);
        assert_eq!(bbox.area(), 50.0);
        assert_eq!(bbox.center(), (5.0, 2.5));
        assert!(bbox.is_valid());
    }

    #[test]
    fn test_degenerate_bbox_is_invalid() {
        assert!(!BoundingBox::new(10.0, 0.0, 10.0, 5.0).is_valid());
        assert!(!BoundingBox::new(0.0, 0.0, f32::NAN, 5.0).is_valid());
    }

    #[test]
    fn test_overlap_uses_mean_area() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        // intersection 25, mean area 100: 0.25 (union semantics would give 25/175)
        assert_abs_diff_eq!(a.overlap(&b), 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_overlap_identical_boxes() {
        let a = BoundingBox::new(100.0, 100.0, 200.0, 200.0);
        assert_abs_diff_eq!(a.overlap(&a), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_overlap_disjoint_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.overlap(&b), 0.0);
    }

    #[test]
    fn test_overlap_zero_area_operand() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let empty = BoundingBox::new(5.0, 5.0, 5.0, 5.0);
        assert_eq!(a.overlap(&empty), 0.0);
    }

    #[test]
    fn test_center_distance() {
        let a = BoundingBox::new(100.0, 100.0, 200.0, 200.0);
        let b = BoundingBox::new(210.0, 100.0, 310.0, 200.0);
        assert_abs_diff_eq!(a.center_distance(&b), 110.0, epsilon = 1e-4);
    }
}
