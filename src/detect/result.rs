use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One detected object. Coordinates are normalized to 0..1 of the upright
/// image, with (x1, y1) the top-left and (x2, y2) the bottom-right corner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
    pub class_name: String,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_name: &str) -> Self {
        Self {
            x1: x1.min(x2).clamp(0.0, 1.0),
            y1: y1.min(y2).clamp(0.0, 1.0),
            x2: x1.max(x2).clamp(0.0, 1.0),
            y2: y1.max(y2).clamp(0.0, 1.0),
            confidence,
            class_id: 0,
            class_name: class_name.to_string(),
        }
    }

    pub fn with_class_id(mut self, class_id: usize) -> Self {
        self.class_id = class_id;
        self
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

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }
        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Pixel rectangle `(x, y, width, height)` in an image of the given size.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let px = |v: f32, max: u32| ((v * max as f32).round() as u32).min(max);
        let (x1, y1) = (px(self.x1, width), px(self.y1, height));
        let (x2, y2) = (px(self.x2, width), px(self.y2, height));
        (x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1))
    }
}

/// Result of running the detector on one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Detection {
    pub boxes: Vec<BoundingBox>,
    pub inference_time: Duration,
}

impl Detection {
    pub fn new(boxes: Vec<BoundingBox>, inference_time: Duration) -> Self {
        Self {
            boxes,
            inference_time,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Highest confidence among the boxes, 0 when empty.
    pub fn top_confidence(&self) -> f32 {
        self.boxes
            .iter()
            .map(|b| b.confidence)
            .fold(0.0, f32::max)
    }
}

/// Class-aware non-maximum suppression. Keeps the highest-confidence box of
/// every overlapping group whose IoU exceeds `iou_threshold`.
pub fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BoundingBox::new(0.1, 0.1, 0.5, 0.5, 0.9, "pothole");
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        let b = BoundingBox::new(0.6, 0.6, 0.9, 0.9, 0.9, "pothole");
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn nms_keeps_strongest_of_overlapping_group() {
        let boxes = vec![
            BoundingBox::new(0.1, 0.1, 0.5, 0.5, 0.6, "pothole"),
            BoundingBox::new(0.12, 0.1, 0.52, 0.5, 0.9, "pothole"),
            BoundingBox::new(0.7, 0.7, 0.9, 0.9, 0.4, "pothole"),
        ];
        let kept = non_max_suppression(boxes, 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.4);
    }

    #[test]
    fn box_corners_are_ordered_and_clamped() {
        let b = BoundingBox::new(0.8, 1.4, -0.2, 0.3, 0.5, "crack");
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (0.0, 0.3, 0.8, 1.0));
        assert_eq!(b.to_pixels(100, 10), (0, 3, 80, 7));
    }
}
