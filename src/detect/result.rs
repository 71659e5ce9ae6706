use serde::{Deserialize, Serialize};

use crate::error::{HazardError, HazardResult};
use crate::geometry::BoundingBox;

/// One detected object in frame-pixel coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    /// Reject detections the evaluator must not reason about.
    pub fn validate(&self) -> HazardResult<()> {
        if self.label.trim().is_empty() {
            return Err(HazardError::MalformedDetection("empty label".to_string()));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(HazardError::MalformedDetection(format!(
                "{}: confidence {} outside [0, 1]",
                self.label, self.confidence
            )));
        }
        if !self.bbox.is_finite() {
            return Err(HazardError::MalformedDetection(format!(
                "{}: box has non-finite coordinates",
                self.label
            )));
        }
        if !self.bbox.is_ordered() {
            return Err(HazardError::MalformedDetection(format!(
                "{}: box ({}, {}, {}, {}) has min > max",
                self.label, self.bbox.x_min, self.bbox.y_min, self.bbox.x_max, self.bbox.y_max
            )));
        }
        Ok(())
    }
}

/// Class names of the 80-class COCO set that stock YOLO weights are trained on.
pub const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn person(confidence: f32, bbox: BoundingBox) -> Detection {
        Detection::new("person", confidence, bbox)
    }

    #[test]
    fn accepts_well_formed_detection() {
        let det = person(0.9, BoundingBox::new(1.0, 2.0, 3.0, 4.0));
        assert!(det.validate().is_ok());
        // Degenerate (zero-size) boxes are still ordered.
        assert!(person(0.0, BoundingBox::new(1.0, 1.0, 1.0, 1.0)).validate().is_ok());
    }

    #[test]
    fn rejects_malformed_detections() {
        let cases = [
            person(1.5, BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
            person(-0.1, BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
            person(f32::NAN, BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
            person(0.5, BoundingBox::new(5.0, 0.0, 1.0, 1.0)),
            person(0.5, BoundingBox::new(0.0, 5.0, 1.0, 1.0)),
            person(0.5, BoundingBox::new(0.0, 0.0, f64::INFINITY, 1.0)),
            Detection::new(" ", 0.5, BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
        ];
        for det in cases {
            assert!(
                matches!(det.validate(), Err(HazardError::MalformedDetection(_))),
                "{:?} should be rejected",
                det
            );
        }
    }

    #[test]
    fn coco_labels_start_with_person() {
        assert_eq!(COCO_LABELS[0], "person");
        assert_eq!(COCO_LABELS[79], "toothbrush");
    }
}
