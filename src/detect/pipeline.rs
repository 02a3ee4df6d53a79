use anyhow::Result;

use super::result::{BoundingBox, Detection, LabeledBox, Template};
use super::slot::DetectorSlot;
use crate::frame::Frame;
use crate::shape::{self, FittedShape, ShapeKind};

pub const CIRCLE_LABEL: &str = "pipe/circle";
pub const RECTANGLE_LABEL: &str = "box/rectangle";

/// Detect countable objects in one frame.
///
/// Circle and rectangle templates run the shape pipeline; the generic
/// template delegates to the detector held in `detector`. In every case only
/// detections with `confidence >= confidence_threshold` are returned.
///
/// Output is deterministic: ids derive from the frame id and output index,
/// and timestamps are the frame's capture time.
///
/// # Panics
///
/// Panics if the frame buffer violates the RGBA length contract.
///
/// # Errors
///
/// Returns `DetectorUnavailable` (inside `anyhow::Error`) when the generic
/// template is requested and the detector slot is empty or failed.
pub fn detect_objects(
    frame: &Frame,
    template: Template,
    confidence_threshold: f32,
    detector: &DetectorSlot,
) -> Result<Vec<Detection>> {
    frame.assert_well_formed();

    let boxes: Vec<LabeledBox> = match template {
        Template::Circle | Template::Rectangle => {
            let kind = if template == Template::Circle {
                ShapeKind::Circle
            } else {
                ShapeKind::Rectangle
            };
            shape::detect_shapes(frame, kind)
                .into_iter()
                .map(|s| shape_box(&s))
                .collect()
        }
        Template::Generic => detector.detect(frame, confidence_threshold)?,
    };

    Ok(boxes
        .into_iter()
        .filter(|b| b.confidence >= confidence_threshold)
        .enumerate()
        .map(|(idx, b)| {
            let id = format!("f{}-{}", frame.frame_id, idx);
            Detection {
                id: id.clone(),
                bbox: BoundingBox {
                    id,
                    x: b.x,
                    y: b.y,
                    width: b.width,
                    height: b.height,
                    confidence: b.confidence,
                    label: b.label,
                    is_manually_added: false,
                    is_removed: false,
                },
                timestamp_ms: frame.captured_at_ms,
                frame_id: frame.frame_id,
            }
        })
        .collect())
}

fn shape_box(s: &FittedShape) -> LabeledBox {
    let label = match s.kind {
        ShapeKind::Circle => CIRCLE_LABEL,
        ShapeKind::Rectangle => RECTANGLE_LABEL,
    };
    LabeledBox {
        x: s.x,
        y: s.y,
        width: s.width,
        height: s.height,
        confidence: s.confidence,
        label: label.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubDetector;
    use crate::detect::slot::DetectorUnavailable;

    fn blank(width: u32, height: u32) -> Frame {
        let data = vec![0u8; width as usize * height as usize * 4];
        Frame::from_rgba(data, width, height, 9, 1234).unwrap()
    }

    #[test]
    fn generic_template_filters_by_threshold_only() {
        let slot = DetectorSlot::with_detector(StubDetector::default());
        let detections = detect_objects(&blank(320, 240), Template::Generic, 0.5, &slot).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox.label, "item");
        assert_eq!(detections[0].id, "f9-0");
        assert_eq!(detections[0].timestamp_ms, 1234);

        let all = detect_objects(&blank(320, 240), Template::Generic, 0.1, &slot).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn generic_template_without_detector_is_recoverable() {
        let slot = DetectorSlot::empty();
        let err = detect_objects(&blank(32, 32), Template::Generic, 0.5, &slot).unwrap_err();
        assert!(err.downcast_ref::<DetectorUnavailable>().is_some());
    }

    #[test]
    fn threshold_above_one_yields_nothing() {
        let slot = DetectorSlot::empty();
        for template in [Template::Circle, Template::Rectangle] {
            let detections = detect_objects(&blank(64, 64), template, 1.01, &slot).unwrap();
            assert!(detections.is_empty());
        }
    }

    #[test]
    fn shape_labels_follow_template() {
        let slot = DetectorSlot::empty();
        let circles = detect_objects(&blank(96, 96), Template::Circle, 0.0, &slot).unwrap();
        assert!(circles.iter().all(|d| d.bbox.label == CIRCLE_LABEL));
        let boxes = detect_objects(&blank(96, 96), Template::Rectangle, 0.0, &slot).unwrap();
        assert!(boxes.iter().all(|d| d.bbox.label == RECTANGLE_LABEL));
    }
}
