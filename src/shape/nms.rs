//! Greedy non-max suppression over fitted shapes.

use std::cmp::Ordering;

use super::fit::FittedShape;

/// Shapes overlapping an already-kept shape by more than this are dropped.
pub const NMS_IOU_THRESHOLD: f32 = 0.3;

/// Intersection-over-union of two axis-aligned boxes `(x, y, w, h)`.
pub fn iou(a: (f32, f32, f32, f32), b: (f32, f32, f32, f32)) -> f32 {
    let ix = (a.0 + a.2).min(b.0 + b.2) - a.0.max(b.0);
    let iy = (a.1 + a.3).min(b.1 + b.3) - a.1.max(b.1);
    if ix <= 0.0 || iy <= 0.0 {
        return 0.0;
    }
    let intersection = ix * iy;
    let union = a.2 * a.3 + b.2 * b.3 - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn rect(shape: &FittedShape) -> (f32, f32, f32, f32) {
    (shape.x, shape.y, shape.width, shape.height)
}

/// Keep shapes in descending confidence order, skipping any whose IoU with a
/// kept shape exceeds `NMS_IOU_THRESHOLD`. Equal confidences keep their input
/// order (stable sort), so the first one wins.
pub fn non_max_suppression(mut shapes: Vec<FittedShape>) -> Vec<FittedShape> {
    shapes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<FittedShape> = Vec::with_capacity(shapes.len());
    for shape in shapes {
        if kept
            .iter()
            .all(|k| iou(rect(k), rect(&shape)) <= NMS_IOU_THRESHOLD)
        {
            kept.push(shape);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::fit::ShapeKind;

    fn circle_box(x: f32, y: f32, side: f32, confidence: f32) -> FittedShape {
        FittedShape {
            kind: ShapeKind::Circle,
            x,
            y,
            width: side,
            height: side,
            confidence,
        }
    }

    #[test]
    fn iou_of_half_overlap() {
        // 60x60 boxes offset by 20: intersection 2400, union 4800.
        let v = iou((0.0, 0.0, 60.0, 60.0), (20.0, 0.0, 60.0, 60.0));
        assert!((v - 0.5).abs() < 1e-6);
        assert_eq!(iou((0.0, 0.0, 10.0, 10.0), (10.0, 0.0, 10.0, 10.0)), 0.0);
    }

    #[test]
    fn overlapping_circles_keep_the_more_confident() {
        let kept = non_max_suppression(vec![
            circle_box(0.0, 0.0, 60.0, 0.7),
            circle_box(20.0, 0.0, 60.0, 0.9),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[0].x, 20.0);
    }

    #[test]
    fn disjoint_shapes_all_survive_in_confidence_order() {
        let kept = non_max_suppression(vec![
            circle_box(0.0, 0.0, 20.0, 0.4),
            circle_box(100.0, 0.0, 20.0, 0.8),
            circle_box(200.0, 0.0, 20.0, 0.6),
        ]);
        let confidences: Vec<f32> = kept.iter().map(|s| s.confidence).collect();
        assert_eq!(confidences, vec![0.8, 0.6, 0.4]);
    }

    #[test]
    fn ties_keep_first_input() {
        let kept = non_max_suppression(vec![
            circle_box(0.0, 0.0, 60.0, 0.5),
            circle_box(5.0, 0.0, 60.0, 0.5),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].x, 0.0);
    }

    #[test]
    fn kept_shapes_never_exceed_the_overlap_limit() {
        let mut shapes = Vec::new();
        for i in 0..40 {
            let f = i as f32;
            shapes.push(circle_box(
                (f * 7.0) % 90.0,
                (f * 13.0) % 70.0,
                25.0 + f % 5.0,
                0.3 + (f % 7.0) / 10.0,
            ));
        }
        let candidates = shapes.len();
        let kept = non_max_suppression(shapes);
        assert!(kept.len() <= candidates);
        for (i, a) in kept.iter().enumerate() {
            for b in kept.iter().skip(i + 1) {
                assert!(iou(rect(a), rect(b)) <= NMS_IOU_THRESHOLD);
            }
        }
    }
}
