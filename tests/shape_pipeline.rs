//! Properties of `detect_objects` over rendered scenes.

use tally_kernel::detect::{CIRCLE_LABEL, RECTANGLE_LABEL};
use tally_kernel::shape::nms::iou;
use tally_kernel::{
    detect_objects, Detection, DetectorSlot, DetectorUnavailable, Frame, Template,
};

const W: u32 = 240;
const H: u32 = 180;

/// Dark background with bright discs of radius 30 and one bright square.
fn scene(frame_id: u64) -> Frame {
    let mut data = [20u8, 20, 20, 255].repeat(W as usize * H as usize);
    let discs = [(60i64, 60i64), (170, 60)];
    for y in 0..H as i64 {
        for x in 0..W as i64 {
            let in_disc = discs
                .iter()
                .any(|&(cx, cy)| (x - cx).pow(2) + (y - cy).pow(2) <= 30 * 30);
            let in_square = (90..150).contains(&x) && (110..170).contains(&y);
            if in_disc || in_square {
                let o = ((y * W as i64 + x) * 4) as usize;
                data[o..o + 3].fill(230);
            }
        }
    }
    Frame::from_rgba(data, W, H, frame_id, 5_000 + frame_id).unwrap()
}

fn boxes(dets: &[Detection]) -> Vec<(f32, f32, f32, f32, f32)> {
    dets.iter()
        .map(|d| (d.bbox.x, d.bbox.y, d.bbox.width, d.bbox.height, d.bbox.confidence))
        .collect()
}

fn near(d: &Detection, x: f32, y: f32, w: f32, h: f32) -> bool {
    let b = &d.bbox;
    (b.x - x).abs() <= 3.0
        && (b.y - y).abs() <= 3.0
        && (b.width - w).abs() <= 3.0
        && (b.height - h).abs() <= 3.0
}

#[test]
fn rendered_discs_are_found() {
    let slot = DetectorSlot::empty();
    let mut dets = detect_objects(&scene(2), Template::Circle, 0.95, &slot).unwrap();
    assert_eq!(dets.len(), 2, "{:?}", boxes(&dets));
    dets.sort_by(|a, b| a.bbox.x.total_cmp(&b.bbox.x));
    assert!(near(&dets[0], 30.0, 30.0, 60.0, 60.0), "{:?}", boxes(&dets));
    assert!(near(&dets[1], 140.0, 30.0, 60.0, 60.0), "{:?}", boxes(&dets));
    for d in &dets {
        assert!(d.bbox.confidence >= 0.95);
        assert_eq!(d.bbox.label, CIRCLE_LABEL);
    }
}

#[test]
fn rendered_square_is_found() {
    let slot = DetectorSlot::empty();
    let dets = detect_objects(&scene(2), Template::Rectangle, 0.5, &slot).unwrap();
    let square: Vec<&Detection> = dets
        .iter()
        .filter(|d| near(d, 90.0, 110.0, 60.0, 60.0))
        .collect();
    assert_eq!(square.len(), 1, "{:?}", boxes(&dets));
    assert_eq!(square[0].bbox.label, RECTANGLE_LABEL);
    // The edge band covers the whole perimeter.
    assert!(square[0].bbox.confidence > 0.9);
}

#[test]
fn identical_frames_give_identical_detections() {
    let slot = DetectorSlot::empty();
    for template in [Template::Circle, Template::Rectangle] {
        let a = detect_objects(&scene(7), template, 0.0, &slot).unwrap();
        let b = detect_objects(&scene(7), template, 0.0, &slot).unwrap();
        assert_eq!(a, b);
    }
}

#[test]
fn output_respects_threshold_and_overlap_bound() {
    let slot = DetectorSlot::empty();
    for template in [Template::Circle, Template::Rectangle] {
        for threshold in [0.0, 0.5, 0.8] {
            let dets = detect_objects(&scene(3), template, threshold, &slot).unwrap();
            for (i, d) in dets.iter().enumerate() {
                assert!(d.bbox.confidence >= threshold);
                assert!(d.bbox.confidence <= 1.0);
                assert_eq!(d.id, format!("f3-{}", i));
                assert_eq!(d.bbox.id, d.id);
                assert_eq!(d.frame_id, 3);
                assert_eq!(d.timestamp_ms, 5_003);
                assert!(!d.bbox.is_manually_added && !d.bbox.is_removed);
                let expected = if template == Template::Circle {
                    CIRCLE_LABEL
                } else {
                    RECTANGLE_LABEL
                };
                assert_eq!(d.bbox.label, expected);
                for other in &dets[i + 1..] {
                    let overlap = iou(
                        (d.bbox.x, d.bbox.y, d.bbox.width, d.bbox.height),
                        (other.bbox.x, other.bbox.y, other.bbox.width, other.bbox.height),
                    );
                    assert!(overlap <= 0.3, "iou {} above bound", overlap);
                }
            }
        }
    }
}

#[test]
fn raising_threshold_only_removes_detections() {
    let slot = DetectorSlot::empty();
    let low = boxes(&detect_objects(&scene(1), Template::Circle, 0.2, &slot).unwrap());
    let high = boxes(&detect_objects(&scene(1), Template::Circle, 0.7, &slot).unwrap());
    assert!(high.len() <= low.len());
    for b in &high {
        assert!(low.contains(b));
    }
    assert!(detect_objects(&scene(1), Template::Circle, 1.01, &slot)
        .unwrap()
        .is_empty());
}

#[test]
fn tiny_frames_yield_nothing() {
    // Every component of a 2x2 frame is below the minimum size.
    let frame = Frame::from_rgba(vec![0; 16], 2, 2, 1, 0).unwrap();
    let slot = DetectorSlot::empty();
    for template in [Template::Circle, Template::Rectangle] {
        assert!(detect_objects(&frame, template, 0.0, &slot)
            .unwrap()
            .is_empty());
    }
    let err = detect_objects(&frame, Template::Generic, 0.0, &slot).unwrap_err();
    assert!(err.downcast_ref::<DetectorUnavailable>().is_some());
}
