//! Template-biased shape detection.
//!
//! Stages, in order:
//! 1. Luma conversion (`edges::grayscale`)
//! 2. Sobel edge magnitude (`edges::sobel_magnitude`)
//! 3. Adaptive foreground mask (`mask::adaptive_mask`)
//! 4. Connected components (`components::extract_components`)
//! 5. Per-component shape fit (`fit`)
//! 6. Non-max suppression (`nms`)
//!
//! Every stage is a pure function of its input; identical frames produce
//! identical masks and shape lists.

pub mod components;
pub mod edges;
pub mod fit;
pub mod mask;
pub mod nms;

pub use fit::{FittedShape, ShapeKind};
pub use mask::Mask;

use crate::frame::Frame;

/// Binary foreground mask for a frame (stages 1-3).
pub fn foreground_mask(frame: &Frame) -> Mask {
    let gray = edges::grayscale(frame);
    let edge_map = edges::sobel_magnitude(&gray);
    mask::adaptive_mask(&edge_map)
}

/// Fitted, de-overlapped shapes for a frame (stages 1-6), highest confidence
/// first. No confidence threshold is applied here.
pub fn detect_shapes(frame: &Frame, kind: ShapeKind) -> Vec<FittedShape> {
    let mask = foreground_mask(frame);
    let shapes: Vec<FittedShape> = components::extract_components(&mask)
        .iter()
        .filter_map(|component| fit::fit(kind, &component.points))
        .collect();
    let candidates = shapes.len();
    let kept = nms::non_max_suppression(shapes);
    log::debug!(
        "frame {}: {} {:?} candidates, {} after suppression",
        frame.frame_id,
        candidates,
        kind,
        kept.len()
    );
    kept
}
