use anyhow::Result;

use crate::detect::result::LabeledBox;
use crate::frame::Frame;

/// Generic object-detector capability.
///
/// Used only by the `generic` template. Implementations hold loaded model
/// state, so calls go through `&mut self` and are serialized by the owning
/// `DetectorSlot`.
///
/// Returned boxes must be in the same pixel space as the input frame and are
/// expected to be de-overlapped already; the pipeline applies no NMS to them.
pub trait GenericDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Implementations must treat the frame as read-only and must not retain
    /// its pixels beyond the call.
    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<LabeledBox>>;

    /// Fixed `(width, height)` the backend accepts, if any. Frames of another
    /// size are rejected before `detect` is called.
    fn input_size(&self) -> Option<(u32, u32)> {
        None
    }

    /// Optional warm-up hook, run once after construction.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
