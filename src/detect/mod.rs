mod backend;
mod backends;
mod pipeline;
mod result;
mod slot;

pub use backend::GenericDetector;
pub use backends::StubDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use pipeline::{detect_objects, CIRCLE_LABEL, RECTANGLE_LABEL};
pub use result::{BoundingBox, Detection, LabeledBox, Template};
pub use slot::{DetectorSlot, DetectorUnavailable, SlotStatus};
