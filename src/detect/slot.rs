use std::fmt;
use std::sync::Mutex;

use anyhow::{anyhow, Result};

use super::backend::GenericDetector;
use super::result::LabeledBox;
use crate::frame::Frame;

/// Recoverable error: the generic detector is not loaded or failed.
///
/// Carried inside `anyhow::Error` so callers can `downcast_ref` it and pause
/// frame processing until the slot is reinitialized.
#[derive(Debug, Clone)]
pub struct DetectorUnavailable {
    pub reason: String,
}

impl DetectorUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DetectorUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "generic detector unavailable: {}", self.reason)
    }
}

impl std::error::Error for DetectorUnavailable {}

/// Observable state of a `DetectorSlot`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotStatus {
    Empty,
    Ready(&'static str),
    Failed(String),
}

enum SlotState {
    Empty,
    Ready(Box<dyn GenericDetector>),
    Failed(String),
}

/// Owned handle to the generic detector capability.
///
/// Constructed once by the host and passed by reference into the pipeline.
/// The `Mutex` serializes `detect` calls, since the model is stateful.
/// A failed slot refuses detection until `reinitialize` succeeds.
pub struct DetectorSlot {
    state: Mutex<SlotState>,
}

impl DetectorSlot {
    /// Slot with no detector; the generic template reports it as unavailable.
    pub fn empty() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
        }
    }

    /// Slot holding an already-constructed detector.
    pub fn with_detector<D: GenericDetector + 'static>(detector: D) -> Self {
        Self {
            state: Mutex::new(SlotState::Ready(Box::new(detector))),
        }
    }

    /// Run an initializer and install its detector.
    ///
    /// On failure the slot enters the failed state and the error is returned
    /// as `DetectorUnavailable`.
    pub fn install<F>(&self, init: F) -> Result<()>
    where
        F: FnOnce() -> Result<Box<dyn GenericDetector>>,
    {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| anyhow!("detector slot lock poisoned"))?;
        let loaded = init().and_then(|mut detector| {
            detector.warm_up()?;
            Ok(detector)
        });
        match loaded {
            Ok(detector) => {
                log::info!("generic detector '{}' ready", detector.name());
                *guard = SlotState::Ready(detector);
                Ok(())
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                log::error!("generic detector failed to initialize: {}", reason);
                *guard = SlotState::Failed(reason.clone());
                Err(DetectorUnavailable::new(reason).into())
            }
        }
    }

    /// Replace whatever the slot holds with a freshly initialized detector.
    pub fn reinitialize<F>(&self, init: F) -> Result<()>
    where
        F: FnOnce() -> Result<Box<dyn GenericDetector>>,
    {
        self.install(init)
    }

    pub fn status(&self) -> SlotStatus {
        match self.state.lock() {
            Ok(guard) => match &*guard {
                SlotState::Empty => SlotStatus::Empty,
                SlotState::Ready(detector) => SlotStatus::Ready(detector.name()),
                SlotState::Failed(reason) => SlotStatus::Failed(reason.clone()),
            },
            Err(_) => SlotStatus::Failed("detector slot lock poisoned".to_string()),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status(), SlotStatus::Ready(_))
    }

    /// Run the detector. A detector error poisons the slot: the model state
    /// is unknown afterwards, so it must be reinitialized. A frame of the
    /// wrong size is a per-frame error and leaves the slot ready.
    pub fn detect(&self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<LabeledBox>> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| DetectorUnavailable::new("detector slot lock poisoned"))?;
        let result = match &mut *guard {
            SlotState::Empty => {
                return Err(DetectorUnavailable::new("no generic detector installed").into())
            }
            SlotState::Failed(reason) => {
                return Err(DetectorUnavailable::new(reason.clone()).into())
            }
            SlotState::Ready(detector) => {
                if let Some((w, h)) = detector.input_size() {
                    if (frame.width, frame.height) != (w, h) {
                        return Err(anyhow!(
                            "frame size {}x{} does not match detector input {}x{}",
                            frame.width,
                            frame.height,
                            w,
                            h
                        ));
                    }
                }
                detector.detect(frame, confidence_threshold)
            }
        };
        result.map_err(|e| {
            let reason = format!("{:#}", e);
            log::error!("generic detector failed on frame {}: {}", frame.frame_id, reason);
            *guard = SlotState::Failed(reason.clone());
            DetectorUnavailable::new(reason).into()
        })
    }
}

impl Default for DetectorSlot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubDetector;

    struct FailingDetector;

    impl GenericDetector for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &Frame, _threshold: f32) -> Result<Vec<LabeledBox>> {
            Err(anyhow!("inference crashed"))
        }
    }

    fn frame() -> Frame {
        Frame::from_rgba(vec![0u8; 4 * 4 * 4], 4, 4, 1, 0).unwrap()
    }

    #[test]
    fn empty_slot_reports_unavailable() {
        let slot = DetectorSlot::empty();
        let err = slot.detect(&frame(), 0.5).unwrap_err();
        assert!(err.downcast_ref::<DetectorUnavailable>().is_some());
        assert_eq!(slot.status(), SlotStatus::Empty);
    }

    #[test]
    fn failed_install_blocks_until_reinitialized() {
        let slot = DetectorSlot::empty();
        let err = slot
            .install(|| Err(anyhow!("model file missing")))
            .unwrap_err();
        assert!(err.downcast_ref::<DetectorUnavailable>().is_some());
        assert!(matches!(
            slot.status(),
            SlotStatus::Failed(reason) if reason.contains("model file missing")
        ));
        assert!(slot.detect(&frame(), 0.5).is_err());

        slot.reinitialize(|| Ok(Box::new(StubDetector::default()) as Box<dyn GenericDetector>))
            .unwrap();
        assert!(slot.is_ready());
        assert!(slot.detect(&frame(), 0.5).is_ok());
    }

    struct FixedSizeDetector;

    impl GenericDetector for FixedSizeDetector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn input_size(&self) -> Option<(u32, u32)> {
            Some((8, 8))
        }

        fn detect(&mut self, _frame: &Frame, _threshold: f32) -> Result<Vec<LabeledBox>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn wrong_frame_size_is_not_an_outage() {
        let slot = DetectorSlot::with_detector(FixedSizeDetector);
        let err = slot.detect(&frame(), 0.5).unwrap_err();
        assert!(err.downcast_ref::<DetectorUnavailable>().is_none());
        assert_eq!(slot.status(), SlotStatus::Ready("fixed"));

        let fitting = Frame::from_rgba(vec![0u8; 8 * 8 * 4], 8, 8, 2, 0).unwrap();
        assert!(slot.detect(&fitting, 0.5).unwrap().is_empty());
    }

    #[test]
    fn detect_error_marks_slot_failed() {
        let slot = DetectorSlot::with_detector(FailingDetector);
        let err = slot.detect(&frame(), 0.5).unwrap_err();
        assert!(err.downcast_ref::<DetectorUnavailable>().is_some());
        assert!(matches!(slot.status(), SlotStatus::Failed(_)));
    }
}
