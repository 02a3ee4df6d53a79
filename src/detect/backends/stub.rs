use anyhow::Result;

use crate::detect::backend::GenericDetector;
use crate::detect::result::LabeledBox;
use crate::frame::Frame;

/// Stub generic detector for tests and the synthetic daemon.
///
/// Reports a fixed list of boxes, clipped to the frame, regardless of pixel
/// content. Output is deterministic for a given configuration.
pub struct StubDetector {
    boxes: Vec<LabeledBox>,
}

impl StubDetector {
    pub fn new(boxes: Vec<LabeledBox>) -> Self {
        Self { boxes }
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new(vec![
            LabeledBox {
                x: 40.0,
                y: 40.0,
                width: 60.0,
                height: 60.0,
                confidence: 0.9,
                label: "item".to_string(),
            },
            LabeledBox {
                x: 160.0,
                y: 40.0,
                width: 60.0,
                height: 60.0,
                confidence: 0.35,
                label: "item".to_string(),
            },
        ])
    }
}

impl GenericDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame, _confidence_threshold: f32) -> Result<Vec<LabeledBox>> {
        let (w, h) = (frame.width as f32, frame.height as f32);
        Ok(self
            .boxes
            .iter()
            .filter(|b| b.x < w && b.y < h)
            .map(|b| LabeledBox {
                width: b.width.min(w - b.x),
                height: b.height.min(h - b.y),
                ..b.clone()
            })
            .collect())
    }
}
