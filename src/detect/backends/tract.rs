#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::GenericDetector;
use crate::detect::result::LabeledBox;
use crate::frame::Frame;

/// Values per detection row in the model output: `[x1, y1, x2, y2, score, class]`.
const ROW_LEN: usize = 6;

/// Tract-based generic detector for ONNX models.
///
/// Expects a model with a `1x3xHxW` f32 input (RGB scaled to 0..1) and a
/// single output of shape `1xNx6` holding already de-overlapped detections in
/// input pixel coordinates. Frames must match the model input size.
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    labels: Vec<String>,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            labels: Vec::new(),
        })
    }

    /// Class names indexed by the model's class id column.
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let pixels = frame.pixels();
        let width = frame.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, frame.height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 4 + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        input.into_tensor()
    }

    fn label_for(&self, class_id: f32) -> String {
        let idx = class_id.max(0.0) as usize;
        self.labels
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("class/{}", idx))
    }

    fn extract_boxes(
        &self,
        outputs: TVec<TValue>,
        confidence_threshold: f32,
    ) -> Result<Vec<LabeledBox>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let values: Vec<f32> = view.iter().copied().collect();
        if values.len() % ROW_LEN != 0 {
            return Err(anyhow!(
                "model output length {} is not a multiple of {}",
                values.len(),
                ROW_LEN
            ));
        }

        Ok(values
            .chunks_exact(ROW_LEN)
            .filter(|row| row[4].is_finite() && row[4] >= confidence_threshold)
            .map(|row| LabeledBox {
                x: row[0],
                y: row[1],
                width: (row[2] - row[0]).max(0.0),
                height: (row[3] - row[1]).max(0.0),
                confidence: row[4].clamp(0.0, 1.0),
                label: self.label_for(row[5]),
            })
            .collect())
    }
}

impl GenericDetector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_size(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }

    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<LabeledBox>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_boxes(outputs, confidence_threshold)
    }
}
