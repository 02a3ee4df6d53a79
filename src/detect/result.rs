use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};

/// Object-shape family that biases detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Template {
    Circle,
    Rectangle,
    Generic,
}

impl Template {
    pub fn as_str(&self) -> &'static str {
        match self {
            Template::Circle => "circle",
            Template::Rectangle => "rectangle",
            Template::Generic => "generic",
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Template {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "circle" | "pipe" => Ok(Template::Circle),
            "rectangle" | "box" => Ok(Template::Rectangle),
            "generic" => Ok(Template::Generic),
            other => Err(anyhow!(
                "unknown template '{}' (expected circle, rectangle or generic)",
                other
            )),
        }
    }
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// 0..=1
    pub confidence: f32,
    pub label: String,
    pub is_manually_added: bool,
    /// Soft-delete flag. Boxes are never physically removed so undo stays possible.
    pub is_removed: bool,
}

impl BoundingBox {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// A detection produced for one frame (or added manually by the operator).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: String,
    pub bbox: BoundingBox,
    pub timestamp_ms: u64,
    pub frame_id: u64,
}

impl Detection {
    pub fn is_active(&self) -> bool {
        !self.bbox.is_removed
    }
}

/// Box reported by a generic detector capability, already class-labelled.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub label: String,
}
