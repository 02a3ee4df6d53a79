//! Spatial deduplication tracker.
//!
//! Holds the markers committed for confirmed detections and answers whether a
//! new candidate sits on top of one of them. Distances are flat Euclidean in
//! frame coordinates; there is no camera pose estimation.
//!
//! Markers are only ever added by `commit` (called on confirm) and only ever
//! removed by `clear` (explicit reset or a new session). Frame processing
//! never touches the marker list.

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::detect::Detection;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpatialMarker {
    pub id: String,
    pub world_x: f32,
    pub world_y: f32,
    /// Always 0 for the 2D pipeline.
    pub world_z: f32,
    pub detection_id: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Default)]
pub struct SpatialTracker {
    markers: Vec<SpatialMarker>,
    next_marker: u64,
}

impl SpatialTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff some marker lies strictly closer than `threshold`.
    pub fn is_duplicate(&self, x: f32, y: f32, z: f32, threshold: f32) -> bool {
        self.markers.iter().any(|m| {
            let (dx, dy, dz) = (m.world_x - x, m.world_y - y, m.world_z - z);
            (dx * dx + dy * dy + dz * dz).sqrt() < threshold
        })
    }

    /// Drop candidates whose centre duplicates a marker. With deduplication
    /// disabled, candidates pass through unchanged.
    pub fn filter(&self, candidates: Vec<Detection>, settings: &Settings) -> Vec<Detection> {
        if !settings.enable_deduplication || self.markers.is_empty() {
            return candidates;
        }
        let threshold = settings.deduplication_distance_threshold;
        candidates
            .into_iter()
            .filter(|d| {
                let (cx, cy) = d.bbox.center();
                !self.is_duplicate(cx, cy, 0.0, threshold)
            })
            .collect()
    }

    /// Commit a marker at the centre of a confirmed detection.
    pub fn commit(&mut self, detection: &Detection, timestamp_ms: u64) -> SpatialMarker {
        self.next_marker += 1;
        let (cx, cy) = detection.bbox.center();
        let marker = SpatialMarker {
            id: format!("marker-{}", self.next_marker),
            world_x: cx,
            world_y: cy,
            world_z: 0.0,
            detection_id: detection.id.clone(),
            timestamp_ms,
        };
        self.markers.push(marker.clone());
        marker
    }

    pub fn clear(&mut self) {
        self.markers.clear();
    }

    pub fn markers(&self) -> &[SpatialMarker] {
        &self.markers
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}
