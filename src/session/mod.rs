//! Counting sessions.
//!
//! A session is one continuous counting interval. The `SessionController`
//! owns the live session, its transient detection list and the spatial
//! tracker behind one mutex, so every command and every frame result is
//! applied atomically.
//!
//! `confirm` is the only path out: it produces an immutable `CountSession`
//! snapshot for the persistence layer, commits dedup markers, and rolls over
//! to a fresh session with the same template.

mod controller;
mod events;

pub use controller::{row_id_for, SessionController, MANUAL_LABEL};
pub use events::SessionEvent;

use serde::{Deserialize, Serialize};

use crate::detect::{Detection, Template};
use crate::tracker::SpatialMarker;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Inactive,
    Running,
    Paused,
}

/// Session record. Live while counting; finalized (with `end_time_ms`,
/// `total_count` and sheet linkage set) when confirmed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountSession {
    pub id: String,
    pub start_time_ms: u64,
    pub end_time_ms: Option<u64>,
    pub template: Template,
    pub total_count: u64,
    pub manual_additions: u64,
    pub manual_removals: u64,
    pub detections: Vec<Detection>,
    pub spatial_markers: Vec<SpatialMarker>,
    pub synced_to_sheet: bool,
    pub sheet_id: Option<String>,
    pub row_id: Option<String>,
}

impl CountSession {
    pub(crate) fn begin(template: Template, start_time_ms: u64) -> Self {
        Self {
            id: crate::random_id("session"),
            start_time_ms,
            end_time_ms: None,
            template,
            total_count: 0,
            manual_additions: 0,
            manual_removals: 0,
            detections: Vec::new(),
            spatial_markers: Vec::new(),
            synced_to_sheet: false,
            sheet_id: None,
            row_id: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.end_time_ms.is_some()
    }
}

/// Point-in-time view of the controller for status displays.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub sleeping: bool,
    pub session_id: Option<String>,
    pub template: Option<Template>,
    pub confirmed_count: u64,
    pub active_detections: usize,
    pub removed_detections: usize,
    pub markers: usize,
    /// Why frame processing is halted, if it is.
    pub halted: Option<String>,
}
