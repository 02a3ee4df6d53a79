//! Tally Kernel
//!
//! This crate implements the counting core for repeated physical objects
//! (pipes, boxes, generic items) seen through a live camera feed.
//!
//! # Architecture
//!
//! Frames flow through four layers, leaves first:
//!
//! 1. **Shape detection** (`shape`, `detect`): a pure function from a frame,
//!    template and confidence threshold to candidate detections.
//! 2. **Spatial tracking** (`tracker`): committed markers that suppress
//!    recounting of already-confirmed items while the camera pans.
//! 3. **Counting sessions** (`session`): the start/pause/confirm state machine,
//!    owning the transient detection list behind a single mutex.
//! 4. **Activity control** (`activity`): idle tracking that gates whether the
//!    pipeline may run at all.
//!
//! The only value that leaves the kernel is a finalized `CountSession`,
//! handed to a `SheetStore` at the persistence boundary.
//!
//! # Module Structure
//!
//! - `frame`: validated RGBA frames
//! - `ingest`: frame sources and pixel-format normalisation
//! - `worker`: single-worker frame processing with drop-on-busy backpressure

use std::time::{SystemTime, UNIX_EPOCH};

pub mod activity;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod session;
pub mod shape;
pub mod storage;
pub mod tracker;
pub mod worker;

pub use activity::{ActivityMonitor, ActivitySignal, Clock, ManualClock, SleepTimer, SystemClock};
pub use config::{validate_sheet_id, CounterConfig, Settings, SettingsHandle};
pub use detect::{
    detect_objects, BoundingBox, Detection, DetectorSlot, DetectorUnavailable, GenericDetector,
    LabeledBox, SlotStatus, StubDetector, Template,
};
pub use frame::Frame;
pub use ingest::{normalize_to_rgba, FileConfig, FileSource, PixelFormat};
pub use session::{CountSession, SessionController, SessionEvent, SessionState, SessionStatus};
pub use storage::{InMemorySheetStore, SheetRow, SheetStore, SqliteSheetStore};
pub use tracker::{SpatialMarker, SpatialTracker};
pub use worker::{DropReason, FrameWorker, SubmitOutcome, WorkerStats};

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Random identifier with a readable prefix, e.g. `session-3f9a…`.
pub(crate) fn random_id(prefix: &str) -> String {
    let bytes: [u8; 8] = rand::random();
    format!("{}-{}", prefix, hex::encode(bytes))
}
