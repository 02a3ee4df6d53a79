use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sha2::{Digest, Sha256};

use super::events::{EventBus, SessionEvent};
use super::{CountSession, SessionState, SessionStatus};
use crate::activity::{ActivityMonitor, Clock};
use crate::config::SettingsHandle;
use crate::detect::{BoundingBox, Detection, DetectorUnavailable, Template};
use crate::tracker::{SpatialMarker, SpatialTracker};

/// Label given to operator-added boxes.
pub const MANUAL_LABEL: &str = "manual";

struct Inner {
    state: SessionState,
    session: Option<CountSession>,
    /// Transient per-frame detections plus manual additions, soft-deleted in place.
    detections: Vec<Detection>,
    confirmed_count: u64,
    tracker: SpatialTracker,
    halted: Option<String>,
    /// Bumped whenever the live session changes identity, so frame results
    /// computed for an older session are rejected.
    epoch: u64,
    manual_seq: u64,
}

impl Inner {
    fn active_count(&self) -> usize {
        self.detections.iter().filter(|d| d.is_active()).count()
    }
}

/// Single sequencer for all session commands and frame results.
///
/// Commands issued with no active session are no-ops: they return `false` or
/// `None` and never error.
pub struct SessionController {
    inner: Mutex<Inner>,
    settings: SettingsHandle,
    activity: Arc<ActivityMonitor>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl SessionController {
    pub fn new(
        settings: SettingsHandle,
        activity: Arc<ActivityMonitor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::Inactive,
                session: None,
                detections: Vec::new(),
                confirmed_count: 0,
                tracker: SpatialTracker::new(),
                halted: None,
                epoch: 0,
                manual_seq: 0,
            }),
            settings,
            activity,
            clock,
            events: EventBus::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive every subsequent `SessionEvent`.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // -------------------- Lifecycle --------------------

    /// Begin a new session. Any live session is discarded, and the confirmed
    /// count and dedup markers are reset. Returns the new session id.
    pub fn start(&self, template: Template) -> String {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        let session = CountSession::begin(template, now);
        let session_id = session.id.clone();
        if !inner.tracker.is_empty() {
            inner.tracker.clear();
            self.events.publish(SessionEvent::MarkersCleared);
        }
        inner.session = Some(session);
        inner.detections.clear();
        inner.confirmed_count = 0;
        inner.state = SessionState::Running;
        inner.epoch += 1;
        self.activity.record_activity();
        log::info!("session {} started (template={})", session_id, template);
        self.events.publish(SessionEvent::Started {
            session_id: session_id.clone(),
            template,
        });
        session_id
    }

    pub fn pause(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != SessionState::Running {
            return false;
        }
        inner.state = SessionState::Paused;
        self.events.publish(SessionEvent::Paused);
        true
    }

    /// Resume a paused session; also counts as operator activity.
    pub fn resume(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != SessionState::Paused {
            return false;
        }
        inner.state = SessionState::Running;
        self.activity.record_activity();
        self.events.publish(SessionEvent::Resumed);
        true
    }

    /// Discard the live session without persisting anything.
    pub fn stop(&self) -> bool {
        self.end(false)
    }

    /// Same as `stop`; reported to observers as a cancellation.
    pub fn cancel(&self) -> bool {
        self.end(true)
    }

    fn end(&self, cancelled: bool) -> bool {
        let mut inner = self.lock();
        if inner.state == SessionState::Inactive {
            return false;
        }
        let session_id = inner.session.take().map(|s| s.id);
        inner.detections.clear();
        inner.state = SessionState::Inactive;
        inner.epoch += 1;
        log::info!(
            "session {} {}",
            session_id.as_deref().unwrap_or("?"),
            if cancelled { "cancelled" } else { "stopped" }
        );
        self.events.publish(SessionEvent::Stopped { cancelled });
        true
    }

    // -------------------- Frame results --------------------

    /// Replace the transient detection list with a frame's candidates, after
    /// the dedup filter. Ignored unless the session is running and awake.
    pub fn on_detections(&self, candidates: Vec<Detection>) -> bool {
        let mut inner = self.lock();
        self.apply_locked(&mut inner, candidates)
    }

    /// `on_detections` for a result computed against session `epoch`. Results
    /// from a session that has since been stopped, restarted or confirmed are
    /// dropped.
    pub fn apply_frame_result(&self, epoch: u64, candidates: Vec<Detection>) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            log::debug!(
                "dropping stale frame result (epoch {} != {})",
                epoch,
                inner.epoch
            );
            return false;
        }
        self.apply_locked(&mut inner, candidates)
    }

    fn apply_locked(&self, inner: &mut Inner, candidates: Vec<Detection>) -> bool {
        if inner.state != SessionState::Running || self.activity.is_sleeping() {
            return false;
        }
        let settings = self.settings.snapshot();
        inner.detections = inner.tracker.filter(candidates, &settings);
        let active = inner.active_count();
        self.events
            .publish(SessionEvent::DetectionsUpdated { active });
        true
    }

    // -------------------- Manual corrections --------------------

    /// Add an operator-drawn box with full confidence.
    pub fn add_manual(&self, x: f32, y: f32, width: f32, height: f32) -> Option<Detection> {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        if inner.state == SessionState::Inactive {
            return None;
        }
        inner.manual_seq += 1;
        let id = format!("manual-{}", inner.manual_seq);
        let detection = Detection {
            id: id.clone(),
            bbox: BoundingBox {
                id: id.clone(),
                x,
                y,
                width,
                height,
                confidence: 1.0,
                label: MANUAL_LABEL.to_string(),
                is_manually_added: true,
                is_removed: false,
            },
            timestamp_ms: now,
            frame_id: 0,
        };
        inner.detections.push(detection.clone());
        if let Some(session) = inner.session.as_mut() {
            session.manual_additions += 1;
        }
        self.events
            .publish(SessionEvent::ManualAdded { detection_id: id });
        Some(detection)
    }

    /// Soft-delete a detection. Returns false if unknown or already removed.
    pub fn remove(&self, detection_id: &str) -> bool {
        self.set_removed(detection_id, true)
    }

    /// Restore a soft-deleted detection. Returns false if unknown or not removed.
    pub fn undo(&self, detection_id: &str) -> bool {
        self.set_removed(detection_id, false)
    }

    fn set_removed(&self, detection_id: &str, removed: bool) -> bool {
        let mut inner = self.lock();
        if inner.state == SessionState::Inactive {
            return false;
        }
        let Some(detection) = inner
            .detections
            .iter_mut()
            .find(|d| d.id == detection_id)
        else {
            return false;
        };
        if detection.bbox.is_removed == removed {
            return false;
        }
        detection.bbox.is_removed = removed;
        if let Some(session) = inner.session.as_mut() {
            if removed {
                session.manual_removals += 1;
            } else {
                session.manual_removals = session.manual_removals.saturating_sub(1);
            }
        }
        self.events.publish(SessionEvent::RemovalToggled {
            detection_id: detection_id.to_string(),
            removed,
        });
        true
    }

    // -------------------- Confirm --------------------

    /// Finalize the live session into an immutable snapshot linked to
    /// `sheet_id`, commit one dedup marker per counted detection, and roll
    /// over to a fresh session with the same template.
    ///
    /// The count is a scan of the non-removed detections at this instant.
    /// Returns `None` when no session is active.
    pub fn confirm(&self, sheet_id: &str) -> Option<CountSession> {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        if inner.state == SessionState::Inactive {
            return None;
        }
        let live = inner.session.take()?;

        let active: Vec<Detection> = inner
            .detections
            .iter()
            .filter(|d| d.is_active())
            .cloned()
            .collect();
        let count = active.len() as u64;
        let markers: Vec<SpatialMarker> = active
            .iter()
            .map(|d| inner.tracker.commit(d, now))
            .collect();

        let row_id = row_id_for(sheet_id, &live.id);
        let snapshot = CountSession {
            end_time_ms: Some(now),
            total_count: count,
            detections: active,
            spatial_markers: markers,
            synced_to_sheet: true,
            sheet_id: Some(sheet_id.to_string()),
            row_id: Some(row_id),
            ..live
        };

        inner.confirmed_count += count;
        let next = CountSession::begin(snapshot.template, now);
        let next_id = next.id.clone();
        inner.session = Some(next);
        inner.detections.clear();
        inner.state = SessionState::Running;
        inner.epoch += 1;

        log::info!(
            "session {} confirmed: count={} sheet={} (running total {}), continuing as {}",
            snapshot.id,
            count,
            sheet_id,
            inner.confirmed_count,
            next_id
        );
        self.events
            .publish(SessionEvent::Confirmed(Box::new(snapshot.clone())));
        self.events.publish(SessionEvent::Started {
            session_id: next_id,
            template: snapshot.template,
        });
        Some(snapshot)
    }

    /// Explicitly drop every dedup marker.
    pub fn reset_markers(&self) {
        let mut inner = self.lock();
        inner.tracker.clear();
        self.events.publish(SessionEvent::MarkersCleared);
    }

    // -------------------- Pipeline errors --------------------

    /// Decide what a pipeline error means for frame processing. A detector
    /// outage halts processing until `resume_processing`; anything else is a
    /// per-frame failure and processing continues. Returns true if halted.
    pub fn report_pipeline_error(&self, err: &anyhow::Error) -> bool {
        let Some(unavailable) = err.downcast_ref::<DetectorUnavailable>() else {
            log::warn!("frame processing failed: {:#}", err);
            return false;
        };
        let mut inner = self.lock();
        if inner.halted.is_none() {
            log::error!("frame processing halted: {}", unavailable);
            inner.halted = Some(unavailable.reason.clone());
            self.events.publish(SessionEvent::ProcessingHalted {
                reason: unavailable.reason.clone(),
            });
        }
        true
    }

    /// Clear a halt after the detector has been reinitialized.
    pub fn resume_processing(&self) -> bool {
        let mut inner = self.lock();
        if inner.halted.take().is_none() {
            return false;
        }
        log::info!("frame processing resumed");
        self.events.publish(SessionEvent::ProcessingResumed);
        true
    }

    // -------------------- Queries --------------------

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub fn is_halted(&self) -> bool {
        self.lock().halted.is_some()
    }

    /// Identity of the live session, for tagging in-flight frame work.
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Epoch and template of the running session, read under one lock, or
    /// `None` when frames should not be processed (not running, or halted).
    pub fn frame_target(&self) -> Option<(u64, Template)> {
        let inner = self.lock();
        if inner.state != SessionState::Running || inner.halted.is_some() {
            return None;
        }
        inner.session.as_ref().map(|s| (inner.epoch, s.template))
    }

    pub fn template(&self) -> Option<Template> {
        self.lock().session.as_ref().map(|s| s.template)
    }

    /// Live session record (counters only; detections live in `detections()`).
    pub fn current_session(&self) -> Option<CountSession> {
        self.lock().session.clone()
    }

    /// Transient detections, including soft-deleted ones.
    pub fn detections(&self) -> Vec<Detection> {
        self.lock().detections.clone()
    }

    pub fn confirmed_count(&self) -> u64 {
        self.lock().confirmed_count
    }

    pub fn markers(&self) -> Vec<SpatialMarker> {
        self.lock().tracker.markers().to_vec()
    }

    pub fn status(&self) -> SessionStatus {
        let inner = self.lock();
        let active = inner.active_count();
        SessionStatus {
            state: inner.state,
            sleeping: self.activity.is_sleeping(),
            session_id: inner.session.as_ref().map(|s| s.id.clone()),
            template: inner.session.as_ref().map(|s| s.template),
            confirmed_count: inner.confirmed_count,
            active_detections: active,
            removed_detections: inner.detections.len() - active,
            markers: inner.tracker.len(),
            halted: inner.halted.clone(),
        }
    }
}

/// Stable row id for a (sheet, session) pair, so rewriting the same snapshot
/// targets the same inventory row.
pub fn row_id_for(sheet_id: &str, session_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sheet_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(session_id.as_bytes());
    let digest = hasher.finalize();
    format!("row-{}", hex::encode(&digest[..8]))
}
