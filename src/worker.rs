//! Background frame worker.
//!
//! Runs `detect_objects` off the capture thread. The hand-off is a rendezvous
//! channel: a frame is accepted only when the worker is idle and waiting, so
//! frames arriving while one is in flight are dropped rather than queued.
//! Results are tagged with the session epoch they were computed for, and the
//! controller rejects them if the session moved on in the meantime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};

use crate::activity::ActivityMonitor;
use crate::config::SettingsHandle;
use crate::detect::{detect_objects, DetectorSlot, Template};
use crate::frame::Frame;
use crate::session::SessionController;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// A frame is already being processed.
    Busy,
    Asleep,
    /// Processing halted after a detector outage.
    Halted,
    /// No running session (inactive or paused).
    Inactive,
    /// The worker has shut down.
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    Dropped(DropReason),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub submitted: u64,
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

struct Job {
    frame: Frame,
    epoch: u64,
    template: Template,
}

pub struct FrameWorker {
    tx: Option<SyncSender<Job>>,
    handle: Option<JoinHandle<()>>,
    controller: Arc<SessionController>,
    activity: Arc<ActivityMonitor>,
    counters: Arc<Counters>,
}

impl FrameWorker {
    pub fn spawn(
        controller: Arc<SessionController>,
        activity: Arc<ActivityMonitor>,
        settings: SettingsHandle,
        detector: Arc<DetectorSlot>,
    ) -> Result<Self> {
        let (tx, rx) = sync_channel::<Job>(0);
        let counters = Arc::new(Counters::default());

        let worker_controller = controller.clone();
        let worker_counters = counters.clone();
        let handle = std::thread::Builder::new()
            .name("frame-worker".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    let threshold = settings.snapshot().confidence_threshold;
                    match detect_objects(&job.frame, job.template, threshold, &detector) {
                        Ok(detections) => {
                            log::debug!(
                                "frame {}: {} detections",
                                job.frame.frame_id,
                                detections.len()
                            );
                            worker_controller.apply_frame_result(job.epoch, detections);
                            worker_counters.processed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                            worker_controller.report_pipeline_error(&err);
                        }
                    }
                }
                log::debug!("frame worker exiting");
            })
            .map_err(|e| anyhow!("failed to spawn frame worker: {}", e))?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            controller,
            activity,
            counters,
        })
    }

    /// Offer a frame to the worker. Never blocks.
    pub fn submit(&self, frame: Frame) -> SubmitOutcome {
        let outcome = self.try_submit(frame);
        match outcome {
            SubmitOutcome::Submitted => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
            }
            SubmitOutcome::Dropped(reason) => {
                log::trace!("frame dropped: {:?}", reason);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcome
    }

    fn try_submit(&self, frame: Frame) -> SubmitOutcome {
        let Some(tx) = self.tx.as_ref() else {
            return SubmitOutcome::Dropped(DropReason::Stopped);
        };
        if self.activity.is_sleeping() {
            return SubmitOutcome::Dropped(DropReason::Asleep);
        }
        if self.controller.is_halted() {
            return SubmitOutcome::Dropped(DropReason::Halted);
        }
        // Epoch and template must describe the same session.
        let Some((epoch, template)) = self.controller.frame_target() else {
            let reason = if self.controller.is_halted() {
                DropReason::Halted
            } else {
                DropReason::Inactive
            };
            return SubmitOutcome::Dropped(reason);
        };
        let job = Job {
            frame,
            epoch,
            template,
        };
        match tx.try_send(job) {
            Ok(()) => SubmitOutcome::Submitted,
            Err(TrySendError::Full(_)) => SubmitOutcome::Dropped(DropReason::Busy),
            Err(TrySendError::Disconnected(_)) => SubmitOutcome::Dropped(DropReason::Stopped),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting frames and wait for the in-flight frame to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("frame worker thread panicked");
            }
        }
    }
}

impl Drop for FrameWorker {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
