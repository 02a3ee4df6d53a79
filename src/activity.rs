//! Activity tracking and the idle-sleep control loop.
//!
//! Touch and motion signals are pushed in as `ActivitySignal` messages; this
//! module has no platform sensor dependency. A `SleepTimer` thread checks idle
//! time on a fixed cadence and flips the monitor into the sleeping state.
//!
//! The monitor only gates the pipeline entry point. It never touches session
//! data: callers check `is_sleeping()` before submitting frames.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::config::SettingsHandle;

/// Summed absolute acceleration delta above which a motion sample counts as activity.
pub const MOTION_ACTIVITY_THRESHOLD: f32 = 10.0;

/// Cadence of the idle check.
pub const SLEEP_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Millisecond time source. Injected so idle behaviour can be tested with a
/// simulated clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        crate::now_ms()
    }
}

/// Manually advanced clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActivitySignal {
    /// Touch or pointer input.
    Touch,
    /// One accelerometer sample, as deltas on the three axes.
    Motion { dx: f32, dy: f32, dz: f32 },
}

impl ActivitySignal {
    pub fn counts_as_activity(&self) -> bool {
        match *self {
            ActivitySignal::Touch => true,
            ActivitySignal::Motion { dx, dy, dz } => {
                dx.abs() + dy.abs() + dz.abs() > MOTION_ACTIVITY_THRESHOLD
            }
        }
    }
}

#[derive(Debug)]
struct ActivityState {
    last_activity_ms: u64,
    sleeping: bool,
}

pub struct ActivityMonitor {
    clock: Arc<dyn Clock>,
    settings: SettingsHandle,
    state: Mutex<ActivityState>,
}

impl ActivityMonitor {
    pub fn new(clock: Arc<dyn Clock>, settings: SettingsHandle) -> Self {
        let now = clock.now_ms();
        Self {
            clock,
            settings,
            state: Mutex::new(ActivityState {
                last_activity_ms: now,
                sleeping: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ActivityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed one signal. Returns true when it counted as activity.
    pub fn record(&self, signal: ActivitySignal) -> bool {
        if !signal.counts_as_activity() {
            return false;
        }
        self.record_activity();
        true
    }

    /// Refresh the activity clock and clear sleeping.
    pub fn record_activity(&self) {
        let now = self.clock.now_ms();
        let mut state = self.lock();
        state.last_activity_ms = now;
        if state.sleeping {
            log::info!("activity detected, waking up");
            state.sleeping = false;
        }
    }

    /// Explicit wake: same effect as an activity event.
    pub fn wake(&self) {
        self.record_activity();
    }

    /// Idle check. Enters sleeping when the session is running and the time
    /// since the last activity has reached the configured timeout. Returns
    /// true only on the transition.
    pub fn check_idle(&self, session_running: bool) -> bool {
        let timeout = self.settings.snapshot().sleep_timeout_ms;
        let now = self.clock.now_ms();
        let mut state = self.lock();
        if state.sleeping || !session_running {
            return false;
        }
        let idle = now.saturating_sub(state.last_activity_ms);
        if idle >= timeout {
            state.sleeping = true;
            log::info!("idle for {} ms, entering sleep", idle);
            return true;
        }
        false
    }

    pub fn is_sleeping(&self) -> bool {
        self.lock().sleeping
    }

    pub fn idle_ms(&self) -> u64 {
        let now = self.clock.now_ms();
        now.saturating_sub(self.lock().last_activity_ms)
    }
}

/// Background thread running `ActivityMonitor::check_idle` on a fixed cadence.
pub struct SleepTimer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SleepTimer {
    /// Spawn the timer. `is_running` reports whether a session is currently
    /// running (not paused or inactive).
    pub fn spawn<F>(
        monitor: Arc<ActivityMonitor>,
        interval: Duration,
        is_running: F,
    ) -> Result<Self>
    where
        F: Fn() -> bool + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name("sleep-timer".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::SeqCst) {
                    std::thread::sleep(interval);
                    if stop_flag.load(Ordering::SeqCst) {
                        break;
                    }
                    monitor.check_idle(is_running());
                }
            })
            .map_err(|e| anyhow!("failed to spawn sleep timer: {}", e))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("sleep timer thread panicked");
            }
        }
    }
}

impl Drop for SleepTimer {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
