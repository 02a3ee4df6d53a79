//! countd - counting daemon
//!
//! This daemon:
//! 1. Captures frames from the configured local source
//! 2. Hands them to a single frame worker (dropping frames while it is busy)
//! 3. Applies operator commands read line by line from stdin
//! 4. Writes every confirmed session as a row in the SQLite sheet store
//! 5. Puts the pipeline to sleep when the operator goes idle

use anyhow::{anyhow, Result};
use clap::Parser;
use std::collections::VecDeque;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tally_kernel::activity::SLEEP_CHECK_INTERVAL;
use tally_kernel::{
    validate_sheet_id, ActivityMonitor, ActivitySignal, Clock, CountSession, CounterConfig,
    DetectorSlot, FileConfig, FileSource, FrameWorker, GenericDetector, SessionController,
    SessionEvent, Settings, SettingsHandle, SheetStore, SleepTimer, SqliteSheetStore,
    StubDetector, SystemClock, Template,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Start a session with this template at launch (circle|rectangle|generic).
    #[arg(long)]
    start: Option<Template>,
    /// ONNX model for the generic template (requires the backend-tract feature).
    #[arg(long, env = "COUNTER_MODEL_PATH")]
    model: Option<PathBuf>,
    /// Class names for the model's class ids, comma separated.
    #[arg(long, env = "COUNTER_MODEL_LABELS", value_delimiter = ',')]
    labels: Vec<String>,
    /// Exit after this many captured frames (0 runs until Ctrl-C).
    #[arg(long, default_value_t = 0)]
    max_frames: u64,
}

#[derive(Clone, Debug, PartialEq)]
enum Command {
    /// `None` uses the configured template.
    Start(Option<Template>),
    Pause,
    Resume,
    Add { x: f32, y: f32, w: f32, h: f32 },
    Remove(String),
    Undo(String),
    Confirm(String),
    Stop,
    Cancel,
    Touch,
    Motion { dx: f32, dy: f32, dz: f32 },
    Wake,
    ResetMarkers,
    Status,
    Reload,
    Reinit,
}

fn parse_command(line: &str) -> Result<Command> {
    let mut parts = line.split_whitespace();
    let verb = parts
        .next()
        .ok_or_else(|| anyhow!("empty command"))?
        .to_ascii_lowercase();
    let args: Vec<&str> = parts.collect();
    let num = |i: usize| -> Result<f32> {
        args.get(i)
            .ok_or_else(|| anyhow!("{}: missing argument {}", verb, i + 1))?
            .parse::<f32>()
            .map_err(|_| anyhow!("{}: argument {} must be a number", verb, i + 1))
    };
    let word = |i: usize| -> Result<String> {
        args.get(i)
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("{}: missing argument", verb))
    };

    let cmd = match verb.as_str() {
        "start" => Command::Start(args.first().map(|t| t.parse()).transpose()?),
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "add" => Command::Add {
            x: num(0)?,
            y: num(1)?,
            w: num(2)?,
            h: num(3)?,
        },
        "remove" => Command::Remove(word(0)?),
        "undo" => Command::Undo(word(0)?),
        "confirm" => Command::Confirm(word(0)?),
        "stop" => Command::Stop,
        "cancel" => Command::Cancel,
        "touch" => Command::Touch,
        "motion" => Command::Motion {
            dx: num(0)?,
            dy: num(1)?,
            dz: num(2)?,
        },
        "wake" => Command::Wake,
        "reset-markers" => Command::ResetMarkers,
        "status" => Command::Status,
        "reload" => Command::Reload,
        "reinit" => Command::Reinit,
        other => return Err(anyhow!("unknown command '{}'", other)),
    };
    Ok(cmd)
}

impl Command {
    /// Whether issuing the command is itself operator activity. Motion
    /// samples go through the activity threshold instead, and a status query
    /// is not an interaction.
    fn is_touch(&self) -> bool {
        !matches!(self, Command::Motion { .. } | Command::Status)
    }
}

struct Daemon {
    cfg: CounterConfig,
    model: ModelOptions,
    settings: SettingsHandle,
    activity: Arc<ActivityMonitor>,
    controller: Arc<SessionController>,
    detector: Arc<DetectorSlot>,
    store: Box<dyn SheetStore>,
    /// Confirmed sessions not yet written, oldest first.
    pending: VecDeque<CountSession>,
}

impl Daemon {
    fn execute(&mut self, cmd: Command) -> Result<()> {
        if cmd.is_touch() {
            self.activity.record_activity();
        }
        match cmd {
            Command::Start(template) => {
                self.controller.start(template.unwrap_or(self.cfg.template));
            }
            Command::Pause => report("pause", self.controller.pause()),
            Command::Resume => report("resume", self.controller.resume()),
            Command::Add { x, y, w, h } => match self.controller.add_manual(x, y, w, h) {
                Some(d) => println!("added {}", d.id),
                None => println!("add ignored: no active session"),
            },
            Command::Remove(id) => report("remove", self.controller.remove(&id)),
            Command::Undo(id) => report("undo", self.controller.undo(&id)),
            Command::Confirm(sheet_id) => {
                validate_sheet_id(&sheet_id)?;
                match self.controller.confirm(&sheet_id) {
                    Some(session) => println!(
                        "confirmed {} items into {} (running total {})",
                        session.total_count,
                        sheet_id,
                        self.controller.confirmed_count()
                    ),
                    None => println!("confirm ignored: no active session"),
                }
            }
            Command::Stop => report("stop", self.controller.stop()),
            Command::Cancel => report("cancel", self.controller.cancel()),
            Command::Touch => {
                self.activity.record(ActivitySignal::Touch);
            }
            Command::Motion { dx, dy, dz } => {
                self.activity.record(ActivitySignal::Motion { dx, dy, dz });
            }
            Command::Wake => self.activity.wake(),
            Command::ResetMarkers => self.controller.reset_markers(),
            Command::Status => {
                println!("{}", serde_json::to_string(&self.controller.status())?);
            }
            Command::Reload => {
                let Some(path) = self.cfg.settings_path.as_deref() else {
                    return Err(anyhow!("no settings_path configured; nothing to reload"));
                };
                self.settings.replace(Settings::load_toml(path)?)?;
            }
            Command::Reinit => {
                let (w, h) = (self.cfg.source.width, self.cfg.source.height);
                self.detector.reinitialize(|| self.model.load(w, h))?;
                self.controller.resume_processing();
            }
        }
        Ok(())
    }

    /// Collect confirmed sessions and write them out. Runs on the main loop so
    /// the store has a single owner.
    fn drain_events(&mut self, events: &Receiver<SessionEvent>) -> Result<()> {
        loop {
            match events.try_recv() {
                Ok(SessionEvent::Confirmed(session)) => self.pending.push_back(*session),
                Ok(SessionEvent::ProcessingHalted { reason }) => {
                    log::warn!("frame processing halted ({}); use 'reinit'", reason);
                }
                Ok(other) => log::debug!("session event: {:?}", other),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(anyhow!("session event channel closed"))
                }
            }
        }
        self.flush_pending();
        Ok(())
    }

    /// Write queued sessions in order. A failed write leaves it and everything
    /// after it queued for the next pass.
    fn flush_pending(&mut self) {
        while let Some(session) = self.pending.front() {
            match self.store.append_row(session) {
                Ok(written) => {
                    if written {
                        log::info!(
                            "row {} written to {} (quantity {})",
                            session.row_id.as_deref().unwrap_or("?"),
                            session.sheet_id.as_deref().unwrap_or("?"),
                            session.total_count
                        );
                    }
                    self.pending.pop_front();
                }
                Err(e) => {
                    log::warn!(
                        "sheet write failed, {} row(s) pending: {:#}",
                        self.pending.len(),
                        e
                    );
                    return;
                }
            }
        }
    }
}

fn report(what: &str, applied: bool) {
    if !applied {
        println!("{} ignored", what);
    }
}

/// How the generic detector is built, kept for `reinit`.
#[derive(Clone, Debug, Default)]
struct ModelOptions {
    path: Option<PathBuf>,
    labels: Vec<String>,
}

impl ModelOptions {
    fn load(&self, width: u32, height: u32) -> Result<Box<dyn GenericDetector>> {
        match self.path.as_deref() {
            #[cfg(feature = "backend-tract")]
            Some(path) => Ok(Box::new(
                tally_kernel::detect::TractDetector::new(path, width, height)?
                    .with_labels(self.labels.clone()),
            )),
            #[cfg(not(feature = "backend-tract"))]
            Some(path) => {
                let _ = (width, height);
                Err(anyhow!(
                    "model {} requires the backend-tract feature",
                    path.display()
                ))
            }
            None => Ok(Box::new(StubDetector::default())),
        }
    }
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
            log::debug!("stdin closed");
        })
        .map_err(|e| anyhow!("failed to spawn stdin reader: {}", e))?;
    Ok(rx)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = CounterConfig::load()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let settings = SettingsHandle::new(cfg.settings.clone());
    let activity = Arc::new(ActivityMonitor::new(clock.clone(), settings.clone()));
    let controller = Arc::new(SessionController::new(
        settings.clone(),
        activity.clone(),
        clock,
    ));

    let model = ModelOptions {
        path: args.model,
        labels: args.labels,
    };
    let detector = Arc::new(DetectorSlot::empty());
    if let Err(e) = detector.install(|| model.load(cfg.source.width, cfg.source.height)) {
        log::warn!("{:#}; generic template unavailable until 'reinit'", e);
    }

    let store = SqliteSheetStore::open(&cfg.db_path)?;
    let mut source = FileSource::new(FileConfig {
        path: cfg.source.path.clone(),
        width: cfg.source.width,
        height: cfg.source.height,
    })?;
    source.connect()?;

    let events = controller.subscribe();
    let worker = FrameWorker::spawn(
        controller.clone(),
        activity.clone(),
        settings.clone(),
        detector.clone(),
    )?;
    let timer = {
        let controller = controller.clone();
        SleepTimer::spawn(activity.clone(), SLEEP_CHECK_INTERVAL, move || {
            controller.is_running()
        })?
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;
    }
    let commands = spawn_stdin_reader()?;

    let interval = Duration::from_millis(cfg.source.capture_interval_ms);
    log::info!(
        "countd running. source={} db={} template={}",
        cfg.source.path,
        cfg.db_path,
        cfg.template
    );

    let mut daemon = Daemon {
        cfg,
        model,
        settings,
        activity,
        controller,
        detector,
        store: Box::new(store),
        pending: VecDeque::new(),
    };
    if let Some(template) = args.start {
        daemon.controller.start(template);
    }

    let mut frames = 0u64;
    let mut last_health_log = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        while let Ok(line) = commands.try_recv() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line).and_then(|cmd| daemon.execute(cmd)) {
                Ok(()) => {}
                Err(e) => println!("error: {:#}", e),
            }
        }

        match source.next_frame() {
            Ok(frame) => {
                frames += 1;
                worker.submit(frame);
            }
            Err(e) => log::warn!("frame capture failed: {:#}", e),
        }

        daemon.drain_events(&events)?;

        if last_health_log.elapsed() >= Duration::from_secs(5) {
            let stats = worker.stats();
            log::info!(
                "source healthy={} frames={} submitted={} processed={} dropped={} failed={}",
                source.is_healthy(),
                source.stats().frames_captured,
                stats.submitted,
                stats.processed,
                stats.dropped,
                stats.failed
            );
            last_health_log = Instant::now();
        }

        if args.max_frames > 0 && frames >= args.max_frames {
            break;
        }
        std::thread::sleep(interval);
    }

    log::info!("shutting down");
    worker.shutdown();
    timer.shutdown();
    daemon.drain_events(&events)?;
    if !daemon.pending.is_empty() {
        return Err(anyhow!(
            "{} confirmed session(s) could not be written to {}",
            daemon.pending.len(),
            daemon.cfg.db_path
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_kernel::config::SourceSettings;
    use tally_kernel::{InMemorySheetStore, ManualClock, SheetRow};

    /// In-memory store whose writes fail while `failing` is set.
    struct FlakyStore {
        failing: Arc<AtomicBool>,
        inner: InMemorySheetStore,
    }

    impl SheetStore for FlakyStore {
        fn append_row(&mut self, session: &CountSession) -> Result<bool> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(anyhow!("database is locked"));
            }
            self.inner.append_row(session)
        }

        fn rows(&mut self, sheet_id: &str) -> Result<Vec<SheetRow>> {
            self.inner.rows(sheet_id)
        }
    }

    fn daemon(clock: Arc<ManualClock>, store: Box<dyn SheetStore>) -> Daemon {
        let settings = SettingsHandle::new(Settings {
            sleep_timeout_ms: 1_000,
            ..Settings::default()
        });
        let activity = Arc::new(ActivityMonitor::new(clock.clone(), settings.clone()));
        let controller = Arc::new(SessionController::new(
            settings.clone(),
            activity.clone(),
            clock,
        ));
        Daemon {
            cfg: CounterConfig {
                db_path: ":memory:".to_string(),
                settings_path: None,
                template: Template::Circle,
                source: SourceSettings {
                    path: "stub://shelf".to_string(),
                    width: 64,
                    height: 48,
                    capture_interval_ms: 100,
                },
                settings: settings.snapshot(),
            },
            model: ModelOptions::default(),
            settings,
            activity,
            controller,
            detector: Arc::new(DetectorSlot::empty()),
            store,
            pending: VecDeque::new(),
        }
    }

    fn run(d: &mut Daemon, line: &str) {
        d.execute(parse_command(line).unwrap()).unwrap();
    }

    #[test]
    fn small_motion_and_status_do_not_wake_the_pipeline() {
        let clock = Arc::new(ManualClock::new(0));
        let mut d = daemon(clock.clone(), Box::new(InMemorySheetStore::default()));
        run(&mut d, "start");
        clock.advance(1_000);
        assert!(d.activity.check_idle(true));

        run(&mut d, "motion 1 1 1");
        run(&mut d, "status");
        assert!(d.activity.is_sleeping());

        run(&mut d, "motion 5 4 3");
        assert!(!d.activity.is_sleeping());

        // Sub-threshold motion does not refresh the idle clock either.
        clock.advance(900);
        run(&mut d, "motion 1 1 1");
        clock.advance(100);
        assert!(d.activity.check_idle(true));
    }

    #[test]
    fn operator_commands_count_as_activity() {
        let clock = Arc::new(ManualClock::new(0));
        let mut d = daemon(clock.clone(), Box::new(InMemorySheetStore::default()));
        run(&mut d, "start");
        clock.advance(1_000);
        assert!(d.activity.check_idle(true));
        run(&mut d, "add 10 10 30 30");
        assert!(!d.activity.is_sleeping());
    }

    #[test]
    fn reinit_installs_the_detector_and_resumes() {
        let clock = Arc::new(ManualClock::new(0));
        let mut d = daemon(clock, Box::new(InMemorySheetStore::default()));
        let outage = anyhow::Error::new(tally_kernel::DetectorUnavailable::new("gone"));
        d.controller.report_pipeline_error(&outage);
        assert!(d.controller.is_halted());

        run(&mut d, "reinit");
        assert!(d.detector.is_ready());
        assert!(!d.controller.is_halted());
    }

    #[test]
    fn failed_sheet_writes_are_retried() {
        let clock = Arc::new(ManualClock::new(0));
        let failing = Arc::new(AtomicBool::new(true));
        let store = FlakyStore {
            failing: failing.clone(),
            inner: InMemorySheetStore::default(),
        };
        let mut d = daemon(clock, Box::new(store));
        let events = d.controller.subscribe();

        run(&mut d, "start");
        run(&mut d, "add 10 10 30 30");
        run(&mut d, "confirm sheet:yard");
        run(&mut d, "add 200 10 30 30");
        run(&mut d, "confirm sheet:yard");

        d.drain_events(&events).unwrap();
        assert_eq!(d.pending.len(), 2);
        d.drain_events(&events).unwrap();
        assert_eq!(d.pending.len(), 2);

        failing.store(false, Ordering::SeqCst);
        d.drain_events(&events).unwrap();
        assert!(d.pending.is_empty());
        let rows = d.store.rows("sheet:yard").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(d.store.total_quantity("sheet:yard").unwrap(), 2);
    }

    #[test]
    fn parses_operator_commands() {
        assert_eq!(
            parse_command("start box").unwrap(),
            Command::Start(Some(Template::Rectangle))
        );
        assert_eq!(parse_command("START").unwrap(), Command::Start(None));
        assert_eq!(
            parse_command("add 1 2 30 40").unwrap(),
            Command::Add {
                x: 1.0,
                y: 2.0,
                w: 30.0,
                h: 40.0
            }
        );
        assert_eq!(
            parse_command("confirm sheet:yard").unwrap(),
            Command::Confirm("sheet:yard".to_string())
        );
        assert_eq!(parse_command("reset-markers").unwrap(), Command::ResetMarkers);
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(parse_command("add 1 2").is_err());
        assert!(parse_command("motion a b c").is_err());
        assert!(parse_command("remove").is_err());
        assert!(parse_command("dance").is_err());
        assert!(parse_command("start hexagon").is_err());
    }
}
