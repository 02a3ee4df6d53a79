use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use crate::detect::Template;

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_DEDUP_DISTANCE: f32 = 50.0;
const DEFAULT_SLEEP_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_DB_PATH: &str = "tally.db";
const DEFAULT_SOURCE: &str = "stub://shelf";
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 100;

// -------------------- Runtime settings --------------------

/// Tuning values read by the pipeline, tracker, session and activity loop.
///
/// Hot-reloadable: components take a snapshot from `SettingsHandle` per
/// operation instead of caching values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub confidence_threshold: f32,
    pub enable_deduplication: bool,
    pub deduplication_distance_threshold: f32,
    pub sleep_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            enable_deduplication: true,
            deduplication_distance_threshold: DEFAULT_DEDUP_DISTANCE,
            sleep_timeout_ms: DEFAULT_SLEEP_TIMEOUT_MS,
        }
    }
}

impl Settings {
    /// Parse an operator-edited TOML settings file; missing keys keep defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(raw).map_err(|e| anyhow!("invalid settings TOML: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_toml(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read settings file {}: {}", path.display(), e))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.confidence_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.confidence_threshold)
        {
            return Err(anyhow!("confidence_threshold must be within [0, 1]"));
        }
        if !self.deduplication_distance_threshold.is_finite()
            || self.deduplication_distance_threshold < 0.0
        {
            return Err(anyhow!(
                "deduplication_distance_threshold must be a non-negative number"
            ));
        }
        if self.sleep_timeout_ms == 0 {
            return Err(anyhow!("sleep_timeout_ms must be greater than zero"));
        }
        Ok(())
    }
}

/// Shared, hot-swappable settings. Cloning shares the same underlying value.
#[derive(Clone, Debug, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Settings>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Current values. A poisoned lock still yields the last written settings.
    pub fn snapshot(&self) -> Settings {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Validate and swap in new settings. Invalid settings leave the current
    /// values untouched.
    pub fn replace(&self, settings: Settings) -> Result<()> {
        settings.validate()?;
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        log::info!(
            "settings updated: threshold={:.2} dedup={} distance={:.1} sleep_timeout_ms={}",
            settings.confidence_threshold,
            settings.enable_deduplication,
            settings.deduplication_distance_threshold,
            settings.sleep_timeout_ms
        );
        *guard = settings;
        Ok(())
    }

    /// Apply an in-place edit, validated as a whole.
    pub fn update(&self, edit: impl FnOnce(&mut Settings)) -> Result<()> {
        let mut next = self.snapshot();
        edit(&mut next);
        self.replace(next)
    }
}

// -------------------- Process configuration --------------------

#[derive(Debug, Deserialize, Default)]
struct CounterConfigFile {
    db_path: Option<String>,
    settings_path: Option<PathBuf>,
    template: Option<Template>,
    source: Option<SourceConfigFile>,
    settings: Option<Settings>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    path: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    capture_interval_ms: Option<u64>,
}

/// Configuration for the counting daemon.
#[derive(Debug, Clone)]
pub struct CounterConfig {
    pub db_path: String,
    /// Optional TOML file re-read on `reload`.
    pub settings_path: Option<PathBuf>,
    pub template: Template,
    pub source: SourceSettings,
    pub settings: Settings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub capture_interval_ms: u64,
}

impl CounterConfig {
    /// Load from `COUNTER_CONFIG` (JSON, optional), then apply environment
    /// overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("COUNTER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CounterConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let source = SourceSettings {
            path: file
                .source
                .as_ref()
                .and_then(|source| source.path.clone())
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            width: file
                .source
                .as_ref()
                .and_then(|source| source.width)
                .unwrap_or(DEFAULT_FRAME_WIDTH),
            height: file
                .source
                .as_ref()
                .and_then(|source| source.height)
                .unwrap_or(DEFAULT_FRAME_HEIGHT),
            capture_interval_ms: file
                .source
                .as_ref()
                .and_then(|source| source.capture_interval_ms)
                .unwrap_or(DEFAULT_CAPTURE_INTERVAL_MS),
        };
        let mut settings = file.settings.unwrap_or_default();
        if let Some(path) = file.settings_path.as_deref() {
            settings = Settings::load_toml(path)?;
        }
        Ok(Self {
            db_path,
            settings_path: file.settings_path,
            template: file.template.unwrap_or(Template::Circle),
            source,
            settings,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("COUNTER_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(source) = std::env::var("COUNTER_SOURCE") {
            if !source.trim().is_empty() {
                self.source.path = source;
            }
        }
        if let Ok(template) = std::env::var("COUNTER_TEMPLATE") {
            self.template = template.parse()?;
        }
        if let Ok(interval) = std::env::var("COUNTER_CAPTURE_INTERVAL_MS") {
            self.source.capture_interval_ms = interval.parse().map_err(|_| {
                anyhow!("COUNTER_CAPTURE_INTERVAL_MS must be an integer number of milliseconds")
            })?;
        }
        if let Ok(threshold) = std::env::var("COUNTER_CONFIDENCE_THRESHOLD") {
            self.settings.confidence_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("COUNTER_CONFIDENCE_THRESHOLD must be a number"))?;
        }
        if let Ok(dedup) = std::env::var("COUNTER_DEDUP") {
            self.settings.enable_deduplication = parse_bool(&dedup)
                .ok_or_else(|| anyhow!("COUNTER_DEDUP must be true/false"))?;
        }
        if let Ok(distance) = std::env::var("COUNTER_DEDUP_DISTANCE") {
            self.settings.deduplication_distance_threshold = distance
                .parse()
                .map_err(|_| anyhow!("COUNTER_DEDUP_DISTANCE must be a number"))?;
        }
        if let Ok(timeout) = std::env::var("COUNTER_SLEEP_TIMEOUT_MS") {
            self.settings.sleep_timeout_ms = timeout.parse().map_err(|_| {
                anyhow!("COUNTER_SLEEP_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        if self.source.capture_interval_ms == 0 {
            return Err(anyhow!("capture_interval_ms must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source dimensions must be non-zero"));
        }
        Ok(())
    }
}

/// A conforming sheet id names a local inventory sheet, e.g. `sheet:warehouse_a`.
pub fn validate_sheet_id(sheet_id: &str) -> Result<()> {
    static SHEET_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = SHEET_ID_RE.get_or_init(|| {
        regex::Regex::new(r"^sheet:[a-z0-9_-]{1,64}$").expect("sheet id pattern is valid")
    });
    if !re.is_match(sheet_id) {
        return Err(anyhow!(
            "sheet id must match ^sheet:[a-z0-9_-]{{1,64}}$ (got '{}')",
            sheet_id
        ));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<CounterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
