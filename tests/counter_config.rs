use std::sync::Mutex;

use tempfile::NamedTempFile;

use tally_kernel::config::CounterConfig;
use tally_kernel::Template;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "COUNTER_CONFIG",
        "COUNTER_CONFIDENCE_THRESHOLD",
        "COUNTER_DEDUP",
        "COUNTER_DEDUP_DISTANCE",
        "COUNTER_SLEEP_TIMEOUT_MS",
        "COUNTER_DB_PATH",
        "COUNTER_SOURCE",
        "COUNTER_TEMPLATE",
        "COUNTER_CAPTURE_INTERVAL_MS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CounterConfig::load().expect("load defaults");
    assert_eq!(cfg.db_path, "tally.db");
    assert_eq!(cfg.template, Template::Circle);
    assert_eq!(cfg.source.path, "stub://shelf");
    assert_eq!((cfg.source.width, cfg.source.height), (640, 480));
    assert_eq!(cfg.settings.confidence_threshold, 0.5);
    assert_eq!(cfg.settings.sleep_timeout_ms, 30_000);
    assert!(cfg.settings_path.is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "yard.db",
        "template": "rectangle",
        "source": {
            "path": "stub://boxes",
            "width": 320,
            "height": 240,
            "capture_interval_ms": 50
        },
        "settings": {
            "confidence_threshold": 0.6,
            "deduplication_distance_threshold": 35.0
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("COUNTER_CONFIG", file.path());
    std::env::set_var("COUNTER_DEDUP", "off");
    std::env::set_var("COUNTER_SLEEP_TIMEOUT_MS", "10000");

    let cfg = CounterConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "yard.db");
    assert_eq!(cfg.template, Template::Rectangle);
    assert_eq!(cfg.source.path, "stub://boxes");
    assert_eq!((cfg.source.width, cfg.source.height), (320, 240));
    assert_eq!(cfg.source.capture_interval_ms, 50);
    assert_eq!(cfg.settings.confidence_threshold, 0.6);
    assert_eq!(cfg.settings.deduplication_distance_threshold, 35.0);
    assert!(!cfg.settings.enable_deduplication);
    assert_eq!(cfg.settings.sleep_timeout_ms, 10_000);

    clear_env();
}

#[test]
fn settings_path_points_at_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut toml = NamedTempFile::new().expect("temp settings");
    std::io::Write::write_all(&mut toml, b"confidence_threshold = 0.8\nsleep_timeout_ms = 5000\n")
        .expect("write settings");
    let mut file = NamedTempFile::new().expect("temp config");
    let json = serde_json::json!({ "settings_path": toml.path() }).to_string();
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("COUNTER_CONFIG", file.path());

    let cfg = CounterConfig::load().expect("load config");
    assert_eq!(cfg.settings_path.as_deref(), Some(toml.path()));
    assert_eq!(cfg.settings.confidence_threshold, 0.8);
    assert_eq!(cfg.settings.sleep_timeout_ms, 5_000);
    assert!(cfg.settings.enable_deduplication);

    clear_env();
}

#[test]
fn rejects_invalid_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();

    for (key, value) in [
        ("COUNTER_CONFIDENCE_THRESHOLD", "1.5"),
        ("COUNTER_CONFIDENCE_THRESHOLD", "high"),
        ("COUNTER_DEDUP", "maybe"),
        ("COUNTER_SLEEP_TIMEOUT_MS", "0"),
        ("COUNTER_TEMPLATE", "hexagon"),
        ("COUNTER_CAPTURE_INTERVAL_MS", "0"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        assert!(CounterConfig::load().is_err(), "{}={} accepted", key, value);
    }

    clear_env();
}

#[test]
fn rejects_missing_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("COUNTER_CONFIG", "/nonexistent/tally.json");
    assert!(CounterConfig::load().is_err());

    clear_env();
}
