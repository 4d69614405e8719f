//! Log output: JSONL mode of the binary, and the test capture helpers.

use assert_cmd::Command;
use serde_json::Value;
use switchyard::core::models::Tier;
use switchyard::test_utils::{TestDir, make_test_config, make_test_engine};
use tracing::{Level, error, info, warn};

mod common;

use common::log_capture::TestLogCapture;
use common::logger::TestLogger;

#[allow(deprecated)]
fn offline_command(dir: &TestDir) -> Command {
    dir.create_file(
        "config.toml",
        "[local]\nbase_url = \"http://127.0.0.1:9\"\n\n[cloud]\nprimary_base_url = \"http://127.0.0.1:9\"\n\n[history]\npersist = false\n",
    );
    let mut cmd = Command::cargo_bin("switchyard").expect("binary built");
    for var in ["SWITCHYARD_LOG", "SWITCHYARD_LOG_FORMAT", "SWITCHYARD_LOG_FILE", "RUST_LOG"] {
        cmd.env_remove(var);
    }
    cmd.env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.file_path("xdg-config"))
        .env("XDG_CACHE_HOME", dir.file_path("xdg-cache"))
        .env("XDG_DATA_HOME", dir.file_path("xdg-data"))
        .env("NO_COLOR", "1")
        .env("SWITCHYARD_CONFIG", dir.file_path("config.toml"));
    cmd
}

#[test]
fn json_output_emits_one_object_per_line() {
    let log = TestLogger::new("json_output_emits_one_object_per_line");
    let dir = TestDir::new();

    let output = offline_command(&dir)
        .args(["--json-output", "--log-level", "debug", "health"])
        .output()
        .unwrap();

    let stderr = String::from_utf8_lossy(&output.stderr);
    let events: Vec<Value> = stderr
        .lines()
        .filter(|l| l.trim_start().starts_with('{'))
        .map(|l| serde_json::from_str(l).unwrap_or_else(|e| panic!("bad JSONL line ({e}): {l}")))
        .collect();

    log.debug(&format!("{} JSON events", events.len()));
    assert!(!events.is_empty(), "no JSON log lines:\n{stderr}");
    assert!(events.iter().all(|e| e["level"].is_string() && e["timestamp"].is_string()));
    assert!(events.iter().any(|e| e["level"] == "DEBUG"));
    log.finish_ok();
}

#[test]
fn log_file_receives_events() {
    let dir = TestDir::new();
    let log_path = dir.file_path("switchyard.log");

    offline_command(&dir)
        .env("SWITCHYARD_LOG_FILE", &log_path)
        .args(["--log-level", "debug", "health"])
        .output()
        .unwrap();

    let contents = std::fs::read_to_string(&log_path).unwrap_or_default();
    assert!(contents.contains("unreachable"), "log file:\n{contents}");
}

#[test]
fn capture_sees_levels_and_fields() {
    let capture = TestLogCapture::start();

    info!(model = "qwen2.5-7b", size_gb = 4.4, "Model loaded");
    warn!(stage = "local_bypass", "Attempt failed");

    capture.assert_logged_at_level(Level::INFO, "Model loaded");
    capture.assert_logged_at_level(Level::WARN, "Attempt failed");
    capture.assert_field_logged("model", "qwen2.5-7b");
    capture.assert_field_logged("size_gb", "4.4");
    capture.assert_not_logged("Model unloaded");
}

#[test]
#[should_panic(expected = "Unexpected errors")]
fn capture_flags_error_events() {
    let capture = TestLogCapture::start();
    info!("fine");
    capture.assert_no_errors();

    error!("Model load failed");
    capture.assert_no_errors();
}

#[test]
fn tier_switch_is_logged_once() {
    let capture = TestLogCapture::start();
    let engine = make_test_engine(
        make_test_config("http://127.0.0.1:9", "http://127.0.0.1:9"),
        64.0,
    );

    assert!(engine.gateway().switch_to_paid("quota_exceeded"));
    assert!(!engine.gateway().switch_to_paid("quota_exceeded"));

    assert_eq!(engine.gateway().active_tier(), Tier::Paid);
    assert_eq!(capture.count_matching("Switched cloud tier to paid"), 1);
    capture.assert_field_logged("error_code", "quota_exceeded");
}
