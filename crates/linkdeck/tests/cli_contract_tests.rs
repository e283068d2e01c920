//! CLI command contract tests.
//!
//! Runs the `linkdeck` binary as a subprocess and checks:
//! - Deterministic exit codes
//! - Stable JSON shape in `--format json` mode
//! - Actionable error messages for bad configuration

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn linkdeck() -> Command {
    let mut cmd = Command::cargo_bin("linkdeck").expect("binary built");
    cmd.env_remove("RUST_LOG").env_remove("LINKDECK_CONFIG");
    cmd
}

fn write_config(contents: &str) -> (TempDir, String) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("linkdeck.toml");
    std::fs::write(&path, contents).expect("write config");
    let path = path.to_string_lossy().to_string();
    (dir, path)
}

// =============================================================================
// config
// =============================================================================

#[test]
fn config_prints_default_toml() {
    linkdeck()
        .args(["config", "--log-level", "error"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[governor]"))
        .stdout(predicate::str::contains("fps_window_ms = 2000"))
        .stdout(predicate::str::contains("[governor.concurrency]"));
}

#[test]
fn config_json_reflects_file_overrides() {
    let (_dir, path) = write_config("[governor]\nlow_fps = 24.0\n\n[governor.concurrency]\nhigh = 7\n");
    let output = linkdeck()
        .args(["config", "--format", "json", "--log-level", "error", "--config", &path])
        .output()
        .expect("run linkdeck");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(json["governor"]["low_fps"], 24.0);
    assert_eq!(json["governor"]["concurrency"]["high"], 7);
    assert_eq!(json["governor"]["medium_fps"], 50.0);
}

#[test]
fn missing_config_file_fails_with_remediation() {
    linkdeck()
        .args(["config", "--config", "/nonexistent/linkdeck.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"))
        .stderr(predicate::str::contains("To fix:"));
}

#[test]
fn invalid_bands_fail_validation() {
    let (_dir, path) = write_config("[governor]\nlow_fps = 55.0\nmedium_fps = 50.0\n");
    linkdeck()
        .args(["config", "--config", &path])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Validation error"))
        .stderr(predicate::str::contains("linkdeck config"));
}

#[test]
fn malformed_toml_is_parse_error() {
    let (_dir, path) = write_config("[governor\nlow_fps = ");
    linkdeck()
        .args(["profile", "--config", &path])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config"));
}

#[test]
fn invalid_log_level_is_rejected() {
    linkdeck()
        .args(["config", "--log-level", "loud"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid log level: loud"));
}

// =============================================================================
// profile
// =============================================================================

#[test]
fn profile_json_shape() {
    let output = linkdeck()
        .args(["profile", "--format", "json", "--log-level", "error"])
        .output()
        .expect("run linkdeck");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    let tier = json["tier"].as_str().unwrap();
    assert!(["low", "medium", "high"].contains(&tier));
    assert!(json["benchmarkMs"].as_f64().unwrap() >= 0.0);
    assert!(json["policy"]["limitConcurrentAnimations"].as_u64().unwrap() >= 1);
    assert!(json["renderHints"]["variables"]["--blur-amount"].is_string());
}

#[test]
fn profile_mobile_user_agent_forces_reduced_motion() {
    let output = linkdeck()
        .args([
            "profile",
            "--format",
            "json",
            "--log-level",
            "error",
            "--user-agent",
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)",
        ])
        .output()
        .expect("run linkdeck");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(json["reducedMotion"], true);
    assert_eq!(json["policy"]["limitConcurrentAnimations"], 1);
    assert_eq!(json["policy"]["disableParallax"], true);
}

#[test]
fn profile_pretty_output() {
    linkdeck()
        .args(["profile", "--log-level", "error", "--network", "2g"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tier:"))
        .stdout(predicate::str::contains("Reduced motion:    true"));
}

#[test]
fn unknown_network_type_is_usage_error() {
    linkdeck()
        .args(["profile", "--network", "5g"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown network type"));
}

// =============================================================================
// monitor
// =============================================================================

#[test]
fn monitor_prints_json_report() {
    let output = linkdeck()
        .args(["monitor", "--seconds", "1", "--format", "json", "--log-level", "error"])
        .output()
        .expect("run linkdeck");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    for key in [
        "tier",
        "fps",
        "averageFPS",
        "fpsHistory",
        "activeAnimationCount",
        "longTasks",
        "reducedMotion",
        "policy",
    ] {
        assert!(json.get(key).is_some(), "missing {key}");
    }
    assert_eq!(json["activeAnimationCount"], 0);
}

#[test]
fn monitor_pretty_report() {
    linkdeck()
        .args(["monitor", "--seconds", "1", "--log-level", "error"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tier:"))
        .stdout(predicate::str::contains("Policy:"));
}
