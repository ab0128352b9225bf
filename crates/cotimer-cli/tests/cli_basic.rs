//! Basic CLI E2E tests.
//!
//! Tests invoke the `cotimer` binary against a temporary data directory and
//! verify outputs.

use std::path::Path;
use std::process::Command;

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(data_dir: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_cotimer"))
        .env("COTIMER_DATA_DIR", data_dir)
        .env_remove("COTIMER_USER")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn run_json(data_dir: &Path, args: &[&str]) -> serde_json::Value {
    let (stdout, stderr, code) = run_cli(data_dir, args);
    assert_eq!(code, 0, "command {args:?} failed: {stderr}");
    serde_json::from_str(&stdout).expect("Failed to parse JSON output")
}

fn create_timer(data_dir: &Path, owner: &str) -> String {
    let session = run_json(data_dir, &["--user", owner, "timer", "create", "Team Focus"]);
    session["timer_id"].as_str().unwrap().to_string()
}

#[test]
fn test_timer_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let id = create_timer(dir.path(), "1");

    let state = run_json(dir.path(), &["--user", "1", "timer", "status", &id]);
    assert_eq!(state["type"], "inactive");

    let state = run_json(dir.path(), &["--user", "1", "timer", "start", &id]);
    assert_eq!(state["type"], "running");
    assert!(state["ends_at"].is_string());

    let state = run_json(dir.path(), &["--user", "1", "timer", "pause", &id]);
    assert_eq!(state["type"], "pause");
    let session = run_json(dir.path(), &["timer", "session", &id]);
    assert_eq!(session["paused"]["phase"], "running");

    let state = run_json(dir.path(), &["--user", "1", "timer", "resume", &id]);
    assert_eq!(state["type"], "running");

    let state = run_json(dir.path(), &["--user", "1", "timer", "stop", &id]);
    assert_eq!(state["type"], "inactive");

    let (stdout, _, code) = run_cli(dir.path(), &["--user", "1", "timer", "delete", &id]);
    assert_eq!(code, 0);
    assert!(stdout.contains("timer_deleted"));
}

#[test]
fn test_non_owner_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let id = create_timer(dir.path(), "1");

    let (_, stderr, code) = run_cli(dir.path(), &["--user", "2", "timer", "start", &id]);
    assert_eq!(code, 1);
    assert!(stderr.contains("not_authorized"), "stderr: {stderr}");
}

#[test]
fn test_unknown_timer_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(
        dir.path(),
        &["--user", "1", "timer", "start", "00000000-0000-0000-0000-000000000000"],
    );
    assert_eq!(code, 1);
    assert!(stderr.contains("timer_not_found"), "stderr: {stderr}");
}

#[test]
fn test_missing_user_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(dir.path(), &["timer", "create", "nobody"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("--user"));
}

#[test]
fn test_members_and_everyone_can_pause() {
    let dir = tempfile::tempdir().unwrap();
    let id = create_timer(dir.path(), "1");

    let added = run_json(dir.path(), &["--user", "1", "member", "add", &id, "2"]);
    assert_eq!(added["added"], true);
    let members = run_json(dir.path(), &["--user", "2", "member", "list", &id]);
    assert_eq!(members.as_array().unwrap().len(), 2);

    let state = run_json(
        dir.path(),
        &["--user", "1", "timer", "settings", &id, "--everyone-can-pause", "true"],
    );
    assert_eq!(state["type"], "inactive");
    let settings = run_json(dir.path(), &["--user", "1", "timer", "settings", &id]);
    assert_eq!(settings["is_everyone_can_pause"], true);

    let state = run_json(dir.path(), &["--user", "2", "timer", "start", &id]);
    assert_eq!(state["type"], "running");
    let state = run_json(dir.path(), &["--user", "2", "member", "heartbeat", &id]);
    assert_eq!(state["type"], "running");

    let (_, stderr, code) = run_cli(dir.path(), &["--user", "2", "timer", "stop", &id]);
    assert_eq!(code, 1);
    assert!(stderr.contains("not_authorized"));

    let (_, _, code) = run_cli(dir.path(), &["--user", "2", "member", "leave", &id]);
    assert_eq!(code, 0);
    let members = run_json(dir.path(), &["--user", "1", "member", "list", &id]);
    assert_eq!(members.as_array().unwrap().len(), 1);
}

#[test]
fn test_create_uses_config_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(dir.path(), &["config", "set", "defaults.work_minutes", "50"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("ok"));

    let (stdout, _, code) = run_cli(dir.path(), &["config", "get", "defaults.work_minutes"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "50");

    let session = run_json(dir.path(), &["--user", "1", "timer", "create", "Long", "--rest", "10"]);
    assert_eq!(session["settings"]["work_time_ms"], 50 * 60_000);
    assert_eq!(session["settings"]["rest_time_ms"], 10 * 60_000);
}

#[test]
fn test_config_rejects_unknown_and_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, code) = run_cli(dir.path(), &["config", "set", "engine.bogus", "1"]);
    assert_eq!(code, 1);
    let (_, _, code) = run_cli(dir.path(), &["config", "set", "engine.activity_window_secs", "0"]);
    assert_eq!(code, 1);
    let (_, _, code) = run_cli(dir.path(), &["config", "get", "engine.bogus"]);
    assert_eq!(code, 1);

    let config = run_json(dir.path(), &["config", "list"]);
    assert_eq!(config["engine"]["activity_window_secs"], 300);
}

#[test]
fn test_invalid_create_settings_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(
        dir.path(),
        &["--user", "1", "timer", "create", "Bad", "--big-rest-per", "0"],
    );
    assert_eq!(code, 1);
    assert!(stderr.contains("invalid_settings"), "stderr: {stderr}");
}

#[test]
fn test_watch_runs_bounded_sweeps() {
    let dir = tempfile::tempdir().unwrap();
    let id = create_timer(dir.path(), "1");
    run_json(dir.path(), &["--user", "1", "timer", "start", &id]);

    let (_, stderr, code) = run_cli(dir.path(), &["watch", "--ticks", "1"]);
    assert_eq!(code, 0, "watch failed: {stderr}");
}
