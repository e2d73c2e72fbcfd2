//! Integration tests for the `hueflux` CLI binary.
//!
//! These tests validate argument parsing, help output, shell completions,
//! configuration handling and error exit codes, all without a bridge.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────────

const KEY: &str = "0123456789abcdef0123456789abcdef";

/// Build a [`Command`] for the `hueflux` binary with env isolation.
///
/// Points every config and data directory into `home` and clears the
/// `HUEFLUX_*` variables so tests never touch the user's real setup.
fn hueflux_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("hueflux");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("NO_COLOR", "1")
        .env_remove("DBUS_SESSION_BUS_ADDRESS")
        .env_remove("RUST_LOG")
        .env_remove("HUEFLUX_PROFILE")
        .env_remove("HUEFLUX_OUTPUT")
        .env_remove("HUEFLUX_ENCRYPTION_KEY");
    cmd
}

/// Same as [`hueflux_cmd`] with a store key in the environment.
fn keyed_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = hueflux_cmd(home);
    cmd.env("HUEFLUX_ENCRYPTION_KEY", KEY);
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn init_profile(home: &Path) {
    hueflux_cmd(home)
        .args(["config", "init", "--key-storage", "config"])
        .assert()
        .success();
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = TempDir::new().unwrap();
    let output = hueflux_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    let home = TempDir::new().unwrap();
    hueflux_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("entertainment")
            .and(predicate::str::contains("connect"))
            .and(predicate::str::contains("select-group"))
            .and(predicate::str::contains("play")),
    );
}

#[test]
fn test_version_flag() {
    let home = TempDir::new().unwrap();
    hueflux_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hueflux"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    let home = TempDir::new().unwrap();
    hueflux_cmd(home.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    let home = TempDir::new().unwrap();
    hueflux_cmd(home.path())
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Argument errors ─────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let home = TempDir::new().unwrap();
    let output = hueflux_cmd(home.path()).arg("foobar").output().unwrap();
    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(
        text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

#[test]
fn test_play_rejects_malformed_color() {
    let home = TempDir::new().unwrap();
    hueflux_cmd(home.path())
        .args(["play", "--color", "1,0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("three components"));
}

#[test]
fn test_connect_ip_conflicts_with_new() {
    let home = TempDir::new().unwrap();
    hueflux_cmd(home.path())
        .args(["connect", "--ip", "192.168.1.2", "--new"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot be used with"));
}

// ── Configuration errors ────────────────────────────────────────────

#[test]
fn test_unknown_profile() {
    let home = TempDir::new().unwrap();
    keyed_cmd(home.path())
        .args(["--profile", "nope", "status"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn test_missing_encryption_key() {
    let home = TempDir::new().unwrap();
    hueflux_cmd(home.path())
        .arg("status")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("encryption key"));
}

// ── Status without a bridge ─────────────────────────────────────────

#[test]
fn test_status_with_empty_store() {
    let home = TempDir::new().unwrap();
    keyed_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("no bridge"));
}

#[test]
fn test_status_json() {
    let home = TempDir::new().unwrap();
    let output = keyed_cmd(home.path())
        .args(["--output", "json", "status"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["profile"], "default");
    assert_eq!(json["status"], "no bridge");
    assert_eq!(json["authorized"], false);
    assert!(json.get("client_key").is_none());
}

#[test]
fn test_groups_without_bridge() {
    let home = TempDir::new().unwrap();
    keyed_cmd(home.path())
        .arg("groups")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("No bridge stored"));
}

// ── Reset ───────────────────────────────────────────────────────────

#[test]
fn test_reset_requires_confirmation() {
    let home = TempDir::new().unwrap();
    keyed_cmd(home.path())
        .arg("reset")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn test_reset_with_yes_on_empty_store() {
    let home = TempDir::new().unwrap();
    keyed_cmd(home.path())
        .args(["--yes", "reset"])
        .assert()
        .success();
}

// ── Config subcommands ──────────────────────────────────────────────

#[test]
fn test_config_init_then_show_redacts_key() {
    let home = TempDir::new().unwrap();
    init_profile(home.path());

    let output = hueflux_cmd(home.path())
        .args(["config", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("********"), "key should be redacted:\n{text}");
    assert!(text.contains("default_profile"));
}

#[test]
fn test_config_init_refuses_to_overwrite() {
    let home = TempDir::new().unwrap();
    init_profile(home.path());

    hueflux_cmd(home.path())
        .args(["config", "init", "--key-storage", "config"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("already exists"));

    hueflux_cmd(home.path())
        .args(["config", "init", "--key-storage", "config", "--force"])
        .assert()
        .success();
}

#[test]
fn test_initialized_profile_resolves_key_from_config() {
    let home = TempDir::new().unwrap();
    init_profile(home.path());

    hueflux_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("no bridge"));
}

#[test]
fn test_config_path_stays_in_home() {
    let home = TempDir::new().unwrap();
    let output = hueflux_cmd(home.path())
        .args(["--output", "json", "config", "path"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let config = json["config"].as_str().unwrap();
    let store = json["store"].as_str().unwrap();
    assert!(config.ends_with("config.toml"), "{config}");
    assert!(store.ends_with("bridge.json"), "{store}");
    let home = home.path().to_str().unwrap();
    assert!(config.starts_with(home) && store.starts_with(home));
}

#[test]
fn test_config_subcommands_exist() {
    let home = TempDir::new().unwrap();
    hueflux_cmd(home.path())
        .args(["config", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("init")
                .and(predicate::str::contains("show"))
                .and(predicate::str::contains("set-key"))
                .and(predicate::str::contains("path")),
        );
}
