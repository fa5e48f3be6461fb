//! Integration tests for basic CLI behavior.
//!
//! These cover argument parsing and fail-fast paths only; nothing here
//! touches the network or the media toolchain.

#![allow(deprecated)] // cargo_bin deprecation — replacement not yet stable

use assert_cmd::Command;
use predicates::prelude::*;

/// Helper: get a Command for the `adsplice` binary with a throwaway
/// environment so config loading never fails on a developer machine.
fn adsplice() -> Command {
    let mut cmd = Command::cargo_bin("adsplice").expect("binary 'adsplice' should be built");
    cmd.env("OPENAI_API_KEY", "test-key");
    cmd.env("ADSPLICE_CACHE_DIR", std::env::temp_dir().join("adsplice-cli-tests"));
    cmd
}

// ─── Top-level flags ─────────────────────────────────────────────────────────

#[test]
fn help_flag_shows_usage() {
    adsplice()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: adsplice"))
        .stdout(predicate::str::contains("<INPUT>"))
        .stdout(predicate::str::contains("--batch"))
        .stdout(predicate::str::contains("--device"))
        .stdout(predicate::str::contains("--output"));
}

#[test]
fn version_flag_shows_semver() {
    adsplice()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^adsplice \d+\.\d+\.\d+\n$").unwrap());
}

#[test]
fn no_args_shows_error_and_usage() {
    adsplice()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage: adsplice"));
}

// ─── Argument validation ─────────────────────────────────────────────────────

#[test]
fn invalid_device_fails() {
    adsplice()
        .args(["--device", "tpu", "video.mp4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn missing_input_file_exits_with_one() {
    adsplice()
        .args(["--device", "cpu", "/nonexistent/video.mp4"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("input video not found"));
}

#[test]
fn batch_on_file_path_fails() {
    adsplice()
        .args(["--batch", "--device", "cpu", "/nonexistent/video.mp4"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("requires a directory"));
}

// ─── Configuration fail-fast ─────────────────────────────────────────────────

#[test]
fn missing_api_key_fails_before_any_work() {
    let mut cmd = Command::cargo_bin("adsplice").expect("binary 'adsplice' should be built");
    cmd.env_remove("OPENAI_API_KEY");
    cmd.args(["--device", "cpu", "/nonexistent/video.mp4"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("OPENAI_API_KEY"));
}
