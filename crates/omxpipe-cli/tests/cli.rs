// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Integration tests for the omxpipe CLI
//!
//! These tests verify CLI commands work correctly end-to-end using the
//! assert_cmd crate pattern. The loopback component is pure software, so
//! every test runs on any platform.

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use std::{env, fs, path::PathBuf, time::Duration};

/// Helper to create a Command for the omxpipe binary
/// Uses OMXPIPE_BIN environment variable if set, otherwise uses cargo run
fn omxpipe_cmd() -> Command {
    if let Ok(bin_path) = env::var("OMXPIPE_BIN") {
        Command::new(bin_path)
    } else {
        // Default: use cargo run (works in dev, CI build runners)
        let mut c = Command::new("cargo");
        c.args(["run", "--bin", "omxpipe", "--"]);
        c
    }
}

/// Get the test data directory (target/testdata/omxpipe-cli)
/// Creates it if it doesn't exist
fn get_test_data_dir() -> PathBuf {
    let test_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("target")
        .join("testdata")
        .join("omxpipe-cli");

    fs::create_dir_all(&test_dir).expect("Failed to create test data directory");
    test_dir
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

#[test]
fn test_cli_help() {
    omxpipe_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("OMX Pipeline CLI"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("cycle"))
        .stdout(predicate::str::contains("info"));
}

#[test]
fn test_cli_version() {
    omxpipe_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("omxpipe"));
}

#[test]
fn test_run_help() {
    omxpipe_cmd()
        .arg("run")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("drain"))
        .stdout(predicate::str::contains("--frames"))
        .stdout(predicate::str::contains("--buffers"))
        .stdout(predicate::str::contains("--pause-at"));
}

#[test]
fn test_cycle_help() {
    omxpipe_cmd()
        .arg("cycle")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("tear down"))
        .stdout(predicate::str::contains("--iterations"));
}

#[test]
fn test_info_help() {
    omxpipe_cmd()
        .arg("info")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Display"))
        .stdout(predicate::str::contains("port"));
}

// =============================================================================
// Info Command Tests
// =============================================================================

#[test]
fn test_info_basic() {
    omxpipe_cmd()
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("OMX Pipeline Information"))
        .stdout(predicate::str::contains("loopback.video"))
        .stdout(predicate::str::contains("output"));
}

#[test]
fn test_info_json_output() {
    omxpipe_cmd()
        .arg("info")
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"components\""))
        .stdout(predicate::str::contains("\"buffer_size\""));
}

#[test]
fn test_info_unknown_component() {
    omxpipe_cmd()
        .arg("info")
        .arg("--component")
        .arg("acme.encoder")
        .assert()
        .failure()
        .code(3); // ComponentNotFound
}

// =============================================================================
// Run Command Tests
// =============================================================================

#[test]
#[serial]
fn test_run_small_budget() {
    omxpipe_cmd()
        .arg("run")
        .arg("--frames")
        .arg("10")
        // Timeout is a safety net; process should exit after the budget
        .timeout(Duration::from_secs(30))
        .assert()
        .success()
        .stderr(predicate::str::contains("Drained 10 frames"));
}

#[test]
#[serial]
fn test_run_json_metrics() {
    omxpipe_cmd()
        .arg("run")
        .arg("--frames")
        .arg("5")
        .arg("--json")
        .timeout(Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"frames_processed\": 5"))
        .stdout(predicate::str::contains("\"budget_reached\": true"))
        .stdout(predicate::str::contains("\"bandwidth_mbps\""));
}

#[test]
#[serial]
fn test_run_writes_output_file() {
    let test_dir = get_test_data_dir();
    let output_file = test_dir.join("test_run.bin");

    // Clean up previous test run
    fs::remove_file(&output_file).ok();

    omxpipe_cmd()
        .arg("run")
        .arg("--frames")
        .arg("8")
        .arg("--output")
        .arg(&output_file)
        .timeout(Duration::from_secs(30))
        .assert()
        .success();

    assert!(output_file.exists(), "Output file should exist");
    assert!(
        output_file.metadata().unwrap().len() > 0,
        "Output file should not be empty"
    );

    fs::remove_file(&output_file).ok();
}

#[test]
#[serial]
fn test_run_with_pause() {
    omxpipe_cmd()
        .arg("run")
        .arg("--frames")
        .arg("20")
        .arg("--pause-at")
        .arg("5")
        // Paced completions keep frame 5 observable before the budget
        // drains, so the pause deterministically happens mid-stream
        .arg("--frame-interval-ms")
        .arg("20")
        .timeout(Duration::from_secs(30))
        .assert()
        .success()
        .stderr(predicate::str::contains("Pausing at frame 5"))
        .stderr(predicate::str::contains("Resuming"));
}

#[test]
fn test_run_unknown_component() {
    omxpipe_cmd()
        .arg("run")
        .arg("--component")
        .arg("acme.encoder")
        .arg("--frames")
        .arg("5")
        .timeout(Duration::from_secs(30))
        .assert()
        .failure()
        .code(3); // ComponentNotFound
}

#[test]
fn test_run_bad_resolution() {
    omxpipe_cmd()
        .arg("run")
        .arg("--resolution")
        .arg("widthxheight")
        .timeout(Duration::from_secs(30))
        .assert()
        .failure()
        .code(2); // InvalidArgs
}

// =============================================================================
// Cycle Command Tests
// =============================================================================

#[test]
#[serial]
fn test_cycle_default_iterations() {
    omxpipe_cmd()
        .arg("cycle")
        .timeout(Duration::from_secs(60))
        .assert()
        .success()
        .stderr(predicate::str::contains("Pass 3/3"));
}

#[test]
#[serial]
fn test_cycle_json_summary() {
    omxpipe_cmd()
        .arg("cycle")
        .arg("--iterations")
        .arg("2")
        .arg("--json")
        .timeout(Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"iterations\": 2"))
        .stdout(predicate::str::contains("\"buffers_per_pass\": 8"));
}
