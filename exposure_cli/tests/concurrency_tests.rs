//! Concurrency tests for uvdose.
//!
//! These tests verify that multiple processes can safely:
//! - Rewrite the session record simultaneously (locking + atomic rename)
//! - Append to the journal one after another
//! - Leave a watched session alone while `watch` owns it

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::Stdio;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn cli(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("uvdose"));
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env_remove("RUST_LOG")
        .arg("--data-dir")
        .arg(home.join("uvdose"));
    cmd
}

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

#[test]
fn test_repeated_sessions_are_all_journaled() {
    let temp_dir = setup_test_dir();
    let home = temp_dir.path();

    for i in 0..5 {
        thread::sleep(Duration::from_millis(i * 5));
        cli(home)
            .args(["start", "--skin-class", "3", "--uv", "6"])
            .assert()
            .success();
        cli(home).arg("stop").assert().success();
    }

    let journal = std::fs::read_to_string(home.join("uvdose/journal.jsonl"))
        .expect("Failed to read journal");
    let count = journal.lines().count();
    assert_eq!(count, 5, "Expected 5 journal entries, got {}", count);
}

#[test]
fn test_concurrent_uv_updates_leave_valid_record() {
    let temp_dir = setup_test_dir();
    let home = temp_dir.path().to_path_buf();

    cli(&home)
        .args(["start", "--skin-class", "3", "--uv", "6"])
        .assert()
        .success();

    let handles: Vec<_> = (1..=4)
        .map(|uv| {
            let home = home.clone();
            thread::spawn(move || {
                cli(&home)
                    .args(["uv", &uv.to_string()])
                    .assert()
                    .success();
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("uv update thread panicked");
    }

    let contents = std::fs::read_to_string(home.join("uvdose/session/active.json"))
        .expect("Session record missing");
    let record: serde_json::Value =
        serde_json::from_str(&contents).expect("Session record is not valid JSON");
    let uv = record["current_uv_index"].as_f64().unwrap();
    assert!((1.0..=4.0).contains(&uv), "unexpected UV Index {}", uv);

    // No temp files left behind next to the record
    let entries: Vec<_> = std::fs::read_dir(home.join("uvdose/session"))
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn test_concurrent_status_reads() {
    let temp_dir = setup_test_dir();
    let home = temp_dir.path().to_path_buf();

    cli(&home)
        .args(["start", "--skin-class", "2", "--uv", "3"])
        .assert()
        .success();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let home = home.clone();
            thread::spawn(move || {
                cli(&home).args(["status", "--json"]).assert().success();
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("status thread panicked");
    }
}

#[test]
fn test_watch_owns_session_until_it_finishes() {
    let temp_dir = setup_test_dir();
    let home = temp_dir.path();

    // Class 1 at UV 100: six seconds to burn
    cli(home)
        .args(["start", "--skin-class", "1", "--uv", "100", "--spf", "1"])
        .assert()
        .success();

    let mut watch = std::process::Command::new(assert_cmd::cargo::cargo_bin!("uvdose"))
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env_remove("RUST_LOG")
        .arg("--data-dir")
        .arg(home.join("uvdose"))
        .arg("watch")
        .stdout(Stdio::piped())
        .spawn()
        .expect("Failed to spawn watch");

    // The first status line is printed only once watch holds the session
    let stdout = watch.stdout.take().expect("watch stdout");
    let mut reader = BufReader::new(stdout);
    let mut first_line = String::new();
    reader.read_line(&mut first_line).unwrap();
    assert!(first_line.contains("Session running"), "got {:?}", first_line);

    cli(home)
        .arg("stop")
        .assert()
        .failure()
        .stderr(predicate::str::contains("another uvdose process"));

    let mut rest = String::new();
    for line in reader.lines() {
        rest.push_str(&line.unwrap());
        rest.push('\n');
    }
    let status = watch.wait().expect("watch did not exit");
    assert!(status.success());
    assert!(rest.contains("burn threshold has been reached"));

    let journal = std::fs::read_to_string(home.join("uvdose/journal.jsonl"))
        .expect("Failed to read journal");
    let entries: Vec<serde_json::Value> = journal
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["end_reason"], "threshold_reached");
    assert_eq!(entries[0]["duration_seconds"], 6);

    // Once watch has exited the session can be driven again
    cli(home)
        .arg("stop")
        .assert()
        .success()
        .stdout(predicate::str::contains("No active session."));
}
