//! Corruption recovery tests for lendctl.
//!
//! These tests verify the system:
//! - refuses to start from corrupted or truncated snapshots
//! - loads snapshots written by older versions
//! - starts empty when no snapshot exists

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("library.json")
}

fn cli(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("lendctl").expect("Failed to find lendctl binary");
    cmd.env("XDG_CONFIG_HOME", dir.path().join("config"))
        .env_remove("LENDING_DB_PATH")
        .arg("--db-path")
        .arg(db_path(dir));
    cmd
}

#[test]
fn test_corrupted_snapshot_fails_fast() {
    let temp_dir = setup_test_dir();
    fs::write(db_path(&temp_dir), "{ invalid json }}}}").unwrap();

    cli(&temp_dir)
        .args(["books", "list"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Corrupt snapshot"));

    // A write must not replace the damaged file with an empty library
    cli(&temp_dir)
        .args(["books", "add", "--title", "A", "--author", "B"])
        .assert()
        .code(1);
    let contents = fs::read_to_string(db_path(&temp_dir)).unwrap();
    assert_eq!(contents, "{ invalid json }}}}");
}

#[test]
fn test_truncated_snapshot_fails_fast() {
    let temp_dir = setup_test_dir();
    fs::write(
        db_path(&temp_dir),
        r#"{"format_version":1,"books":[{"id":1,"title":"A","auth"#,
    )
    .unwrap();

    cli(&temp_dir).args(["health"]).assert().code(1);
}

#[test]
fn test_inconsistent_counters_fail_fast() {
    let temp_dir = setup_test_dir();
    fs::write(
        db_path(&temp_dir),
        r#"{"format_version":1,"books":[{"id":1,"title":"A","author":"B",
            "copies_total":1,"copies_available":3,
            "created_at":"2024-01-01T00:00:00Z"}],"loans":[]}"#,
    )
    .unwrap();

    cli(&temp_dir)
        .args(["books", "list"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("3 of 1 copies available"));
}

#[test]
fn test_legacy_snapshot_is_upgraded_in_place() {
    let temp_dir = setup_test_dir();
    fs::write(
        db_path(&temp_dir),
        r#"{"books":[{"id":4,"title":"Persuasion","author":"Jane Austen",
            "copies_total":2,"copies_available":1,
            "created_at":"2024-01-01T00:00:00Z"}],
           "loans":[{"id":9,"book_id":4,"borrower_name":"Anne",
            "loaned_at":"2024-01-02T00:00:00Z"}]}"#,
    )
    .unwrap();

    // Missing status defaults to borrowed
    cli(&temp_dir)
        .args(["loans", "return", "9"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\":\"returned\""));

    let output = cli(&temp_dir)
        .args(["books", "add", "--title", "Emma", "--author", "Jane Austen"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let book: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(book["id"], 5);

    let contents = fs::read_to_string(db_path(&temp_dir)).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&contents).unwrap();
    assert_eq!(doc["format_version"], 1);
    assert_eq!(doc["next_loan_id"], 10);
    assert_eq!(doc["books"].as_array().unwrap().len(), 2);
}

#[test]
fn test_stray_temp_files_are_ignored() {
    let temp_dir = setup_test_dir();
    // Left behind by a crash between temp write and rename
    fs::write(temp_dir.path().join(".tmpAbC123"), "{ partial").unwrap();

    cli(&temp_dir)
        .args(["books", "add", "--title", "A", "--author", "B"])
        .assert()
        .success();
    cli(&temp_dir)
        .args(["books", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"title\":\"A\""));
}
