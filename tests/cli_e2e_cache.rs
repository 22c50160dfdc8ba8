//! End-to-end tests for the `texgit cache` command.
//!
//! These tests invoke the actual CLI binary and validate cache command
//! behavior from a user's perspective.

mod common;

use common::prelude::*;

/// Creates a cache with one output entry by running `texgit run`.
fn populated_cache(temp: &TempDir) -> std::path::PathBuf {
    temp.child("paper.aux")
        .write_str("\\@texgit@process{greeting}{}{}{echo hello}\n")
        .unwrap();
    cargo_bin_cmd!("texgit")
        .current_dir(temp.path())
        .args(["run", "paper.aux", "--repo-dir", "cache"])
        .assert()
        .success();
    temp.path().join("cache")
}

/// Test that cache --help flag shows help information
#[test]
fn test_cache_help() {
    cargo_bin_cmd!("texgit")
        .args(["cache", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Inspect or remove a texgit cache directory"));
}

/// Test that cache list with nonexistent cache directory shows appropriate message
#[test]
fn test_cache_list_nonexistent() {
    let temp = TempDir::new().unwrap();
    let cache_dir = temp.child("nonexistent-cache");

    cargo_bin_cmd!("texgit")
        .arg("cache")
        .arg("--repo-dir")
        .arg(cache_dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cache directory does not exist"));
    cache_dir.assert(predicate::path::missing());
}

/// Test that cache list --json prints an empty array for a missing cache
#[test]
fn test_cache_list_json_empty() {
    let temp = TempDir::new().unwrap();

    cargo_bin_cmd!("texgit")
        .arg("cache")
        .arg("list")
        .arg("--json")
        .arg("--repo-dir")
        .arg(temp.child("missing").path())
        .assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));
}

/// Test that cache list shows the entries of a populated cache
#[test]
fn test_cache_list_populated() {
    let temp = TempDir::new().unwrap();
    let cache_dir = populated_cache(&temp);
    let index = std::fs::read_to_string(cache_dir.join(".cache.json")).unwrap();

    cargo_bin_cmd!("texgit")
        .arg("cache")
        .arg("--repo-dir")
        .arg(&cache_dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("output"))
        .stdout(predicate::str::contains("greeting"))
        .stdout(predicate::str::contains("Total: 1 entries (6 B)"));

    // listing only reads the index
    temp.child("cache/.cache.json").assert(index.as_str());
}

/// Test that cache list --json output is machine readable
#[test]
fn test_cache_list_json() {
    let temp = TempDir::new().unwrap();
    let cache_dir = populated_cache(&temp);

    let output = cargo_bin_cmd!("texgit")
        .arg("cache")
        .arg("--repo-dir")
        .arg(&cache_dir)
        .args(["list", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["realm"], "output");
    assert_eq!(entries[0]["name"], "greeting");
    assert_eq!(entries[0]["size"], 6);
    assert_eq!(entries[0]["file_count"], 1);
}

/// Test that cache clean --dry-run keeps everything
#[test]
fn test_cache_clean_dry_run() {
    let temp = TempDir::new().unwrap();
    let cache_dir = populated_cache(&temp);

    cargo_bin_cmd!("texgit")
        .arg("cache")
        .arg("--repo-dir")
        .arg(&cache_dir)
        .args(["clean", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run mode"));
    temp.child("cache/realms/output/greeting")
        .assert(predicate::path::exists());
}

/// Test that answering no to the prompt cancels the clean
#[test]
fn test_cache_clean_cancelled() {
    let temp = TempDir::new().unwrap();
    let cache_dir = populated_cache(&temp);

    cargo_bin_cmd!("texgit")
        .arg("cache")
        .arg("--repo-dir")
        .arg(&cache_dir)
        .arg("clean")
        .write_stdin("n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Clean cancelled."));
    temp.child("cache").assert(predicate::path::is_dir());
}

/// Test that cache clean --yes removes the cache directory
#[test]
fn test_cache_clean_yes() {
    let temp = TempDir::new().unwrap();
    let cache_dir = populated_cache(&temp);

    cargo_bin_cmd!("texgit")
        .arg("cache")
        .arg("--repo-dir")
        .arg(&cache_dir)
        .args(["clean", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted"));
    temp.child("cache").assert(predicate::path::missing());
}

/// Test that cache clean refuses to delete unrelated directories
#[test]
fn test_cache_clean_refuses_foreign_directory() {
    let temp = TempDir::new().unwrap();
    let foreign = temp.child("documents");
    foreign.child("thesis.tex").write_str("x").unwrap();

    cargo_bin_cmd!("texgit")
        .arg("cache")
        .arg("--repo-dir")
        .arg(foreign.path())
        .args(["clean", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not look like a texgit cache directory"));
    foreign.child("thesis.tex").assert("x");
}
