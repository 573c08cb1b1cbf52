//! Command-line tests for the sc binary, run against local snapshots

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Config pointing the cache at `temp/cache`, with one seeded snapshot
fn setup() -> (TempDir, std::path::PathBuf) {
    let temp = TempDir::new().unwrap();
    let cache_dir = temp.path().join("cache");
    fs::create_dir_all(&cache_dir).unwrap();
    fs::write(
        cache_dir.join("abc_Sheet1.jsonl"),
        "[\"name\",\"price\"]\n[\"widget\",\"9.99\"]\n",
    )
    .unwrap();

    let config = temp.path().join("sheetcache.yml");
    fs::write(&config, format!("cache-dir: {}\n", cache_dir.display())).unwrap();
    (temp, config)
}

fn sc(temp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sc").unwrap();
    cmd.current_dir(temp.path()).env("HOME", temp.path()).env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_offline_get_and_range() {
    let (temp, config) = setup();

    sc(&temp)
        .arg("-c")
        .arg(&config)
        .args(["-t", "abc", "--offline", "get", "B2"])
        .assert()
        .success()
        .stdout("9.99\n");

    sc(&temp)
        .arg("-c")
        .arg(&config)
        .args(["-t", "abc", "--offline", "range", "A:A"])
        .assert()
        .success()
        .stdout("name\nwidget\n");
}

#[test]
fn test_offline_set_persists_to_snapshot() {
    let (temp, config) = setup();

    sc(&temp)
        .arg("-c")
        .arg(&config)
        .args(["-t", "abc", "--offline", "set", "C3", "new"])
        .assert()
        .success()
        .stdout(predicate::str::contains("C3"));

    sc(&temp)
        .arg("-c")
        .arg(&config)
        .args(["-t", "abc", "--offline", "keys"])
        .assert()
        .success()
        .stdout(predicate::str::contains("C3 new"))
        .stdout(predicate::str::contains("B2 9.99"));
}

#[test]
fn test_offline_without_snapshot_fails() {
    let (temp, config) = setup();

    sc(&temp)
        .arg("-c")
        .arg(&config)
        .args(["-t", "missing", "--offline", "get", "A1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No local snapshot"));
}
