//! E2E CLI tests covering:
//! - `tally simulate` feed output and `--analyze`
//! - `tally analyze` on a JSONL file, conversation filter and bad input
//! - `tally config` defaults, file values and env overrides
//!
//! Each test runs the `tally` binary as a subprocess in an isolated temp
//! directory.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

fn tally_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tally"));
    cmd.current_dir(dir);
    cmd.env("TALLY_LOG", "error");
    for key in [
        "TALLY_FORMAT",
        "TALLY_WORKERS",
        "TALLY_DEBOUNCE_MS",
        "TALLY_MIN_NEW_VOTES",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

/// Write the default simulated feed to `dir/feed.jsonl`.
fn write_feed(dir: &Path) -> std::path::PathBuf {
    let output = tally_cmd(dir).arg("simulate").output().unwrap();
    assert!(output.status.success());
    let path = dir.join("feed.jsonl");
    fs::write(&path, &output.stdout).unwrap();
    path
}

// ---------------------------------------------------------------------------
// simulate
// ---------------------------------------------------------------------------

#[test]
fn simulate_prints_one_event_per_vote() {
    let dir = TempDir::new().unwrap();
    let output = tally_cmd(dir.path()).arg("simulate").output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 20 * 15);

    let first: Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["type"], "vote");
    assert_eq!(first["conversation"], "sim");
    assert_eq!(first["timestamp"], 1_700_000_000_u64);
}

#[test]
fn simulate_is_deterministic_per_seed() {
    let dir = TempDir::new().unwrap();
    let run = |seed: &str| {
        tally_cmd(dir.path())
            .args(["simulate", "--noise", "20", "--shuffle", "--seed", seed])
            .output()
            .unwrap()
            .stdout
    };
    assert_eq!(run("7"), run("7"));
    assert_ne!(run("7"), run("8"));
}

#[test]
fn simulate_analyze_finds_two_groups() {
    let dir = TempDir::new().unwrap();
    let output = tally_cmd(dir.path())
        .args(["simulate", "--analyze", "--json"])
        .output()
        .unwrap();
    let json = stdout_json(&output);
    let reports = json.as_array().unwrap();
    assert_eq!(reports.len(), 1);
    let state = &reports[0]["state"];
    assert_eq!(state["revision"], 1);
    assert_eq!(state["status"]["status"], "ok");
    assert_eq!(state["clusters"]["groups"].as_array().unwrap().len(), 2);
}

#[test]
fn simulate_rejects_more_blocs_than_participants() {
    let dir = TempDir::new().unwrap();
    tally_cmd(dir.path())
        .args(["simulate", "--participants", "2", "--blocs", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("participants"));
}

// ---------------------------------------------------------------------------
// analyze
// ---------------------------------------------------------------------------

#[test]
fn analyze_pretty_lists_groups() {
    let dir = TempDir::new().unwrap();
    let feed = write_feed(dir.path());
    tally_cmd(dir.path())
        .arg("analyze")
        .arg(&feed)
        .assert()
        .success()
        .stdout(predicate::str::contains("Conversation sim"))
        .stdout(predicate::str::contains("Group g0 (10 members)"))
        .stdout(predicate::str::contains("Group g1 (10 members)"));
}

#[test]
fn analyze_text_mode_is_line_oriented() {
    let dir = TempDir::new().unwrap();
    let feed = write_feed(dir.path());
    tally_cmd(dir.path())
        .args(["analyze", "--format", "text"])
        .arg(&feed)
        .assert()
        .success()
        .stdout(predicate::str::contains("sim revision=1 status=ok participants=20 groups=2"));
}

#[test]
fn analyze_filters_by_conversation() {
    let dir = TempDir::new().unwrap();
    let feed = dir.path().join("mixed.jsonl");
    let mut text = String::from("# two conversations\n");
    for p in 1..=3 {
        for s in 1..=3 {
            text.push_str(&format!(
                "{{\"type\":\"vote\",\"conversation\":\"a\",\"participant\":{p},\"statement\":{s},\"value\":\"agree\",\"timestamp\":{}}}\n",
                p * 10 + s
            ));
        }
    }
    text.push_str(
        "{\"type\":\"vote\",\"conversation\":\"b\",\"participant\":1,\"statement\":1,\"value\":\"pass\",\"timestamp\":1}\n",
    );
    fs::write(&feed, text).unwrap();

    let output = tally_cmd(dir.path())
        .args(["analyze", "--json", "--conversation", "b"])
        .arg(&feed)
        .output()
        .unwrap();
    let json = stdout_json(&output);
    let reports = json.as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["conversation"], "b");
    assert_eq!(reports[0]["error"]["code"], "E3001");
    assert!(reports[0].get("state").is_none());

    let output = tally_cmd(dir.path())
        .args(["analyze", "--json"])
        .arg(&feed)
        .output()
        .unwrap();
    let json = stdout_json(&output);
    assert_eq!(json.as_array().unwrap().len(), 2);
    assert_eq!(json[0]["state"]["revision"], 1);
}

#[test]
fn analyze_unknown_conversation_fails() {
    let dir = TempDir::new().unwrap();
    let feed = write_feed(dir.path());
    tally_cmd(dir.path())
        .args(["analyze", "--conversation", "nope"])
        .arg(&feed)
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn analyze_malformed_line_names_the_line() {
    let dir = TempDir::new().unwrap();
    let feed = dir.path().join("bad.jsonl");
    fs::write(
        &feed,
        "{\"type\":\"moderation\",\"conversation\":\"c1\",\"statement\":3,\"state\":\"rejected\"}\n{\"type\":\"vote\"\n",
    )
    .unwrap();
    tally_cmd(dir.path())
        .arg("analyze")
        .arg(&feed)
        .assert()
        .failure()
        .stderr(predicate::str::contains("bad.jsonl:2"));
}

#[test]
fn analyze_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    tally_cmd(dir.path())
        .args(["analyze", "missing.jsonl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.jsonl"));
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

#[test]
fn config_prints_defaults_as_toml() {
    let dir = TempDir::new().unwrap();
    tally_cmd(dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[clustering]"))
        .stdout(predicate::str::contains("max_k = 5"));
}

#[test]
fn config_reads_file_and_env_overrides() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("tally.toml"),
        "[clustering]\nmax_k = 3\n\n[scheduler]\nworkers = 2\n",
    )
    .unwrap();

    let output = tally_cmd(dir.path())
        .args(["config", "--json"])
        .env("TALLY_DEBOUNCE_MS", "250")
        .output()
        .unwrap();
    let json = stdout_json(&output);
    assert_eq!(json["clustering"]["max_k"], 3);
    assert_eq!(json["scheduler"]["workers"], 2);
    assert_eq!(json["scheduler"]["debounce_ms"], 250);
    assert_eq!(json["repness"]["top_n"], 5);
}

#[test]
fn invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.toml");
    fs::write(&path, "[clustering]\nmax_k = 1\n").unwrap();
    tally_cmd(dir.path())
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("custom.toml"));
}
