//! Smoke tests -- verify the binary runs and the subcommands are wired up.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn pulsewatch() -> Command {
    let mut cmd = Command::cargo_bin("pulsewatch").unwrap();
    cmd.env_remove("PULSEWATCH_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    pulsewatch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Streaming anomaly detection"));
}

#[test]
fn test_cli_version() {
    pulsewatch()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pulsewatch"));
}

#[test]
fn test_serve_subcommand_exists() {
    pulsewatch().args(["serve", "--help"]).assert().success();
}

#[test]
fn test_config_prints_defaults() {
    pulsewatch()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[detector.thresholds]"))
        .stdout(predicate::str::contains("resolve_after = 3"));
}

#[test]
fn test_config_rejects_missing_explicit_file() {
    pulsewatch()
        .args(["--config", "/nonexistent/pulsewatch.toml", "config"])
        .assert()
        .failure();
}

fn sample(value: f64, secs: i64) -> String {
    format!(
        r#"{{"source_key":"svc-a","metric_name":"cpu","value":{},"timestamp":"2024-01-01T00:00:{:02}Z"}}"#,
        value, secs
    )
}

#[test]
fn test_replay_reports_alert() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for i in 0..10 {
        let v = if i % 2 == 0 { 9.0 } else { 11.0 };
        writeln!(file, "{}", sample(v, i)).unwrap();
    }
    writeln!(file, "{}", sample(15.0, 10)).unwrap();
    file.flush().unwrap();

    let output = pulsewatch()
        .args(["replay", "--json", "--input"])
        .arg(file.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["samples"], 11);
    assert_eq!(report["anomalies"], 1);
    assert_eq!(report["alerts"][0]["severity"], "critical");
    assert_eq!(report["alerts"][0]["state"], "open");
}

#[test]
fn test_replay_rejects_malformed_input() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{{ not json").unwrap();
    file.flush().unwrap();

    pulsewatch()
        .args(["replay", "--input"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 1"));
}
