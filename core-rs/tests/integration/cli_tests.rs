//! originstored CLI Integration Tests
//!
//! Runs the built binary end to end: serve mode over stdin/stdout, the
//! one-shot request subcommands and show-config.
//!
//! Uses tempfile for isolation - NO /tmp pollution

use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

const ORIGINSTORED: &str = env!("CARGO_BIN_EXE_originstored");

fn originstored(storage: &Path) -> Command {
    let mut command = Command::new(ORIGINSTORED);
    command.arg("--storage-dir").arg(storage).env("RUST_LOG", "warn");
    command
}

fn run(storage: &Path, args: &[&str]) -> Output {
    let output = originstored(storage).args(args).output().expect("Failed to run originstored");
    if !output.status.success() {
        eprintln!("STDOUT:\n{}", String::from_utf8_lossy(&output.stdout));
        eprintln!("STDERR:\n{}", String::from_utf8_lossy(&output.stderr));
    }
    output
}

/// Feed `input` to `originstored serve` and collect the reply lines.
fn serve(storage: &Path, input: &str) -> Vec<Value> {
    let mut child = originstored(storage)
        .arg("serve")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn originstored serve");

    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(input.as_bytes()).unwrap();
    drop(stdin);

    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "serve failed:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).expect("reply line is JSON"))
        .collect()
}

#[test]
fn test_serve_answers_each_request_line() {
    let temp = TempDir::new().unwrap();
    let storage = temp.path().join("store");

    let replies = serve(
        &storage,
        concat!(
            r#"{"kind":"open-database","parameters":{"origin":"https://a.example","name":"x"},"callbackId":1}"#,
            "\n",
            "\n",
            r#"{"kind":"enumerate-origins","callbackId":2}"#,
            "\n",
            r#"{"kind":"delete-all","callbackId":3}"#,
            "\n",
        ),
    );

    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0]["callbackId"], 1);
    assert_eq!(replies[0]["payload"]["type"], "opened");
    assert_eq!(replies[1]["callbackId"], 2);
    assert_eq!(replies[1]["payload"]["origins"], serde_json::json!(["https://a.example:443"]));
    assert_eq!(replies[2]["payload"], serde_json::json!({"type": "removed", "count": 1}));
}

#[test]
fn test_serve_closes_on_malformed_line() {
    let temp = TempDir::new().unwrap();
    let storage = temp.path().join("store");

    let replies = serve(
        &storage,
        concat!(
            r#"{"kind":"enumerate-origins","callbackId":1}"#,
            "\n",
            r#"{"kind":"delete-all"}"#,
            "\n",
            r#"{"kind":"enumerate-origins","callbackId":7}"#,
            "\n",
        ),
    );

    let callbacks: Vec<&Value> = replies.iter().map(|reply| &reply["callbackId"]).collect();
    assert_eq!(callbacks, vec![&Value::from(1)], "nothing after the malformed line is served");
}

#[test]
fn test_serve_closes_on_unknown_kind() {
    let temp = TempDir::new().unwrap();
    let storage = temp.path().join("store");

    let replies = serve(
        &storage,
        concat!(
            r#"{"kind":"compact-everything","callbackId":1}"#,
            "\n",
            r#"{"kind":"enumerate-origins","callbackId":2}"#,
            "\n",
        ),
    );
    assert!(replies.is_empty());
}

#[test]
fn test_show_config_prints_effective_yaml() {
    let temp = TempDir::new().unwrap();
    let storage = temp.path().join("store");

    let output = run(&storage, &["--log-level", "debug", "show-config"]);
    assert!(output.status.success());

    let config: serde_yaml::Value = serde_yaml::from_slice(&output.stdout).unwrap();
    assert_eq!(config["storageDirectory"].as_str(), storage.to_str());
    assert_eq!(config["logging"]["level"].as_str(), Some("debug"));
    assert_eq!(config["queue"]["policy"].as_str(), Some("bounded"));
    assert!(!storage.exists(), "show-config must not start the service");
}

#[test]
fn test_one_shot_requests() {
    let temp = TempDir::new().unwrap();
    let storage = temp.path().join("store");

    let output = run(&storage, &["ensure-path", "https_a.example_443/idb-78"]);
    assert!(output.status.success());
    let printed = String::from_utf8_lossy(&output.stdout);
    assert_eq!(Path::new(printed.trim()), storage.join("https_a.example_443/idb-78"));
    assert!(storage.join("https_a.example_443/idb-78").is_dir());

    let output = run(&storage, &["origins"]);
    assert!(output.status.success());
    let payload: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(payload["type"], "origins");

    let output = run(&storage, &["delete-origin", "https://a.example"]);
    assert!(output.status.success());
    let payload: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(payload["type"], "removed");

    let output = run(&storage, &["delete-between", "2024-01-01T00:00:00Z", "2024-02-01T00:00:00Z"]);
    assert!(output.status.success());

    let output = run(&storage, &["delete-all"]);
    assert!(output.status.success());
}

#[test]
fn test_inverted_range_fails() {
    let temp = TempDir::new().unwrap();
    let output = originstored(&temp.path().join("store"))
        .args(["delete-between", "2024-02-01T00:00:00Z", "2024-01-01T00:00:00Z"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_cli_version_output() {
    let output = Command::new(ORIGINSTORED).arg("--version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("originstored") && stdout.contains(env!("CARGO_PKG_VERSION")));
}
