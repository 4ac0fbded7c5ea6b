use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn vitals() -> Command {
    let mut cmd = Command::cargo_bin("vitals").unwrap();
    // Keep developer environment overrides out of the tests
    cmd.env_remove("RUST_LOG");
    cmd
}

fn example_config_file() -> tempfile::NamedTempFile {
    let output = vitals().arg("example-config").output().unwrap();
    assert!(output.status.success());

    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(&output.stdout).unwrap();
    file
}

#[test]
fn test_example_config_prints_toml() {
    vitals()
        .arg("example-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("renderer"))
        .stdout(predicate::str::contains("evaluation_interval_ms"));
}

#[test]
fn test_example_config_json() {
    let output = vitals()
        .args(["example-config", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["components"].as_array().map(Vec::len), Some(2));
}

#[test]
fn test_check_config_accepts_example() {
    let file = example_config_file();
    vitals()
        .args(["check-config", "--config"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("renderer-reduce-quality"));
}

#[test]
fn test_check_config_rejects_inverted_threshold() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[[components]]
id = "renderer"

[components.thresholds.fps]
warning = 30.0
critical = 45.0
direction = "below"
"#
    )
    .unwrap();

    vitals()
        .args(["check-config", "--config"])
        .arg(file.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("Configuration is invalid"));
}

#[test]
fn test_run_reports_critical_component() {
    let file = example_config_file();
    let samples = concat!(
        r#"{"component": "renderer", "values": {"fps": 60.0}}"#,
        "\n",
        "not json\n",
        r#"{"component": "renderer", "values": {"fps": 20.0}}"#,
        "\n",
    );

    let output = vitals()
        .args(["run", "--format", "json", "--snapshot-interval-ms", "600000", "--config"])
        .arg(file.path())
        .env("VITALS_AUTO_RECOVER", "false")
        .write_stdin(samples)
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let last = stdout.lines().last().expect("final snapshot");
    let snapshot: serde_json::Value = serde_json::from_str(last).unwrap();
    assert_eq!(snapshot["overall"], "critical");
    assert_eq!(snapshot["components"]["renderer"]["status"], "critical");
    assert_eq!(snapshot["active_alerts"].as_array().map(Vec::len), Some(1));
}
