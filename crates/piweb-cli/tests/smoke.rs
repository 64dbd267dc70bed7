use serde_json::Value;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn write_records_file(path: &Path, source: &str) {
    std::fs::write(path, source).expect("records file write should succeed");
}

fn run_cli(args: &[&str], cwd: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_piweb-cli"))
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .output()
        .expect("cli process should start")
}

fn json_lines(output: &std::process::Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("stdout line should be json"))
        .collect()
}

fn assert_success(output: &std::process::Output) {
    assert!(
        output.status.success(),
        "stdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn ingest_command_mock_backend_expected_chunked_report() {
    let temp = TempDir::new().expect("tempdir should create");
    let file = temp.path().join("records.json");
    write_records_file(
        &file,
        r#"[
            {"timestamp": "2024-01-01T00:00:00Z", "value": 1.5},
            {"timestamp": "2024-01-01T00:00:01Z", "value": 2.5},
            {"timestamp": "2024-01-01T00:00:02Z", "value": 3.5}
        ]"#,
    );

    let output = run_cli(
        &[
            "ingest",
            "--file",
            file.to_str().expect("records path should be utf8"),
            "--container",
            "boiler.temperature",
            "--batch-size",
            "2",
            "--backend",
            "mock",
        ],
        temp.path(),
    );

    assert_success(&output);
    let lines = json_lines(&output);
    assert_eq!(lines.len(), 1);
    let report = &lines[0];
    assert_eq!(report["container"], "boiler.temperature");
    assert_eq!(report["state"], "completed");
    assert_eq!(report["chunks"], serde_json::json!([2, 1]));
    assert_eq!(report["delivered_records"], 3);
    assert_eq!(report["resume_from"], Value::Null);
}

#[test]
fn ingest_command_out_of_order_record_expected_rejection_reported() {
    let temp = TempDir::new().expect("tempdir should create");
    let file = temp.path().join("records.json");
    write_records_file(
        &file,
        r#"[
            {"timestamp": "2024-01-01T00:00:05Z", "value": 1.0},
            {"timestamp": "2024-01-01T00:00:01Z", "value": 2.0},
            {"timestamp": "2024-01-01T00:00:06Z", "value": 3.0}
        ]"#,
    );

    let output = run_cli(
        &[
            "ingest",
            "--file",
            file.to_str().expect("records path should be utf8"),
            "--container",
            "c1",
            "--backend",
            "mock",
        ],
        temp.path(),
    );

    assert_success(&output);
    let report = &json_lines(&output)[0];
    assert_eq!(report["delivered_records"], 2);
    let rejected = report["rejected"].as_array().expect("rejected should be array");
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0]["index"], 1);
}

#[test]
fn ingest_command_missing_timestamp_expected_error_exit() {
    let temp = TempDir::new().expect("tempdir should create");
    let file = temp.path().join("records.json");
    write_records_file(&file, r#"[{"value": 1.0}]"#);

    let output = run_cli(
        &[
            "ingest",
            "--file",
            file.to_str().expect("records path should be utf8"),
            "--container",
            "c1",
            "--backend",
            "mock",
        ],
        temp.path(),
    );

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: record 0 has no string 'timestamp'"));
}

#[test]
fn tail_command_mock_backend_expected_marker_then_batch() {
    let temp = TempDir::new().expect("tempdir should create");
    let output = run_cli(
        &[
            "tail",
            "--stream",
            "F1DPsine",
            "--max-batches",
            "1",
            "--interval-ms",
            "10",
            "--backend",
            "mock",
        ],
        temp.path(),
    );

    assert_success(&output);
    let lines = json_lines(&output);
    assert_eq!(lines.len(), 2);
    let registered = lines[0]["marker"].as_str().expect("marker should be string");
    let batch = &lines[1];
    let records = batch["records"].as_array().expect("records should be array");
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|record| record["Source"] == "F1DPsine"));
    assert_ne!(batch["marker"].as_str(), Some(registered));
}

#[test]
fn tail_command_stream_set_expected_records_from_every_stream() {
    let temp = TempDir::new().expect("tempdir should create");
    let output = run_cli(
        &[
            "tail",
            "--stream",
            "s1",
            "--stream",
            "s2",
            "--max-batches",
            "1",
            "--interval-ms",
            "10",
            "--backend",
            "mock",
        ],
        temp.path(),
    );

    assert_success(&output);
    let lines = json_lines(&output);
    let records = lines[1]["records"].as_array().expect("records should be array");
    assert_eq!(records.len(), 6);
    assert_eq!(
        records.iter().filter(|record| record["Source"] == "s2").count(),
        3
    );
}

#[test]
fn tail_command_unknown_marker_expected_error_exit() {
    let temp = TempDir::new().expect("tempdir should create");
    let output = run_cli(
        &[
            "tail",
            "--stream",
            "s1",
            "--marker",
            "not-a-marker",
            "--max-batches",
            "1",
            "--backend",
            "mock",
        ],
        temp.path(),
    );

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error:"));
}

#[test]
fn recorded_command_mock_backend_expected_value_lines() {
    let temp = TempDir::new().expect("tempdir should create");
    let output = run_cli(
        &["recorded", "--stream", "s1", "--start-time", "*-1d", "--backend", "mock"],
        temp.path(),
    );

    assert_success(&output);
    let lines = json_lines(&output);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["Timestamp"], "2024-01-01T00:00:00Z");
    assert_eq!(lines[2]["Value"], 1.0);
}

#[test]
fn ensure_path_command_mock_backend_expected_anchor_per_segment() {
    let temp = TempDir::new().expect("tempdir should create");
    let output = run_cli(
        &[
            "ensure-path",
            "--database",
            "D0",
            "--path",
            "Plant/Line1/Pump",
            "--backend",
            "mock",
        ],
        temp.path(),
    );

    assert_success(&output);
    let lines = json_lines(&output);
    let names: Vec<&str> = lines
        .iter()
        .map(|line| line["name"].as_str().expect("name should be string"))
        .collect();
    assert_eq!(names, vec!["Plant", "Line1", "Pump"]);
    let path = lines[2]["path"].as_str().expect("path should be string");
    assert!(path.ends_with("\\Plant\\Line1\\Pump"));
}
