use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn run_quill(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_quill"))
        .args(args)
        .current_dir(dir)
        .env_remove("QUILL_CONFIG")
        .env_remove("QUILL_BASE_URL")
        .env_remove("QUILL_PARALLELISM")
        .env_remove("QUILL_TIMEOUT")
        .env_remove("RUST_LOG")
        .output()
        .expect("execute quill")
}

fn write_suite(dir: &Path, yaml: &str) {
    std::fs::write(dir.join("suite.yml"), yaml).expect("write suite");
}

const CHAIN: &str = r"
retry: { max_attempts: 1, backoff_ms: 1 }
profiles:
  - { name: admin, username: admin, password: password }
scenarios:
  - id: create
    method: POST
    path: /books
    auth: admin
    body: { name: X, author: Y, price: 1.0 }
    expect: { status: [201] }
    capture:
      - { name: id, path: $.id }
  - id: read
    method: GET
    path: /books/{id}
    params:
      id: { from: create, capture: id }
    depends_on: [create]
  - id: list
    method: GET
    path: /books
";

fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}")
}

#[test]
fn test_plan_prints_waves() {
    let temp_dir = TempDir::new().expect("temp dir");
    write_suite(temp_dir.path(), CHAIN);

    let output = run_quill(temp_dir.path(), &["plan", "--config", "suite.yml"]);

    assert!(
        output.status.success(),
        "plan failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("3 scenarios in 2 waves"), "stdout: {stdout}");
    assert!(stdout.contains("wave 2:\n  read after create"), "stdout: {stdout}");
}

#[test]
fn test_plan_filter_keeps_dependencies() {
    let temp_dir = TempDir::new().expect("temp dir");
    write_suite(temp_dir.path(), CHAIN);

    let output = run_quill(
        temp_dir.path(),
        &["plan", "--config", "suite.yml", "--filter", "READ"],
    );

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 scenarios"), "stdout: {stdout}");
    assert!(!stdout.contains("list"), "stdout: {stdout}");
}

#[test]
fn test_missing_config_exits_2() {
    let temp_dir = TempDir::new().expect("temp dir");

    let output = run_quill(
        temp_dir.path(),
        &["run", "--config", "nope.yml", "--base-url", "http://localhost:1"],
    );

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nope.yml"), "stderr: {stderr}");
}

#[test]
fn test_cycle_exits_2_without_running() {
    let temp_dir = TempDir::new().expect("temp dir");
    write_suite(
        temp_dir.path(),
        r"
scenarios:
  - { id: a, method: GET, path: /books, depends_on: [b] }
  - { id: b, method: GET, path: /books, depends_on: [a] }
",
    );

    let output = run_quill(
        temp_dir.path(),
        &["run", "--config", "suite.yml", "--base-url", &closed_port_url()],
    );

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cyclic dependency"), "stderr: {stderr}");
    assert!(!String::from_utf8_lossy(&output.stdout).contains("Running"));
}

#[test]
fn test_missing_base_url_exits_2() {
    let temp_dir = TempDir::new().expect("temp dir");
    write_suite(temp_dir.path(), CHAIN);

    let output = run_quill(temp_dir.path(), &["run", "--config", "suite.yml"]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no base url"), "stderr: {stderr}");
}

#[test]
fn test_bad_timeout_is_rejected() {
    let temp_dir = TempDir::new().expect("temp dir");
    write_suite(temp_dir.path(), CHAIN);

    let output = run_quill(
        temp_dir.path(),
        &["run", "--config", "suite.yml", "--timeout", "soon"],
    );

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid duration"), "stderr: {stderr}");
}

#[test]
fn test_unreachable_service_exits_1_and_writes_reports() {
    let temp_dir = TempDir::new().expect("temp dir");
    write_suite(temp_dir.path(), CHAIN);

    let output = run_quill(
        temp_dir.path(),
        &[
            "run",
            "--config",
            "suite.yml",
            "--base-url",
            &closed_port_url(),
            "--report-dir",
            "out",
            "--format",
            "both",
            "--diagnostics-dir",
            "diag",
        ],
    );

    assert_eq!(
        output.status.code(),
        Some(1),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let markdown = std::fs::read_to_string(temp_dir.path().join("out/report.md")).expect("report.md");
    assert!(markdown.contains("### create (errored)"), "{markdown}");
    assert!(markdown.contains("- `read`: dependency create errored"), "{markdown}");

    let json = std::fs::read_to_string(temp_dir.path().join("out/report.json")).expect("report.json");
    let report: serde_json::Value = serde_json::from_str(&json).expect("valid json");
    assert_eq!(report["summary"]["errored"], 2);
    assert_eq!(report["summary"]["skipped"], 1);

    let exchanges =
        std::fs::read_to_string(temp_dir.path().join("diag/exchanges.jsonl")).expect("exchanges");
    assert!(exchanges.lines().count() >= 2);
    assert!(!exchanges.contains("YWRtaW46cGFzc3dvcmQ"));
}
