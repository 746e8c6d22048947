use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "dweet-runtime-{prefix}-{}-{nanos}",
        std::process::id()
    ))
}

const CATALOG: &str = r#"{
    "dashboard_gauges": [
        {"value_key": "V1(V)", "title": "Voltage L1", "min_val": 0, "max_val": 300},
        {"value_key": "A1(A)", "title": "Current L1"}
    ]
}
"#;

fn write_project_fixture(root: &Path) {
    std::fs::create_dir_all(root).expect("create project directory");
    std::fs::write(
        root.join("runtime.toml"),
        r#"
[runtime]
mode = "replay"
log_level = "warn"
catalog = "dashboard.json"

[broker]
host = "127.0.0.1"
port = 1883
topic = "dweet/readings"

[replay]
file = "demo.csv"
interval_ms = 10
header_rows = 0
"#,
    )
    .expect("write runtime.toml");
    std::fs::write(root.join("dashboard.json"), CATALOG).expect("write catalog");
    std::fs::write(root.join("demo.csv"), "V1(V),A1(A)\n230,4\n").expect("write replay file");
}

fn dweet(project: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dweet-runtime"))
        .args(args)
        .arg("--project")
        .arg(project)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("run dweet-runtime")
}

#[test]
fn validate_accepts_project_fixture() {
    let project = unique_temp_dir("validate-ok");
    write_project_fixture(&project);
    let output = dweet(&project, &["validate", "--json"]);
    assert!(
        output.status.success(),
        "expected validate success, stderr was:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("validate json output");
    assert_eq!(report["status"], "ok");
    assert_eq!(report["mode"], "replay");
    assert_eq!(report["layout"], "flat");
    assert_eq!(report["channels"], 2);
    let _ = std::fs::remove_dir_all(project);
}

#[test]
fn validate_rejects_unknown_runtime_key() {
    let project = unique_temp_dir("validate-unknown");
    write_project_fixture(&project);
    let runtime_path = project.join("runtime.toml");
    let mut text = std::fs::read_to_string(&runtime_path).expect("read runtime.toml");
    text.push_str("\n[runtime.extra]\nflag = true\n");
    std::fs::write(&runtime_path, text).expect("write runtime.toml");

    let output = dweet(&project, &["validate"]);
    assert_eq!(output.status.code(), Some(10));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("unknown field"),
        "expected unknown field error, got:\n{stderr}"
    );
    let _ = std::fs::remove_dir_all(project);
}

#[test]
fn validate_rejects_duplicate_channel_keys() {
    let project = unique_temp_dir("validate-duplicate");
    write_project_fixture(&project);
    std::fs::write(
        project.join("dashboard.json"),
        r#"{"dashboard_gauges": [{"value_key": "V1(V)"}, {"value_key": "V1(V)"}]}"#,
    )
    .expect("write catalog");
    let output = dweet(&project, &["validate"]);
    assert_eq!(output.status.code(), Some(10));
    assert!(String::from_utf8_lossy(&output.stderr).contains("duplicate channel key"));
    let _ = std::fs::remove_dir_all(project);
}

#[test]
fn edit_with_invalid_bound_fails_and_keeps_catalog() {
    let project = unique_temp_dir("edit-invalid");
    write_project_fixture(&project);
    let output = dweet(&project, &["edit", "V1(V)", "--min", "abc"]);
    assert_eq!(output.status.code(), Some(11));
    assert_eq!(
        std::fs::read_to_string(project.join("dashboard.json")).expect("read catalog"),
        CATALOG
    );
    let _ = std::fs::remove_dir_all(project);
}

#[test]
fn edit_then_show_reports_committed_settings() {
    let project = unique_temp_dir("edit-show");
    write_project_fixture(&project);
    let output = dweet(
        &project,
        &["edit", "A1(A)", "--max", "40", "--kind", "bar", "--color", "teal"],
    );
    assert!(
        output.status.success(),
        "expected edit success, stderr was:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let output = dweet(&project, &["show", "--json"]);
    assert!(output.status.success());
    let channels: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("show json output");
    let current = &channels[1];
    assert_eq!(current["key"], "A1(A)");
    assert_eq!(current["max"], 40.0);
    assert_eq!(current["min"], 0.0);
    assert_eq!(current["kind"], "Bar");
    assert_eq!(current["color"], "teal");
    assert_eq!(channels[0]["title"], "Voltage L1");
    let _ = std::fs::remove_dir_all(project);
}
