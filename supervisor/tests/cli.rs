//! CLI tests for the `supervisor` binary.
//!
//! Spawns the binary with the containment marker set so no container runtime
//! is needed, and checks exit codes.

use std::fs;
use std::process::Command;

use supervisor::exit_codes;
use supervisor::io::metrics::load_metrics;

fn supervisor() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_supervisor"));
    cmd.env("SUPERVISOR_SANDBOXED", "1");
    cmd
}

#[test]
fn missing_task_file_exits_with_config_code() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = supervisor()
        .current_dir(temp.path())
        .args(["3", "MISSING.md"])
        .output()
        .expect("run supervisor");

    assert_eq!(output.status.code(), Some(exit_codes::CONFIG));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("MISSING.md"), "{stderr}");
    assert!(!temp.path().join(".supervisor/metrics").exists());
}

#[test]
fn invalid_config_exits_with_config_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("TASKS.md"), "- task\n").expect("write tasks");
    fs::create_dir_all(temp.path().join(".supervisor")).expect("mkdir");
    fs::write(
        temp.path().join(".supervisor/config.toml"),
        "max_retries = 0\n",
    )
    .expect("write config");

    let status = supervisor()
        .current_dir(temp.path())
        .status()
        .expect("run supervisor");

    assert_eq!(status.code(), Some(exit_codes::CONFIG));
}

#[test]
fn zero_iteration_budget_exits_with_config_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("TASKS.md"), "- task\n").expect("write tasks");

    let status = supervisor()
        .current_dir(temp.path())
        .arg("0")
        .status()
        .expect("run supervisor");

    assert_eq!(status.code(), Some(exit_codes::CONFIG));
}

#[cfg(unix)]
#[test]
fn contained_run_with_shell_agent_writes_metrics() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("TASKS.md"), "- say hello\n").expect("write tasks");
    fs::create_dir_all(temp.path().join(".supervisor")).expect("mkdir");
    fs::write(
        temp.path().join(".supervisor/config.toml"),
        r#"retry_delay_secs = 0

[agent]
command = ["sh", "-c", "cat > /dev/null; echo hello"]
elevated_args = []

[resources]
max_disk_percent = 100
min_available_memory_mb = 0
pause_secs = 0
"#,
    )
    .expect("write config");

    let output = supervisor()
        .current_dir(temp.path())
        .args(["2", "TASKS.md"])
        .output()
        .expect("run supervisor");

    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 iterations, 2 succeeded"), "{stdout}");

    let metrics_dir = temp.path().join(".supervisor/metrics");
    let entries: Vec<_> = fs::read_dir(&metrics_dir)
        .expect("metrics dir")
        .map(|e| e.expect("entry").path())
        .collect();
    assert_eq!(entries.len(), 1);
    let record = load_metrics(&entries[0]).expect("load metrics");
    assert_eq!(record.iterations, 2);
    assert_eq!(record.task_file, "TASKS.md");
}
