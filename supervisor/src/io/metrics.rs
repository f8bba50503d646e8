//! The terminal metrics record, written once per run.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::run_state::RunState;
use crate::core::types::RunStatus;

/// Structured summary of one run (`.supervisor/metrics/run-<stamp>.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub started: String,
    pub ended: String,
    /// Iterations that reached the done check.
    pub iterations: u32,
    pub successes: u32,
    pub failures: u32,
    pub falsifier_issues: u32,
    pub task_file: String,
    pub status: RunStatus,
}

impl MetricsRecord {
    /// One-line text summary for notifications.
    pub fn summary_line(&self) -> String {
        format!(
            "supervisor run {}: {} iterations, {} succeeded, {} failed, {} falsifier issues ({})",
            self.status,
            self.iterations,
            self.successes,
            self.failures,
            self.falsifier_issues,
            self.task_file
        )
    }
}

/// Emits the metrics record. `finalize` consumes the recorder, so a run can
/// emit at most one record.
#[derive(Debug)]
pub struct MetricsRecorder {
    path: PathBuf,
    started_at: DateTime<Utc>,
}

impl MetricsRecorder {
    pub fn new(path: PathBuf, started_at: DateTime<Utc>) -> Self {
        Self { path, started_at }
    }

    /// Build the record from `run_state` and write it.
    ///
    /// The file is created exclusively; an existing record is never overwritten.
    pub fn finalize(
        self,
        run_state: &RunState,
        task_file: &Path,
        status: RunStatus,
    ) -> Result<MetricsRecord> {
        let record = MetricsRecord {
            started: self.started_at.to_rfc3339(),
            ended: Utc::now().to_rfc3339(),
            iterations: run_state.iterations_run,
            successes: run_state.successes,
            failures: run_state.failures,
            falsifier_issues: run_state.falsifier_issue_count,
            task_file: task_file.display().to_string(),
            status,
        };
        write_once(&self.path, &record)?;
        info!(path = %self.path.display(), iterations = record.iterations, "metrics written");
        Ok(record)
    }
}

fn write_once(path: &Path, record: &MetricsRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create metrics dir {}", parent.display()))?;
    }
    let mut contents = serde_json::to_string_pretty(record).context("serialize metrics")?;
    contents.push('\n');
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("create metrics {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("write metrics {}", path.display()))
}

/// Load a metrics record (used by tooling and tests).
pub fn load_metrics(path: &Path) -> Result<MetricsRecord> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_reflects_run_state_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("metrics/run.json");
        let state = RunState {
            iterations_run: 4,
            successes: 3,
            failures: 1,
            falsifier_issue_count: 2,
        };

        let record = MetricsRecorder::new(path.clone(), Utc::now())
            .finalize(&state, Path::new("TASKS.md"), RunStatus::BudgetExhausted)
            .expect("finalize");

        assert_eq!(record.iterations, 4);
        assert_eq!(record.falsifier_issues, 2);
        assert_eq!(load_metrics(&path).expect("load"), record);

        let raw = fs::read_to_string(&path).expect("read");
        for key in [
            "started",
            "ended",
            "iterations",
            "successes",
            "failures",
            "falsifier_issues",
            "task_file",
        ] {
            assert!(raw.contains(&format!("\"{key}\"")), "missing {key}");
        }
    }

    #[test]
    fn existing_record_is_not_overwritten() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run.json");
        fs::write(&path, "{}").expect("write");

        let err = MetricsRecorder::new(path.clone(), Utc::now())
            .finalize(&RunState::default(), Path::new("TASKS.md"), RunStatus::DoneSignal)
            .unwrap_err();
        assert!(format!("{err:#}").contains("create metrics"));
        assert_eq!(fs::read_to_string(&path).expect("read"), "{}");
    }

    #[test]
    fn summary_line_names_status_and_counts() {
        let record = MetricsRecord {
            started: String::new(),
            ended: String::new(),
            iterations: 3,
            successes: 2,
            failures: 1,
            falsifier_issues: 0,
            task_file: "TASKS.md".to_string(),
            status: RunStatus::DoneSignal,
        };
        assert_eq!(
            record.summary_line(),
            "supervisor run done_signal: 3 iterations, 2 succeeded, 1 failed, 0 falsifier issues (TASKS.md)"
        );
    }
}
