//! Best-effort error snapshots taken when an iteration exhausts its retries.
//!
//! Snapshots are postmortem artifacts. Nothing in the supervisor reads them
//! back, and no copy failure is allowed to affect the run.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument, warn};

/// Manifest written as `snapshot.json` inside each snapshot directory.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorSnapshot {
    pub run_timestamp: String,
    pub iteration_index: u32,
    pub captured_files: Vec<String>,
    /// Non-fatal copy errors.
    pub errors: Vec<String>,
}

/// Copies mutable state and the run log into a fresh directory per failure.
#[derive(Debug, Clone)]
pub struct ErrorSnapshotter {
    snapshots_dir: PathBuf,
    workdir: PathBuf,
    artifacts: Vec<PathBuf>,
    log_path: PathBuf,
}

impl ErrorSnapshotter {
    /// `artifacts` are workspace-relative files or directories.
    pub fn new(
        snapshots_dir: PathBuf,
        workdir: PathBuf,
        artifacts: Vec<PathBuf>,
        log_path: PathBuf,
    ) -> Self {
        Self {
            snapshots_dir,
            workdir,
            artifacts,
            log_path,
        }
    }

    /// Capture a snapshot for `(run_timestamp, iteration_index)`.
    ///
    /// Returns the directory on success, or `None` if even the directory could
    /// not be created.
    #[instrument(skip_all, fields(iteration = iteration_index))]
    pub fn snapshot(&self, run_timestamp: &str, iteration_index: u32) -> Option<PathBuf> {
        let dir = match self.create_unique_dir(run_timestamp, iteration_index) {
            Ok(dir) => dir,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not create snapshot dir");
                return None;
            }
        };

        let mut captured = Vec::new();
        let mut errors = Vec::new();

        for artifact in &self.artifacts {
            let src = self.workdir.join(artifact);
            let dst = dir.join("state").join(contained_relative(artifact));
            let label = artifact.display().to_string();
            if !src.exists() {
                errors.push(format!("{label}: missing {}", src.display()));
                continue;
            }
            let copied = if src.is_dir() {
                copy_dir_recursive(&src, &dst)
            } else {
                copy_file(&src, &dst)
            };
            match copied {
                Ok(()) => captured.push(label),
                Err(err) => errors.push(format!("{label}: {err:#}")),
            }
        }

        match copy_file(&self.log_path, &dir.join("run.log")) {
            Ok(()) => captured.push("run.log".to_string()),
            Err(err) => errors.push(format!("run.log: {err:#}")),
        }

        if !errors.is_empty() {
            warn!(errors = ?errors, "snapshot capture had errors");
        }

        let manifest = ErrorSnapshot {
            run_timestamp: run_timestamp.to_string(),
            iteration_index,
            captured_files: captured,
            errors,
        };
        if let Err(err) = write_manifest(&dir.join("snapshot.json"), &manifest) {
            warn!(err = %format!("{err:#}"), "could not write snapshot manifest");
        }

        info!(dir = %dir.display(), "error snapshot captured");
        Some(dir)
    }

    fn create_unique_dir(&self, run_timestamp: &str, iteration_index: u32) -> Result<PathBuf> {
        fs::create_dir_all(&self.snapshots_dir)
            .with_context(|| format!("create {}", self.snapshots_dir.display()))?;
        let base = format!("{run_timestamp}-iter-{iteration_index:03}");
        let mut candidate = self.snapshots_dir.join(&base);
        let mut suffix = 2u32;
        while candidate.exists() {
            candidate = self.snapshots_dir.join(format!("{base}-{suffix}"));
            suffix += 1;
        }
        fs::create_dir(&candidate).with_context(|| format!("create {}", candidate.display()))?;
        Ok(candidate)
    }
}

/// `path` with root and parent components dropped, so it always lands inside the snapshot.
fn contained_relative(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

fn write_manifest(path: &Path, manifest: &ErrorSnapshot) -> Result<()> {
    let contents = serde_json::to_string_pretty(manifest).context("serialize snapshot")?;
    fs::write(path, format!("{contents}\n")).with_context(|| format!("write {}", path.display()))
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::copy(src, dst).with_context(|| format!("copy {}", src.display()))?;
    Ok(())
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("read dir {}", src.display()))? {
        let entry = entry?;
        let path = entry.path();
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&path, &target)?;
        } else {
            fs::copy(&path, &target).with_context(|| format!("copy {}", path.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshotter(root: &Path) -> ErrorSnapshotter {
        ErrorSnapshotter::new(
            root.join(".supervisor/snapshots"),
            root.to_path_buf(),
            vec![PathBuf::from("TASKS.md"), PathBuf::from("state")],
            root.join(".supervisor/logs/run.log"),
        )
    }

    #[test]
    fn captures_files_directories_and_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("TASKS.md"), "- build it\n").expect("write");
        fs::create_dir_all(root.join("state/nested")).expect("mkdir");
        fs::write(root.join("state/nested/progress.json"), "{}").expect("write");
        fs::create_dir_all(root.join(".supervisor/logs")).expect("mkdir");
        fs::write(root.join(".supervisor/logs/run.log"), "attempt output\n").expect("write");

        let dir = snapshotter(root)
            .snapshot("20260101_000000", 2)
            .expect("snapshot");

        assert!(dir.ends_with("20260101_000000-iter-002"));
        assert!(dir.join("state/TASKS.md").is_file());
        assert!(dir.join("state/state/nested/progress.json").is_file());
        assert_eq!(
            fs::read_to_string(dir.join("run.log")).expect("read"),
            "attempt output\n"
        );
        let manifest = fs::read_to_string(dir.join("snapshot.json")).expect("manifest");
        assert!(manifest.contains("\"iteration_index\": 2"));
    }

    #[test]
    fn missing_artifacts_are_recorded_not_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = snapshotter(temp.path())
            .snapshot("20260101_000000", 1)
            .expect("snapshot");

        let manifest: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.join("snapshot.json")).expect("read"),
        )
        .expect("parse");
        assert_eq!(manifest["captured_files"].as_array().map(Vec::len), Some(0));
        assert_eq!(manifest["errors"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn absolute_artifacts_stay_inside_the_snapshot() {
        assert_eq!(
            contained_relative(Path::new("/home/me/../TASKS.md")),
            PathBuf::from("home/me/TASKS.md")
        );
    }

    #[test]
    fn repeated_key_gets_a_distinct_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let snap = snapshotter(temp.path());
        let first = snap.snapshot("20260101_000000", 4).expect("first");
        let second = snap.snapshot("20260101_000000", 4).expect("second");
        assert_ne!(first, second);
    }
}
