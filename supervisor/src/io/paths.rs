//! Canonical paths for one supervisor run.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::io::config::PathsConfig;

/// Run timestamp used to name the log, metrics record and snapshot directories.
pub fn run_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

/// All paths a run writes or polls, resolved against the workspace.
#[derive(Debug, Clone)]
pub struct SupervisorPaths {
    /// Unique key of this run: the stamp, plus `-2`, `-3`, ... on collision.
    pub run_key: String,
    pub snapshots_dir: PathBuf,
    pub log_path: PathBuf,
    pub metrics_path: PathBuf,
    pub sentinel_path: PathBuf,
}

impl SupervisorPaths {
    pub fn new(workdir: &Path, config: &PathsConfig, run_key: &str) -> Self {
        let state_dir = workdir.join(&config.state_dir);
        Self {
            run_key: run_key.to_string(),
            log_path: state_dir.join("logs").join(format!("run-{run_key}.log")),
            metrics_path: state_dir.join("metrics").join(format!("run-{run_key}.json")),
            snapshots_dir: state_dir.join("snapshots"),
            sentinel_path: workdir.join(&config.sentinel),
        }
    }

    /// Claim a run key no earlier run in this workspace has used.
    ///
    /// The log file is created with `create_new`, so two runs started within
    /// the same second end up with distinct logs and metrics records.
    pub fn reserve(workdir: &Path, config: &PathsConfig, stamp: &str) -> Result<Self> {
        let mut run_key = stamp.to_string();
        let mut suffix = 2u32;
        loop {
            let paths = Self::new(workdir, config, &run_key);
            if let Some(parent) = paths.log_path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create log dir {}", parent.display()))?;
            }
            if !paths.metrics_path.exists() {
                match OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&paths.log_path)
                {
                    Ok(_) => return Ok(paths),
                    Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                    Err(err) => {
                        return Err(err).with_context(|| {
                            format!("create run log {}", paths.log_path.display())
                        });
                    }
                }
            }
            run_key = format!("{stamp}-{suffix}");
            suffix += 1;
        }
    }

    /// Whether the termination sentinel currently exists. Its content is ignored.
    pub fn sentinel_present(&self) -> bool {
        self.sentinel_path.exists()
    }

    /// Workspace-relative prefix of the state dir, for excluding it from change summaries.
    pub fn state_prefix(config: &PathsConfig) -> String {
        let mut prefix = config.state_dir.to_string_lossy().trim_start_matches("./").to_string();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn paths_are_stable() {
        let root = Path::new("/work");
        let paths = SupervisorPaths::new(root, &PathsConfig::default(), "20260101_120000");

        assert_eq!(
            paths.log_path,
            Path::new("/work/.supervisor/logs/run-20260101_120000.log")
        );
        assert_eq!(
            paths.metrics_path,
            Path::new("/work/.supervisor/metrics/run-20260101_120000.json")
        );
        assert_eq!(paths.snapshots_dir, Path::new("/work/.supervisor/snapshots"));
        assert_eq!(paths.sentinel_path, Path::new("/work/.supervisor/DONE"));
    }

    #[test]
    fn reserve_suffixes_a_key_already_taken() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = PathsConfig::default();

        let first = SupervisorPaths::reserve(temp.path(), &config, "20260101_120000")
            .expect("first reserve");
        let second = SupervisorPaths::reserve(temp.path(), &config, "20260101_120000")
            .expect("second reserve");

        assert_eq!(first.run_key, "20260101_120000");
        assert_eq!(second.run_key, "20260101_120000-2");
        assert!(first.log_path.is_file());
        assert!(second.log_path.is_file());
        assert_ne!(first.metrics_path, second.metrics_path);
    }

    #[test]
    fn reserve_skips_a_key_with_metrics_but_no_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = PathsConfig::default();
        let taken = SupervisorPaths::new(temp.path(), &config, "20260101_120000");
        fs::create_dir_all(taken.metrics_path.parent().expect("parent")).expect("mkdir");
        fs::write(&taken.metrics_path, "{}").expect("write metrics");

        let paths = SupervisorPaths::reserve(temp.path(), &config, "20260101_120000")
            .expect("reserve");

        assert_eq!(paths.run_key, "20260101_120000-2");
    }

    #[test]
    fn stamp_is_sortable() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(run_stamp(at), "20260304_050607");
    }

    #[test]
    fn state_prefix_ends_with_slash() {
        assert_eq!(SupervisorPaths::state_prefix(&PathsConfig::default()), ".supervisor/");
    }
}
