//! Change summaries for the workspace the agent edits.
//!
//! The `after_code_changes` checkpoint only runs when an iteration changed
//! something. The supervisor asks a [`ChangeProbe`] for a baseline before the
//! first attempt and for a summary once the iteration succeeds.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Source of per-iteration change summaries.
pub trait ChangeProbe {
    /// Opaque marker of the workspace state before an iteration starts.
    fn baseline(&self) -> Option<String>;

    /// Human-readable summary of changes since `baseline`, or `None` when nothing changed.
    fn summarize(&self, baseline: Option<&str>) -> Option<String>;
}

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    /// Paths the supervisor itself writes; never reported as agent changes.
    ignored_prefixes: Vec<String>,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            ignored_prefixes: Vec::new(),
        }
    }

    pub fn with_ignored_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ignored_prefixes.push(prefix.into());
        self
    }

    /// Full SHA of HEAD.
    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry = parse_status_line(line)?;
            if self.is_ignored(&entry.path) {
                continue;
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// `git diff --stat` between two commits.
    pub fn diff_stat(&self, from: &str, to: &str) -> Result<String> {
        let out = self.run_capture(&["diff", "--stat", from, to])?;
        Ok(out.trim_end().to_string())
    }

    /// Summary of commits made since `baseline` plus uncommitted changes.
    #[instrument(skip_all)]
    pub fn change_summary(&self, baseline: Option<&str>) -> Result<String> {
        let mut sections = Vec::new();

        if let Some(base) = baseline {
            let head = self.head_sha()?;
            if head != base {
                let stat = self.diff_stat(base, &head)?;
                if !stat.is_empty() {
                    sections.push(format!("committed since {}:\n{stat}", short(base)));
                }
            }
        }

        let entries = self.status_porcelain()?;
        if !entries.is_empty() {
            let lines: Vec<String> = entries
                .iter()
                .map(|e| format!("{} {}", e.code, e.path))
                .collect();
            sections.push(format!("uncommitted:\n{}", lines.join("\n")));
        }

        debug!(sections = sections.len(), "change summary built");
        Ok(sections.join("\n\n"))
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.ignored_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl ChangeProbe for Git {
    fn baseline(&self) -> Option<String> {
        match self.head_sha() {
            Ok(sha) => Some(sha),
            Err(err) => {
                debug!(err = %format!("{err:#}"), "no git baseline");
                None
            }
        }
    }

    fn summarize(&self, baseline: Option<&str>) -> Option<String> {
        match self.change_summary(baseline) {
            Ok(summary) if summary.trim().is_empty() => None,
            Ok(summary) => Some(summary),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not summarize changes");
                None
            }
        }
    }
}

fn short(sha: &str) -> &str {
    &sha[..sha.len().min(8)]
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
