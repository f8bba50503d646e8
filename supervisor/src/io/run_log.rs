//! Append-only product log for one run (`.supervisor/logs/run-<stamp>.log`).
//!
//! Unlike `tracing` diagnostics, this file is always written and holds every
//! attempt's raw output and every checkpoint verdict.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::core::types::CheckpointResult;
use crate::io::agent::AgentReply;

/// Single-writer handle to the run log.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    file: File,
}

impl RunLog {
    /// Open (creating parents) in append mode.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open run log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Append a one-line entry.
    pub fn note(&mut self, message: &str) -> Result<()> {
        let line = format!("[{}] {message}\n", timestamp());
        self.write(&line)
    }

    /// Append a titled block with a body.
    pub fn section(&mut self, title: &str, body: &str) -> Result<()> {
        let mut buf = format!("=== [{}] {title} ===\n", timestamp());
        buf.push_str(body);
        if !body.ends_with('\n') {
            buf.push('\n');
        }
        self.write(&buf)
    }

    pub fn attempt(
        &mut self,
        iteration: u32,
        attempt: u32,
        max_attempts: u32,
        reply: &AgentReply,
    ) -> Result<()> {
        let status = if reply.ok { "ok" } else { "failed" };
        self.section(
            &format!("iteration {iteration} attempt {attempt}/{max_attempts} ({status})"),
            &reply.output,
        )
    }

    pub fn self_debug(&mut self, iteration: u32, attempt: u32, reply: &AgentReply) -> Result<()> {
        let status = if reply.ok { "ok" } else { "failed (ignored)" };
        self.section(
            &format!("iteration {iteration} self-debug after attempt {attempt} ({status})"),
            &reply.output,
        )
    }

    pub fn checkpoint(&mut self, iteration: u32, result: &CheckpointResult) -> Result<()> {
        let verdict = match (result.reviewed, result.is_flagged()) {
            (false, _) => "PASSED (reviewer unavailable)",
            (true, true) => "FLAGGED",
            (true, false) => "PASSED",
        };
        let mut body = String::new();
        for issue in &result.issues {
            body.push_str(&format!("issue: {issue}\n"));
        }
        body.push_str(&result.raw);
        self.section(
            &format!(
                "iteration {iteration} checkpoint {} {verdict}",
                result.name
            ),
            &body,
        )
    }

    fn write(&mut self, text: &str) -> Result<()> {
        self.file
            .write_all(text.as_bytes())
            .and_then(|()| self.file.flush())
            .with_context(|| format!("append run log {}", self.path.display()))
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
