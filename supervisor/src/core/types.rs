//! Shared deterministic types for the supervisor loop.
//!
//! These types are the contracts between the loop, the checkpoint reviewer and
//! the metrics record. They carry no I/O and serialize to stable names.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Final outcome of one iteration after all attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Reviewer classification for a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Passed,
    Flagged,
}

/// Fixed review points inside a successful iteration.
///
/// Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointName {
    AfterCodeChanges,
    AfterTestRun,
    AfterResults,
}

impl CheckpointName {
    pub const ORDER: [CheckpointName; 3] = [
        CheckpointName::AfterCodeChanges,
        CheckpointName::AfterTestRun,
        CheckpointName::AfterResults,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointName::AfterCodeChanges => "after_code_changes",
            CheckpointName::AfterTestRun => "after_test_run",
            CheckpointName::AfterResults => "after_results",
        }
    }
}

impl fmt::Display for CheckpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result of one checkpoint review.
///
/// Downstream code reads `verdict` and `issues`; `raw` is kept only for the run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointResult {
    pub name: CheckpointName,
    pub verdict: Verdict,
    /// Reply lines that triggered a `Flagged` verdict.
    pub issues: Vec<String>,
    /// False when the reviewer invocation itself failed.
    pub reviewed: bool,
    pub raw: String,
}

impl CheckpointResult {
    pub fn is_flagged(&self) -> bool {
        self.verdict == Verdict::Flagged
    }
}

/// Everything one iteration produced, folded into `RunState` at the done check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationRecord {
    /// 1-indexed, strictly increasing across the run.
    pub index: u32,
    pub outcome: Outcome,
    /// Agent attempts used, `1..=max_retries`.
    pub attempts: u32,
    /// Diagnostic self-debug calls made between attempts.
    pub debug_calls: u32,
    /// Empty unless `outcome == Success`.
    pub checkpoints: Vec<CheckpointResult>,
}

impl IterationRecord {
    pub fn flagged_count(&self) -> u32 {
        self.checkpoints.iter().filter(|c| c.is_flagged()).count() as u32
    }
}

/// Why the loop reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The termination sentinel was observed at a done check.
    DoneSignal,
    /// The requested iteration budget was used up.
    BudgetExhausted,
    /// Two consecutive resource-pressure readings stopped the run.
    ResourceExhaustion,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::DoneSignal => "done_signal",
            RunStatus::BudgetExhausted => "budget_exhausted",
            RunStatus::ResourceExhaustion => "resource_exhaustion",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reason the host is under resource pressure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pressure {
    Disk { used_percent: u8, max_percent: u8 },
    Memory { available_mb: u64, min_mb: u64 },
}

impl fmt::Display for Pressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pressure::Disk {
                used_percent,
                max_percent,
            } => write!(f, "disk usage {used_percent}% exceeds {max_percent}%"),
            Pressure::Memory {
                available_mb,
                min_mb,
            } => write!(f, "available memory {available_mb}MB below {min_mb}MB"),
        }
    }
}

/// Result of one resource check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Pressure(Pressure),
}
