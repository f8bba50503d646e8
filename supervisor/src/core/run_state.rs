//! Run-wide counters owned by the supervisor thread.

use serde::Serialize;

use crate::core::types::{IterationRecord, Outcome};

/// Counters accumulated across a run.
///
/// This is the only source the metrics record is built from. Counters never
/// decrease; each iteration that reaches the done check is folded in exactly once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunState {
    pub iterations_run: u32,
    pub successes: u32,
    pub failures: u32,
    /// Total `Flagged` checkpoint verdicts across all iterations.
    pub falsifier_issue_count: u32,
}

impl RunState {
    /// Fold a finished iteration into the counters.
    pub fn record(&mut self, record: &IterationRecord) {
        self.iterations_run += 1;
        match record.outcome {
            Outcome::Success => self.successes += 1,
            Outcome::Failure => self.failures += 1,
        }
        self.falsifier_issue_count += record.flagged_count();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CheckpointName, CheckpointResult, Verdict};

    fn checkpoint(name: CheckpointName, verdict: Verdict) -> CheckpointResult {
        CheckpointResult {
            name,
            verdict,
            issues: Vec::new(),
            reviewed: true,
            raw: String::new(),
        }
    }

    #[test]
    fn record_counts_outcomes_and_flags() {
        let mut state = RunState::default();
        state.record(&IterationRecord {
            index: 1,
            outcome: Outcome::Success,
            attempts: 1,
            debug_calls: 0,
            checkpoints: vec![
                checkpoint(CheckpointName::AfterCodeChanges, Verdict::Flagged),
                checkpoint(CheckpointName::AfterResults, Verdict::Flagged),
            ],
        });
        state.record(&IterationRecord {
            index: 2,
            outcome: Outcome::Failure,
            attempts: 3,
            debug_calls: 2,
            checkpoints: Vec::new(),
        });

        assert_eq!(
            state,
            RunState {
                iterations_run: 2,
                successes: 1,
                failures: 1,
                falsifier_issue_count: 2,
            }
        );
    }
}
