//! Adversarial checkpoint reviews inside a successful iteration.
//!
//! The validator never gates: a flagged verdict is counted by the caller, and
//! a reviewer call that fails outright counts as passed.

use tracing::{info, instrument, warn};

use crate::core::types::{CheckpointName, CheckpointResult, Verdict};
use crate::core::verdict::{classify_reply, has_test_markers, tail_bytes};
use crate::io::agent::AgentRunner;
use crate::io::prompt::{ReviewInputs, render_reviewer};

/// Runs reviewer-persona calls through an [`AgentRunner`].
pub struct CheckpointValidator<'a, A: ?Sized> {
    agent: &'a A,
    task_file: String,
}

impl<'a, A: AgentRunner + ?Sized> CheckpointValidator<'a, A> {
    pub fn new(agent: &'a A, task_file: impl Into<String>) -> Self {
        Self {
            agent,
            task_file: task_file.into(),
        }
    }

    /// Review `context` at checkpoint `name` of `iteration`.
    #[instrument(skip_all, fields(checkpoint = %name, iteration = iteration))]
    pub fn run(&self, name: CheckpointName, context: &str, iteration: u32) -> CheckpointResult {
        let prompt = match render_reviewer(&ReviewInputs {
            checkpoint: name,
            iteration,
            task_file: &self.task_file,
            context,
        }) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "reviewer prompt failed to render");
                return unreviewed(name, format!("prompt render error: {err:#}"));
            }
        };

        // Reviewers only read; they never get elevated permissions.
        let reply = self.agent.invoke(&prompt, false);
        if !reply.ok {
            warn!("reviewer call failed, treating checkpoint as passed");
            return unreviewed(name, reply.output);
        }

        let (verdict, issues) = classify_reply(&reply.output);
        info!(verdict = ?verdict, issues = issues.len(), "checkpoint reviewed");
        CheckpointResult {
            name,
            verdict,
            issues,
            reviewed: true,
            raw: reply.output,
        }
    }
}

fn unreviewed(name: CheckpointName, raw: String) -> CheckpointResult {
    CheckpointResult {
        name,
        verdict: Verdict::Passed,
        issues: Vec::new(),
        reviewed: false,
        raw,
    }
}

/// Checkpoints due for a successful iteration, in execution order, each with
/// the context excerpt its reviewer sees.
///
/// `after_code_changes` needs a non-empty change summary, `after_test_run`
/// needs test markers in the output, `after_results` always runs.
pub fn planned_checkpoints(
    change_summary: Option<&str>,
    output: &str,
    excerpt_bytes: usize,
) -> Vec<(CheckpointName, String)> {
    let changes = change_summary.map(str::trim).filter(|s| !s.is_empty());
    let excerpt = tail_bytes(output, excerpt_bytes);

    CheckpointName::ORDER
        .into_iter()
        .filter_map(|name| match name {
            CheckpointName::AfterCodeChanges => changes.map(|c| (name, c.to_string())),
            CheckpointName::AfterTestRun => {
                has_test_markers(excerpt).then(|| (name, excerpt.to_string()))
            }
            CheckpointName::AfterResults => {
                let context = match changes {
                    Some(c) => format!("{excerpt}\n\n--- changes ---\n{c}"),
                    None => excerpt.to_string(),
                };
                Some((name, context))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::agent::AgentReply;
    use crate::io::prompt::REVIEWER_HEADING;
    use crate::test_support::ScriptedAgent;

    fn names(plan: &[(CheckpointName, String)]) -> Vec<CheckpointName> {
        plan.iter().map(|(name, _)| *name).collect()
    }

    #[test]
    fn only_after_results_without_changes_or_tests() {
        let plan = planned_checkpoints(None, "implemented the parser", 1000);
        assert_eq!(names(&plan), vec![CheckpointName::AfterResults]);
    }

    #[test]
    fn blank_change_summary_skips_code_review() {
        let plan = planned_checkpoints(Some("  \n"), "done", 1000);
        assert_eq!(names(&plan), vec![CheckpointName::AfterResults]);
    }

    #[test]
    fn all_three_in_declared_order() {
        let plan = planned_checkpoints(
            Some("uncommitted:\n M src/lib.rs"),
            "ran cargo test: 12 passed",
            1000,
        );
        assert_eq!(names(&plan), CheckpointName::ORDER.to_vec());
        assert!(plan[2].1.contains("src/lib.rs"));
    }

    #[test]
    fn test_markers_are_read_from_the_excerpt() {
        let output = format!("tests passed\n{}", "x".repeat(100));
        let plan = planned_checkpoints(None, &output, 50);
        assert_eq!(names(&plan), vec![CheckpointName::AfterResults]);
    }

    #[test]
    fn flagged_reply_lists_issue_lines() {
        let agent = ScriptedAgent::new().with_reviews(vec![AgentReply::ok(
            "looks fine overall\nCRITICAL: migration drops the users table\n",
        )]);
        let validator = CheckpointValidator::new(&agent, "TASKS.md");

        let result = validator.run(CheckpointName::AfterCodeChanges, "diff", 3);

        assert_eq!(result.verdict, Verdict::Flagged);
        assert_eq!(
            result.issues,
            vec!["CRITICAL: migration drops the users table".to_string()]
        );
        assert!(result.reviewed);
        let calls = agent.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].prompt.starts_with(REVIEWER_HEADING));
        assert!(!calls[0].elevated);
    }

    #[test]
    fn failed_reviewer_call_counts_as_passed() {
        let agent = ScriptedAgent::new()
            .with_reviews(vec![AgentReply::failed("FAILED to reach model")]);
        let validator = CheckpointValidator::new(&agent, "TASKS.md");

        let result = validator.run(CheckpointName::AfterResults, "output", 1);

        assert_eq!(result.verdict, Verdict::Passed);
        assert!(!result.reviewed);
        assert!(result.issues.is_empty());
    }
}
