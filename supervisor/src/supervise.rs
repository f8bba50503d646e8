//! The iteration loop: resource gate, attempts with self-debug retries,
//! checkpoint reviews, done check.
//!
//! The loop runs on the caller's thread and is oblivious to whether it is
//! running on the host or inside the sandbox. Every collaborator is injected
//! so tests can drive it with scripted fakes.

use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::checkpoint::{CheckpointValidator, planned_checkpoints};
use crate::core::run_state::RunState;
use crate::core::types::{IterationRecord, Outcome, RunStatus};
use crate::core::verdict::tail_lines;
use crate::errors::SupervisorError;
use crate::io::agent::AgentRunner;
use crate::io::config::SupervisorConfig;
use crate::io::git::ChangeProbe;
use crate::io::metrics::{MetricsRecord, MetricsRecorder};
use crate::io::notify::{Notifier, NotifyLevel, dispatch};
use crate::io::paths::{SupervisorPaths, run_stamp};
use crate::io::prompt::{SelfDebugInputs, render_self_debug};
use crate::io::resources::{GateDecision, ResourceGovernor, ResourceProbe};
use crate::io::run_log::RunLog;
use crate::io::snapshot::ErrorSnapshotter;

/// Inputs for one supervised run.
#[derive(Debug, Clone)]
pub struct SuperviseRequest<'a> {
    pub workdir: &'a Path,
    /// Relative paths resolve against `workdir`.
    pub task_file: &'a Path,
    pub max_iterations: u32,
    pub config: &'a SupervisorConfig,
}

/// Result of a run that reached `Terminated`.
#[derive(Debug, Clone)]
pub struct SuperviseOutcome {
    pub status: RunStatus,
    pub run_state: RunState,
    pub metrics: MetricsRecord,
    pub log_path: PathBuf,
    pub metrics_path: PathBuf,
}

/// Run the supervisor loop until the sentinel appears, the iteration budget is
/// used up, or resource pressure forces an abort.
///
/// Fails before the loop starts with `SupervisorError::Configuration` when the
/// task file is missing or the budget is zero. Once the loop has started, the
/// only error path is failing to write the metrics record.
pub fn run_supervisor<A, P, C, N, F>(
    request: &SuperviseRequest<'_>,
    agent: &A,
    probe: P,
    changes: &C,
    notifier: &N,
    mut on_iteration: F,
) -> Result<SuperviseOutcome>
where
    A: AgentRunner + ?Sized,
    P: ResourceProbe,
    C: ChangeProbe + ?Sized,
    N: Notifier + ?Sized,
    F: FnMut(&IterationRecord),
{
    let config = request.config;
    if request.max_iterations == 0 {
        return Err(SupervisorError::Configuration("max_iterations must be >= 1".to_string()).into());
    }
    let task_path = request.workdir.join(request.task_file);
    if !task_path.is_file() {
        return Err(SupervisorError::Configuration(format!(
            "task file not found: {}",
            task_path.display()
        ))
        .into());
    }
    let task = std::fs::read_to_string(&task_path).map_err(|err| {
        SupervisorError::Configuration(format!("read task file {}: {err}", task_path.display()))
    })?;

    let started_at = Utc::now();
    let paths = SupervisorPaths::reserve(request.workdir, &config.paths, &run_stamp(started_at))?;
    let stamp = paths.run_key.clone();
    let mut run_log = RunLog::open(&paths.log_path)?;
    let task_label = request.task_file.display().to_string();

    let mut artifacts = config.paths.state_artifacts.clone();
    artifacts.push(request.task_file.to_path_buf());
    let snapshotter = ErrorSnapshotter::new(
        paths.snapshots_dir.clone(),
        request.workdir.to_path_buf(),
        artifacts,
        paths.log_path.clone(),
    );

    logged(run_log.section(
        &format!("supervisor run {stamp}"),
        &format!(
            "task_file: {task_label}\nmax_iterations: {}\nmax_retries: {}\n",
            request.max_iterations, config.max_retries
        ),
    ));
    info!(
        stamp = %stamp,
        task_file = %task_label,
        max_iterations = request.max_iterations,
        "supervisor run started"
    );

    let mut governor = ResourceGovernor::from_config(probe, &config.resources);
    let mut iterations = IterationRunner {
        agent,
        changes,
        config,
        task: &task,
        task_label: &task_label,
        stamp: &stamp,
        run_log: &mut run_log,
        snapshotter: &snapshotter,
    };

    let mut run_state = RunState::default();
    let mut status = RunStatus::BudgetExhausted;
    for index in 1..=request.max_iterations {
        if let GateDecision::Abort(reason) = governor.gate() {
            warn!(iteration = index, reason = %reason, "aborting run on resource pressure");
            logged(iterations.run_log.note(&format!(
                "resource exhaustion before iteration {index}: {reason}"
            )));
            status = RunStatus::ResourceExhaustion;
            break;
        }

        let record = iterations.run(index);
        run_state.record(&record);
        on_iteration(&record);

        if paths.sentinel_present() {
            info!(iteration = index, "termination sentinel found");
            logged(iterations.run_log.note(&format!(
                "termination sentinel {} found after iteration {index}",
                paths.sentinel_path.display()
            )));
            status = RunStatus::DoneSignal;
            break;
        }
    }

    let metrics = MetricsRecorder::new(paths.metrics_path.clone(), started_at)
        .finalize(&run_state, request.task_file, status)
        .context("write metrics record")?;
    logged(run_log.section("run finished", &metrics.summary_line()));
    info!(status = %status, iterations = run_state.iterations_run, "supervisor run finished");

    dispatch(notifier, &metrics.summary_line(), notify_level(status, &run_state));

    Ok(SuperviseOutcome {
        status,
        run_state,
        metrics,
        log_path: paths.log_path,
        metrics_path: paths.metrics_path,
    })
}

/// `Error` on resource exhaustion, `Warning` when anything failed or was flagged.
pub fn notify_level(status: RunStatus, run_state: &RunState) -> NotifyLevel {
    if status == RunStatus::ResourceExhaustion {
        NotifyLevel::Error
    } else if run_state.failures > 0 || run_state.falsifier_issue_count > 0 {
        NotifyLevel::Warning
    } else {
        NotifyLevel::Info
    }
}

/// Per-iteration collaborators, borrowed for the length of the loop.
struct IterationRunner<'r, A: ?Sized, C: ?Sized> {
    agent: &'r A,
    changes: &'r C,
    config: &'r SupervisorConfig,
    task: &'r str,
    task_label: &'r str,
    stamp: &'r str,
    run_log: &'r mut RunLog,
    snapshotter: &'r ErrorSnapshotter,
}

impl<A: AgentRunner + ?Sized, C: ChangeProbe + ?Sized> IterationRunner<'_, A, C> {
    fn run(&mut self, index: u32) -> IterationRecord {
        let max_attempts = self.config.max_retries;
        let baseline = self.changes.baseline();
        let mut attempts = 0u32;
        let mut debug_calls = 0u32;

        let output = loop {
            attempts += 1;
            info!(iteration = index, attempt = attempts, "agent attempt");
            let reply = self.agent.invoke(self.task, true);
            logged(self.run_log.attempt(index, attempts, max_attempts, &reply));
            if reply.ok {
                break Some(reply.output);
            }
            warn!(iteration = index, attempt = attempts, "agent attempt failed");
            if attempts >= max_attempts {
                break None;
            }
            if self.self_debug(index, attempts, &reply.output) {
                debug_calls += 1;
            }
            let delay = self.config.retry_delay();
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        };

        let Some(output) = output else {
            warn!(iteration = index, attempts, "iteration exhausted its retries");
            let snapshot = self.snapshotter.snapshot(self.stamp, index);
            let location = snapshot
                .as_deref()
                .map_or_else(|| "not captured".to_string(), |dir| dir.display().to_string());
            logged(self.run_log.note(&format!(
                "iteration {index} failed after {attempts} attempts; snapshot: {location}"
            )));
            return IterationRecord {
                index,
                outcome: Outcome::Failure,
                attempts,
                debug_calls,
                checkpoints: Vec::new(),
            };
        };

        let summary = self.changes.summarize(baseline.as_deref());
        let validator = CheckpointValidator::new(self.agent, self.task_label);
        let mut checkpoints = Vec::new();
        for (name, context) in
            planned_checkpoints(summary.as_deref(), &output, self.config.review_excerpt_bytes)
        {
            let result = validator.run(name, &context, index);
            logged(self.run_log.checkpoint(index, &result));
            checkpoints.push(result);
        }

        IterationRecord {
            index,
            outcome: Outcome::Success,
            attempts,
            debug_calls,
            checkpoints,
        }
    }

    /// Best-effort diagnostic call after a failed attempt. Returns whether the
    /// agent was invoked; its reply never affects the iteration outcome.
    fn self_debug(&mut self, index: u32, attempt: u32, failed_output: &str) -> bool {
        let lines = self.config.debug_tail_lines;
        let tail = tail_lines(failed_output, lines);
        let prompt = match render_self_debug(&SelfDebugInputs {
            iteration: index,
            attempt,
            max_attempts: self.config.max_retries,
            task_file: self.task_label,
            tail: &tail,
            tail_lines: lines,
        }) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "self-debug prompt failed to render");
                return false;
            }
        };
        let reply = self.agent.invoke(&prompt, true);
        if !reply.ok {
            warn!(iteration = index, attempt, "self-debug call failed, ignoring");
        }
        logged(self.run_log.self_debug(index, attempt, &reply));
        true
    }
}

/// Run log writes never stop the loop.
fn logged(result: Result<()>) {
    if let Err(err) = result {
        warn!(err = %format!("{err:#}"), "run log append failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CheckpointName;
    use crate::io::agent::AgentReply;
    use crate::test_support::{
        CallKind, RecordingNotifier, ScriptedAgent, ScriptedProbe, StaticChanges, fast_config,
        workspace_with_tasks,
    };

    fn request<'a>(
        root: &'a Path,
        config: &'a SupervisorConfig,
        max_iterations: u32,
    ) -> SuperviseRequest<'a> {
        SuperviseRequest {
            workdir: root,
            task_file: Path::new("TASKS.md"),
            max_iterations,
            config,
        }
    }

    #[test]
    fn missing_task_file_is_a_configuration_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = fast_config();
        let agent = ScriptedAgent::new();

        let err = run_supervisor(
            &request(temp.path(), &config, 3),
            &agent,
            ScriptedProbe::new(Vec::new()),
            &StaticChanges::none(),
            &RecordingNotifier::new(),
            |_| {},
        )
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<SupervisorError>(),
            Some(SupervisorError::Configuration(_))
        ));
        assert!(agent.calls().is_empty());
        assert!(!temp.path().join(".supervisor").exists());
    }

    #[test]
    fn zero_budget_is_rejected() {
        let temp = workspace_with_tasks("- one\n");
        let config = fast_config();
        let err = run_supervisor(
            &request(temp.path(), &config, 0),
            &ScriptedAgent::new(),
            ScriptedProbe::new(Vec::new()),
            &StaticChanges::none(),
            &RecordingNotifier::new(),
            |_| {},
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("max_iterations"));
    }

    #[test]
    fn task_text_is_the_prompt_for_every_attempt() {
        let temp = workspace_with_tasks("- add a --verbose flag\n");
        let config = fast_config();
        let agent = ScriptedAgent::new().with_tasks(vec![
            AgentReply::failed("boom"),
            AgentReply::ok("done"),
            AgentReply::ok("done"),
        ]);

        run_supervisor(
            &request(temp.path(), &config, 2),
            &agent,
            ScriptedProbe::new(Vec::new()),
            &StaticChanges::none(),
            &RecordingNotifier::new(),
            |_| {},
        )
        .expect("run");

        let tasks: Vec<_> = agent
            .calls()
            .into_iter()
            .filter(|c| c.kind == CallKind::Task)
            .collect();
        assert_eq!(tasks.len(), 3);
        assert!(
            tasks
                .iter()
                .all(|c| c.prompt == "- add a --verbose flag\n" && c.elevated)
        );
    }

    #[test]
    fn self_debug_sees_the_failing_tail_and_its_failure_is_ignored() {
        let temp = workspace_with_tasks("- task\n");
        let mut config = fast_config();
        config.debug_tail_lines = 1;
        let agent = ScriptedAgent::new()
            .with_tasks(vec![
                AgentReply::failed("compiling\nerror: linker not found"),
                AgentReply::ok("fixed"),
            ])
            .with_debugs(vec![AgentReply::failed("debugger crashed")]);

        let mut records = Vec::new();
        let outcome = run_supervisor(
            &request(temp.path(), &config, 1),
            &agent,
            ScriptedProbe::new(Vec::new()),
            &StaticChanges::none(),
            &RecordingNotifier::new(),
            |r| records.push(r.clone()),
        )
        .expect("run");

        assert_eq!(outcome.run_state.successes, 1);
        assert_eq!(records[0].attempts, 2);
        assert_eq!(records[0].debug_calls, 1);
        let debug = agent
            .calls()
            .into_iter()
            .find(|c| c.kind == CallKind::SelfDebug)
            .expect("self-debug call");
        assert!(debug.prompt.contains("error: linker not found"));
        assert!(!debug.prompt.contains("compiling"));
    }

    #[test]
    fn run_log_holds_attempt_output_and_verdicts() {
        let temp = workspace_with_tasks("- task\n");
        let config = fast_config();
        let agent = ScriptedAgent::new()
            .with_tasks(vec![AgentReply::ok("wrote parser.rs")])
            .with_reviews(vec![AgentReply::ok("FAILED: no error handling")]);

        let outcome = run_supervisor(
            &request(temp.path(), &config, 1),
            &agent,
            ScriptedProbe::new(Vec::new()),
            &StaticChanges::none(),
            &RecordingNotifier::new(),
            |_| {},
        )
        .expect("run");

        let log = std::fs::read_to_string(&outcome.log_path).expect("read log");
        assert!(log.contains("wrote parser.rs"));
        assert!(log.contains(&format!("checkpoint {} FLAGGED", CheckpointName::AfterResults)));
        assert_eq!(outcome.run_state.falsifier_issue_count, 1);
    }

    #[test]
    fn notify_level_reflects_outcome() {
        let clean = RunState {
            iterations_run: 2,
            successes: 2,
            ..RunState::default()
        };
        let flagged = RunState {
            falsifier_issue_count: 1,
            ..clean
        };
        assert_eq!(notify_level(RunStatus::DoneSignal, &clean), NotifyLevel::Info);
        assert_eq!(
            notify_level(RunStatus::BudgetExhausted, &flagged),
            NotifyLevel::Warning
        );
        assert_eq!(
            notify_level(RunStatus::ResourceExhaustion, &clean),
            NotifyLevel::Error
        );
    }
}
