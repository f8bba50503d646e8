//! Autonomous iteration supervisor.
//!
//! Runs the agent against a task file for up to `max_iterations` iterations,
//! inside a container unless isolation is explicitly bypassed.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use supervisor::core::types::RunStatus;
use supervisor::errors::{SupervisorError, exit_code_for};
use supervisor::exit_codes;
use supervisor::io::agent::CliAgentRunner;
use supervisor::io::config::load_config;
use supervisor::io::git::Git;
use supervisor::io::notify::ConfiguredNotifier;
use supervisor::io::paths::SupervisorPaths;
use supervisor::io::resources::{SystemProbe, disk_path};
use supervisor::io::sandbox::{DockerRuntime, ExecutionContext, SandboxLauncher};
use supervisor::logging;
use supervisor::supervise::{SuperviseRequest, run_supervisor};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "supervisor",
    version,
    about = "Supervise unattended agent iterations inside an isolated sandbox"
)]
struct Cli {
    /// Iterations to run before stopping.
    #[arg(default_value_t = 20)]
    max_iterations: u32,

    /// Task file sent verbatim as the agent prompt on every attempt.
    #[arg(default_value = "TASKS.md")]
    task_file: PathBuf,

    /// Run on the host without isolation, after a warning countdown.
    #[arg(long)]
    dangerously_skip_isolation: bool,

    /// Config file (missing file means defaults).
    #[arg(long, default_value = ".supervisor/config.toml")]
    config: PathBuf,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let workdir = std::env::current_dir().context("resolve working directory")?;

    let config = load_config(&workdir.join(&cli.config))
        .map_err(|err| SupervisorError::Configuration(format!("{err:#}")))?;
    if !workdir.join(&cli.task_file).is_file() {
        return Err(SupervisorError::Configuration(format!(
            "task file not found: {}",
            cli.task_file.display()
        ))
        .into());
    }

    let args: Vec<String> = std::env::args_os()
        .skip(1)
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    let launcher = SandboxLauncher::new(DockerRuntime, config.sandbox.clone(), workdir.clone());
    match launcher.ensure_isolated(&args, cli.dangerously_skip_isolation)? {
        ExecutionContext::Delegated { exit_code } => return Ok(exit_code),
        ExecutionContext::Contained | ExecutionContext::Uncontained => {}
    }

    let agent = CliAgentRunner::from_config(&config.agent, &workdir);
    let probe = SystemProbe::new(disk_path(&workdir, &config.resources));
    let changes = Git::new(&workdir).with_ignored_prefix(SupervisorPaths::state_prefix(&config.paths));
    let notifier = ConfiguredNotifier::from_config(&config.notify)?;

    let request = SuperviseRequest {
        workdir: &workdir,
        task_file: &cli.task_file,
        max_iterations: cli.max_iterations,
        config: &config,
    };
    let outcome = run_supervisor(&request, &agent, probe, &changes, &notifier, |record| {
        info!(
            iteration = record.index,
            outcome = ?record.outcome,
            attempts = record.attempts,
            flagged = record.flagged_count(),
            "iteration finished"
        );
    })?;

    println!("{}", outcome.metrics.summary_line());
    println!("log: {}", outcome.log_path.display());
    println!("metrics: {}", outcome.metrics_path.display());

    Ok(match outcome.status {
        RunStatus::DoneSignal | RunStatus::BudgetExhausted => exit_codes::OK,
        RunStatus::ResourceExhaustion => exit_codes::RESOURCE_EXHAUSTED,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_defaults() {
        let cli = Cli::parse_from(["supervisor"]);
        assert_eq!(cli.max_iterations, 20);
        assert_eq!(cli.task_file, PathBuf::from("TASKS.md"));
        assert!(!cli.dangerously_skip_isolation);
        assert_eq!(cli.config, PathBuf::from(".supervisor/config.toml"));
    }

    #[test]
    fn parse_budget_task_and_bypass() {
        let cli = Cli::parse_from([
            "supervisor",
            "5",
            "plan/TODO.md",
            "--dangerously-skip-isolation",
        ]);
        assert_eq!(cli.max_iterations, 5);
        assert_eq!(cli.task_file, PathBuf::from("plan/TODO.md"));
        assert!(cli.dangerously_skip_isolation);
    }
}
