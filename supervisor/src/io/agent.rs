//! Agent invocation abstraction.
//!
//! The [`AgentRunner`] trait decouples the supervisor loop from the agent
//! backend (by default the `claude` CLI in print mode). Tests use scripted
//! runners that return predetermined replies without spawning processes.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::io::config::AgentConfig;
use crate::io::process::run_command;

/// Reply from one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub ok: bool,
    pub output: String,
}

impl AgentReply {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: output.into(),
        }
    }
}

/// Abstraction over agent backends.
///
/// A call blocks until the agent finishes and cannot be preempted. Replies are
/// not deterministic; callers must not assume the same prompt yields the same text.
pub trait AgentRunner {
    /// Submit `prompt`. `elevated` grants the agent unrestricted permissions.
    fn invoke(&self, prompt: &str, elevated: bool) -> AgentReply;
}

/// Runner that spawns the configured agent CLI with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct CliAgentRunner {
    workdir: PathBuf,
    command: Vec<String>,
    elevated_args: Vec<String>,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
}

impl CliAgentRunner {
    pub fn from_config(config: &AgentConfig, workdir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            command: config.command.clone(),
            elevated_args: config.elevated_args.clone(),
            timeout: config.timeout(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn build_command(&self, elevated: bool) -> Command {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        if elevated {
            cmd.args(&self.elevated_args);
        }
        cmd.current_dir(&self.workdir);
        cmd
    }
}

impl AgentRunner for CliAgentRunner {
    #[instrument(skip_all, fields(elevated = elevated, prompt_bytes = prompt.len()))]
    fn invoke(&self, prompt: &str, elevated: bool) -> AgentReply {
        info!(program = %self.command[0], "invoking agent");
        let cmd = self.build_command(elevated);
        let output = match run_command(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "agent invocation failed to run");
                return AgentReply::failed(format!("agent invocation error: {err:#}"));
            }
        };

        let text = output.combined_text("agent");
        if output.success() {
            debug!("agent completed successfully");
            AgentReply::ok(text)
        } else {
            warn!(exit_code = ?output.status.code(), timed_out = output.timed_out, "agent failed");
            AgentReply::failed(text)
        }
    }
}
