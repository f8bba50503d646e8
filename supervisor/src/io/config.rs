//! Supervisor configuration stored in `.supervisor/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Supervisor configuration (TOML).
///
/// Every field is optional in the file; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Agent attempts per iteration before the iteration is abandoned.
    pub max_retries: u32,

    /// Pause between a failed attempt's self-debug call and the next attempt.
    pub retry_delay_secs: u64,

    /// Lines of failing output handed to the self-debug prompt.
    pub debug_tail_lines: usize,

    /// Bytes of agent output embedded in a checkpoint review prompt.
    pub review_excerpt_bytes: usize,

    pub agent: AgentConfig,
    pub resources: ResourceConfig,
    pub paths: PathsConfig,
    pub sandbox: SandboxConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Base command; the prompt is written to its stdin.
    pub command: Vec<String>,
    /// Extra arguments appended when the call is elevated.
    pub elevated_args: Vec<String>,
    /// Optional wall-clock bound per invocation. Unbounded when unset.
    pub timeout_secs: Option<u64>,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResourceConfig {
    pub max_disk_percent: u8,
    pub min_available_memory_mb: u64,
    /// Pause after the first pressure reading before re-checking.
    pub pause_secs: u64,
    /// Path whose filesystem is sampled for disk usage.
    pub disk_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    /// Root for logs, metrics and snapshots.
    pub state_dir: PathBuf,
    /// Marker file whose existence ends the run at the next done check.
    pub sentinel: PathBuf,
    /// Mutable state copied into each error snapshot (files or directories).
    pub state_artifacts: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    pub image: String,
    pub dockerfile: PathBuf,
    /// Command run inside the container; supervisor arguments are appended.
    pub entrypoint: Vec<String>,
    pub cpus: String,
    pub memory: String,
    pub workspace_mount: String,
    /// Host credentials directory, mounted read-only. `~` expands to `$HOME`.
    pub credentials_dir: PathBuf,
    pub credentials_mount: String,
    /// Countdown before an uncontained run starts when isolation is bypassed.
    pub grace_secs: u64,
    /// Environment variable set to `1` inside the isolated instance.
    pub marker_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotifyConfig {
    /// HTTP endpoint receiving the summary as a POST body.
    pub webhook_url: Option<String>,
    /// Command receiving the summary on stdin (used when no webhook is set).
    pub command: Option<Vec<String>>,
    pub timeout_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 10,
            debug_tail_lines: 50,
            review_excerpt_bytes: 8_000,
            agent: AgentConfig::default(),
            resources: ResourceConfig::default(),
            paths: PathsConfig::default(),
            sandbox: SandboxConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string(), "-p".to_string()],
            elevated_args: vec!["--dangerously-skip-permissions".to_string()],
            timeout_secs: None,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_disk_percent: 90,
            min_available_memory_mb: 500,
            pause_secs: 60,
            disk_path: PathBuf::from("."),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".supervisor"),
            sentinel: PathBuf::from(".supervisor/DONE"),
            state_artifacts: vec![PathBuf::from(".supervisor/state")],
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            command: None,
            timeout_secs: 10,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "supervisor-sandbox:latest".to_string(),
            dockerfile: PathBuf::from("Dockerfile.sandbox"),
            entrypoint: vec!["supervisor".to_string()],
            cpus: "2".to_string(),
            memory: "4g".to_string(),
            workspace_mount: "/workspace".to_string(),
            credentials_dir: PathBuf::from("~/.claude"),
            credentials_mount: "/home/agent/.claude".to_string(),
            grace_secs: 10,
            marker_env: "SUPERVISOR_SANDBOXED".to_string(),
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.agent.timeout_secs == Some(0) {
            return Err(anyhow!("agent.timeout_secs must be > 0 when set"));
        }
        if self.notify.timeout_secs == 0 {
            return Err(anyhow!("notify.timeout_secs must be > 0"));
        }
        if !(1..=100).contains(&self.resources.max_disk_percent) {
            return Err(anyhow!("resources.max_disk_percent must be in 1..=100"));
        }
        if self.sandbox.image.trim().is_empty() {
            return Err(anyhow!("sandbox.image must be non-empty"));
        }
        if self.sandbox.entrypoint.is_empty() {
            return Err(anyhow!("sandbox.entrypoint must be a non-empty array"));
        }
        if let Some(command) = &self.notify.command
            && command.is_empty()
        {
            return Err(anyhow!("notify.command must be non-empty when set"));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl ResourceConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_secs(self.pause_secs)
    }

    pub fn min_available_memory_bytes(&self) -> u64 {
        self.min_available_memory_mb * 1024 * 1024
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SupervisorConfig::default()`.
pub fn load_config(path: &Path) -> Result<SupervisorConfig> {
    if !path.exists() {
        let cfg = SupervisorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SupervisorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
