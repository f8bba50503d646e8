//! End-of-run notification delivery.
//!
//! Delivery is best-effort: [`dispatch`] logs and swallows every failure so a
//! dead endpoint can never change a run's outcome.

use std::fmt;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{info, warn};

use crate::io::config::NotifyConfig;
use crate::io::process::run_command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
}

impl NotifyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            NotifyLevel::Info => "info",
            NotifyLevel::Warning => "warning",
            NotifyLevel::Error => "error",
        }
    }
}

impl fmt::Display for NotifyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Notifier {
    fn notify(&self, summary: &str, level: NotifyLevel) -> Result<()>;
}

/// Deliver `summary`, logging instead of propagating any failure.
pub fn dispatch<N: Notifier + ?Sized>(notifier: &N, summary: &str, level: NotifyLevel) {
    match notifier.notify(summary, level) {
        Ok(()) => info!(%level, "notification delivered"),
        Err(err) => warn!(err = %format!("{err:#}"), %level, "notification failed"),
    }
}

/// POSTs the summary as a text body (ntfy-style headers).
pub struct WebhookNotifier {
    client: reqwest::blocking::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build notification client")?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, summary: &str, level: NotifyLevel) -> Result<()> {
        let priority = match level {
            NotifyLevel::Info => "default",
            NotifyLevel::Warning => "high",
            NotifyLevel::Error => "urgent",
        };
        self.client
            .post(&self.url)
            .header("Title", "supervisor")
            .header("Priority", priority)
            .header("Tags", level.as_str())
            .body(summary.to_string())
            .send()
            .with_context(|| format!("post notification to {}", self.url))?
            .error_for_status()
            .context("notification endpoint rejected summary")?;
        Ok(())
    }
}

/// Runs a command with the summary on stdin and the level in `SUPERVISOR_NOTIFY_LEVEL`.
pub struct CommandNotifier {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandNotifier {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, summary: &str, level: NotifyLevel) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("empty notify command"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).env("SUPERVISOR_NOTIFY_LEVEL", level.as_str());
        let output = run_command(cmd, Some(summary.as_bytes()), Some(self.timeout), 10_000)
            .with_context(|| format!("run notify command {program}"))?;
        if !output.success() {
            return Err(anyhow!(
                "notify command failed: {}",
                output.combined_text("notify").trim()
            ));
        }
        Ok(())
    }
}

/// Used when no sink is configured; the summary only reaches the diagnostics log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, summary: &str, level: NotifyLevel) -> Result<()> {
        info!(%level, summary, "run summary (no notification sink configured)");
        Ok(())
    }
}

/// The sink selected by `[notify]` config. A webhook takes precedence over a command.
pub enum ConfiguredNotifier {
    Webhook(WebhookNotifier),
    Command(CommandNotifier),
    Log(LogNotifier),
}

impl ConfiguredNotifier {
    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        if let Some(url) = &config.webhook_url {
            return Ok(Self::Webhook(WebhookNotifier::new(url, timeout)?));
        }
        if let Some(command) = &config.command {
            return Ok(Self::Command(CommandNotifier::new(command.clone(), timeout)));
        }
        Ok(Self::Log(LogNotifier))
    }
}

impl Notifier for ConfiguredNotifier {
    fn notify(&self, summary: &str, level: NotifyLevel) -> Result<()> {
        match self {
            Self::Webhook(n) => n.notify(summary, level),
            Self::Command(n) => n.notify(summary, level),
            Self::Log(n) => n.notify(summary, level),
        }
    }
}
