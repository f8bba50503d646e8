//! Isolation boundary activation.
//!
//! The supervisor runs agents with unrestricted permissions, so by default it
//! refuses to do so on the host. [`SandboxLauncher::ensure_isolated`] decides
//! once, at startup, whether this process proceeds in-process (already inside
//! a container, or isolation explicitly bypassed) or re-invokes itself inside
//! a fresh container and only relays that container's exit status.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::errors::SupervisorError;
use crate::io::config::SandboxConfig;

/// Command-line flag that skips isolation. Never forwarded into the container.
pub const BYPASS_FLAG: &str = "--dangerously-skip-isolation";

/// Files whose presence indicates a container runtime.
pub const CONTAINER_MARKER_FILES: [&str; 2] = ["/.dockerenv", "/run/.containerenv"];

/// Where the caller should continue after isolation has been decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Already inside the isolation boundary; run the supervisor in-process.
    Contained,
    /// Isolation bypassed after the grace period; run in-process on the host.
    Uncontained,
    /// The supervisor ran inside a container; propagate its exit code.
    Delegated { exit_code: i32 },
}

/// Everything needed to start the isolated instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub image: String,
    pub workspace: PathBuf,
    pub workspace_mount: String,
    pub credentials: Option<PathBuf>,
    pub credentials_mount: String,
    pub cpus: String,
    pub memory: String,
    pub marker_env: String,
    pub entrypoint: Vec<String>,
    /// Supervisor arguments, bypass flag removed.
    pub args: Vec<String>,
}

/// Container runtime operations used by the launcher.
pub trait IsolationRuntime {
    /// Runtime installed and its daemon reachable.
    fn check_available(&self) -> Result<()>;
    fn image_exists(&self, image: &str) -> Result<bool>;
    fn build_image(&self, image: &str, dockerfile: &Path, context_dir: &Path) -> Result<()>;
    /// Run to completion with inherited stdio; returns the exit code.
    fn run(&self, spec: &LaunchSpec) -> Result<i32>;
}

/// Docker CLI runtime.
pub struct DockerRuntime;

impl IsolationRuntime for DockerRuntime {
    fn check_available(&self) -> Result<()> {
        let version = Command::new("docker")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("docker is not installed")?;
        if !version.success() {
            return Err(anyhow!("docker --version failed"));
        }

        let info = Command::new("docker")
            .arg("info")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("failed to check Docker daemon")?;
        if !info.success() {
            return Err(anyhow!(
                "Docker daemon is not running. Start Docker and try again."
            ));
        }
        Ok(())
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        let status = Command::new("docker")
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("failed to inspect Docker image")?;
        Ok(status.success())
    }

    #[instrument(skip_all, fields(image = image))]
    fn build_image(&self, image: &str, dockerfile: &Path, context_dir: &Path) -> Result<()> {
        info!(image, dockerfile = %dockerfile.display(), "building sandbox image");
        let status = Command::new("docker")
            .arg("build")
            .arg("-t")
            .arg(image)
            .arg("-f")
            .arg(dockerfile)
            .arg(context_dir)
            .status()
            .context("failed to run docker build")?;
        if !status.success() {
            return Err(anyhow!(
                "docker build exited with {:?} for image '{image}'",
                status.code()
            ));
        }
        Ok(())
    }

    fn run(&self, spec: &LaunchSpec) -> Result<i32> {
        let args = docker_run_args(spec);
        debug!(?args, "starting sandbox container");
        let status = Command::new("docker")
            .args(&args)
            .status()
            .context("failed to run docker")?;
        Ok(status.code().unwrap_or(crate::exit_codes::INVALID))
    }
}

/// Arguments for `docker` that start the isolated supervisor instance.
pub fn docker_run_args(spec: &LaunchSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--init".to_string(),
        format!("--cpus={}", spec.cpus),
        format!("--memory={}", spec.memory),
        "-v".to_string(),
        format!("{}:{}:rw", spec.workspace.display(), spec.workspace_mount),
    ];
    if let Some(credentials) = &spec.credentials {
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}:ro",
            credentials.display(),
            spec.credentials_mount
        ));
    }
    args.push("-w".to_string());
    args.push(spec.workspace_mount.clone());
    args.push("-e".to_string());
    args.push(format!("{}=1", spec.marker_env));
    if std::env::var_os("RUST_LOG").is_some() {
        args.push("-e".to_string());
        args.push("RUST_LOG".to_string());
    }
    args.push(spec.image.clone());
    args.extend(spec.entrypoint.iter().cloned());
    args.extend(spec.args.iter().cloned());
    args
}

/// Drop every occurrence of the bypass flag.
pub fn strip_bypass_flag(args: &[String]) -> Vec<String> {
    args.iter()
        .filter(|arg| arg.as_str() != BYPASS_FLAG)
        .cloned()
        .collect()
}

/// True when `marker_env` is `1` or a container marker file exists.
pub fn detect_containment(marker_env: &str, marker_files: &[&str]) -> bool {
    if std::env::var(marker_env).is_ok_and(|v| v == "1") {
        return true;
    }
    marker_files.iter().any(|f| Path::new(f).exists())
}

/// Expand a leading `~` using `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

pub struct SandboxLauncher<R> {
    runtime: R,
    config: SandboxConfig,
    workspace: PathBuf,
    contained: bool,
}

impl<R: IsolationRuntime> SandboxLauncher<R> {
    /// Detects containment from the environment at construction.
    pub fn new(runtime: R, config: SandboxConfig, workspace: PathBuf) -> Self {
        let contained = detect_containment(&config.marker_env, &CONTAINER_MARKER_FILES);
        Self {
            runtime,
            config,
            workspace,
            contained,
        }
    }

    pub fn with_containment(mut self, contained: bool) -> Self {
        self.contained = contained;
        self
    }

    /// Decide the execution context. `args` excludes the program name.
    ///
    /// Errors are `SupervisorError::IsolationUnavailable` or
    /// `SupervisorError::ProvisioningFailed`; both must stop the process
    /// before any agent runs.
    #[instrument(skip_all, fields(contained = self.contained, bypass = bypass))]
    pub fn ensure_isolated(&self, args: &[String], bypass: bool) -> Result<ExecutionContext> {
        if self.contained {
            info!("running inside isolation boundary");
            return Ok(ExecutionContext::Contained);
        }
        if bypass {
            bypass_grace_period(Duration::from_secs(self.config.grace_secs));
            warn!("proceeding without isolation");
            return Ok(ExecutionContext::Uncontained);
        }

        self.runtime
            .check_available()
            .map_err(|err| SupervisorError::IsolationUnavailable(format!("{err:#}")))?;

        let image = &self.config.image;
        let present = self
            .runtime
            .image_exists(image)
            .map_err(|err| SupervisorError::IsolationUnavailable(format!("{err:#}")))?;
        if !present {
            let dockerfile = self.workspace.join(&self.config.dockerfile);
            if !dockerfile.exists() {
                return Err(SupervisorError::ProvisioningFailed(format!(
                    "image '{image}' is missing and {} does not exist",
                    dockerfile.display()
                ))
                .into());
            }
            self.runtime
                .build_image(image, &dockerfile, &self.workspace)
                .map_err(|err| SupervisorError::ProvisioningFailed(format!("{err:#}")))?;
        }

        let spec = self.launch_spec(args);
        info!(image = %spec.image, "re-invoking supervisor inside sandbox");
        let exit_code = self
            .runtime
            .run(&spec)
            .map_err(|err| SupervisorError::IsolationUnavailable(format!("{err:#}")))?;
        info!(exit_code, "sandboxed supervisor exited");
        Ok(ExecutionContext::Delegated { exit_code })
    }

    fn launch_spec(&self, args: &[String]) -> LaunchSpec {
        let credentials = expand_home(&self.config.credentials_dir);
        let credentials = if credentials.exists() {
            Some(credentials)
        } else {
            warn!(path = %credentials.display(), "credentials dir missing, not mounted");
            None
        };
        LaunchSpec {
            image: self.config.image.clone(),
            workspace: self.workspace.clone(),
            workspace_mount: self.config.workspace_mount.clone(),
            credentials,
            credentials_mount: self.config.credentials_mount.clone(),
            cpus: self.config.cpus.clone(),
            memory: self.config.memory.clone(),
            marker_env: self.config.marker_env.clone(),
            entrypoint: self.config.entrypoint.clone(),
            args: strip_bypass_flag(args),
        }
    }
}

/// Print the risk warning and count down. Ctrl-C during the countdown ends the
/// process with the default SIGINT disposition, before any agent call.
fn bypass_grace_period(grace: Duration) {
    let mut stderr = std::io::stderr();
    let _ = writeln!(
        stderr,
        "WARNING: running WITHOUT isolation. The agent has unrestricted permissions and \
         can irreversibly modify or delete anything this user can access."
    );
    let secs = grace.as_secs();
    if secs == 0 {
        return;
    }
    let _ = writeln!(stderr, "Press Ctrl-C within {secs}s to abort.");
    for remaining in (1..=secs).rev() {
        let _ = write!(stderr, "\rstarting in {remaining:>3}s ");
        let _ = stderr.flush();
        thread::sleep(Duration::from_secs(1));
    }
    let _ = writeln!(stderr);
}
