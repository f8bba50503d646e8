//! Scripted fakes for every collaborator seam of the supervisor.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::io::agent::{AgentReply, AgentRunner};
use crate::io::config::SupervisorConfig;
use crate::io::git::ChangeProbe;
use crate::io::notify::{Notifier, NotifyLevel};
use crate::io::prompt::{REVIEWER_HEADING, SELF_DEBUG_HEADING};
use crate::io::resources::{ResourceProbe, ResourceSample};
use crate::io::sandbox::{IsolationRuntime, LaunchSpec};

const MB: u64 = 1024 * 1024;

/// Config with every delay zeroed.
pub fn fast_config() -> SupervisorConfig {
    let mut config = SupervisorConfig {
        retry_delay_secs: 0,
        ..SupervisorConfig::default()
    };
    config.resources.pause_secs = 0;
    config.sandbox.grace_secs = 0;
    config
}

/// Temp workspace containing `TASKS.md`.
pub fn workspace_with_tasks(tasks: &str) -> TempDir {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("TASKS.md"), tasks).expect("write TASKS.md");
    temp
}

/// Which kind of call a prompt represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Task,
    SelfDebug,
    Review,
}

impl CallKind {
    pub fn of(prompt: &str) -> Self {
        if prompt.starts_with(REVIEWER_HEADING) {
            CallKind::Review
        } else if prompt.starts_with(SELF_DEBUG_HEADING) {
            CallKind::SelfDebug
        } else {
            CallKind::Task
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCall {
    pub kind: CallKind,
    pub prompt: String,
    pub elevated: bool,
}

/// Agent with one reply queue per call kind.
///
/// Exhausted queues fall back to a successful reply: task calls report work
/// done, self-debug calls report a diagnosis, reviews report no issues.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    tasks: RefCell<VecDeque<AgentReply>>,
    debugs: RefCell<VecDeque<AgentReply>>,
    reviews: RefCell<VecDeque<AgentReply>>,
    calls: RefCell<Vec<AgentCall>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(self, replies: Vec<AgentReply>) -> Self {
        self.tasks.borrow_mut().extend(replies);
        self
    }

    pub fn with_debugs(self, replies: Vec<AgentReply>) -> Self {
        self.debugs.borrow_mut().extend(replies);
        self
    }

    pub fn with_reviews(self, replies: Vec<AgentReply>) -> Self {
        self.reviews.borrow_mut().extend(replies);
        self
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.calls.borrow().iter().filter(|c| c.kind == kind).count()
    }
}

impl AgentRunner for ScriptedAgent {
    fn invoke(&self, prompt: &str, elevated: bool) -> AgentReply {
        let kind = CallKind::of(prompt);
        self.calls.borrow_mut().push(AgentCall {
            kind,
            prompt: prompt.to_string(),
            elevated,
        });
        let (queue, fallback) = match kind {
            CallKind::Task => (&self.tasks, "completed the task"),
            CallKind::SelfDebug => (&self.debugs, "diagnosed the failure"),
            CallKind::Review => (&self.reviews, "NO ISSUES FOUND"),
        };
        queue
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| AgentReply::ok(fallback))
    }
}

pub fn healthy_sample() -> ResourceSample {
    ResourceSample {
        disk_used_percent: 40,
        available_memory_bytes: 8192 * MB,
    }
}

pub fn disk_pressure_sample() -> ResourceSample {
    ResourceSample {
        disk_used_percent: 97,
        ..healthy_sample()
    }
}

pub fn memory_pressure_sample() -> ResourceSample {
    ResourceSample {
        available_memory_bytes: 64 * MB,
        ..healthy_sample()
    }
}

/// Probe replaying fixed samples, then reporting healthy forever.
#[derive(Debug)]
pub struct ScriptedProbe {
    samples: VecDeque<ResourceSample>,
    failing: bool,
}

impl ScriptedProbe {
    pub fn new(samples: Vec<ResourceSample>) -> Self {
        Self {
            samples: samples.into(),
            failing: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            samples: VecDeque::new(),
            failing: true,
        }
    }
}

impl ResourceProbe for ScriptedProbe {
    fn sample(&mut self) -> Result<ResourceSample> {
        if self.failing {
            return Err(anyhow!("probe unavailable"));
        }
        Ok(self.samples.pop_front().unwrap_or_else(healthy_sample))
    }
}

/// Change probe returning the same summary for every iteration.
#[derive(Debug, Clone, Default)]
pub struct StaticChanges {
    summary: Option<String>,
}

impl StaticChanges {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(summary: &str) -> Self {
        Self {
            summary: Some(summary.to_string()),
        }
    }
}

impl ChangeProbe for StaticChanges {
    fn baseline(&self) -> Option<String> {
        None
    }

    fn summarize(&self, _baseline: Option<&str>) -> Option<String> {
        self.summary.clone()
    }
}

/// Notifier that records every summary, optionally failing each delivery.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: RefCell<Vec<(String, NotifyLevel)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, NotifyLevel)> {
        self.sent.borrow().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, summary: &str, level: NotifyLevel) -> Result<()> {
        self.sent.borrow_mut().push((summary.to_string(), level));
        if self.fail {
            return Err(anyhow!("sink unreachable"));
        }
        Ok(())
    }
}

/// Container runtime that records calls as short strings
/// (`check`, `inspect <image>`, `build <image>`, `run <args>`).
#[derive(Debug)]
pub struct ScriptedRuntime {
    available: bool,
    image_present: bool,
    build_ok: bool,
    exit_code: i32,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRuntime {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            image_present: false,
            build_ok: false,
            exit_code: 0,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn available(image_present: bool) -> Self {
        Self {
            available: true,
            image_present,
            build_ok: true,
            ..Self::unavailable()
        }
    }

    pub fn with_build_ok(mut self, build_ok: bool) -> Self {
        self.build_ok = build_ok;
        self
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl IsolationRuntime for ScriptedRuntime {
    fn check_available(&self) -> Result<()> {
        self.calls.borrow_mut().push("check".to_string());
        if self.available {
            Ok(())
        } else {
            Err(anyhow!("docker is not installed"))
        }
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        self.calls.borrow_mut().push(format!("inspect {image}"));
        Ok(self.image_present)
    }

    fn build_image(&self, image: &str, _dockerfile: &Path, _context_dir: &Path) -> Result<()> {
        self.calls.borrow_mut().push(format!("build {image}"));
        if self.build_ok {
            Ok(())
        } else {
            Err(anyhow!("docker build exited with Some(1)"))
        }
    }

    fn run(&self, spec: &LaunchSpec) -> Result<i32> {
        self.calls
            .borrow_mut()
            .push(format!("run {}", spec.args.join(" ")));
        Ok(self.exit_code)
    }
}
