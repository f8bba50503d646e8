//! Prompt rendering for reviewer and self-debug calls.
//!
//! The main task prompt is the task file content, sent verbatim; only the
//! auxiliary calls are templated.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::types::CheckpointName;

const REVIEWER_TEMPLATE: &str = include_str!("prompts/reviewer.md");
const SELF_DEBUG_TEMPLATE: &str = include_str!("prompts/self_debug.md");

/// First line of every reviewer prompt.
pub const REVIEWER_HEADING: &str = "# Falsifier review";
/// First line of every self-debug prompt.
pub const SELF_DEBUG_HEADING: &str = "# Self-debug";

static ENGINE: LazyLock<PromptEngine> = LazyLock::new(PromptEngine::new);

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("reviewer", REVIEWER_TEMPLATE)
            .expect("reviewer template should be valid");
        env.add_template("self_debug", SELF_DEBUG_TEMPLATE)
            .expect("self_debug template should be valid");
        Self { env }
    }
}

pub struct ReviewInputs<'a> {
    pub checkpoint: CheckpointName,
    pub iteration: u32,
    pub task_file: &'a str,
    pub context: &'a str,
}

pub fn render_reviewer(input: &ReviewInputs<'_>) -> Result<String> {
    let template = ENGINE.env.get_template("reviewer")?;
    let rendered = template.render(context! {
        checkpoint => input.checkpoint.as_str(),
        iteration => input.iteration,
        task_file => input.task_file,
        context => input.context.trim(),
    })?;
    Ok(rendered)
}

pub struct SelfDebugInputs<'a> {
    pub iteration: u32,
    pub attempt: u32,
    pub max_attempts: u32,
    pub task_file: &'a str,
    pub tail: &'a str,
    pub tail_lines: usize,
}

pub fn render_self_debug(input: &SelfDebugInputs<'_>) -> Result<String> {
    let template = ENGINE.env.get_template("self_debug")?;
    let rendered = template.render(context! {
        iteration => input.iteration,
        attempt => input.attempt,
        max_attempts => input.max_attempts,
        task_file => input.task_file,
        tail => input.tail.trim_end(),
        tail_lines => input.tail_lines,
    })?;
    Ok(rendered)
}
