//! Agent request rendering.
//!
//! The request is a minijinja template compiled into the binary. It tells the
//! agent to implement one task and to leave the checklist alone, since the
//! runner owns completion marking.

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::Task;

const TASK_TEMPLATE: &str = include_str!("prompts/task.md");

/// Template engine wrapper around minijinja.
pub struct PromptBuilder {
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("task", TASK_TEMPLATE)
            .context("compile task template")?;
        Ok(Self { env })
    }

    /// Render the request for `task` from the checklist at `checklist`.
    pub fn render_task(&self, task: &Task, checklist: &Path) -> Result<String> {
        let checklist_name = checklist
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| checklist.display().to_string());
        let template = self.env.get_template("task")?;
        let rendered = template
            .render(context! {
                description => task.description.trim(),
                position => task.position,
                checklist => checklist_name,
            })
            .with_context(|| format!("render request for task on line {}", task.position))?;
        Ok(rendered)
    }
}
