// src/agent/prompt.rs

//! Prompt rendering and commit message templates.

use std::fmt::{Debug, Write as _};

use crate::plan::Task;

use super::{AgentMode, AgentRequest};

pub const DEFAULT_COMMIT_TEMPLATE: &str = "{id}: {title}";

/// Render the prompt sent to the agent for a request.
pub fn render(request: &AgentRequest) -> String {
    let mut out = String::new();

    let _ = match request.mode {
        AgentMode::Plan => writeln!(
            out,
            "Plan task {}: {}\n\nDescribe how you would implement this task. Do not modify any files.",
            request.task_id, request.title
        ),
        AgentMode::Execute => writeln!(
            out,
            "Implement task {}: {}\n\nMake the changes in the current directory. Do not commit; that is done for you.",
            request.task_id, request.title
        ),
    };

    if !request.instructions.trim().is_empty() {
        let _ = write!(out, "\n## Instructions\n\n{}\n", request.instructions.trim());
    }

    if !request.files.is_empty() {
        out.push_str("\n## Files\n\n");
        if request.mode == AgentMode::Execute {
            out.push_str("Only change these files:\n");
        }
        for file in &request.files {
            let _ = writeln!(out, "- {file}");
        }
    }

    if !request.acceptance_criteria.is_empty() {
        out.push_str("\n## Acceptance criteria\n\n");
        for criterion in &request.acceptance_criteria {
            let _ = writeln!(out, "- {criterion}");
        }
    }

    out
}

/// Produces the commit message for a finished task.
pub trait CommitMessageGenerator: Send + Sync + Debug {
    fn message(&self, task: &Task) -> String;
}

/// Subject line from a template with `{id}` and `{title}` placeholders,
/// followed by the acceptance criteria as the body.
#[derive(Debug, Clone)]
pub struct TemplateCommitMessages {
    template: String,
}

impl Default for TemplateCommitMessages {
    fn default() -> Self {
        Self::new(DEFAULT_COMMIT_TEMPLATE)
    }
}

impl TemplateCommitMessages {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl CommitMessageGenerator for TemplateCommitMessages {
    fn message(&self, task: &Task) -> String {
        let title = if task.title.trim().is_empty() {
            task.id.as_str()
        } else {
            task.title.trim()
        };
        let mut message = self
            .template
            .replace("{id}", &task.id)
            .replace("{title}", title);

        if !task.acceptance_criteria.is_empty() {
            message.push_str("\n\n");
            for criterion in &task.acceptance_criteria {
                let _ = writeln!(message, "- {criterion}");
            }
        }
        message
    }
}
