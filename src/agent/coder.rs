use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::engine::{AgentEngine, AgentOutcome};
use crate::agent::prompt;
use crate::agent::tools::{ToolLimits, Toolbox};
use crate::config::AgentConfig;
use crate::error::{AppError, Result};
use crate::platform::types::{Comment, Issue, JobOutcome, RepoRef};
use crate::review::record;
use crate::review::ReviewVerdict;
use crate::shutdown::Interrupt;
use crate::workspace::{Patch, Workspace, WorkspaceManager};

/// Reviewer feedback carried into the next coding attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevisionFeedback {
    pub summary: String,
    pub items: Vec<String>,
}

impl RevisionFeedback {
    pub fn from_verdict(verdict: &ReviewVerdict) -> Self {
        let mut items: Vec<String> = verdict
            .unmet()
            .into_iter()
            .map(|item| format!("Unmet requirement: {}", item.requirement))
            .collect();
        items.extend(
            verdict
                .ci
                .jobs_with(JobOutcome::Fail)
                .into_iter()
                .map(|job| format!("CI job failed: {job}")),
        );
        items.extend(verdict.issues.iter().cloned());
        Self {
            summary: verdict.rationale.clone(),
            items,
        }
    }

    /// Feedback for a rework run: the posted review record plus any human
    /// comments left on the pull request.
    pub fn from_pull_request(record_body: &str, comments: &[Comment], marker: &str) -> Self {
        let items = comments
            .iter()
            .filter(|c| !record::is_review_record(&c.body, marker))
            .map(|c| format!("Comment from {}: {}", c.author, c.body.trim()))
            .collect();
        Self {
            summary: record_body.trim_start_matches(marker).trim().to_string(),
            items,
        }
    }
}

pub struct CodingTask<'a> {
    pub repo: &'a RepoRef,
    pub issue: &'a Issue,
    pub feedback: Option<&'a RevisionFeedback>,
}

/// Something that turns an issue into edits on a workspace.
#[async_trait]
pub trait PatchAuthor: Send + Sync {
    async fn write_patch(
        &self,
        task: &CodingTask<'_>,
        workspace: &Workspace,
        interrupt: &Interrupt,
    ) -> Result<Patch>;
}

pub struct CodingAgent {
    engine: AgentEngine,
    workspace: Arc<WorkspaceManager>,
    limits: ToolLimits,
}

impl CodingAgent {
    pub fn new(engine: AgentEngine, workspace: Arc<WorkspaceManager>, config: &AgentConfig) -> Self {
        Self {
            engine,
            workspace,
            limits: ToolLimits::from(config),
        }
    }
}

#[async_trait]
impl PatchAuthor for CodingAgent {
    async fn write_patch(
        &self,
        task: &CodingTask<'_>,
        workspace: &Workspace,
        interrupt: &Interrupt,
    ) -> Result<Patch> {
        let system = prompt::coding_system_prompt(task.repo, &self.workspace.check_names());
        let initial = prompt::coding_task_message(task.issue, task.feedback);
        let mut tools = Toolbox::new(&workspace.path, self.limits.clone())
            .with_checks(self.workspace.checks().clone());

        let run = self.engine.run(&system, &initial, &mut tools, interrupt).await;
        tracing::info!(
            issue = task.issue.number,
            turns = run.turns,
            tool_calls = run.tool_calls,
            outcome = ?run.outcome,
            "Coding agent finished"
        );

        let summary = match run.outcome {
            AgentOutcome::Completed { summary } => summary,
            AgentOutcome::Cancelled => return Err(AppError::Interrupted),
            AgentOutcome::Failed(e) => return Err(e),
            budget => {
                tracing::warn!(
                    issue = task.issue.number,
                    outcome = ?budget,
                    "Agent stopped on a budget, keeping partial work"
                );
                String::from("Partial change: the agent stopped before finishing.")
            }
        };

        let mut message = format!("Fix #{}: {}", task.issue.number, task.issue.title);
        if !summary.is_empty() {
            message.push_str("\n\n");
            message.push_str(&summary);
        }

        build_patch(&self.workspace, workspace, tools.touched(), message).await
    }
}

/// Files the agent wrote, in order, then whatever else its commands changed.
async fn build_patch(
    manager: &WorkspaceManager,
    workspace: &Workspace,
    touched: &[String],
    message: String,
) -> Result<Patch> {
    let mut changed = manager.changed_paths(workspace).await?;
    let mut patch = Patch::new(message);

    for path in touched {
        if let Some(pos) = changed.iter().position(|e| &e.path == path) {
            patch.record(changed.remove(pos));
        }
    }
    for edit in changed {
        patch.record(edit);
    }
    Ok(patch)
}
