use std::collections::BTreeMap;

use crate::agent::{CodingTask, RevisionFeedback};
use crate::error::{AppError, Result};
use crate::platform::types::{
    CreatePullRequest, Issue, PullRequest, PullRequestState, RepoRef, ReviewState,
};
use crate::platform::{branch_for_issue, find_pull_request_for_issue, Platform};
use crate::review::{latest_review_record, Decision};
use crate::workflow::driver::Driver;
use crate::workflow::types::{CodeOutcome, WorkItem};
use crate::workspace::checks::CheckResult;
use crate::workspace::{ApplyOutcome, Workspace};

/// What to do with an issue, decided from the state of its pull request.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkPlan {
    /// No pull request yet.
    Fresh,
    /// The latest review requested changes.
    Rework {
        pr: PullRequest,
        feedback: RevisionFeedback,
    },
    /// Open pull request without a review of its current head.
    AwaitingReview { pr: PullRequest },
    Skip { reason: String },
}

pub async fn plan_issue(
    platform: &dyn Platform,
    repo: &RepoRef,
    branch_prefix: &str,
    marker: &str,
    issue_number: u64,
) -> Result<WorkPlan> {
    let Some(pr) = find_pull_request_for_issue(platform, repo, branch_prefix, issue_number).await?
    else {
        return Ok(WorkPlan::Fresh);
    };

    match pr.state {
        PullRequestState::Merged => {
            return Ok(WorkPlan::Skip {
                reason: format!("PR #{} is already merged", pr.number),
            })
        }
        PullRequestState::Closed => {
            return Ok(WorkPlan::Skip {
                reason: format!("PR #{} was closed", pr.number),
            })
        }
        PullRequestState::Open => {}
    }

    let Some(record) = latest_review_record(platform, repo, pr.number, marker).await? else {
        return Ok(WorkPlan::AwaitingReview { pr });
    };
    if record.head_sha.as_deref().is_some_and(|sha| sha != pr.head_sha) {
        return Ok(WorkPlan::AwaitingReview { pr });
    }

    Ok(match record.decision {
        Decision::RequestChanges => {
            let comments = platform.list_comments(repo, pr.number).await?;
            WorkPlan::Rework {
                feedback: RevisionFeedback::from_pull_request(&record.body, &comments, marker),
                pr,
            }
        }
        Decision::Approve => WorkPlan::Skip {
            reason: format!("PR #{} is already approved", pr.number),
        },
        Decision::Comment => WorkPlan::AwaitingReview { pr },
    })
}

/// Markdown list of local check results for a pull request body, empty
/// when no checks are configured.
pub(crate) fn checks_section(checks: &BTreeMap<String, CheckResult>) -> String {
    if checks.is_empty() {
        return String::new();
    }
    let mut section = String::from("## Checks\n\n");
    for (name, result) in checks {
        let mark = if result.passed { "✅" } else { "❌" };
        section.push_str(&format!("- {mark} {name}\n"));
    }
    section.push('\n');
    section
}

/// Result of one coding pass.
#[derive(Debug)]
pub(crate) enum CodePhase {
    Opened(PullRequest),
    Updated(PullRequest),
    /// The agent changed nothing on an existing pull request.
    Unchanged(PullRequest),
}

impl CodePhase {
    pub(crate) fn pull_request(&self) -> &PullRequest {
        match self {
            CodePhase::Opened(pr) | CodePhase::Updated(pr) | CodePhase::Unchanged(pr) => pr,
        }
    }
}

impl Driver {
    pub(crate) fn work_item(&self, issue: Issue) -> WorkItem {
        WorkItem {
            branch: branch_for_issue(&self.config.github.branch_prefix, issue.number),
            workspace_path: self.config.workspace.path.clone(),
            issue,
        }
    }

    pub(crate) async fn plan(&self, repo: &RepoRef, issue_number: u64) -> Result<WorkPlan> {
        plan_issue(
            self.platform.as_ref(),
            repo,
            &self.config.github.branch_prefix,
            &self.config.review.marker,
            issue_number,
        )
        .await
    }

    /// Check out the issue branch, let the agent work, commit, push, and make
    /// sure a pull request exists.
    pub(crate) async fn code_phase(
        &self,
        repo: &RepoRef,
        workspace: &mut Workspace,
        item: &WorkItem,
        existing: Option<&PullRequest>,
        feedback: Option<&RevisionFeedback>,
    ) -> Result<CodePhase> {
        let issue_number = item.issue.number;
        self.workspace
            .checkout_branch(workspace, &item.branch, true)
            .await?;

        let task = CodingTask {
            repo,
            issue: &item.issue,
            feedback,
        };
        let patch = self
            .author
            .write_patch(&task, workspace, &self.interrupt)
            .await?;
        self.check_interrupt()?;

        let applied = if patch.is_empty() {
            ApplyOutcome::NoChanges
        } else {
            self.workspace.apply_patch(workspace, &patch).await?
        };

        let commit = match applied {
            ApplyOutcome::Committed(commit) => commit,
            ApplyOutcome::NoChanges => {
                return match existing {
                    Some(pr) => {
                        tracing::info!(issue = issue_number, pr = pr.number, "Agent made no further changes");
                        Ok(CodePhase::Unchanged(pr.clone()))
                    }
                    None => Err(AppError::Agent("agent produced no changes".to_string())),
                };
            }
        };
        tracing::info!(issue = issue_number, sha = %commit.sha, "Committed agent changes");

        let checks = self
            .workspace
            .run_checks(workspace, &self.workspace.check_names())
            .await;
        self.check_interrupt()?;
        for (name, result) in &checks {
            tracing::info!(issue = issue_number, check = %name, passed = result.passed, "Local check finished");
        }

        self.workspace.push(workspace, &item.branch).await?;
        self.check_interrupt()?;

        if let Some(pr) = existing {
            let refreshed = self.platform.get_pull_request(repo, pr.number).await?;
            return Ok(CodePhase::Updated(refreshed));
        }

        let summary = patch
            .message
            .split_once("\n\n")
            .map(|(_, body)| body.trim())
            .unwrap_or_default();
        let pr = self
            .platform
            .create_pull_request(
                repo,
                &CreatePullRequest {
                    title: format!("Fix #{issue_number}: {}", item.issue.title),
                    body: format!(
                        "Fixes #{issue_number}\n\n## Summary\n\n{}\n\n{}---\n*Automated by patchloop*",
                        if summary.is_empty() { "See commits." } else { summary },
                        checks_section(&checks),
                    ),
                    head_branch: item.branch.clone(),
                    base_branch: self.workspace.base_branch().to_string(),
                },
            )
            .await?;
        tracing::info!(issue = issue_number, pr = pr.number, "Opened pull request");

        if let Some(reviewer) = &self.config.github.reviewer_username {
            if let Err(e) = self
                .platform
                .request_reviewers(repo, pr.number, std::slice::from_ref(reviewer))
                .await
            {
                tracing::warn!(pr = pr.number, error = %e, "Failed to request review");
            }
        }

        Ok(CodePhase::Opened(pr))
    }

    /// The `code` command for one issue.
    pub async fn code_issue(&self, repo: &RepoRef, issue_number: u64) -> CodeOutcome {
        match self.try_code_issue(repo, issue_number).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(issue = issue_number, error = %e, "Coding run failed");
                CodeOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_code_issue(&self, repo: &RepoRef, issue_number: u64) -> Result<CodeOutcome> {
        let issue = self.platform.get_issue(repo, issue_number).await?;
        let (existing, feedback) = match self.plan(repo, issue_number).await? {
            WorkPlan::Fresh => (None, None),
            WorkPlan::Rework { pr, feedback } => (Some(pr), Some(feedback)),
            WorkPlan::AwaitingReview { pr } => {
                return Ok(CodeOutcome::Skipped {
                    reason: format!("PR #{} is awaiting review", pr.number),
                })
            }
            WorkPlan::Skip { reason } => return Ok(CodeOutcome::Skipped { reason }),
        };

        let item = self.work_item(issue);
        let mut workspace = self.workspace.acquire(repo).await?;
        let result = self
            .code_phase(repo, &mut workspace, &item, existing.as_ref(), feedback.as_ref())
            .await;
        let phase = self.settle_on_error(&workspace, issue_number, result).await?;

        Ok(match phase {
            CodePhase::Opened(pr) => CodeOutcome::PrOpened { pr: pr.number },
            CodePhase::Unchanged(_) => CodeOutcome::NoChanges,
            CodePhase::Updated(pr) => {
                self.announce_rework(repo, &pr).await;
                CodeOutcome::PrUpdated { pr: pr.number }
            }
        })
    }

    /// Tell reviewers that a pull request they asked changes on was updated.
    async fn announce_rework(&self, repo: &RepoRef, pr: &PullRequest) {
        let short = pr.head_sha.get(..7).unwrap_or(&pr.head_sha);
        let body = format!(
            "Pushed {short} to address the review feedback. Ready for another look.\n\n---\n*Automated by patchloop*"
        );
        if let Err(e) = self.platform.post_comment(repo, pr.number, &body).await {
            tracing::warn!(pr = pr.number, error = %e, "Failed to comment on pull request");
        }

        let mut reviewers: Vec<String> = match self.platform.list_reviews(repo, pr.number).await {
            Ok(reviews) => reviews
                .into_iter()
                .filter(|r| r.state == ReviewState::ChangesRequested)
                .map(|r| r.author)
                .collect(),
            Err(e) => {
                tracing::warn!(pr = pr.number, error = %e, "Failed to list reviews");
                Vec::new()
            }
        };
        if let Some(configured) = &self.config.github.reviewer_username {
            reviewers.push(configured.clone());
        }
        reviewers.sort();
        reviewers.dedup();
        reviewers.retain(|r| *r != pr.author);
        if reviewers.is_empty() {
            return;
        }
        if let Err(e) = self.platform.request_reviewers(repo, pr.number, &reviewers).await {
            tracing::warn!(pr = pr.number, error = %e, "Failed to re-request reviewers");
        }
    }
}
