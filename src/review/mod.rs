pub mod record;
pub mod requirements;
pub mod submit;
pub mod verdict;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::agent::model::{ChatMessage, CompletionRequest, ModelBackend};
use crate::agent::prompt;
use crate::error::Result;
use crate::platform::types::{CiResult, CommitInfo, Issue, JobOutcome, PullRequest, RepoRef};

pub use record::ReviewRecord;
pub use submit::{latest_review_record, submit_review, SubmitOutcome};
pub use verdict::{ChecklistItem, Decision, ReviewVerdict};

/// Everything the reviewer looks at for one pull request.
pub struct ReviewInput<'a> {
    pub issue: Option<&'a Issue>,
    pub pr: &'a PullRequest,
    pub diff: &'a str,
    pub commits: &'a [CommitInfo],
    pub ci: &'a CiResult,
}

#[async_trait]
pub trait PatchReviewer: Send + Sync {
    async fn review(&self, repo: &RepoRef, input: &ReviewInput<'_>) -> Result<ReviewVerdict>;
}

/// Gate the model's decision on CI and the checklist. Returns the final
/// decision and a note explaining any override.
pub fn apply_policy(
    model_decision: Decision,
    ci: &CiResult,
    checklist: &[ChecklistItem],
) -> (Decision, Option<String>) {
    if ci.has_failure() {
        let failed = ci.jobs_with(JobOutcome::Fail).join(", ");
        return (
            Decision::RequestChanges,
            Some(format!("CI failed: {failed}.")),
        );
    }

    if ci.has_pending() {
        let pending = ci.jobs_with(JobOutcome::Pending).join(", ");
        let unmet = checklist.iter().any(|item| !item.satisfied);
        if unmet || model_decision == Decision::RequestChanges {
            return (
                Decision::RequestChanges,
                unmet.then(|| "Some requirements are not satisfied.".to_string()),
            );
        }
        let note = (model_decision == Decision::Approve)
            .then(|| format!("CI incomplete: {pending} still running; approval withheld."));
        return (Decision::Comment, note);
    }

    if checklist.iter().any(|item| !item.satisfied) {
        return (
            Decision::RequestChanges,
            Some("Some requirements are not satisfied.".to_string()),
        );
    }

    (model_decision, None)
}

/// The model's JSON answer. Every field is optional; missing ones are filled
/// from the rules.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Assessment {
    summary: String,
    checklist: Vec<ChecklistItem>,
    code_quality: String,
    issues: Vec<String>,
    suggestions: Vec<String>,
    decision: Option<String>,
    rationale: String,
}

/// Pull the first JSON object out of a model reply, tolerating code fences
/// and chatter around it.
fn parse_assessment(reply: &str) -> Option<Assessment> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}

pub struct ReviewerAgent {
    backend: Arc<dyn ModelBackend>,
    max_diff_chars: usize,
}

impl ReviewerAgent {
    pub fn new(backend: Arc<dyn ModelBackend>, max_diff_chars: usize) -> Self {
        Self {
            backend,
            max_diff_chars,
        }
    }
}

#[async_trait]
impl PatchReviewer for ReviewerAgent {
    async fn review(&self, repo: &RepoRef, input: &ReviewInput<'_>) -> Result<ReviewVerdict> {
        let mut requirements = input
            .issue
            .map(|issue| requirements::extract_requirements(&issue.body))
            .unwrap_or_default();

        let request = CompletionRequest {
            system: prompt::review_system_prompt(),
            messages: vec![ChatMessage::user(prompt::review_task_message(
                repo,
                input,
                &requirements,
                self.max_diff_chars,
            ))],
            tools: Vec::new(),
            json_output: true,
        };
        let completion = self.backend.complete(&request).await?;
        let reply = completion.message.text();

        let assessment = match parse_assessment(reply) {
            Some(a) => a,
            None => {
                tracing::warn!(pr = input.pr.number, "Reviewer reply was not valid JSON");
                Assessment {
                    summary: reply.trim().to_string(),
                    decision: Some("COMMENT".to_string()),
                    rationale: "The review model did not return a structured assessment."
                        .to_string(),
                    ..Assessment::default()
                }
            }
        };

        if requirements.is_empty() && assessment.checklist.is_empty() {
            if let Some(issue) = input.issue {
                requirements.push(issue.title.clone());
            }
        }
        let checklist = requirements::build_checklist(
            &requirements,
            &assessment.checklist,
            input.diff,
            input.commits,
        );

        let model_decision = assessment
            .decision
            .as_deref()
            .and_then(Decision::parse)
            .unwrap_or(Decision::Comment);
        let (decision, note) = apply_policy(model_decision, input.ci, &checklist);
        if decision != model_decision {
            tracing::info!(
                pr = input.pr.number,
                model = model_decision.as_str(),
                decision = decision.as_str(),
                "Policy overrode model decision"
            );
        }

        let rationale = match note {
            Some(note) if assessment.rationale.trim().is_empty() => note,
            Some(note) => format!("{note}\n\n{}", assessment.rationale.trim()),
            None => assessment.rationale.trim().to_string(),
        };

        Ok(ReviewVerdict {
            decision,
            summary: assessment.summary,
            rationale,
            checklist,
            ci: input.ci.clone(),
            code_quality: assessment.code_quality,
            issues: assessment.issues,
            suggestions: assessment.suggestions,
        })
    }
}
