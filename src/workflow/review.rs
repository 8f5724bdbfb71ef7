use std::time::Duration;

use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::platform::types::{CiResult, JobOutcome, PullRequest, RepoRef};
use crate::platform::{linked_issue_number, Platform};
use crate::review::{latest_review_record, submit_review, ReviewInput, ReviewVerdict, SubmitOutcome};
use crate::shutdown::Interrupt;
use crate::workflow::driver::Driver;
use crate::workflow::types::{Outcome, ReviewRunOutcome, RunSummary, Subject};

/// Poll CI on the pull request head until nothing is pending, `wait` runs
/// out, or the run is interrupted.
pub async fn wait_for_ci(
    platform: &dyn Platform,
    repo: &RepoRef,
    pr: &PullRequest,
    wait: Duration,
    interval: Duration,
    interrupt: &Interrupt,
) -> Result<CiResult> {
    let deadline = Instant::now() + wait;
    loop {
        let ci = platform.get_ci_results(repo, pr).await?;
        let now = Instant::now();
        if !ci.has_pending() || now >= deadline || interrupt.is_set() {
            return Ok(ci);
        }
        tracing::info!(
            pr = pr.number,
            pending = ?ci.jobs_with(JobOutcome::Pending),
            "Waiting for CI"
        );
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// Whether an open pull request should be reviewed by `review --all`.
pub async fn needs_review(
    platform: &dyn Platform,
    repo: &RepoRef,
    pr: &PullRequest,
    marker: &str,
    force: bool,
) -> Result<Option<String>> {
    if pr.draft {
        return Ok(Some("draft pull request".to_string()));
    }
    if force {
        return Ok(None);
    }
    match latest_review_record(platform, repo, pr.number, marker).await? {
        Some(record) if record.head_sha.as_deref().map_or(true, |sha| sha == pr.head_sha) => {
            Ok(Some("already reviewed at current head".to_string()))
        }
        _ => Ok(None),
    }
}

impl Driver {
    /// Gather issue, diff, commits and CI for `pr`, form a verdict, post it.
    pub(crate) async fn review_pull_request(
        &self,
        repo: &RepoRef,
        pr: &PullRequest,
        force: bool,
    ) -> Result<(ReviewVerdict, SubmitOutcome)> {
        let issue = match linked_issue_number(pr) {
            Some(number) => match self.review_platform.get_issue(repo, number).await {
                Ok(issue) => Some(issue),
                Err(AppError::NotFound(_)) => {
                    tracing::warn!(pr = pr.number, issue = number, "Linked issue not found");
                    None
                }
                Err(e) => return Err(e),
            },
            None => {
                tracing::warn!(pr = pr.number, "No linked issue");
                None
            }
        };

        let ci = wait_for_ci(
            self.review_platform.as_ref(),
            repo,
            pr,
            Duration::from_secs(self.config.review.ci_wait_secs),
            Duration::from_secs(self.config.review.ci_poll_interval_secs),
            &self.interrupt,
        )
        .await?;
        self.check_interrupt()?;

        let diff = self.review_platform.get_diff(repo, pr.number).await?;
        let commits = self.review_platform.list_commits(repo, pr.number).await?;

        let input = ReviewInput {
            issue: issue.as_ref(),
            pr,
            diff: &diff,
            commits: &commits,
            ci: &ci,
        };
        let verdict = self.reviewer.review(repo, &input).await?;
        tracing::info!(
            pr = pr.number,
            decision = verdict.decision.as_str(),
            unmet = verdict.unmet().len(),
            "Review formed"
        );

        let submitted = submit_review(
            self.review_platform.as_ref(),
            repo,
            pr,
            &verdict,
            &self.config.review.marker,
            force,
        )
        .await?;
        Ok((verdict, submitted))
    }

    /// The `review --pr` command.
    pub async fn review_pr(&self, repo: &RepoRef, pr_number: u64, force: bool) -> ReviewRunOutcome {
        match self.try_review_pr(repo, pr_number, force).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(pr = pr_number, error = %e, "Review failed");
                ReviewRunOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_review_pr(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        force: bool,
    ) -> Result<ReviewRunOutcome> {
        let pr = self.review_platform.get_pull_request(repo, pr_number).await?;
        if !pr.is_open() {
            return Ok(ReviewRunOutcome::Skipped {
                reason: "pull request is not open".to_string(),
            });
        }
        let (verdict, submit) = self.review_pull_request(repo, &pr, force).await?;
        Ok(ReviewRunOutcome::Reviewed {
            decision: verdict.decision,
            submit,
        })
    }

    /// The `review --all` command.
    pub async fn review_all(&self, repo: &RepoRef, force: bool) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let prs = self.review_platform.list_open_pull_requests(repo).await?;
        tracing::info!(count = prs.len(), "Open pull requests");

        for pr in prs {
            if self.interrupt.is_set() {
                tracing::warn!("Interrupted, stopping review batch");
                break;
            }
            let skip = needs_review(
                self.review_platform.as_ref(),
                repo,
                &pr,
                &self.config.review.marker,
                force,
            )
            .await;
            let outcome = match skip {
                Ok(Some(reason)) => ReviewRunOutcome::Skipped { reason },
                Ok(None) => match self.review_pull_request(repo, &pr, force).await {
                    Ok((verdict, submit)) => ReviewRunOutcome::Reviewed {
                        decision: verdict.decision,
                        submit,
                    },
                    Err(e) => {
                        tracing::error!(pr = pr.number, error = %e, "Review failed");
                        ReviewRunOutcome::Failed {
                            reason: e.to_string(),
                        }
                    }
                },
                Err(e) => ReviewRunOutcome::Failed {
                    reason: e.to_string(),
                },
            };
            summary.push(Subject::PullRequest(pr.number), Outcome::Review(outcome));
        }
        Ok(summary)
    }
}
