use crate::error::{AppError, Result};
use crate::platform::types::{PullRequest, RepoRef};
use crate::platform::Platform;
use crate::review::record::{self, ReviewRecord};
use crate::review::verdict::ReviewVerdict;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Posted as a review carrying the decision.
    Submitted,
    /// The host refused the review event; the record went up as a comment.
    PostedAsComment,
    /// An identical record already exists for this head.
    Suppressed,
}

/// Every review record on the pull request, reviews and comments alike,
/// oldest first.
pub async fn review_records(
    platform: &dyn Platform,
    repo: &RepoRef,
    pr_number: u64,
    marker: &str,
) -> Result<Vec<ReviewRecord>> {
    let reviews = platform.list_reviews(repo, pr_number).await?;
    let comments = platform.list_comments(repo, pr_number).await?;

    let mut records: Vec<ReviewRecord> = reviews
        .iter()
        .filter_map(|r| record::parse_record(&r.body, marker, r.submitted_at))
        .chain(
            comments
                .iter()
                .filter_map(|c| record::parse_record(&c.body, marker, c.created_at)),
        )
        .collect();
    // Stable sort keeps host order for records without timestamps.
    records.sort_by_key(|r| r.at);
    Ok(records)
}

pub async fn latest_review_record(
    platform: &dyn Platform,
    repo: &RepoRef,
    pr_number: u64,
    marker: &str,
) -> Result<Option<ReviewRecord>> {
    Ok(review_records(platform, repo, pr_number, marker)
        .await?
        .pop())
}

/// Post `verdict` on `pr`. Skips the post when a record with the same digest
/// is already there, unless `force` is set.
pub async fn submit_review(
    platform: &dyn Platform,
    repo: &RepoRef,
    pr: &PullRequest,
    verdict: &ReviewVerdict,
    marker: &str,
    force: bool,
) -> Result<SubmitOutcome> {
    let digest = verdict.digest(&pr.head_sha);

    if !force {
        let existing = review_records(platform, repo, pr.number, marker).await?;
        if existing
            .iter()
            .any(|r| r.digest.as_deref() == Some(digest.as_str()))
        {
            tracing::info!(pr = pr.number, "Identical review already posted, skipping");
            return Ok(SubmitOutcome::Suppressed);
        }
    }

    let body = record::render(verdict, marker, &pr.head_sha);
    match platform
        .create_review(repo, pr.number, &body, verdict.decision.to_event())
        .await
    {
        Ok(()) => {
            tracing::info!(pr = pr.number, decision = verdict.decision.as_str(), "Review submitted");
            Ok(SubmitOutcome::Submitted)
        }
        // e.g. reviewing your own pull request
        Err(AppError::GitHubApi(message)) => {
            tracing::warn!(
                pr = pr.number,
                error = %message,
                "Review event rejected, posting as comment"
            );
            platform.post_comment(repo, pr.number, &body).await?;
            Ok(SubmitOutcome::PostedAsComment)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;
    use crate::platform::types::{CiResult, JobOutcome, PullRequestState};
    use crate::review::verdict::{ChecklistItem, Decision};

    fn pr() -> PullRequest {
        PullRequest {
            number: 7,
            title: "Fix #42".into(),
            body: "Fixes #42".into(),
            head_branch: "agent/issue-42".into(),
            head_sha: "abc123".into(),
            base_branch: "main".into(),
            state: PullRequestState::Open,
            draft: false,
            author: "coder-bot".into(),
        }
    }

    fn verdict() -> ReviewVerdict {
        ReviewVerdict {
            decision: Decision::Approve,
            summary: "Adds validation".into(),
            rationale: "Requirements met and CI green".into(),
            checklist: vec![ChecklistItem {
                requirement: "input validation".into(),
                satisfied: true,
                note: String::new(),
            }],
            ci: CiResult::from_outcomes([("tests", JobOutcome::Pass)]),
            code_quality: "Good".into(),
            issues: vec![],
            suggestions: vec![],
        }
    }

    #[tokio::test]
    async fn test_second_identical_submit_is_suppressed() {
        let platform = FakePlatform::new();
        let repo = platform.repo();
        platform.insert_pull_request(pr());

        let first = submit_review(&platform, &repo, &pr(), &verdict(), "[AI-Reviewer]", false)
            .await
            .unwrap();
        let second = submit_review(&platform, &repo, &pr(), &verdict(), "[AI-Reviewer]", false)
            .await
            .unwrap();

        assert_eq!(first, SubmitOutcome::Submitted);
        assert_eq!(second, SubmitOutcome::Suppressed);
        assert_eq!(platform.reviews(7).len(), 1);
        assert_eq!(platform.review_call_count(), 1);
    }

    #[tokio::test]
    async fn test_force_posts_again() {
        let platform = FakePlatform::new();
        let repo = platform.repo();
        platform.insert_pull_request(pr());

        for _ in 0..2 {
            let outcome =
                submit_review(&platform, &repo, &pr(), &verdict(), "[AI-Reviewer]", true)
                    .await
                    .unwrap();
            assert_eq!(outcome, SubmitOutcome::Submitted);
        }
        assert_eq!(platform.reviews(7).len(), 2);
    }

    #[tokio::test]
    async fn test_new_head_is_not_suppressed() {
        let platform = FakePlatform::new();
        let repo = platform.repo();
        let mut moved = pr();
        submit_review(&platform, &repo, &moved, &verdict(), "[AI-Reviewer]", false)
            .await
            .unwrap();
        moved.head_sha = "def456".into();
        let outcome = submit_review(&platform, &repo, &moved, &verdict(), "[AI-Reviewer]", false)
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Submitted);
    }

    #[tokio::test]
    async fn test_rejected_event_falls_back_to_comment() {
        let platform = FakePlatform::new().rejecting_review_events();
        let repo = platform.repo();

        let outcome = submit_review(&platform, &repo, &pr(), &verdict(), "[AI-Reviewer]", false)
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::PostedAsComment);
        assert!(platform.reviews(7).is_empty());
        let comments = platform.comments(7);
        assert_eq!(comments.len(), 1);
        assert!(comments[0].body.contains("Decision: APPROVE"));

        // The comment counts as a record for the digest check.
        let again = submit_review(&platform, &repo, &pr(), &verdict(), "[AI-Reviewer]", false)
            .await
            .unwrap();
        assert_eq!(again, SubmitOutcome::Suppressed);

        let latest = latest_review_record(&platform, &repo, 7, "[AI-Reviewer]")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.decision, Decision::Approve);
        assert_eq!(latest.head_sha.as_deref(), Some("abc123"));
    }
}
