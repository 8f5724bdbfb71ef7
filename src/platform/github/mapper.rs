//! Mapping of octocrab models onto platform types.

use octocrab::models;
use octocrab::models::checks::CheckRun;
use octocrab::models::repos::{DiffEntry, DiffEntryStatus, RepoCommit};

use crate::platform::types;

/// Longest log excerpt kept per CI job.
const MAX_LOG_EXCERPT: usize = 2_000;

/// The issues endpoint also returns pull requests.
pub fn is_pull_request(issue: &models::issues::Issue) -> bool {
    issue.pull_request.is_some()
}

fn login(user: Option<&models::Author>) -> String {
    user.map(|u| u.login.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn map_issue(issue: models::issues::Issue) -> types::Issue {
    types::Issue {
        number: issue.number,
        title: issue.title,
        body: issue.body.unwrap_or_default(),
        labels: issue.labels.into_iter().map(|l| l.name).collect(),
        state: match issue.state {
            models::IssueState::Open => types::IssueState::Open,
            _ => types::IssueState::Closed,
        },
    }
}

pub fn map_pull_request(pr: models::pulls::PullRequest) -> types::PullRequest {
    let state = match (&pr.state, pr.merged_at) {
        (_, Some(_)) => types::PullRequestState::Merged,
        (Some(models::IssueState::Open), None) => types::PullRequestState::Open,
        _ => types::PullRequestState::Closed,
    };
    types::PullRequest {
        number: pr.number,
        title: pr.title.unwrap_or_default(),
        body: pr.body.unwrap_or_default(),
        head_branch: pr.head.ref_field,
        head_sha: pr.head.sha,
        base_branch: pr.base.ref_field,
        state,
        draft: pr.draft.unwrap_or(false),
        author: login(pr.user.as_deref()),
    }
}

pub fn map_commit(commit: RepoCommit) -> types::CommitInfo {
    types::CommitInfo {
        sha: commit.sha,
        authored_at: commit.commit.author.and_then(|a| a.date),
        message: commit.commit.message,
    }
}

pub fn map_review(review: models::pulls::Review) -> types::Review {
    use models::pulls::ReviewState;

    let state = match review.state {
        Some(ReviewState::Approved) => types::ReviewState::Approved,
        Some(ReviewState::ChangesRequested) => types::ReviewState::ChangesRequested,
        Some(ReviewState::Dismissed) => types::ReviewState::Dismissed,
        Some(ReviewState::Pending) => types::ReviewState::Pending,
        _ => types::ReviewState::Commented,
    };
    types::Review {
        id: review.id.into_inner(),
        author: login(review.user.as_ref()),
        body: review.body.unwrap_or_default(),
        state,
        submitted_at: review.submitted_at,
    }
}

pub fn map_comment(comment: models::issues::Comment) -> types::Comment {
    types::Comment {
        id: comment.id.into_inner(),
        author: comment.user.login,
        body: comment.body.unwrap_or_default(),
        created_at: Some(comment.created_at),
    }
}

/// Render the per-file patches of a pull request as one unified diff.
pub fn render_diff(files: &[DiffEntry]) -> String {
    let mut out = String::new();
    for file in files {
        let old = file.previous_filename.as_deref().unwrap_or(&file.filename);
        out.push_str(&format!("diff --git a/{old} b/{}\n", file.filename));
        let (from, to) = match file.status {
            DiffEntryStatus::Added => ("/dev/null".to_string(), format!("b/{}", file.filename)),
            DiffEntryStatus::Removed => (format!("a/{old}"), "/dev/null".to_string()),
            _ => (format!("a/{old}"), format!("b/{}", file.filename)),
        };
        match &file.patch {
            Some(patch) => {
                out.push_str(&format!("--- {from}\n+++ {to}\n"));
                out.push_str(patch);
                if !patch.ends_with('\n') {
                    out.push('\n');
                }
            }
            None => out.push_str("Binary files differ\n"),
        }
    }
    out
}

fn excerpt(text: &str) -> String {
    if text.len() <= MAX_LOG_EXCERPT {
        return text.to_string();
    }
    let mut end = MAX_LOG_EXCERPT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

fn status_outcome(state: models::StatusState) -> types::JobOutcome {
    match state {
        models::StatusState::Success => types::JobOutcome::Pass,
        models::StatusState::Pending => types::JobOutcome::Pending,
        _ => types::JobOutcome::Fail,
    }
}

/// A run without a conclusion is still queued or in progress.
fn check_run_outcome(run: &CheckRun) -> types::JobOutcome {
    match run.conclusion.as_deref() {
        None => types::JobOutcome::Pending,
        Some("success" | "neutral" | "skipped") => types::JobOutcome::Pass,
        Some(_) => types::JobOutcome::Fail,
    }
}

/// Merge commit statuses and check runs into one CI snapshot. Re-runs of a
/// job collapse to the most recent report.
pub fn map_ci(statuses: Vec<models::Status>, runs: Vec<CheckRun>) -> types::CiResult {
    let mut ci = types::CiResult::default();
    for status in statuses {
        ci.insert(
            status.context.unwrap_or_else(|| "default".to_string()),
            types::CiJob {
                outcome: status_outcome(status.state),
                log_excerpt: excerpt(status.description.as_deref().unwrap_or_default()),
                reported_at: status.updated_at.or(status.created_at),
            },
        );
    }
    for run in runs {
        let outcome = check_run_outcome(&run);
        let log = [run.output.title, run.output.summary, run.output.text]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n");
        ci.insert(
            run.name,
            types::CiJob {
                outcome,
                log_excerpt: excerpt(&log),
                reported_at: run.completed_at.or(run.started_at),
            },
        );
    }
    ci
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::types::{JobOutcome, PullRequestState};
    use serde_json::json;

    fn author(login: &str) -> serde_json::Value {
        let url = format!("https://api.github.com/users/{login}");
        json!({
            "login": login,
            "id": 1,
            "node_id": "U_1",
            "avatar_url": "https://avatars.githubusercontent.com/u/1",
            "gravatar_id": "",
            "url": url,
            "html_url": url,
            "followers_url": url,
            "following_url": url,
            "gists_url": url,
            "starred_url": url,
            "subscriptions_url": url,
            "organizations_url": url,
            "repos_url": url,
            "events_url": url,
            "received_events_url": url,
            "type": "User",
            "site_admin": false
        })
    }

    fn check_run(name: &str, conclusion: Option<&str>, completed_at: Option<&str>) -> CheckRun {
        serde_json::from_value(json!({
            "id": 1,
            "node_id": "CR_1",
            "head_sha": "abc",
            "url": "https://api.github.com/repos/octo/widgets/check-runs/1",
            "name": name,
            "conclusion": conclusion,
            "started_at": "2024-05-01T10:00:00Z",
            "completed_at": completed_at,
            "output": {
                "title": conclusion.map(|c| format!("{name} {c}")),
                "summary": "test_validate_email",
                "text": null,
                "annotations_count": 0,
                "annotations_url": "https://api.github.com/annotations"
            },
            "pull_requests": []
        }))
        .unwrap()
    }

    #[test]
    fn test_map_pull_request_states() {
        let raw = json!({
            "url": "https://api.github.com/repos/octo/widgets/pulls/7",
            "id": 70,
            "number": 7,
            "state": "closed",
            "title": "Add validation",
            "body": null,
            "head": {"ref": "agent/issue-42", "sha": "abc"},
            "base": {"ref": "main", "sha": "def"},
            "merged_at": "2024-05-01T10:00:00Z",
            "user": author("coder-bot")
        });
        let pr = map_pull_request(serde_json::from_value(raw).unwrap());
        assert_eq!(pr.state, PullRequestState::Merged);
        assert_eq!(pr.head_branch, "agent/issue-42");
        assert_eq!(pr.head_sha, "abc");
        assert_eq!(pr.author, "coder-bot");
        assert!(!pr.draft);
    }

    #[test]
    fn test_map_review_and_comment() {
        let review: models::pulls::Review = serde_json::from_value(json!({
            "id": 11,
            "node_id": "PRR_11",
            "html_url": "https://github.com/octo/widgets/pull/7#pullrequestreview-11",
            "user": author("review-bot"),
            "body": "[AI-Reviewer]",
            "state": "CHANGES_REQUESTED",
            "submitted_at": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        let review = map_review(review);
        assert_eq!(review.id, 11);
        assert_eq!(review.author, "review-bot");
        assert_eq!(review.state, types::ReviewState::ChangesRequested);

        let comment: models::issues::Comment = serde_json::from_value(json!({
            "id": 12,
            "node_id": "IC_12",
            "url": "https://api.github.com/repos/octo/widgets/issues/comments/12",
            "html_url": "https://github.com/octo/widgets/pull/7#issuecomment-12",
            "body": "Please also handle None.",
            "author_association": "MEMBER",
            "user": author("maintainer"),
            "created_at": "2024-05-01T11:00:00Z"
        }))
        .unwrap();
        let comment = map_comment(comment);
        assert_eq!(comment.id, 12);
        assert_eq!(comment.author, "maintainer");
        assert!(comment.created_at.is_some());
    }

    #[test]
    fn test_map_ci_merges_statuses_and_checks() {
        let statuses: Vec<models::Status> = serde_json::from_value(json!([
            {"context": "lint", "state": "success", "description": "ok"},
            {"context": "deploy", "state": "pending", "description": null}
        ]))
        .unwrap();
        let runs = vec![
            check_run("tests", Some("failure"), Some("2024-05-01T10:05:00Z")),
            check_run("build", None, None),
        ];

        let ci = map_ci(statuses, runs);
        assert_eq!(ci.jobs["lint"].outcome, JobOutcome::Pass);
        assert_eq!(ci.jobs["deploy"].outcome, JobOutcome::Pending);
        assert_eq!(ci.jobs["tests"].outcome, JobOutcome::Fail);
        assert!(ci.jobs["tests"].log_excerpt.contains("test_validate_email"));
        assert_eq!(ci.jobs["build"].outcome, JobOutcome::Pending);
    }

    #[test]
    fn test_map_ci_rerun_that_passes_wins() {
        let runs = vec![
            check_run("tests", Some("success"), Some("2024-05-01T10:30:00Z")),
            check_run("tests", Some("failure"), Some("2024-05-01T10:05:00Z")),
        ];
        let ci = map_ci(vec![], runs);
        assert_eq!(ci.jobs["tests"].outcome, JobOutcome::Pass);
        assert!(!ci.has_failure());
    }

    #[test]
    fn test_render_diff_marks_new_files() {
        let files: Vec<DiffEntry> = serde_json::from_value(json!([{
            "sha": "0a1b",
            "filename": "src/validate.py",
            "status": "added",
            "additions": 1,
            "deletions": 0,
            "changes": 1,
            "contents_url": "https://api.github.com/repos/octo/widgets/contents/src/validate.py",
            "patch": "@@ -0,0 +1 @@\n+def validate(): pass"
        }]))
        .unwrap();
        let diff = render_diff(&files);
        assert!(diff.contains("--- /dev/null\n+++ b/src/validate.py\n"));
        assert!(diff.ends_with("+def validate(): pass\n"));
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(MAX_LOG_EXCERPT);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= MAX_LOG_EXCERPT + 3);
    }
}
