pub mod github;
pub mod types;

#[cfg(test)]
pub mod fake;

use std::sync::LazyLock;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, TryStreamExt};
use regex::Regex;

use crate::error::{AppError, Result};
use types::*;

#[async_trait]
pub trait Platform: Send + Sync {
    /// Fetch one page (1-based) of open issues. Pull requests are excluded.
    async fn list_open_issues(
        &self,
        repo: &RepoRef,
        filter: &IssueFilter,
        page: u32,
    ) -> Result<Page<Issue>>;

    /// Fetch a single issue. `NotFound` if it does not exist.
    async fn get_issue(&self, repo: &RepoRef, issue_number: u64) -> Result<Issue>;

    async fn list_open_pull_requests(&self, repo: &RepoRef) -> Result<Vec<PullRequest>>;

    /// Pull requests in any state whose head is `branch`, newest first.
    async fn find_pull_requests_by_head(
        &self,
        repo: &RepoRef,
        branch: &str,
    ) -> Result<Vec<PullRequest>>;

    async fn get_pull_request(&self, repo: &RepoRef, pr_number: u64) -> Result<PullRequest>;

    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        pr: &CreatePullRequest,
    ) -> Result<PullRequest>;

    /// Unified diff of the pull request against its base.
    async fn get_diff(&self, repo: &RepoRef, pr_number: u64) -> Result<String>;

    async fn list_commits(&self, repo: &RepoRef, pr_number: u64) -> Result<Vec<CommitInfo>>;

    /// Commit statuses and check runs on the pull request head.
    async fn get_ci_results(&self, repo: &RepoRef, pr: &PullRequest) -> Result<CiResult>;

    async fn list_reviews(&self, repo: &RepoRef, pr_number: u64) -> Result<Vec<Review>>;

    async fn create_review(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        body: &str,
        event: ReviewEvent,
    ) -> Result<()>;

    /// Comments on an issue or pull request conversation.
    async fn list_comments(&self, repo: &RepoRef, number: u64) -> Result<Vec<Comment>>;

    /// Post a comment on an issue or PR.
    async fn post_comment(&self, repo: &RepoRef, number: u64, body: &str) -> Result<()>;

    async fn request_reviewers(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        reviewers: &[String],
    ) -> Result<()>;

    async fn close_pull_request(&self, repo: &RepoRef, pr_number: u64) -> Result<()>;
}

/// Lazily page through every open issue matching `filter`.
///
/// Each call starts again from the first page.
pub fn open_issues<'a>(
    platform: &'a dyn Platform,
    repo: &'a RepoRef,
    filter: &'a IssueFilter,
) -> impl Stream<Item = Result<Issue>> + Send + 'a {
    stream::try_unfold(Some(1u32), move |page| async move {
        let Some(page) = page else {
            return Ok::<_, AppError>(None);
        };
        let page = platform.list_open_issues(repo, filter, page).await?;
        let items = stream::iter(page.items.into_iter().map(Ok::<_, AppError>));
        Ok(Some((items, page.next_page)))
    })
    .try_flatten()
}

/// Branch name used for work on an issue.
pub fn branch_for_issue(prefix: &str, issue_number: u64) -> String {
    format!("{prefix}{issue_number}")
}

static BRANCH_ISSUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[/_-])issue-(\d+)$").expect("valid branch regex"));

static CLOSING_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:fix(?:es|ed)?|close[sd]?|resolve[sd]?)\s*:?\s+#(\d+)\b")
        .expect("valid closing keyword regex")
});

/// Issue a pull request belongs to: branch naming convention first, then a
/// closing keyword in the body.
pub fn linked_issue_number(pr: &PullRequest) -> Option<u64> {
    let from_branch = BRANCH_ISSUE_RE
        .captures(&pr.head_branch)
        .and_then(|c| c[1].parse().ok());
    from_branch.or_else(|| {
        CLOSING_KEYWORD_RE
            .captures(&pr.body)
            .and_then(|c| c[1].parse().ok())
    })
}

/// Find the pull request already opened for an issue, if any.
///
/// An open PR on the issue branch wins; otherwise the newest PR on that
/// branch; otherwise an open PR whose body closes the issue.
pub async fn find_pull_request_for_issue(
    platform: &dyn Platform,
    repo: &RepoRef,
    branch_prefix: &str,
    issue_number: u64,
) -> Result<Option<PullRequest>> {
    let branch = branch_for_issue(branch_prefix, issue_number);
    let mut by_branch = platform.find_pull_requests_by_head(repo, &branch).await?;
    if let Some(idx) = by_branch.iter().position(PullRequest::is_open) {
        return Ok(Some(by_branch.swap_remove(idx)));
    }
    if !by_branch.is_empty() {
        return Ok(Some(by_branch.swap_remove(0)));
    }

    let open = platform.list_open_pull_requests(repo).await?;
    Ok(open
        .into_iter()
        .find(|pr| linked_issue_number(pr) == Some(issue_number)))
}
