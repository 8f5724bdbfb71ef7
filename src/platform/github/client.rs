use async_trait::async_trait;
use octocrab::params;
use octocrab::params::repos::Commitish;
use octocrab::Octocrab;
use serde::de::DeserializeOwned;

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};
use crate::platform::types::*;
use crate::platform::Platform;
use crate::retry::RetryPolicy;

use super::classify_error;
use super::mapper;

const PER_PAGE: u8 = 100;

/// GitHub REST client authenticated with a personal access token.
pub struct GitHubPlatform {
    client: Octocrab,
    retry: RetryPolicy,
}

impl GitHubPlatform {
    /// Build a client for `token`. The coder and the reviewer each get their own.
    pub fn new(config: &GitHubConfig, token: &str) -> Result<Self> {
        let mut builder = Octocrab::builder().personal_token(token.to_string());
        if let Some(api_base) = &config.api_base {
            builder = builder
                .base_uri(api_base.as_str())
                .map_err(|e| AppError::Config(format!("Invalid GitHub API base: {e}")))?;
        }
        let client = builder
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build octocrab client: {e}")))?;

        Ok(Self {
            client,
            retry: config.retry.clone(),
        })
    }

    /// Follow `Link: rel="next"` from `first` until the listing is exhausted.
    async fn remaining_pages<R>(&self, operation: &str, first: octocrab::Page<R>) -> Result<Vec<R>>
    where
        R: DeserializeOwned + Send,
    {
        let mut page = first;
        let mut items = page.take_items();
        loop {
            let next = page.next.take();
            if next.is_none() {
                return Ok(items);
            }
            let next = &next;
            let fetched: Option<octocrab::Page<R>> = self
                .retry
                .run(operation, || async move {
                    self.client
                        .get_page(next)
                        .await
                        .map_err(|e| classify_error(operation, e))
                })
                .await?;
            match fetched {
                Some(mut p) => {
                    items.extend(p.take_items());
                    page = p;
                }
                None => return Ok(items),
            }
        }
    }

    /// Check runs are wrapped in `{total_count, check_runs}`, so they page by number.
    async fn list_check_runs(
        &self,
        repo: &RepoRef,
        sha: &str,
    ) -> Result<Vec<octocrab::models::checks::CheckRun>> {
        let mut runs = Vec::new();
        let mut page = 1u32;
        loop {
            let batch = self
                .retry
                .run("list_check_runs", || async move {
                    self.client
                        .checks(&repo.owner, &repo.name)
                        .list_check_runs_for_git_ref(Commitish(sha.to_string()))
                        .per_page(PER_PAGE)
                        .page(page)
                        .send()
                        .await
                        .map_err(|e| classify_error("list_check_runs", e))
                })
                .await?;
            let total = batch.total_count;
            let fetched = batch.check_runs.len();
            runs.extend(batch.check_runs);
            if fetched < usize::from(PER_PAGE) || runs.len() as u64 >= total {
                return Ok(runs);
            }
            page += 1;
        }
    }
}

#[async_trait]
impl Platform for GitHubPlatform {
    async fn list_open_issues(
        &self,
        repo: &RepoRef,
        filter: &IssueFilter,
        page: u32,
    ) -> Result<Page<Issue>> {
        let listed = self
            .retry
            .run("list_open_issues", || async move {
                let handler = self.client.issues(&repo.owner, &repo.name);
                let mut request = handler
                    .list()
                    .state(params::State::Open)
                    .per_page(PER_PAGE)
                    .page(page);
                if !filter.labels.is_empty() {
                    request = request.labels(&filter.labels);
                }
                request
                    .send()
                    .await
                    .map_err(|e| classify_error("list_open_issues", e))
            })
            .await?;

        let next_page = listed.next.is_some().then_some(page + 1);
        let items = listed
            .items
            .into_iter()
            .filter(|i| !mapper::is_pull_request(i))
            .map(mapper::map_issue)
            .collect();
        Ok(Page { items, next_page })
    }

    async fn get_issue(&self, repo: &RepoRef, issue_number: u64) -> Result<Issue> {
        let issue = self
            .retry
            .run("get_issue", || async move {
                self.client
                    .issues(&repo.owner, &repo.name)
                    .get(issue_number)
                    .await
                    .map_err(|e| classify_error("get_issue", e))
            })
            .await?;
        if mapper::is_pull_request(&issue) {
            return Err(AppError::NotFound(format!(
                "#{issue_number} in {repo} is a pull request, not an issue"
            )));
        }
        Ok(mapper::map_issue(issue))
    }

    async fn list_open_pull_requests(&self, repo: &RepoRef) -> Result<Vec<PullRequest>> {
        let first = self
            .retry
            .run("list_open_pull_requests", || async move {
                self.client
                    .pulls(&repo.owner, &repo.name)
                    .list()
                    .state(params::State::Open)
                    .per_page(PER_PAGE)
                    .send()
                    .await
                    .map_err(|e| classify_error("list_open_pull_requests", e))
            })
            .await?;
        let pulls = self.remaining_pages("list_open_pull_requests", first).await?;
        Ok(pulls.into_iter().map(mapper::map_pull_request).collect())
    }

    async fn find_pull_requests_by_head(
        &self,
        repo: &RepoRef,
        branch: &str,
    ) -> Result<Vec<PullRequest>> {
        let head = format!("{}:{branch}", repo.owner);
        let head = head.as_str();
        let first = self
            .retry
            .run("find_pull_requests_by_head", || async move {
                self.client
                    .pulls(&repo.owner, &repo.name)
                    .list()
                    .state(params::State::All)
                    .head(head)
                    .sort(params::pulls::Sort::Created)
                    .direction(params::Direction::Descending)
                    .per_page(PER_PAGE)
                    .send()
                    .await
                    .map_err(|e| classify_error("find_pull_requests_by_head", e))
            })
            .await?;
        let pulls = self.remaining_pages("find_pull_requests_by_head", first).await?;
        Ok(pulls.into_iter().map(mapper::map_pull_request).collect())
    }

    async fn get_pull_request(&self, repo: &RepoRef, pr_number: u64) -> Result<PullRequest> {
        let pull = self
            .retry
            .run("get_pull_request", || async move {
                self.client
                    .pulls(&repo.owner, &repo.name)
                    .get(pr_number)
                    .await
                    .map_err(|e| classify_error("get_pull_request", e))
            })
            .await?;
        Ok(mapper::map_pull_request(pull))
    }

    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        pr: &CreatePullRequest,
    ) -> Result<PullRequest> {
        let created = self
            .retry
            .run("create_pull_request", || async move {
                self.client
                    .pulls(&repo.owner, &repo.name)
                    .create(&pr.title, &pr.head_branch, &pr.base_branch)
                    .body(&pr.body)
                    .send()
                    .await
                    .map_err(|e| classify_error("create_pull_request", e))
            })
            .await?;
        Ok(mapper::map_pull_request(created))
    }

    async fn get_diff(&self, repo: &RepoRef, pr_number: u64) -> Result<String> {
        let first = self
            .retry
            .run("get_diff", || async move {
                self.client
                    .pulls(&repo.owner, &repo.name)
                    .list_files(pr_number)
                    .await
                    .map_err(|e| classify_error("get_diff", e))
            })
            .await?;
        let files = self.remaining_pages("get_diff", first).await?;
        Ok(mapper::render_diff(&files))
    }

    async fn list_commits(&self, repo: &RepoRef, pr_number: u64) -> Result<Vec<CommitInfo>> {
        let first = self
            .retry
            .run("list_commits", || async move {
                self.client
                    .pulls(&repo.owner, &repo.name)
                    .pull_number(pr_number)
                    .per_page(PER_PAGE)
                    .commits()
                    .await
                    .map_err(|e| classify_error("list_commits", e))
            })
            .await?;
        let commits = self.remaining_pages("list_commits", first).await?;
        Ok(commits.into_iter().map(mapper::map_commit).collect())
    }

    async fn get_ci_results(&self, repo: &RepoRef, pr: &PullRequest) -> Result<CiResult> {
        let sha = pr.head_sha.as_str();
        let first = self
            .retry
            .run("list_statuses", || async move {
                self.client
                    .repos(&repo.owner, &repo.name)
                    .list_statuses(sha.to_string())
                    .per_page(PER_PAGE)
                    .send()
                    .await
                    .map_err(|e| classify_error("list_statuses", e))
            })
            .await?;
        let statuses = self.remaining_pages("list_statuses", first).await?;
        let runs = self.list_check_runs(repo, sha).await?;
        Ok(mapper::map_ci(statuses, runs))
    }

    async fn list_reviews(&self, repo: &RepoRef, pr_number: u64) -> Result<Vec<Review>> {
        let first = self
            .retry
            .run("list_reviews", || async move {
                self.client
                    .pulls(&repo.owner, &repo.name)
                    .list_reviews(pr_number)
                    .per_page(PER_PAGE)
                    .send()
                    .await
                    .map_err(|e| classify_error("list_reviews", e))
            })
            .await?;
        let reviews = self.remaining_pages("list_reviews", first).await?;
        Ok(reviews.into_iter().map(mapper::map_review).collect())
    }

    async fn create_review(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        body: &str,
        event: ReviewEvent,
    ) -> Result<()> {
        // octocrab has no typed call for submitting a review with an event.
        let route = format!("/repos/{}/{}/pulls/{pr_number}/reviews", repo.owner, repo.name);
        let payload = serde_json::json!({
            "body": body,
            "event": event.as_api_str(),
        });
        let (route, payload) = (&route, &payload);
        let _: serde_json::Value = self
            .retry
            .run("create_review", || async move {
                self.client
                    .post(route, Some(payload))
                    .await
                    .map_err(|e| classify_error("create_review", e))
            })
            .await?;
        Ok(())
    }

    async fn list_comments(&self, repo: &RepoRef, number: u64) -> Result<Vec<Comment>> {
        let first = self
            .retry
            .run("list_comments", || async move {
                self.client
                    .issues(&repo.owner, &repo.name)
                    .list_comments(number)
                    .per_page(PER_PAGE)
                    .send()
                    .await
                    .map_err(|e| classify_error("list_comments", e))
            })
            .await?;
        let comments = self.remaining_pages("list_comments", first).await?;
        Ok(comments.into_iter().map(mapper::map_comment).collect())
    }

    async fn post_comment(&self, repo: &RepoRef, number: u64, body: &str) -> Result<()> {
        self.retry
            .run("post_comment", || async move {
                self.client
                    .issues(&repo.owner, &repo.name)
                    .create_comment(number, body)
                    .await
                    .map_err(|e| classify_error("post_comment", e))
            })
            .await?;
        Ok(())
    }

    async fn request_reviewers(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        reviewers: &[String],
    ) -> Result<()> {
        self.retry
            .run("request_reviewers", || async move {
                self.client
                    .pulls(&repo.owner, &repo.name)
                    .request_reviews(pr_number, reviewers.to_vec(), Vec::<String>::new())
                    .await
                    .map_err(|e| classify_error("request_reviewers", e))
            })
            .await?;
        Ok(())
    }

    async fn close_pull_request(&self, repo: &RepoRef, pr_number: u64) -> Result<()> {
        self.retry
            .run("close_pull_request", || async move {
                self.client
                    .pulls(&repo.owner, &repo.name)
                    .update(pr_number)
                    .state(params::pulls::State::Closed)
                    .send()
                    .await
                    .map_err(|e| classify_error("close_pull_request", e))
            })
            .await?;
        Ok(())
    }
}
