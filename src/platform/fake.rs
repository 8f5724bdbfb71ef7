//! In-memory `Platform` used by tests.
//!
//! When a bare remote is attached, pull request heads, diffs and commits are
//! read from it, so branches pushed by the workspace show up here.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use git2::{DiffFormat, Oid, Repository, Sort};

use super::types::*;
use super::Platform;
use crate::error::{AppError, Result};

#[derive(Default)]
struct State {
    issues: BTreeMap<u64, Issue>,
    prs: BTreeMap<u64, PullRequest>,
    diffs: HashMap<u64, String>,
    commits: HashMap<u64, Vec<CommitInfo>>,
    ci: HashMap<u64, VecDeque<CiResult>>,
    reviews: HashMap<u64, Vec<Review>>,
    comments: HashMap<u64, Vec<Comment>>,
    reviewer_requests: Vec<(u64, Vec<String>)>,
    next_number: u64,
    next_id: u64,
    created_prs: u32,
    review_calls: u32,
}

pub struct FakePlatform {
    repo: RepoRef,
    page_size: usize,
    remote: Option<PathBuf>,
    review_author: String,
    reject_review_events: bool,
    state: Mutex<State>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            repo: RepoRef {
                owner: "octo".to_string(),
                name: "widgets".to_string(),
            },
            page_size: 100,
            remote: None,
            review_author: "review-bot".to_string(),
            reject_review_events: false,
            state: Mutex::new(State {
                next_number: 100,
                next_id: 1,
                ..State::default()
            }),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Read heads, diffs and commits from a bare repository.
    pub fn with_remote(mut self, remote: PathBuf) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Refuse APPROVE / REQUEST_CHANGES events the way GitHub does for self-reviews.
    pub fn rejecting_review_events(mut self) -> Self {
        self.reject_review_events = true;
        self
    }

    pub fn repo(&self) -> RepoRef {
        self.repo.clone()
    }

    pub fn add_issue(&self, number: u64, title: &str, body: &str) {
        self.state.lock().unwrap().issues.insert(
            number,
            Issue {
                number,
                title: title.to_string(),
                body: body.to_string(),
                labels: Vec::new(),
                state: IssueState::Open,
            },
        );
    }

    pub fn label_issue(&self, number: u64, label: &str) {
        if let Some(issue) = self.state.lock().unwrap().issues.get_mut(&number) {
            issue.labels.push(label.to_string());
        }
    }

    pub fn insert_pull_request(&self, pr: PullRequest) {
        self.state.lock().unwrap().prs.insert(pr.number, pr);
    }

    pub fn set_diff(&self, pr_number: u64, diff: &str) {
        self.state
            .lock()
            .unwrap()
            .diffs
            .insert(pr_number, diff.to_string());
    }

    pub fn set_commits(&self, pr_number: u64, commits: Vec<CommitInfo>) {
        self.state.lock().unwrap().commits.insert(pr_number, commits);
    }

    /// Queue CI snapshots; each poll consumes one until the last remains.
    pub fn push_ci(&self, pr_number: u64, ci: CiResult) {
        self.state
            .lock()
            .unwrap()
            .ci
            .entry(pr_number)
            .or_default()
            .push_back(ci);
    }

    pub fn add_review(&self, pr_number: u64, author: &str, body: &str, state: ReviewState) {
        let mut s = self.state.lock().unwrap();
        let id = s.next_id;
        s.next_id += 1;
        s.reviews.entry(pr_number).or_default().push(Review {
            id,
            author: author.to_string(),
            body: body.to_string(),
            state,
            submitted_at: Some(chrono::Utc::now()),
        });
    }

    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.state.lock().unwrap().prs.values().cloned().collect()
    }

    pub fn reviews(&self, pr_number: u64) -> Vec<Review> {
        self.state
            .lock()
            .unwrap()
            .reviews
            .get(&pr_number)
            .cloned()
            .unwrap_or_default()
    }

    pub fn comments(&self, number: u64) -> Vec<Comment> {
        self.state
            .lock()
            .unwrap()
            .comments
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }

    pub fn reviewer_requests(&self) -> Vec<(u64, Vec<String>)> {
        self.state.lock().unwrap().reviewer_requests.clone()
    }

    pub fn created_pr_count(&self) -> u32 {
        self.state.lock().unwrap().created_prs
    }

    pub fn review_call_count(&self) -> u32 {
        self.state.lock().unwrap().review_calls
    }

    fn open_remote(&self) -> Option<Repository> {
        self.remote
            .as_ref()
            .and_then(|path| Repository::open_bare(path).ok())
    }

    fn branch_oid(repo: &Repository, branch: &str) -> Option<Oid> {
        repo.find_reference(&format!("refs/heads/{branch}"))
            .ok()
            .and_then(|r| r.target())
    }

    fn refresh(&self, mut pr: PullRequest) -> PullRequest {
        if let Some(remote) = self.open_remote() {
            if let Some(oid) = Self::branch_oid(&remote, &pr.head_branch) {
                pr.head_sha = oid.to_string();
            }
        }
        pr
    }

    fn remote_diff(&self, pr: &PullRequest) -> Option<String> {
        let remote = self.open_remote()?;
        let head = remote
            .find_commit(Self::branch_oid(&remote, &pr.head_branch)?)
            .ok()?;
        let base = remote
            .find_commit(Self::branch_oid(&remote, &pr.base_branch)?)
            .ok()?;
        let diff = remote
            .diff_tree_to_tree(base.tree().ok().as_ref(), head.tree().ok().as_ref(), None)
            .ok()?;

        let mut out = String::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                out.push(line.origin());
            }
            out.push_str(&String::from_utf8_lossy(line.content()));
            true
        })
        .ok()?;
        Some(out)
    }

    fn remote_commits(&self, pr: &PullRequest) -> Option<Vec<CommitInfo>> {
        let remote = self.open_remote()?;
        let head = Self::branch_oid(&remote, &pr.head_branch)?;
        let base = Self::branch_oid(&remote, &pr.base_branch)?;
        let mut walk = remote.revwalk().ok()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE).ok()?;
        walk.push(head).ok()?;
        walk.hide(base).ok()?;

        let commits = walk
            .filter_map(|oid| oid.ok())
            .filter_map(|oid| remote.find_commit(oid).ok())
            .map(|c| CommitInfo {
                sha: c.id().to_string(),
                message: c.message().unwrap_or_default().to_string(),
                authored_at: chrono::DateTime::from_timestamp(c.time().seconds(), 0),
            })
            .collect();
        Some(commits)
    }

    fn lookup(&self, pr_number: u64) -> Result<PullRequest> {
        let pr = self
            .state
            .lock()
            .unwrap()
            .prs
            .get(&pr_number)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("pull request #{pr_number}")))?;
        Ok(self.refresh(pr))
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn list_open_issues(
        &self,
        _repo: &RepoRef,
        filter: &IssueFilter,
        page: u32,
    ) -> Result<Page<Issue>> {
        let s = self.state.lock().unwrap();
        let matching: Vec<Issue> = s
            .issues
            .values()
            .filter(|i| i.state == IssueState::Open)
            .filter(|i| filter.labels.iter().all(|l| i.labels.contains(l)))
            .cloned()
            .collect();
        let start = (page.saturating_sub(1) as usize) * self.page_size;
        let items: Vec<Issue> = matching
            .iter()
            .skip(start)
            .take(self.page_size)
            .cloned()
            .collect();
        let next_page = (start + items.len() < matching.len()).then_some(page + 1);
        Ok(Page { items, next_page })
    }

    async fn get_issue(&self, _repo: &RepoRef, issue_number: u64) -> Result<Issue> {
        self.state
            .lock()
            .unwrap()
            .issues
            .get(&issue_number)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("issue #{issue_number}")))
    }

    async fn list_open_pull_requests(&self, _repo: &RepoRef) -> Result<Vec<PullRequest>> {
        Ok(self
            .pull_requests()
            .into_iter()
            .filter(PullRequest::is_open)
            .map(|pr| self.refresh(pr))
            .collect())
    }

    async fn find_pull_requests_by_head(
        &self,
        _repo: &RepoRef,
        branch: &str,
    ) -> Result<Vec<PullRequest>> {
        let mut prs: Vec<PullRequest> = self
            .pull_requests()
            .into_iter()
            .filter(|pr| pr.head_branch == branch)
            .map(|pr| self.refresh(pr))
            .collect();
        prs.reverse();
        Ok(prs)
    }

    async fn get_pull_request(&self, _repo: &RepoRef, pr_number: u64) -> Result<PullRequest> {
        self.lookup(pr_number)
    }

    async fn create_pull_request(
        &self,
        _repo: &RepoRef,
        pr: &CreatePullRequest,
    ) -> Result<PullRequest> {
        let created = {
            let mut s = self.state.lock().unwrap();
            if s.prs
                .values()
                .any(|p| p.is_open() && p.head_branch == pr.head_branch)
            {
                return Err(AppError::GitHubApi(format!(
                    "422 A pull request already exists for {}",
                    pr.head_branch
                )));
            }
            s.next_number += 1;
            s.created_prs += 1;
            let number = s.next_number;
            let created = PullRequest {
                number,
                title: pr.title.clone(),
                body: pr.body.clone(),
                head_branch: pr.head_branch.clone(),
                head_sha: format!("fake-{number}"),
                base_branch: pr.base_branch.clone(),
                state: PullRequestState::Open,
                draft: false,
                author: "coder-bot".to_string(),
            };
            s.prs.insert(number, created.clone());
            created
        };
        Ok(self.refresh(created))
    }

    async fn get_diff(&self, _repo: &RepoRef, pr_number: u64) -> Result<String> {
        if let Some(diff) = self.state.lock().unwrap().diffs.get(&pr_number) {
            return Ok(diff.clone());
        }
        let pr = self.lookup(pr_number)?;
        Ok(self.remote_diff(&pr).unwrap_or_default())
    }

    async fn list_commits(&self, _repo: &RepoRef, pr_number: u64) -> Result<Vec<CommitInfo>> {
        if let Some(commits) = self.state.lock().unwrap().commits.get(&pr_number) {
            return Ok(commits.clone());
        }
        let pr = self.lookup(pr_number)?;
        Ok(self.remote_commits(&pr).unwrap_or_default())
    }

    async fn get_ci_results(&self, _repo: &RepoRef, pr: &PullRequest) -> Result<CiResult> {
        let mut s = self.state.lock().unwrap();
        let Some(queue) = s.ci.get_mut(&pr.number) else {
            return Ok(CiResult::default());
        };
        let ci = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(ci.unwrap_or_default())
    }

    async fn list_reviews(&self, _repo: &RepoRef, pr_number: u64) -> Result<Vec<Review>> {
        Ok(self.reviews(pr_number))
    }

    async fn create_review(
        &self,
        _repo: &RepoRef,
        pr_number: u64,
        body: &str,
        event: ReviewEvent,
    ) -> Result<()> {
        self.state.lock().unwrap().review_calls += 1;
        if self.reject_review_events && event != ReviewEvent::Comment {
            return Err(AppError::GitHubApi(
                "422 Can not approve your own pull request".to_string(),
            ));
        }
        let state = match event {
            ReviewEvent::Approve => ReviewState::Approved,
            ReviewEvent::RequestChanges => ReviewState::ChangesRequested,
            ReviewEvent::Comment => ReviewState::Commented,
        };
        self.add_review(pr_number, &self.review_author, body, state);
        Ok(())
    }

    async fn list_comments(&self, _repo: &RepoRef, number: u64) -> Result<Vec<Comment>> {
        Ok(self.comments(number))
    }

    async fn post_comment(&self, _repo: &RepoRef, number: u64, body: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let id = s.next_id;
        s.next_id += 1;
        s.comments.entry(number).or_default().push(Comment {
            id,
            author: self.review_author.clone(),
            body: body.to_string(),
            created_at: Some(chrono::Utc::now()),
        });
        Ok(())
    }

    async fn request_reviewers(
        &self,
        _repo: &RepoRef,
        pr_number: u64,
        reviewers: &[String],
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .reviewer_requests
            .push((pr_number, reviewers.to_vec()));
        Ok(())
    }

    async fn close_pull_request(&self, _repo: &RepoRef, pr_number: u64) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let pr = s
            .prs
            .get_mut(&pr_number)
            .ok_or_else(|| AppError::NotFound(format!("pull request #{pr_number}")))?;
        pr.state = PullRequestState::Closed;
        Ok(())
    }
}
