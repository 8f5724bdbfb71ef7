use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// An `owner/name` repository reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoRef {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_end_matches(".git");
        match s.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(AppError::Config(format!(
                "Invalid repository '{s}', expected owner/repo"
            ))),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub state: IssueState,
}

/// Restricts which open issues are listed.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    /// Issues must carry all of these labels.
    pub labels: Vec<String>,
}

/// One page of a paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullRequestState {
    Open,
    Closed,
    Merged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub head_branch: String,
    pub head_sha: String,
    pub base_branch: String,
    pub state: PullRequestState,
    pub draft: bool,
    pub author: String,
}

impl PullRequest {
    pub fn is_open(&self) -> bool {
        self.state == PullRequestState::Open
    }
}

#[derive(Debug, Clone)]
pub struct CreatePullRequest {
    pub title: String,
    pub body: String,
    pub head_branch: String,
    pub base_branch: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub authored_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Pass,
    Fail,
    Pending,
}

impl JobOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            JobOutcome::Pass => "pass",
            JobOutcome::Fail => "fail",
            JobOutcome::Pending => "pending",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiJob {
    pub outcome: JobOutcome,
    pub log_excerpt: String,
    /// When the run last reported: completion, or start while still running.
    #[serde(default)]
    pub reported_at: Option<DateTime<Utc>>,
}

/// Snapshot of CI jobs for a pull request head, keyed by job name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CiResult {
    pub jobs: BTreeMap<String, CiJob>,
}

impl CiResult {
    pub fn from_outcomes<I, S>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = (S, JobOutcome)>,
        S: Into<String>,
    {
        let jobs = outcomes
            .into_iter()
            .map(|(name, outcome)| {
                (
                    name.into(),
                    CiJob {
                        outcome,
                        log_excerpt: String::new(),
                        reported_at: None,
                    },
                )
            })
            .collect();
        Self { jobs }
    }

    /// Record a job. When the name repeats (a re-run), the most recent report
    /// wins; undated reports lose to dated ones and otherwise the later insert wins.
    pub fn insert(&mut self, name: String, job: CiJob) {
        let superseded = match self.jobs.get(&name) {
            None => true,
            Some(existing) => match (existing.reported_at, job.reported_at) {
                (Some(old), Some(new)) => new >= old,
                (Some(_), None) => false,
                (None, _) => true,
            },
        };
        if superseded {
            self.jobs.insert(name, job);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        self.jobs.values().any(|j| j.outcome == JobOutcome::Pending)
    }

    pub fn has_failure(&self) -> bool {
        self.jobs.values().any(|j| j.outcome == JobOutcome::Fail)
    }

    pub fn jobs_with(&self, outcome: JobOutcome) -> Vec<&str> {
        self.jobs
            .iter()
            .filter(|(_, j)| j.outcome == outcome)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub state: ReviewState,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// The event attached to a submitted review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewEvent {
    Approve,
    RequestChanges,
    Comment,
}

impl ReviewEvent {
    pub fn as_api_str(self) -> &'static str {
        match self {
            ReviewEvent::Approve => "APPROVE",
            ReviewEvent::RequestChanges => "REQUEST_CHANGES",
            ReviewEvent::Comment => "COMMENT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_ref_parse() {
        let repo: RepoRef = "octo/widgets".parse().unwrap();
        assert_eq!(repo.owner, "octo");
        assert_eq!(repo.name, "widgets");
        assert_eq!(repo.to_string(), "octo/widgets");

        assert!("widgets".parse::<RepoRef>().is_err());
        assert!("/widgets".parse::<RepoRef>().is_err());
        assert!("a/b/c".parse::<RepoRef>().is_err());
    }

    fn job(outcome: JobOutcome, at: Option<&str>) -> CiJob {
        CiJob {
            outcome,
            log_excerpt: String::new(),
            reported_at: at.map(|t| t.parse().unwrap()),
        }
    }

    #[test]
    fn test_ci_result_prefers_latest_rerun() {
        let mut ci = CiResult::default();
        ci.insert("tests".into(), job(JobOutcome::Pass, Some("2024-05-01T10:30:00Z")));
        ci.insert("tests".into(), job(JobOutcome::Fail, Some("2024-05-01T10:00:00Z")));
        assert_eq!(ci.jobs["tests"].outcome, JobOutcome::Pass);
        assert!(!ci.has_failure());

        ci.insert("tests".into(), job(JobOutcome::Pending, Some("2024-05-01T11:00:00Z")));
        assert_eq!(ci.jobs["tests"].outcome, JobOutcome::Pending);
    }

    #[test]
    fn test_ci_result_undated_reports() {
        let mut ci = CiResult::default();
        ci.insert("build".into(), job(JobOutcome::Fail, None));
        ci.insert("build".into(), job(JobOutcome::Pass, None));
        assert_eq!(ci.jobs["build"].outcome, JobOutcome::Pass);

        ci.insert("build".into(), job(JobOutcome::Fail, Some("2024-05-01T10:00:00Z")));
        ci.insert("build".into(), job(JobOutcome::Pass, None));
        assert_eq!(ci.jobs["build"].outcome, JobOutcome::Fail);
    }

    #[test]
    fn test_ci_result_queries() {
        let ci = CiResult::from_outcomes([
            ("lint", JobOutcome::Pass),
            ("tests", JobOutcome::Pending),
        ]);
        assert!(ci.has_pending());
        assert!(!ci.has_failure());
        assert_eq!(ci.jobs_with(JobOutcome::Pending), vec!["tests"]);
    }
}
