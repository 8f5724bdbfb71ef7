use std::sync::Arc;

use futures_util::TryStreamExt;

use crate::agent::{PatchAuthor, RevisionFeedback};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::platform::types::{Issue, IssueFilter, PullRequest, RepoRef};
use crate::platform::{open_issues, Platform};
use crate::review::PatchReviewer;
use crate::shutdown::{settle_workspace, Interrupt};
use crate::workflow::issue::WorkPlan;
use crate::workflow::types::{
    CycleOutcome, CycleState, IterationState, Outcome, RunSummary, Subject, WorkItem,
};
use crate::workspace::{Workspace, WorkspaceManager};

/// Which command a batch runs for each issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Code,
    Cycle { max_iterations: u32 },
}

/// Orchestrates coding and review for issues of one repository.
pub struct Driver {
    pub(crate) config: Arc<AppConfig>,
    /// Host client acting as the coding identity.
    pub(crate) platform: Arc<dyn Platform>,
    /// Host client acting as the reviewer identity.
    pub(crate) review_platform: Arc<dyn Platform>,
    pub(crate) workspace: Arc<WorkspaceManager>,
    pub(crate) author: Arc<dyn PatchAuthor>,
    pub(crate) reviewer: Arc<dyn PatchReviewer>,
    pub(crate) interrupt: Interrupt,
}

impl Driver {
    pub fn new(
        config: Arc<AppConfig>,
        platform: Arc<dyn Platform>,
        review_platform: Arc<dyn Platform>,
        workspace: Arc<WorkspaceManager>,
        author: Arc<dyn PatchAuthor>,
        reviewer: Arc<dyn PatchReviewer>,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            config,
            platform,
            review_platform,
            workspace,
            author,
            reviewer,
            interrupt,
        }
    }

    pub(crate) fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.is_set() {
            Err(AppError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// On failure, leave the workspace clean for the next issue: pending edits
    /// are committed as a draft or discarded, per configuration.
    pub(crate) async fn settle_on_error<T>(
        &self,
        workspace: &Workspace,
        issue_number: u64,
        result: Result<T>,
    ) -> Result<T> {
        if result.is_err() {
            if let Err(e) = settle_workspace(
                &self.workspace,
                workspace,
                self.config.workspace.on_interrupt,
                issue_number,
            )
            .await
            {
                tracing::error!(issue = issue_number, error = %e, "Failed to settle workspace");
            }
        }
        result
    }

    /// Run `mode` over one issue, or every open issue when `issue` is `None`.
    /// Stops early when interrupted; the interrupted issue is recorded FAILED.
    pub async fn run_batch(&self, repo: &RepoRef, issue: Option<u64>, mode: Mode) -> Result<RunSummary> {
        let numbers: Vec<u64> = match issue {
            Some(number) => vec![number],
            None => {
                let filter = IssueFilter::default();
                let issues: Vec<Issue> = open_issues(self.platform.as_ref(), repo, &filter)
                    .try_collect()
                    .await?;
                tracing::info!(count = issues.len(), "Open issues");
                issues.into_iter().map(|i| i.number).collect()
            }
        };

        let mut summary = RunSummary::default();
        for number in numbers {
            if self.interrupt.is_set() {
                tracing::warn!("Interrupted, stopping batch");
                break;
            }
            let outcome = match mode {
                Mode::Code => Outcome::Code(self.code_issue(repo, number).await),
                Mode::Cycle { max_iterations } => {
                    Outcome::Cycle(self.cycle_issue(repo, number, max_iterations).await)
                }
            };
            summary.push(Subject::Issue(number), outcome);
        }
        Ok(summary)
    }

    /// The `cycle` command for one issue: code, review, revise until approved
    /// or capped.
    pub async fn cycle_issue(&self, repo: &RepoRef, issue_number: u64, cap: u32) -> CycleOutcome {
        match self.try_cycle_issue(repo, issue_number, cap).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(issue = issue_number, error = %e, "Cycle failed");
                CycleOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_cycle_issue(&self, repo: &RepoRef, issue_number: u64, cap: u32) -> Result<CycleOutcome> {
        let issue = self.platform.get_issue(repo, issue_number).await?;
        let (pr, feedback) = match self.plan(repo, issue_number).await? {
            WorkPlan::Fresh => (None, None),
            WorkPlan::Rework { pr, feedback } => (Some(pr), Some(feedback)),
            WorkPlan::AwaitingReview { pr } => (Some(pr), None),
            WorkPlan::Skip { reason } => return Ok(CycleOutcome::Skipped { reason }),
        };
        // An open PR nobody has reviewed yet goes straight to review.
        let review_first = pr.is_some() && feedback.is_none();

        let item = self.work_item(issue);
        let mut workspace = self.workspace.acquire(repo).await?;
        let mut state = IterationState::new(cap);
        let result = self
            .iterate(repo, &mut workspace, &item, &mut state, pr, feedback, review_first)
            .await;
        if result.is_err() {
            state.fail();
        }
        let outcome = self.settle_on_error(&workspace, issue_number, result).await?;

        if let CycleOutcome::Capped { pr: Some(pr), .. } = &outcome {
            self.handle_cap(repo, *pr, cap).await;
        }
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn iterate(
        &self,
        repo: &RepoRef,
        workspace: &mut Workspace,
        item: &WorkItem,
        state: &mut IterationState,
        mut pr: Option<PullRequest>,
        mut feedback: Option<RevisionFeedback>,
        mut review_first: bool,
    ) -> Result<CycleOutcome> {
        let issue_number = item.issue.number;
        loop {
            if !review_first {
                if !state.begin_coding() {
                    return Ok(CycleOutcome::Capped {
                        pr: pr.as_ref().map(|p| p.number),
                        iterations: state.count(),
                    });
                }
                tracing::info!(issue = issue_number, iteration = state.count(), "Coding");
                let phase = self
                    .code_phase(repo, workspace, item, pr.as_ref(), feedback.as_ref())
                    .await?;
                pr = Some(phase.pull_request().clone());
            }
            review_first = false;
            self.check_interrupt()?;

            let Some(current) = pr.as_ref() else {
                return Err(AppError::Internal("no pull request to review".to_string()));
            };
            state.begin_review();
            tracing::info!(issue = issue_number, pr = current.number, iteration = state.count(), "Reviewing");
            let (verdict, _) = self.review_pull_request(repo, current, false).await?;

            let next_feedback = RevisionFeedback::from_verdict(&verdict);
            match state.record_verdict(verdict) {
                CycleState::Approved => {
                    return Ok(CycleOutcome::Approved {
                        pr: current.number,
                        iterations: state.count(),
                    })
                }
                CycleState::Capped => {
                    return Ok(CycleOutcome::Capped {
                        pr: Some(current.number),
                        iterations: state.count(),
                    })
                }
                _ => {
                    tracing::info!(issue = issue_number, pr = current.number, "Revising");
                    feedback = Some(next_feedback);
                }
            }
        }
    }

    async fn handle_cap(&self, repo: &RepoRef, pr_number: u64, cap: u32) {
        tracing::warn!(pr = pr_number, cap, "Iteration cap reached without approval");
        if !self.config.driver.close_on_cap {
            return;
        }
        let body = format!(
            "Closing after {cap} iteration(s) without approval.\n\n---\n*Automated by patchloop*"
        );
        if let Err(e) = self.platform.post_comment(repo, pr_number, &body).await {
            tracing::warn!(pr = pr_number, error = %e, "Failed to comment before closing");
        }
        if let Err(e) = self.platform.close_pull_request(repo, pr_number).await {
            tracing::warn!(pr = pr_number, error = %e, "Failed to close capped pull request");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::agent::model::scripted::ScriptedBackend;
    use crate::agent::{AgentEngine, CodingAgent, CodingTask};
    use crate::config::CheckCommand;
    use crate::platform::fake::FakePlatform;
    use crate::platform::types::{CiResult, JobOutcome};
    use crate::workflow::types::CodeOutcome;
    use crate::review::{ChecklistItem, Decision, ReviewInput, ReviewVerdict, ReviewerAgent};
    use crate::workspace::testing::{read_remote_file, seed_remote, SeededRemote};
    use crate::workspace::{FileChange, FileEdit, Patch};

    /// Writes a different `app.py` on every call.
    #[derive(Default)]
    struct CountingAuthor {
        calls: AtomicU32,
        empty: bool,
    }

    #[async_trait]
    impl PatchAuthor for CountingAuthor {
        async fn write_patch(
            &self,
            task: &CodingTask<'_>,
            _workspace: &Workspace,
            _interrupt: &Interrupt,
        ) -> Result<Patch> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let mut patch = Patch::new(format!("Fix #{}: attempt {n}", task.issue.number));
            if !self.empty {
                patch.record(FileEdit {
                    path: "app.py".into(),
                    change: FileChange::Write(format!("# attempt {n}\n")),
                });
            }
            Ok(patch)
        }
    }

    struct AlwaysRequestChanges;

    #[async_trait]
    impl PatchReviewer for AlwaysRequestChanges {
        async fn review(&self, _repo: &RepoRef, input: &ReviewInput<'_>) -> Result<ReviewVerdict> {
            Ok(ReviewVerdict {
                decision: Decision::RequestChanges,
                summary: "Not there yet.".into(),
                rationale: "Validation is still missing.".into(),
                checklist: vec![ChecklistItem {
                    requirement: "input validation".into(),
                    satisfied: false,
                    note: String::new(),
                }],
                ci: input.ci.clone(),
                code_quality: String::new(),
                issues: vec![],
                suggestions: vec![],
            })
        }
    }

    struct Harness {
        remote: SeededRemote,
        _tmp: tempfile::TempDir,
        config: Arc<AppConfig>,
        platform: Arc<FakePlatform>,
        manager: Arc<WorkspaceManager>,
        repo: RepoRef,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(|_, _| {})
        }

        /// Harness whose config, and the workspace manager built from it,
        /// carry the changes made by `tweak`.
        fn with_config(tweak: impl FnOnce(&mut AppConfig, &std::path::Path)) -> Self {
            let remote = seed_remote(&[("app.py", "def parse(x):\n    return x\n")]);
            let tmp = tempfile::tempdir().unwrap();
            let mut config = AppConfig::for_tests(&tmp.path().join("ws"), &remote.base_url);
            tweak(&mut config, tmp.path());
            let platform = Arc::new(FakePlatform::new().with_remote(remote.bare_path.clone()));
            platform.add_issue(
                42,
                "Add input validation to parse()",
                "parse() accepts empty input.\n\n- input validation\n",
            );
            let manager = Arc::new(WorkspaceManager::new(&config));
            let repo = platform.repo();
            Self {
                remote,
                _tmp: tmp,
                config: Arc::new(config),
                platform,
                manager,
                repo,
            }
        }

        fn driver(&self, author: Arc<dyn PatchAuthor>, reviewer: Arc<dyn PatchReviewer>) -> Driver {
            Driver::new(
                self.config.clone(),
                self.platform.clone(),
                self.platform.clone(),
                self.manager.clone(),
                author,
                reviewer,
                Interrupt::new(),
            )
        }
    }

    #[tokio::test]
    async fn test_cycle_stops_at_iteration_cap() {
        let h = Harness::new();
        let author = Arc::new(CountingAuthor::default());
        let driver = h.driver(author.clone(), Arc::new(AlwaysRequestChanges));

        let outcome = driver.cycle_issue(&h.repo, 42, 2).await;

        assert_eq!(outcome, CycleOutcome::Capped { pr: Some(101), iterations: 2 });
        assert_eq!(author.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.platform.reviews(101).len(), 2);
        assert!(h.platform.pull_requests()[0].is_open());
    }

    #[tokio::test]
    async fn test_repeat_cycle_reuses_pull_request() {
        let h = Harness::new();
        let author = Arc::new(CountingAuthor::default());
        let driver = h.driver(author.clone(), Arc::new(AlwaysRequestChanges));

        driver.cycle_issue(&h.repo, 42, 1).await;
        let again = driver.cycle_issue(&h.repo, 42, 1).await;

        assert_eq!(again, CycleOutcome::Capped { pr: Some(101), iterations: 1 });
        assert_eq!(h.platform.created_pr_count(), 1);
        assert_eq!(author.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            read_remote_file(&h.remote.bare_path, "agent/issue-42", "app.py").as_deref(),
            Some("# attempt 2\n")
        );
    }

    #[tokio::test]
    async fn test_zero_cap_reports_no_pull_request() {
        let h = Harness::new();
        let author = Arc::new(CountingAuthor::default());
        let driver = h.driver(author.clone(), Arc::new(AlwaysRequestChanges));

        let outcome = driver.cycle_issue(&h.repo, 42, 0).await;

        assert_eq!(outcome, CycleOutcome::Capped { pr: None, iterations: 0 });
        assert_eq!(author.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.platform.created_pr_count(), 0);
    }

    #[tokio::test]
    async fn test_configured_checks_run_before_push() {
        let h = Harness::with_config(|config, tmp| {
            config.checks.commands = vec![CheckCommand {
                name: "tests".into(),
                command: format!("touch {}", tmp.join("check_ran_marker").display()),
            }];
        });
        let driver = h.driver(Arc::new(CountingAuthor::default()), Arc::new(AlwaysRequestChanges));

        driver.cycle_issue(&h.repo, 42, 1).await;

        assert!(h._tmp.path().join("check_ran_marker").exists());
        let pr = &h.platform.pull_requests()[0];
        assert!(pr.body.contains("## Checks\n\n- ✅ tests\n"));
    }

    #[tokio::test]
    async fn test_failing_check_is_recorded_but_still_pushed() {
        let h = Harness::with_config(|config, _| {
            config.checks.commands = vec![CheckCommand {
                name: "lint".into(),
                command: "exit 1".into(),
            }];
        });
        let driver = h.driver(Arc::new(CountingAuthor::default()), Arc::new(AlwaysRequestChanges));

        driver.cycle_issue(&h.repo, 42, 1).await;

        assert!(h.platform.pull_requests()[0].body.contains("- ❌ lint"));
        assert_eq!(
            read_remote_file(&h.remote.bare_path, "agent/issue-42", "app.py").as_deref(),
            Some("# attempt 1\n")
        );
    }

    #[tokio::test]
    async fn test_close_on_cap_closes_pull_request() {
        let mut h = Harness::new();
        let mut config = (*h.config).clone();
        config.driver.close_on_cap = true;
        h.config = Arc::new(config);
        let driver = h.driver(Arc::new(CountingAuthor::default()), Arc::new(AlwaysRequestChanges));

        let outcome = driver.cycle_issue(&h.repo, 42, 1).await;

        assert!(matches!(outcome, CycleOutcome::Capped { pr: Some(101), .. }));
        assert!(!h.platform.pull_requests()[0].is_open());
        assert!(h.platform.comments(101).iter().any(|c| c.body.contains("without approval")));
    }

    #[tokio::test]
    async fn test_issue_42_is_coded_reviewed_and_approved() {
        let h = Harness::new();
        let coder = Arc::new(ScriptedBackend::new(vec![
            ScriptedBackend::tool_call(
                "c1",
                "write_file",
                json!({
                    "path": "app.py",
                    "content": "def parse(x):\n    if not x:\n        raise ValueError('empty input')\n    return x\n"
                }),
            ),
            ScriptedBackend::text("Reject empty input in parse()."),
        ]));
        let reviewer = Arc::new(ScriptedBackend::new(vec![ScriptedBackend::text(
            &json!({
                "summary": "Adds input validation to parse().",
                "checklist": [{"requirement": "input validation", "satisfied": true}],
                "code_quality": "Small and focused.",
                "issues": [],
                "suggestions": [],
                "decision": "APPROVE",
                "rationale": "The change does what the issue asks."
            })
            .to_string(),
        )]));
        let engine = AgentEngine::new(coder, &h.config.agent);
        let author = Arc::new(CodingAgent::new(engine, h.manager.clone(), &h.config.agent));
        let driver = h.driver(author, Arc::new(ReviewerAgent::new(reviewer, 20_000)));
        h.platform.push_ci(
            101,
            CiResult::from_outcomes([("lint", JobOutcome::Pass), ("tests", JobOutcome::Pass)]),
        );

        let outcome = driver.cycle_issue(&h.repo, 42, 3).await;

        assert_eq!(outcome, CycleOutcome::Approved { pr: 101, iterations: 1 });
        let pr = &h.platform.pull_requests()[0];
        assert_eq!(pr.head_branch, "agent/issue-42");
        assert_eq!(pr.base_branch, "main");
        assert!(pr.body.starts_with("Fixes #42"));
        let reviews = h.platform.reviews(101);
        assert_eq!(reviews.len(), 1);
        assert!(reviews[0].body.contains("Decision: APPROVE"));
        assert!(read_remote_file(&h.remote.bare_path, "agent/issue-42", "app.py")
            .unwrap()
            .contains("ValueError"));
    }

    #[tokio::test]
    async fn test_failing_ci_requests_changes() {
        let h = Harness::new();
        let reviewer = Arc::new(ScriptedBackend::new(vec![ScriptedBackend::text(
            r#"{"checklist": [{"requirement": "input validation", "satisfied": true}], "decision": "APPROVE"}"#,
        )]));
        let driver = h.driver(
            Arc::new(CountingAuthor::default()),
            Arc::new(ReviewerAgent::new(reviewer, 20_000)),
        );
        h.platform.push_ci(
            101,
            CiResult::from_outcomes([("lint", JobOutcome::Pass), ("tests", JobOutcome::Fail)]),
        );

        let outcome = driver.cycle_issue(&h.repo, 42, 1).await;

        assert_eq!(outcome, CycleOutcome::Capped { pr: Some(101), iterations: 1 });
        let reviews = h.platform.reviews(101);
        assert!(reviews[0].body.contains("Decision: REQUEST_CHANGES"));
        assert!(reviews[0].body.contains("CI failed: tests."));
    }

    #[tokio::test]
    async fn test_code_run_without_changes_fails() {
        let h = Harness::new();
        let author = Arc::new(CountingAuthor {
            empty: true,
            ..CountingAuthor::default()
        });
        let driver = h.driver(author, Arc::new(AlwaysRequestChanges));

        let summary = driver.run_batch(&h.repo, None, Mode::Code).await.unwrap();

        match summary.outcome_for(Subject::Issue(42)) {
            Some(Outcome::Code(CodeOutcome::Failed { reason })) => {
                assert!(reason.contains("agent produced no changes"))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(summary.has_failures());
        assert_eq!(h.platform.created_pr_count(), 0);
    }

    #[tokio::test]
    async fn test_code_run_skips_pull_request_awaiting_review() {
        let h = Harness::new();
        let driver = h.driver(Arc::new(CountingAuthor::default()), Arc::new(AlwaysRequestChanges));

        assert_eq!(
            driver.code_issue(&h.repo, 42).await,
            CodeOutcome::PrOpened { pr: 101 }
        );
        assert!(matches!(
            driver.code_issue(&h.repo, 42).await,
            CodeOutcome::Skipped { ref reason } if reason.contains("awaiting review")
        ));
    }

    #[tokio::test]
    async fn test_interrupted_batch_does_nothing() {
        let h = Harness::new();
        let driver = h.driver(Arc::new(CountingAuthor::default()), Arc::new(AlwaysRequestChanges));
        driver.interrupt.trigger();

        let summary = driver
            .run_batch(&h.repo, Some(42), Mode::Cycle { max_iterations: 3 })
            .await
            .unwrap();
        assert!(summary.entries.is_empty());
        assert_eq!(h.platform.created_pr_count(), 0);
    }
}
