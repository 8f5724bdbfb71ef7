use std::fmt;
use std::path::PathBuf;

use crate::platform::types::Issue;
use crate::review::{Decision, ReviewVerdict, SubmitOutcome};

/// An issue paired with the branch and workspace it is worked on.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub issue: Issue,
    pub branch: String,
    pub workspace_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    PendingCode,
    Coding,
    Reviewing,
    Revising,
    Approved,
    Capped,
    Failed,
}

impl CycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CycleState::Approved | CycleState::Capped | CycleState::Failed)
    }
}

/// Iteration bookkeeping for one issue's code/review loop.
#[derive(Debug, Clone)]
pub struct IterationState {
    count: u32,
    cap: u32,
    last_verdict: Option<ReviewVerdict>,
    state: CycleState,
}

impl IterationState {
    pub fn new(cap: u32) -> Self {
        Self {
            count: 0,
            cap,
            last_verdict: None,
            state: CycleState::PendingCode,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn last_verdict(&self) -> Option<&ReviewVerdict> {
        self.last_verdict.as_ref()
    }

    /// Start another coding pass. Returns `false` once the cap is reached.
    pub fn begin_coding(&mut self) -> bool {
        if self.state.is_terminal() || self.count >= self.cap {
            return false;
        }
        self.count += 1;
        self.state = CycleState::Coding;
        true
    }

    pub fn begin_review(&mut self) {
        self.state = CycleState::Reviewing;
    }

    /// Move on from a review: approved, another revision, or capped.
    pub fn record_verdict(&mut self, verdict: ReviewVerdict) -> CycleState {
        self.state = if verdict.decision == Decision::Approve {
            CycleState::Approved
        } else if self.count >= self.cap {
            CycleState::Capped
        } else {
            CycleState::Revising
        };
        self.last_verdict = Some(verdict);
        self.state
    }

    pub fn fail(&mut self) {
        self.state = CycleState::Failed;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Approved { pr: u64, iterations: u32 },
    /// `pr` is `None` when the cap allowed no coding pass at all.
    Capped { pr: Option<u64>, iterations: u32 },
    Failed { reason: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeOutcome {
    PrOpened { pr: u64 },
    PrUpdated { pr: u64 },
    NoChanges,
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewRunOutcome {
    Reviewed {
        decision: Decision,
        submit: SubmitOutcome,
    },
    Skipped {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Cycle(CycleOutcome),
    Code(CodeOutcome),
    Review(ReviewRunOutcome),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::Cycle(CycleOutcome::Failed { .. })
                | Outcome::Code(CodeOutcome::Failed { .. })
                | Outcome::Review(ReviewRunOutcome::Failed { .. })
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Cycle(CycleOutcome::Approved { pr, iterations }) => {
                write!(f, "APPROVED (PR #{pr}, {iterations} iteration(s))")
            }
            Outcome::Cycle(CycleOutcome::Capped { pr: Some(pr), iterations }) => {
                write!(f, "CAPPED (PR #{pr}, {iterations} iteration(s))")
            }
            Outcome::Cycle(CycleOutcome::Capped { pr: None, iterations }) => {
                write!(f, "CAPPED (no pull request, {iterations} iteration(s))")
            }
            Outcome::Cycle(CycleOutcome::Failed { reason })
            | Outcome::Code(CodeOutcome::Failed { reason })
            | Outcome::Review(ReviewRunOutcome::Failed { reason }) => write!(f, "FAILED: {reason}"),
            Outcome::Cycle(CycleOutcome::Skipped { reason })
            | Outcome::Code(CodeOutcome::Skipped { reason })
            | Outcome::Review(ReviewRunOutcome::Skipped { reason }) => {
                write!(f, "SKIPPED: {reason}")
            }
            Outcome::Code(CodeOutcome::PrOpened { pr }) => write!(f, "PR-OPENED #{pr}"),
            Outcome::Code(CodeOutcome::PrUpdated { pr }) => write!(f, "PR-UPDATED #{pr}"),
            Outcome::Code(CodeOutcome::NoChanges) => write!(f, "NO-CHANGES"),
            Outcome::Review(ReviewRunOutcome::Reviewed { decision, submit }) => {
                let how = match submit {
                    SubmitOutcome::Submitted => "submitted",
                    SubmitOutcome::PostedAsComment => "posted as comment",
                    SubmitOutcome::Suppressed => "already posted",
                };
                write!(f, "{} ({how})", decision.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Issue(u64),
    PullRequest(u64),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Issue(n) => write!(f, "issue #{n}"),
            Subject::PullRequest(n) => write!(f, "PR #{n}"),
        }
    }
}

/// Per-subject outcomes of one invocation, printed at exit.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub entries: Vec<(Subject, Outcome)>,
}

impl RunSummary {
    pub fn push(&mut self, subject: Subject, outcome: Outcome) {
        tracing::info!(subject = %subject, outcome = %outcome, "Finished");
        self.entries.push((subject, outcome));
    }

    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|(_, o)| o.is_failure())
    }

    pub fn outcome_for(&self, subject: Subject) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|(s, _)| *s == subject)
            .map(|(_, o)| o)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return writeln!(f, "Nothing to do.");
        }
        writeln!(f, "Summary:")?;
        for (subject, outcome) in &self.entries {
            writeln!(f, "  {subject}: {outcome}")?;
        }
        Ok(())
    }
}
