//! The markdown review record posted on a pull request, and reading it back.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::platform::types::JobOutcome;
use crate::review::verdict::{Decision, ReviewVerdict};

static DECISION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\**Decision:?\**:?\s*`?(APPROVE|REQUEST_CHANGES|COMMENT)\b")
        .expect("decision regex")
});

static DIGEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*patchloop-digest:\s*([0-9a-f]{64})(?:\s+head=([0-9A-Za-z_-]+))?\s*-->")
        .expect("digest regex")
});

/// A review record found on a pull request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRecord {
    pub decision: Decision,
    pub digest: Option<String>,
    /// Pull request head the record was written for.
    pub head_sha: Option<String>,
    pub at: Option<DateTime<Utc>>,
    pub body: String,
}

pub fn render(verdict: &ReviewVerdict, marker: &str, head_sha: &str) -> String {
    let mut out = format!("{marker}\n\n## Summary\n{}\n", or_none(&verdict.summary));

    out.push_str("\n## Requirements Check\n");
    if verdict.checklist.is_empty() {
        out.push_str("No requirements were identified.\n");
    }
    for item in &verdict.checklist {
        let mark = if item.satisfied { "✅" } else { "❌" };
        if item.note.trim().is_empty() {
            out.push_str(&format!("- {mark} {}\n", item.requirement));
        } else {
            out.push_str(&format!("- {mark} {} ({})\n", item.requirement, item.note.trim()));
        }
    }

    out.push_str("\n## CI Status\n");
    if verdict.ci.is_empty() {
        out.push_str("No CI checks were reported.\n");
    }
    for (name, job) in &verdict.ci.jobs {
        let mark = match job.outcome {
            JobOutcome::Pass => "✅",
            JobOutcome::Fail => "❌",
            JobOutcome::Pending => "⏳",
        };
        out.push_str(&format!("- {mark} {name}: {}\n", job.outcome.as_str()));
    }

    out.push_str(&format!("\n## Code Quality\n{}\n", or_none(&verdict.code_quality)));
    out.push_str(&format!("\n## Issues Found\n{}", bullets(&verdict.issues)));
    out.push_str(&format!("\n## Suggestions\n{}", bullets(&verdict.suggestions)));

    out.push_str(&format!("\nDecision: {}\n", verdict.decision.as_str()));
    if !verdict.rationale.trim().is_empty() {
        out.push_str(&format!("\n{}\n", verdict.rationale.trim()));
    }
    out.push_str(&format!(
        "\n<!-- patchloop-digest: {} head={head_sha} -->\n",
        verdict.digest(head_sha)
    ));
    out
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() {
        "None."
    } else {
        text.trim()
    }
}

fn bullets(items: &[String]) -> String {
    if items.is_empty() {
        return "None.\n".to_string();
    }
    items.iter().map(|i| format!("- {i}\n")).collect()
}

pub fn is_review_record(body: &str, marker: &str) -> bool {
    body.trim_start().starts_with(marker)
}

/// The decision line of a review record, if present.
pub fn parse_decision(body: &str) -> Option<Decision> {
    DECISION_RE
        .captures(body)
        .and_then(|c| Decision::parse(&c[1]))
}

pub fn extract_digest(body: &str) -> Option<String> {
    DIGEST_RE.captures(body).map(|c| c[1].to_string())
}

fn extract_head(body: &str) -> Option<String> {
    DIGEST_RE
        .captures(body)
        .and_then(|c| c.get(2))
        .map(|m| m.as_str().to_string())
}

/// Read a review or comment body back into a record.
pub fn parse_record(body: &str, marker: &str, at: Option<DateTime<Utc>>) -> Option<ReviewRecord> {
    if !is_review_record(body, marker) {
        return None;
    }
    Some(ReviewRecord {
        decision: parse_decision(body)?,
        digest: extract_digest(body),
        head_sha: extract_head(body),
        at,
        body: body.to_string(),
    })
}
