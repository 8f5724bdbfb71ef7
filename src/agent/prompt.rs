use crate::agent::coder::RevisionFeedback;
use crate::platform::types::{CommitInfo, Issue, RepoRef};
use crate::review::ReviewInput;

pub fn coding_system_prompt(repo: &RepoRef, check_names: &[String]) -> String {
    format!(
        r#"You are patchloop, an expert software engineer agent. You are working on repository `{repo}`.

Your task is to resolve one GitHub issue by editing the checked-out working copy.

## Instructions
1. First, explore the codebase to understand the project structure and relevant code.
2. Understand the issue requirements thoroughly. Every bullet point in the issue is a requirement.
3. Plan your changes before making them.
4. Implement the changes needed to resolve the issue.
5. Run the project's linters and tests with run_command and fix what they report.{checks_section}

## Guidelines
- Make minimal, focused changes that directly address the issue.
- Follow the existing code style and patterns in the repository.
- Do not modify files unrelated to the issue.
- Add or update tests for the behavior you change.
- Do not commit, push or create branches. The working copy is committed for you.

## Finishing
When you are done, stop calling tools and reply with a short summary of what you changed and why. The summary becomes the body of the commit message.

## Available Tools
You have tools to read, write and edit files, list directories, search code, run shell commands, and run the configured checks. Use them to explore and modify the codebase."#,
        checks_section = if check_names.is_empty() {
            String::new()
        } else {
            format!(
                "\n   The configured checks are: {}. Run them with run_checks before you finish.",
                check_names.join(", ")
            )
        }
    )
}

pub fn coding_task_message(issue: &Issue, feedback: Option<&RevisionFeedback>) -> String {
    let mut message = format!(
        "## Issue #{number}\n**Title:** {title}\n\n**Description:**\n{body}\n",
        number = issue.number,
        title = issue.title,
        body = if issue.body.trim().is_empty() {
            "(no description)"
        } else {
            issue.body.trim()
        },
    );

    if let Some(feedback) = feedback {
        message.push_str(
            "\n## Review Feedback\nA reviewer requested changes on your previous attempt. The branch already contains that attempt; address every point below.\n\n",
        );
        if !feedback.summary.is_empty() {
            message.push_str(&feedback.summary);
            message.push_str("\n\n");
        }
        for item in &feedback.items {
            message.push_str(&format!("- {item}\n"));
        }
    }

    message
}

pub fn review_system_prompt() -> String {
    r#"You are a meticulous code reviewer. You compare a pull request against the issue it claims to resolve and report whether every requirement is met.

Respond with a single JSON object and nothing else, using exactly these fields:
{
  "summary": "one paragraph describing what the pull request does",
  "checklist": [{"requirement": "text of the requirement", "satisfied": true, "note": "where or why"}],
  "code_quality": "short assessment of readability, tests and style",
  "issues": ["concrete problems that must be fixed"],
  "suggestions": ["optional improvements"],
  "decision": "APPROVE | REQUEST_CHANGES | COMMENT",
  "rationale": "why you chose the decision"
}

## Guidelines
- Assess every listed requirement. Use the requirement text exactly as given.
- A requirement is satisfied only if the diff visibly implements it.
- Request changes when any requirement is unmet or any CI job failed.
- Do not approve while CI is still running."#
        .to_string()
}

pub fn review_task_message(
    repo: &RepoRef,
    input: &ReviewInput<'_>,
    requirements: &[String],
    max_diff_chars: usize,
) -> String {
    let mut message = format!(
        "Repository: `{repo}`\n\n## Pull Request #{number}\n**Title:** {title}\n**Branch:** {head} -> {base}\n\n{body}\n",
        number = input.pr.number,
        title = input.pr.title,
        head = input.pr.head_branch,
        base = input.pr.base_branch,
        body = input.pr.body.trim(),
    );

    match input.issue {
        Some(issue) => message.push_str(&format!(
            "\n## Linked Issue #{}\n**Title:** {}\n\n{}\n",
            issue.number,
            issue.title,
            issue.body.trim()
        )),
        None => message.push_str("\n## Linked Issue\nNo linked issue was found. Judge the pull request on its own description.\n"),
    }

    if !requirements.is_empty() {
        message.push_str("\n## Requirements\n");
        for requirement in requirements {
            message.push_str(&format!("- {requirement}\n"));
        }
    }

    message.push_str("\n## CI Results\n");
    if input.ci.is_empty() {
        message.push_str("No CI checks were reported.\n");
    } else {
        for (name, job) in &input.ci.jobs {
            message.push_str(&format!("- {name}: {}\n", job.outcome.as_str()));
            if !job.log_excerpt.is_empty() {
                message.push_str(&format!("```\n{}\n```\n", job.log_excerpt));
            }
        }
    }

    message.push_str("\n## Commits\n");
    message.push_str(&commit_list(input.commits));

    message.push_str("\n## Diff\n```diff\n");
    message.push_str(&clip(input.diff, max_diff_chars));
    message.push_str("\n```\n");
    message
}

fn commit_list(commits: &[CommitInfo]) -> String {
    if commits.is_empty() {
        return "(none)\n".to_string();
    }
    commits
        .iter()
        .map(|c| {
            let short = c.sha.get(..7).unwrap_or(&c.sha);
            let subject = c.message.lines().next().unwrap_or_default();
            format!("- {short} {subject}\n")
        })
        .collect()
}

/// Cut `text` to at most `max_chars` characters.
fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!(
            "{}\n... (diff truncated, {} more characters)",
            &text[..idx],
            text[idx..].chars().count()
        ),
        None => text.to_string(),
    }
}
