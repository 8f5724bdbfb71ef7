use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::platform::types::CommitInfo;
use crate::review::verdict::ChecklistItem;

static REQUIREMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+(?:\[[ xX]\]\s+)?(.+?)\s*$").expect("requirement regex")
});

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9_]{3,}").expect("word regex"));

const STOPWORDS: [&str; 24] = [
    "that", "this", "with", "from", "into", "should", "must", "when", "then", "than", "have",
    "will", "shall", "also", "each", "every", "make", "sure", "some", "they", "there", "their",
    "which", "would",
];

/// Bullet, numbered and checkbox lines of an issue body, in order, without
/// duplicates. Lines inside fenced code blocks are skipped.
pub fn extract_requirements(body: &str) -> Vec<String> {
    let mut in_fence = false;
    let mut seen = HashSet::new();
    let mut requirements = Vec::new();

    for line in body.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(caps) = REQUIREMENT_RE.captures(line) {
            let text = caps[1].trim().to_string();
            if !text.is_empty() && seen.insert(text.to_lowercase()) {
                requirements.push(text);
            }
        }
    }
    requirements
}

fn keywords(text: &str) -> Vec<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Added lines of a unified diff.
fn added_lines(diff: &str) -> String {
    diff.lines()
        .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
        .map(|l| &l[1..])
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether the change visibly addresses `requirement`: at least half of its
/// keywords occur in the added lines or commit messages.
pub fn lexically_satisfied(requirement: &str, diff: &str, commits: &[CommitInfo]) -> bool {
    let words = keywords(requirement);
    if words.is_empty() {
        return false;
    }
    let mut haystack = added_lines(diff).to_lowercase();
    for commit in commits {
        haystack.push('\n');
        haystack.push_str(&commit.message.to_lowercase());
    }
    let hits = words.iter().filter(|w| haystack.contains(w.as_str())).count();
    hits * 2 >= words.len()
}

/// Merge the model's assessment with the issue's requirements. Requirements
/// the model assessed keep its answer; the rest are matched lexically.
/// Model items for requirements the issue does not list are kept after them.
pub fn build_checklist(
    requirements: &[String],
    assessed: &[ChecklistItem],
    diff: &str,
    commits: &[CommitInfo],
) -> Vec<ChecklistItem> {
    let normalize = |s: &str| s.trim().trim_end_matches('.').to_lowercase();
    let mut checklist = Vec::new();
    let mut used = vec![false; assessed.len()];

    for requirement in requirements {
        let key = normalize(requirement);
        let found = assessed
            .iter()
            .enumerate()
            .find(|(i, item)| !used[*i] && normalize(&item.requirement) == key);
        match found {
            Some((i, item)) => {
                used[i] = true;
                checklist.push(ChecklistItem {
                    requirement: requirement.clone(),
                    satisfied: item.satisfied,
                    note: item.note.clone(),
                });
            }
            None => {
                let satisfied = lexically_satisfied(requirement, diff, commits);
                checklist.push(ChecklistItem {
                    requirement: requirement.clone(),
                    satisfied,
                    note: if satisfied {
                        "matched in diff".to_string()
                    } else {
                        "not found in diff".to_string()
                    },
                });
            }
        }
    }

    for (i, item) in assessed.iter().enumerate() {
        if !used[i] {
            checklist.push(item.clone());
        }
    }
    checklist
}
