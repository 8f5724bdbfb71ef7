use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::platform::types::{CiResult, ReviewEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    RequestChanges,
    Comment,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approve => "APPROVE",
            Decision::RequestChanges => "REQUEST_CHANGES",
            Decision::Comment => "COMMENT",
        }
    }

    /// Lenient parse of a decision word (`approve`, `request-changes`, ...).
    pub fn parse(text: &str) -> Option<Self> {
        let normalized = text.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "APPROVE" | "APPROVED" => Some(Decision::Approve),
            "REQUEST_CHANGES" | "CHANGES_REQUESTED" => Some(Decision::RequestChanges),
            "COMMENT" | "COMMENTED" => Some(Decision::Comment),
            _ => None,
        }
    }

    pub fn to_event(self) -> ReviewEvent {
        match self {
            Decision::Approve => ReviewEvent::Approve,
            Decision::RequestChanges => ReviewEvent::RequestChanges,
            Decision::Comment => ReviewEvent::Comment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub requirement: String,
    pub satisfied: bool,
    #[serde(default)]
    pub note: String,
}

/// The reviewer's structured judgement of one pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub decision: Decision,
    pub summary: String,
    pub rationale: String,
    pub checklist: Vec<ChecklistItem>,
    pub ci: CiResult,
    pub code_quality: String,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ReviewVerdict {
    /// Stable fingerprint of this verdict for `head_sha`. Two runs that reach
    /// the same verdict on the same commit produce the same digest.
    pub fn digest(&self, head_sha: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(head_sha.as_bytes());
        hasher.update(b"\n");
        hasher.update(serde_json::to_vec(self).unwrap_or_default());
        hex::encode(hasher.finalize())
    }

    pub fn checklist_map(&self) -> BTreeMap<String, bool> {
        self.checklist
            .iter()
            .map(|item| (item.requirement.clone(), item.satisfied))
            .collect()
    }

    pub fn unmet(&self) -> Vec<&ChecklistItem> {
        self.checklist.iter().filter(|item| !item.satisfied).collect()
    }
}
