use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::agent::model::ToolDefinition;
use crate::agent::tools::{ToolOutput, Toolbox};
use crate::error::Result;
use crate::workspace::checks::{self, CheckResult};

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunChecksArgs {
    /// Subset of configured checks; all of them when absent.
    #[serde(default)]
    pub names: Option<Vec<String>>,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "run_checks".to_string(),
        description: "Run the repository's configured lint and test checks and report pass or fail with output for each.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "names": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Checks to run. Omit to run every configured check."
                }
            },
            "additionalProperties": false
        }),
    }
}

/// Render check results the way the agent and pull request bodies show them.
pub fn format_results(results: &BTreeMap<String, CheckResult>) -> String {
    let mut out = String::new();
    for (name, result) in results {
        let status = if result.passed { "PASS" } else { "FAIL" };
        out.push_str(&format!("## {name}: {status}\n"));
        let output = result.output.trim();
        if !output.is_empty() {
            out.push_str(output);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

pub async fn execute(tools: &mut Toolbox, args: RunChecksArgs) -> Result<ToolOutput> {
    let configured = &tools.checks().commands;
    if configured.is_empty() {
        return Ok(ToolOutput::Error(
            "No checks are configured for this repository; use run_command instead".to_string(),
        ));
    }

    let names = args
        .names
        .filter(|names| !names.is_empty())
        .unwrap_or_else(|| configured.iter().map(|c| c.name.clone()).collect());
    let results = checks::run_checks(
        tools.root(),
        configured,
        &names,
        Duration::from_secs(tools.checks().timeout_secs),
        tools.limits().max_output_bytes,
    )
    .await;

    let failed = results.values().filter(|r| !r.passed).count();
    let mut text = if failed == 0 {
        format!("All {} check(s) passed.\n\n", results.len())
    } else {
        format!("{failed} of {} check(s) failed.\n\n", results.len())
    };
    text.push_str(&format_results(&results));
    Ok(ToolOutput::Success(text))
}
