use std::process::Stdio;

use serde::Deserialize;
use serde_json::json;

use crate::agent::model::ToolDefinition;
use crate::agent::tools::{ToolOutput, Toolbox};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchArgs {
    pub pattern: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub include: Option<String>,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "search".to_string(),
        description: "Search for a pattern in the codebase using grep. Returns matching lines with file paths and line numbers. Use this to find relevant code, function definitions, usages, etc.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Search pattern (grep-compatible regex)"
                },
                "path": {
                    "type": "string",
                    "description": "Optional: restrict search to this subdirectory (relative to repo root)"
                },
                "include": {
                    "type": "string",
                    "description": "Optional: file glob pattern to include (e.g., '*.rs', '*.py')"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        }),
    }
}

pub async fn execute(tools: &mut Toolbox, args: SearchArgs) -> Result<ToolOutput> {
    let search_dir = match args.path.as_deref() {
        Some(path) if !matches!(path, "." | "") => match tools.verified_path(path) {
            Ok(p) => p,
            Err(e) => return Ok(e),
        },
        _ => tools.root().to_path_buf(),
    };

    if !search_dir.exists() {
        return Ok(ToolOutput::Error(format!(
            "Search directory does not exist: {}",
            args.path.as_deref().unwrap_or(".")
        )));
    }

    let max_results = tools.limits().max_search_results;
    let mut grep_args = vec![
        "-rnI".to_string(),
        "-E".to_string(),
        "--max-count=5".to_string(), // Max matches per file
    ];

    if let Some(include) = &args.include {
        grep_args.push(format!("--include={include}"));
    }

    // Exclude common non-code directories
    grep_args.extend_from_slice(&[
        "--exclude-dir=.git".to_string(),
        "--exclude-dir=node_modules".to_string(),
        "--exclude-dir=target".to_string(),
        "--exclude-dir=.venv".to_string(),
        "--exclude-dir=vendor".to_string(),
    ]);

    grep_args.push("-e".to_string());
    grep_args.push(args.pattern.clone());
    grep_args.push(".".to_string());

    let output = tokio::process::Command::new("grep")
        .args(&grep_args)
        .current_dir(&search_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(output) => {
            // grep exits 2 on a bad pattern
            if output.status.code() == Some(2) {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Ok(ToolOutput::Error(format!("Search failed: {}", stderr.trim())));
            }

            let stdout = String::from_utf8_lossy(&output.stdout);

            if stdout.is_empty() {
                return Ok(ToolOutput::Success("No matches found".to_string()));
            }

            // Truncate to max results
            let lines: Vec<&str> = stdout.lines().take(max_results).collect();
            let result = lines.join("\n");

            let total_lines = stdout.lines().count();
            if total_lines > max_results {
                Ok(ToolOutput::Success(format!(
                    "{result}\n\n... ({} more matches truncated)",
                    total_lines - max_results
                )))
            } else {
                Ok(ToolOutput::Success(result))
            }
        }
        Err(e) => Ok(ToolOutput::Error(format!("Search failed: {e}"))),
    }
}
