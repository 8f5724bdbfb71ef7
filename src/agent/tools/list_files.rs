use serde::Deserialize;
use serde_json::json;

use crate::agent::model::ToolDefinition;
use crate::agent::tools::{ToolOutput, Toolbox};
use crate::error::{AppError, Result};

/// Directories never worth showing to the agent.
const SKIPPED_DIRS: [&str; 6] = [".git", "node_modules", "target", ".venv", "__pycache__", "vendor"];

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListFilesArgs {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub recursive: bool,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "list_files".to_string(),
        description: "List files and directories. Directories end with '/'. Use this to explore the project structure.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory relative to the repository root (default: the root)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "List the whole subtree instead of one level"
                }
            },
            "additionalProperties": false
        }),
    }
}

pub async fn execute(tools: &mut Toolbox, args: ListFilesArgs) -> Result<ToolOutput> {
    let path_str = args.path.as_deref().unwrap_or(".");
    let full_path = if matches!(path_str, "." | "" | "./") {
        tools.root().to_path_buf()
    } else {
        match tools.verified_path(path_str) {
            Ok(p) => p,
            Err(e) => return Ok(e),
        }
    };

    if !full_path.is_dir() {
        return Ok(ToolOutput::Error(format!("{path_str} is not a directory")));
    }

    let limit = tools.limits().max_listed_files;
    let mut entries = Vec::new();
    let mut pending = vec![(full_path, String::new())];
    let mut truncated = false;

    while let Some((dir, prefix)) = pending.pop() {
        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to read directory: {e}")))?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to read directory entry: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to get file type: {e}")))?;
            let relative = format!("{prefix}{name}");
            if file_type.is_dir() {
                if SKIPPED_DIRS.contains(&name.as_str()) {
                    continue;
                }
                if args.recursive {
                    pending.push((entry.path(), format!("{relative}/")));
                }
                entries.push(format!("{relative}/"));
            } else {
                entries.push(relative);
            }
            if entries.len() >= limit {
                truncated = true;
                break;
            }
        }
        if truncated {
            break;
        }
    }

    entries.sort();

    if entries.is_empty() {
        return Ok(ToolOutput::Success("Directory is empty".to_string()));
    }
    let mut listing = entries.join("\n");
    if truncated {
        listing.push_str(&format!("\n... (listing stopped at {limit} entries)"));
    }
    Ok(ToolOutput::Success(listing))
}
