use serde::Deserialize;
use serde_json::json;

use crate::agent::model::ToolDefinition;
use crate::agent::tools::{ToolOutput, Toolbox};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditFileArgs {
    pub path: String,
    /// Must occur exactly once in the file.
    pub old_text: String,
    pub new_text: String,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "edit_file".to_string(),
        description: "Replace one exact fragment of an existing file. `old_text` must appear exactly once; include surrounding lines to make it unique.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Relative path to the file from the repository root"
                },
                "old_text": {
                    "type": "string",
                    "description": "The exact text to replace"
                },
                "new_text": {
                    "type": "string",
                    "description": "The replacement text"
                }
            },
            "required": ["path", "old_text", "new_text"],
            "additionalProperties": false
        }),
    }
}

pub async fn execute(tools: &mut Toolbox, args: EditFileArgs) -> Result<ToolOutput> {
    let full_path = match tools.verified_path(&args.path) {
        Ok(p) => p,
        Err(e) => return Ok(e),
    };

    if !full_path.is_file() {
        return Ok(ToolOutput::Error(format!(
            "File does not exist: {}. Use write_file for new files.",
            args.path
        )));
    }
    if args.old_text.is_empty() {
        return Ok(ToolOutput::Error("old_text must not be empty".to_string()));
    }

    let content = match tokio::fs::read_to_string(&full_path).await {
        Ok(c) => c,
        Err(e) => return Ok(ToolOutput::Error(format!("Failed to read file: {e}"))),
    };

    match content.matches(args.old_text.as_str()).count() {
        0 => {
            return Ok(ToolOutput::Error(format!(
                "old_text not found in {}",
                args.path
            )))
        }
        1 => {}
        n => {
            return Ok(ToolOutput::Error(format!(
                "old_text appears {n} times in {}; include more context",
                args.path
            )))
        }
    }

    let updated = content.replacen(&args.old_text, &args.new_text, 1);
    match tokio::fs::write(&full_path, updated).await {
        Ok(()) => {
            tools.record_write(&args.path);
            Ok(ToolOutput::Success(format!("Edited {}", args.path)))
        }
        Err(e) => Ok(ToolOutput::Error(format!("Failed to write file: {e}"))),
    }
}
