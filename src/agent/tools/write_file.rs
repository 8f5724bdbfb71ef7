use serde::Deserialize;
use serde_json::json;

use crate::agent::model::ToolDefinition;
use crate::agent::tools::{ToolOutput, Toolbox};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteFileArgs {
    pub path: String,
    pub content: String,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "write_file".to_string(),
        description: "Create a file or overwrite an existing one with the given content. Parent directories are created as needed.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Relative path to the file from the repository root"
                },
                "content": {
                    "type": "string",
                    "description": "The complete content for the file"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        }),
    }
}

pub async fn execute(tools: &mut Toolbox, args: WriteFileArgs) -> Result<ToolOutput> {
    let full_path = match tools.verified_path(&args.path) {
        Ok(p) => p,
        Err(e) => return Ok(e),
    };

    if full_path.is_dir() {
        return Ok(ToolOutput::Error(format!("{} is a directory", args.path)));
    }

    let existed = full_path.exists();
    if let Some(parent) = full_path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return Ok(ToolOutput::Error(format!("Failed to create directory: {e}")));
        }
    }

    match tokio::fs::write(&full_path, &args.content).await {
        Ok(()) => {
            tools.record_write(&args.path);
            let verb = if existed { "Overwrote" } else { "Created" };
            Ok(ToolOutput::Success(format!(
                "{verb} {} ({} bytes)",
                args.path,
                args.content.len()
            )))
        }
        Err(e) => Ok(ToolOutput::Error(format!("Failed to write file: {e}"))),
    }
}
