use serde::Deserialize;
use serde_json::json;

use crate::agent::model::ToolDefinition;
use crate::agent::tools::{ToolOutput, Toolbox};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadFileArgs {
    pub path: String,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "read_file".to_string(),
        description: "Read the contents of a file. Returns the file content as text. Use this to understand existing code before making changes.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Relative path to the file from the repository root"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        }),
    }
}

pub async fn execute(tools: &mut Toolbox, args: ReadFileArgs) -> Result<ToolOutput> {
    let full_path = match tools.verified_path(&args.path) {
        Ok(p) => p,
        Err(e) => return Ok(e),
    };

    if !full_path.exists() {
        return Ok(ToolOutput::Error(format!("File not found: {}", args.path)));
    }

    if !full_path.is_file() {
        return Ok(ToolOutput::Error(format!("{} is not a file", args.path)));
    }

    // Check file size
    let metadata = tokio::fs::metadata(&full_path)
        .await
        .map_err(|e| AppError::Workspace(format!("Failed to read file metadata: {e}")))?;

    let max_file_size = tools.limits().max_file_size;
    if metadata.len() as usize > max_file_size {
        return Ok(ToolOutput::Error(format!(
            "File is too large ({} bytes, max {max_file_size} bytes)",
            metadata.len()
        )));
    }

    match tokio::fs::read_to_string(&full_path).await {
        Ok(content) => Ok(ToolOutput::Success(content)),
        Err(e) => Ok(ToolOutput::Error(format!("Failed to read file: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::ToolLimits;
    use crate::config::AgentConfig;

    #[tokio::test]
    async fn test_read_file_limits() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("small.txt"), "hello").unwrap();
        std::fs::write(tmp.path().join("big.txt"), "x".repeat(64)).unwrap();

        let mut limits = ToolLimits::from(&AgentConfig::default());
        limits.max_file_size = 32;
        let mut tools = Toolbox::new(tmp.path(), limits);

        let out = execute(&mut tools, ReadFileArgs { path: "small.txt".into() }).await.unwrap();
        assert!(matches!(out, ToolOutput::Success(ref s) if s == "hello"));

        let out = execute(&mut tools, ReadFileArgs { path: "big.txt".into() }).await.unwrap();
        assert!(matches!(out, ToolOutput::Error(ref s) if s.contains("too large")));

        let out = execute(&mut tools, ReadFileArgs { path: "missing.txt".into() }).await.unwrap();
        assert!(matches!(out, ToolOutput::Error(ref s) if s.contains("not found")));

        let out = execute(&mut tools, ReadFileArgs { path: "../etc/passwd".into() }).await.unwrap();
        assert!(matches!(out, ToolOutput::Error(ref s) if s.contains("Invalid path")));
    }
}
