use serde::Deserialize;
use serde_json::json;

use crate::agent::model::ToolDefinition;
use crate::agent::tools::{ToolOutput, Toolbox};
use crate::error::Result;
use crate::workspace::checks::run_shell;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunCommandArgs {
    pub command: String,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "run_command".to_string(),
        description: "Run a shell command in the repository root (linters, formatters, tests). Returns the exit code and combined output.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command line passed to `sh -c`, e.g. `ruff check . --fix` or `pytest -q`"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        }),
    }
}

pub async fn execute(tools: &mut Toolbox, args: RunCommandArgs) -> Result<ToolOutput> {
    if args.command.trim().is_empty() {
        return Ok(ToolOutput::Error("Command is empty".to_string()));
    }

    let limits = tools.limits();
    tracing::info!(command = %args.command, "Running agent command");
    match run_shell(
        tools.root(),
        &args.command,
        limits.command_timeout,
        limits.max_output_bytes,
    )
    .await
    {
        Ok(out) if out.timed_out => Ok(ToolOutput::Error(out.output)),
        Ok(out) => {
            let code = out
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "killed by signal".to_string());
            Ok(ToolOutput::Success(format!("exit code: {code}\n{}", out.output)))
        }
        Err(e) => Ok(ToolOutput::Error(format!("Failed to start command: {e}"))),
    }
}
