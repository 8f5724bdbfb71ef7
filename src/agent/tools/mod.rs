pub mod edit_file;
pub mod list_files;
pub mod read_file;
pub mod run_checks;
pub mod run_command;
pub mod search_code;
pub mod write_file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::agent::model::ToolDefinition;
use crate::config::{AgentConfig, ChecksConfig};
use crate::error::Result;
use crate::workspace::manager::WorkspaceManager;

/// The closed set of tools the coding agent may call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "tool", content = "input", rename_all = "snake_case")]
pub enum ToolCall {
    ReadFile(read_file::ReadFileArgs),
    WriteFile(write_file::WriteFileArgs),
    EditFile(edit_file::EditFileArgs),
    ListFiles(list_files::ListFilesArgs),
    Search(search_code::SearchArgs),
    RunCommand(run_command::RunCommandArgs),
    RunChecks(run_checks::RunChecksArgs),
}

#[derive(Debug, Error, PartialEq)]
pub enum ToolCallError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
}

impl ToolCall {
    pub const NAMES: [&'static str; 7] = [
        "read_file",
        "write_file",
        "edit_file",
        "list_files",
        "search",
        "run_command",
        "run_checks",
    ];

    /// Validate a model-issued call against the tool schemas.
    pub fn parse(name: &str, arguments: &str) -> std::result::Result<Self, ToolCallError> {
        if !Self::NAMES.contains(&name) {
            return Err(ToolCallError::UnknownTool(name.to_string()));
        }
        let invalid = |message: String| ToolCallError::InvalidArguments {
            tool: name.to_string(),
            message,
        };

        let input: serde_json::Value = if arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(arguments).map_err(|e| invalid(e.to_string()))?
        };
        serde_json::from_value(serde_json::json!({ "tool": name, "input": input }))
            .map_err(|e| invalid(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::ReadFile(_) => "read_file",
            ToolCall::WriteFile(_) => "write_file",
            ToolCall::EditFile(_) => "edit_file",
            ToolCall::ListFiles(_) => "list_files",
            ToolCall::Search(_) => "search",
            ToolCall::RunCommand(_) => "run_command",
            ToolCall::RunChecks(_) => "run_checks",
        }
    }

    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            read_file::definition(),
            write_file::definition(),
            edit_file::definition(),
            list_files::definition(),
            search_code::definition(),
            run_command::definition(),
            run_checks::definition(),
        ]
    }
}

pub enum ToolOutput {
    /// Normal text result returned to the model.
    Success(String),
    /// Error result returned to the model (the agent can recover).
    Error(String),
}

impl ToolOutput {
    pub fn into_message(self) -> String {
        match self {
            ToolOutput::Success(text) => text,
            ToolOutput::Error(text) => format!("Error: {text}"),
        }
    }
}

/// Limits applied to tool execution.
#[derive(Debug, Clone)]
pub struct ToolLimits {
    pub max_file_size: usize,
    pub max_search_results: usize,
    pub max_listed_files: usize,
    pub command_timeout: Duration,
    pub max_output_bytes: usize,
}

impl From<&AgentConfig> for ToolLimits {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_file_size: config.max_file_size_bytes,
            max_search_results: config.max_search_results,
            max_listed_files: config.max_listed_files,
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            max_output_bytes: config.max_output_bytes,
        }
    }
}

/// Executes tool calls against one workspace and remembers which files the
/// agent wrote, in order.
pub struct Toolbox {
    root: PathBuf,
    limits: ToolLimits,
    checks: ChecksConfig,
    touched: Vec<String>,
}

impl Toolbox {
    pub fn new(root: &Path, limits: ToolLimits) -> Self {
        Self {
            root: root.to_path_buf(),
            limits,
            checks: ChecksConfig::default(),
            touched: Vec::new(),
        }
    }

    /// Make the repository's configured checks available to `run_checks`.
    pub fn with_checks(mut self, checks: ChecksConfig) -> Self {
        self.checks = checks;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limits(&self) -> &ToolLimits {
        &self.limits
    }

    pub fn checks(&self) -> &ChecksConfig {
        &self.checks
    }

    /// Files written or edited so far, first touch first.
    pub fn touched(&self) -> &[String] {
        &self.touched
    }

    pub(crate) fn record_write(&mut self, path: &str) {
        let normalized = path.trim_start_matches("./").to_string();
        if !self.touched.contains(&normalized) {
            self.touched.push(normalized);
        }
    }

    /// Parse and run a call. Parse failures come back as tool errors.
    pub async fn execute(&mut self, name: &str, arguments: &str) -> Result<ToolOutput> {
        let call = match ToolCall::parse(name, arguments) {
            Ok(call) => call,
            Err(e) => return Ok(ToolOutput::Error(e.to_string())),
        };
        self.run(call).await
    }

    pub async fn run(&mut self, call: ToolCall) -> Result<ToolOutput> {
        match call {
            ToolCall::ReadFile(args) => read_file::execute(self, args).await,
            ToolCall::WriteFile(args) => write_file::execute(self, args).await,
            ToolCall::EditFile(args) => edit_file::execute(self, args).await,
            ToolCall::ListFiles(args) => list_files::execute(self, args).await,
            ToolCall::Search(args) => search_code::execute(self, args).await,
            ToolCall::RunCommand(args) => run_command::execute(self, args).await,
            ToolCall::RunChecks(args) => run_checks::execute(self, args).await,
        }
    }

    /// Resolve `path` inside the workspace, or explain why not.
    pub(crate) fn verified_path(&self, path: &str) -> std::result::Result<PathBuf, ToolOutput> {
        WorkspaceManager::resolve_path(&self.root, path)
            .map_err(|e| ToolOutput::Error(format!("Invalid path: {e}")))
    }
}
