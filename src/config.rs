use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{AppError, Result};
use crate::retry::RetryPolicy;

/// Fully resolved settings, built once at startup and passed into every component.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub github: GitHubConfig,
    pub model: ModelConfig,
    pub workspace: WorkspaceConfig,
    pub agent: AgentConfig,
    pub checks: ChecksConfig,
    pub review: ReviewConfig,
    pub driver: DriverConfig,
}

#[derive(Clone)]
pub struct GitHubConfig {
    pub token: String,
    /// Token used by the reviewer; falls back to `token`.
    pub reviewer_token: String,
    /// Identity auto-requested as reviewer on newly created pull requests.
    pub reviewer_username: Option<String>,
    pub api_base: Option<String>,
    pub git_base_url: String,
    pub branch_prefix: String,
    pub retry: RetryPolicy,
}

// Manual Debug impl to avoid leaking tokens
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &"[REDACTED]")
            .field("reviewer_token", &"[REDACTED]")
            .field("reviewer_username", &self.reviewer_username)
            .field("api_base", &self.api_base)
            .field("git_base_url", &self.git_base_url)
            .field("branch_prefix", &self.branch_prefix)
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Clone)]
pub struct ModelConfig {
    pub id: String,
    pub endpoint: String,
    pub api_key: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptPolicy {
    /// Commit pending edits under a `[draft]` marker.
    Draft,
    /// Throw pending edits away.
    Discard,
}

#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    pub path: PathBuf,
    pub base_branch: String,
    pub author_name: String,
    pub author_email: String,
    pub on_interrupt: InterruptPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,
    #[serde(default = "default_max_wall_clock_secs")]
    pub max_wall_clock_secs: u64,
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: usize,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
    #[serde(default = "default_max_listed_files")]
    pub max_listed_files: usize,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckCommand {
    pub name: String,
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChecksConfig {
    #[serde(default = "default_check_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub commands: Vec<CheckCommand>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewConfig {
    #[serde(default = "default_review_marker")]
    pub marker: String,
    #[serde(default = "default_ci_wait_secs")]
    pub ci_wait_secs: u64,
    #[serde(default = "default_ci_poll_interval_secs")]
    pub ci_poll_interval_secs: u64,
    #[serde(default = "default_max_diff_chars")]
    pub max_diff_chars: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub close_on_cap: bool,
}

fn default_max_turns() -> u32 {
    50
}

fn default_max_tool_calls() -> u32 {
    120
}

fn default_max_wall_clock_secs() -> u64 {
    30 * 60
}

fn default_max_file_size() -> usize {
    512 * 1024 // 512 KB
}

fn default_max_search_results() -> usize {
    50
}

fn default_max_listed_files() -> usize {
    200
}

fn default_command_timeout_secs() -> u64 {
    300
}

fn default_max_output_bytes() -> usize {
    16 * 1024
}

fn default_check_timeout_secs() -> u64 {
    600
}

fn default_review_marker() -> String {
    "[AI-Reviewer]".to_string()
}

fn default_ci_wait_secs() -> u64 {
    600
}

fn default_ci_poll_interval_secs() -> u64 {
    30
}

fn default_max_diff_chars() -> usize {
    60_000
}

fn default_max_iterations() -> u32 {
    3
}

fn default_model_endpoint() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_repo_path() -> PathBuf {
    PathBuf::from("/tmp/clone_repo")
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_git_base_url() -> String {
    "https://github.com".to_string()
}

fn default_branch_prefix() -> String {
    "agent/issue-".to_string()
}

fn default_author_name() -> String {
    "patchloop-agent".to_string()
}

fn default_author_email() -> String {
    "patchloop-agent@users.noreply.github.com".to_string()
}

fn default_model_max_tokens() -> u32 {
    4096
}

fn default_model_timeout_secs() -> u64 {
    180
}

fn default_model_max_attempts() -> u32 {
    3
}

fn default_on_interrupt() -> InterruptPolicy {
    InterruptPolicy::Draft
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_tool_calls: default_max_tool_calls(),
            max_wall_clock_secs: default_max_wall_clock_secs(),
            max_file_size_bytes: default_max_file_size(),
            max_search_results: default_max_search_results(),
            max_listed_files: default_max_listed_files(),
            command_timeout_secs: default_command_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_check_timeout_secs(),
            commands: Vec::new(),
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            marker: default_review_marker(),
            ci_wait_secs: default_ci_wait_secs(),
            ci_poll_interval_secs: default_ci_poll_interval_secs(),
            max_diff_chars: default_max_diff_chars(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            close_on_cap: false,
        }
    }
}

/// Secrets and endpoints, read from plain environment variables.
#[derive(Debug, Default, Deserialize)]
struct EnvSettings {
    github_token: Option<String>,
    github_token_reviewer: Option<String>,
    github_reviewer_username: Option<String>,
    github_repo_path: Option<PathBuf>,
    github_repo_local_path: Option<PathBuf>,
    github_base_branch: Option<String>,
    llm_name: Option<String>,
    url_llm: Option<String>,
    apikey_llm: Option<String>,
    max_iterations: Option<u32>,
}

/// Non-secret tuning, read from `patchloop.toml` and `PATCHLOOP__*` overrides.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TuningFile {
    github: GitHubTuning,
    model: ModelTuning,
    workspace: WorkspaceTuning,
    agent: AgentConfig,
    checks: ChecksConfig,
    review: ReviewConfig,
    driver: DriverConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GitHubTuning {
    api_base: Option<String>,
    git_base_url: String,
    branch_prefix: String,
    retry: RetryPolicy,
}

impl Default for GitHubTuning {
    fn default() -> Self {
        Self {
            api_base: None,
            git_base_url: default_git_base_url(),
            branch_prefix: default_branch_prefix(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ModelTuning {
    max_tokens: u32,
    request_timeout_secs: u64,
    max_attempts: u32,
}

impl Default for ModelTuning {
    fn default() -> Self {
        Self {
            max_tokens: default_model_max_tokens(),
            request_timeout_secs: default_model_timeout_secs(),
            max_attempts: default_model_max_attempts(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WorkspaceTuning {
    author_name: String,
    author_email: String,
    on_interrupt: InterruptPolicy,
}

impl Default for WorkspaceTuning {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: default_author_email(),
            on_interrupt: default_on_interrupt(),
        }
    }
}

impl AppConfig {
    /// Load from the process environment plus an optional tuning file.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        Self::load_from(config_path, None)
    }

    /// Load with an explicit environment map instead of the process environment.
    pub fn load_from(
        config_path: Option<&str>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            // Try default paths
            builder = builder.add_source(config::File::with_name("patchloop").required(false));
        }

        // Environment variable overrides with PATCHLOOP_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("PATCHLOOP")
                .separator("__")
                .try_parsing(true)
                .source(env.clone()),
        );

        let tuning: TuningFile = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let settings: EnvSettings = config::Config::builder()
            .add_source(config::Environment::default().source(env))
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        Self::resolve(settings, tuning)
    }

    fn resolve(env: EnvSettings, tuning: TuningFile) -> Result<Self> {
        let token = required(env.github_token, "GITHUB_TOKEN")?;
        let reviewer_token = non_empty(env.github_token_reviewer).unwrap_or_else(|| token.clone());
        let model_id = required(env.llm_name, "LLM_NAME")?;
        let api_key = required(env.apikey_llm, "APIKEY_LLM")?;
        let endpoint = non_empty(env.url_llm).unwrap_or_else(default_model_endpoint);

        let mut driver = tuning.driver;
        if let Some(max_iterations) = env.max_iterations {
            driver.max_iterations = max_iterations;
        }
        if driver.max_iterations == 0 {
            return Err(AppError::Config(
                "MAX_ITERATIONS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            github: GitHubConfig {
                token,
                reviewer_token,
                reviewer_username: non_empty(env.github_reviewer_username),
                api_base: tuning.github.api_base,
                git_base_url: tuning.github.git_base_url,
                branch_prefix: tuning.github.branch_prefix,
                retry: tuning.github.retry,
            },
            model: ModelConfig {
                id: model_id,
                endpoint,
                api_key,
                max_tokens: tuning.model.max_tokens,
                request_timeout_secs: tuning.model.request_timeout_secs,
                max_attempts: tuning.model.max_attempts,
            },
            workspace: WorkspaceConfig {
                path: env
                    .github_repo_path
                    .or(env.github_repo_local_path)
                    .unwrap_or_else(default_repo_path),
                base_branch: non_empty(env.github_base_branch).unwrap_or_else(default_base_branch),
                author_name: tuning.workspace.author_name,
                author_email: tuning.workspace.author_email,
                on_interrupt: tuning.workspace.on_interrupt,
            },
            agent: tuning.agent,
            checks: tuning.checks,
            review: tuning.review,
            driver,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(value: Option<String>, key: &'static str) -> Result<String> {
    non_empty(value).ok_or(AppError::MissingSetting(key))
}

#[cfg(test)]
impl AppConfig {
    /// Dummy credentials, a workspace at `path`, remotes under `git_base_url`,
    /// and no waiting anywhere.
    pub fn for_tests(path: &std::path::Path, git_base_url: &str) -> Self {
        let env = HashMap::from([
            ("GITHUB_TOKEN".to_string(), "ghp_test".to_string()),
            ("LLM_NAME".to_string(), "test/model".to_string()),
            ("APIKEY_LLM".to_string(), "sk-test".to_string()),
        ]);
        let mut config = Self::load_from(None, Some(env)).expect("test config");
        config.workspace.path = path.to_path_buf();
        config.github.git_base_url = git_base_url.to_string();
        config.github.retry = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: 0.0,
        };
        config.review.ci_wait_secs = 0;
        config.review.ci_poll_interval_secs = 0;
        config
    }
}
