use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration error: required setting {0} is not set")]
    MissingSetting(&'static str),

    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    #[error("GitHub API transient error: {0}")]
    GitHubTransient(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Workspace error: uncommitted changes on {0} would be lost")]
    UncommittedChanges(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Model API error: {0}")]
    ModelApi(String),

    #[error("Model API rate limited: {0}")]
    ModelRateLimited(String),

    #[error("Model API transient error: {0}")]
    ModelTransient(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Interrupted")]
    Interrupted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether a retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::GitHubTransient(_)
            | AppError::ModelRateLimited(_)
            | AppError::ModelTransient(_) => true,
            AppError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Convert a transient error into its terminal form once retries are spent.
    pub fn exhausted(self, attempts: u32) -> Self {
        match self {
            AppError::GitHubTransient(msg) => {
                AppError::GitHubApi(format!("{msg} (gave up after {attempts} attempts)"))
            }
            AppError::ModelRateLimited(msg) | AppError::ModelTransient(msg) => {
                AppError::ModelApi(format!("{msg} (gave up after {attempts} attempts)"))
            }
            AppError::Http(e) => {
                AppError::ModelApi(format!("{e} (gave up after {attempts} attempts)"))
            }
            other => other,
        }
    }

    /// Host API failures, including lookups that came back empty.
    pub fn is_host_error(&self) -> bool {
        matches!(
            self,
            AppError::GitHubApi(_) | AppError::GitHubTransient(_) | AppError::NotFound(_)
        )
    }
}

impl From<octocrab::Error> for AppError {
    fn from(e: octocrab::Error) -> Self {
        crate::platform::github::classify_error("GitHub request failed", e)
    }
}

impl From<git2::Error> for AppError {
    fn from(e: git2::Error) -> Self {
        AppError::Git(e.message().to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::GitHubTransient("502".into()).is_transient());
        assert!(AppError::ModelRateLimited("429".into()).is_transient());
        assert!(!AppError::GitHubApi("422".into()).is_transient());
        assert!(!AppError::NotFound("issue #1".into()).is_transient());
    }

    #[test]
    fn test_exhausted_becomes_terminal() {
        let err = AppError::GitHubTransient("503 from host".into()).exhausted(4);
        assert!(matches!(err, AppError::GitHubApi(ref m) if m.contains("4 attempts")));
        assert!(!err.is_transient());

        let err = AppError::ModelTransient("overloaded".into()).exhausted(3);
        assert!(matches!(err, AppError::ModelApi(_)));
    }

    #[test]
    fn test_missing_setting_names_the_key() {
        let err = AppError::MissingSetting("GITHUB_TOKEN");
        assert!(err.to_string().contains("GITHUB_TOKEN"));
    }
}
