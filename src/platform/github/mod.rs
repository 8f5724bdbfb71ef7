mod client;
mod mapper;

pub use client::GitHubPlatform;

use crate::error::AppError;

/// Sort an octocrab failure into the error taxonomy.
///
/// 404 is `NotFound`; 429, 5xx and rate-limit 403s are transient, as are
/// transport failures. Everything else is a permanent API error.
pub fn classify_error(context: &str, e: octocrab::Error) -> AppError {
    match e {
        octocrab::Error::GitHub { source, .. } => {
            let status = source.status_code.as_u16();
            let message = format!("{context}: {status} {}", source.message);
            let rate_limited =
                status == 403 && source.message.to_lowercase().contains("rate limit");
            match status {
                404 => AppError::NotFound(message),
                429 | 500..=599 => AppError::GitHubTransient(message),
                _ if rate_limited => AppError::GitHubTransient(message),
                _ => AppError::GitHubApi(message),
            }
        }
        octocrab::Error::Hyper { .. } | octocrab::Error::Service { .. } => {
            AppError::GitHubTransient(format!("{context}: {e}"))
        }
        other => AppError::GitHubApi(format!("{context}: {other}")),
    }
}
