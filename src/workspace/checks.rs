use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;

use crate::config::CheckCommand;

/// Result of one lint/test command. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub passed: bool,
    pub output: String,
}

/// Captured output of a shell command.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Combined stdout and stderr, truncated to the requested size.
    pub output: String,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Run `command` through `sh -c` inside `dir`, killing it after `timeout`.
pub async fn run_shell(
    dir: &Path,
    command: &str,
    timeout: Duration,
    max_output_bytes: usize,
) -> std::io::Result<ShellOutput> {
    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.is_empty() {
                if !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&stderr);
            }
            Ok(ShellOutput {
                exit_code: output.status.code(),
                timed_out: false,
                output: truncate_output(&text, max_output_bytes),
            })
        }
        Err(_) => Ok(ShellOutput {
            exit_code: None,
            timed_out: true,
            output: format!("Command timed out after {}s", timeout.as_secs()),
        }),
    }
}

/// Keep the tail of long output; test runners print their summary last.
pub fn truncate_output(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!(
        "... ({} bytes truncated)\n{}",
        start,
        &text[start..]
    )
}

/// Run the named checks in order. Unknown names are recorded as failures.
pub async fn run_checks(
    dir: &Path,
    configured: &[CheckCommand],
    names: &[String],
    timeout: Duration,
    max_output_bytes: usize,
) -> BTreeMap<String, CheckResult> {
    let mut results = BTreeMap::new();
    for name in names {
        let result = match configured.iter().find(|c| &c.name == name) {
            None => CheckResult {
                passed: false,
                output: format!("Unknown check: {name}"),
            },
            Some(check) => {
                tracing::info!(check = %name, command = %check.command, "Running check");
                match run_shell(dir, &check.command, timeout, max_output_bytes).await {
                    Ok(out) => CheckResult {
                        passed: out.success(),
                        output: out.output,
                    },
                    Err(e) => CheckResult {
                        passed: false,
                        output: format!("Failed to start `{}`: {e}", check.command),
                    },
                }
            }
        };
        if !result.passed {
            tracing::warn!(check = %name, "Check failed");
        }
        results.insert(name.clone(), result);
    }
    results
}
