use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::task::JoinHandle;

use crate::config::InterruptPolicy;
use crate::error::Result;
use crate::workspace::{Workspace, WorkspaceManager};

/// Shared stop flag. The agent checks it every turn and the driver between
/// phases.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping after the current step...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, stopping after the current step...");
        }
    }
}

/// Trigger `interrupt` on the first signal or once `timeout` elapses.
pub fn watch(interrupt: Interrupt, timeout: Option<Duration>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = wait_for_shutdown() => {}
            _ = deadline => {
                tracing::warn!(timeout_secs = timeout.map(|t| t.as_secs()), "Run timeout reached");
            }
        }
        interrupt.trigger();
    })
}

/// Leave the workspace in a known state after an interrupted cycle: commit
/// pending edits under a `[draft]` marker, or throw them away.
pub async fn settle_workspace(
    manager: &WorkspaceManager,
    workspace: &Workspace,
    policy: InterruptPolicy,
    issue_number: u64,
) -> Result<()> {
    if !manager.is_dirty(workspace).await? {
        return Ok(());
    }

    match policy {
        InterruptPolicy::Draft => {
            let message = format!("[draft] Interrupted work on #{issue_number}");
            let commit = manager.commit_all(workspace, &message).await?;
            tracing::warn!(
                issue = issue_number,
                branch = %workspace.branch,
                sha = ?commit.map(|c| c.sha),
                "Committed interrupted work as draft"
            );
        }
        InterruptPolicy::Discard => {
            manager.discard_changes(workspace).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::platform::types::RepoRef;
    use crate::workspace::git;
    use crate::workspace::testing::seed_remote;

    #[test]
    fn test_interrupt_is_shared_between_clones() {
        let interrupt = Interrupt::new();
        let seen_by_agent = interrupt.clone();
        assert!(!seen_by_agent.is_set());
        interrupt.trigger();
        assert!(seen_by_agent.is_set());
    }

    #[tokio::test]
    async fn test_watch_triggers_on_timeout() {
        let interrupt = Interrupt::new();
        let handle = watch(interrupt.clone(), Some(Duration::from_millis(20)));
        handle.await.unwrap();
        assert!(interrupt.is_set());
    }

    async fn dirty_workspace() -> (tempfile::TempDir, crate::workspace::testing::SeededRemote, WorkspaceManager, Workspace) {
        let remote = seed_remote(&[("app.py", "print('hi')\n")]);
        let tmp = tempfile::tempdir().unwrap();
        let config = AppConfig::for_tests(&tmp.path().join("ws"), &remote.base_url);
        let manager = WorkspaceManager::new(&config);
        let repo: RepoRef = "octo/widgets".parse().unwrap();
        let mut ws = manager.acquire(&repo).await.unwrap();
        manager
            .checkout_branch(&mut ws, "agent/issue-7", true)
            .await
            .unwrap();
        std::fs::write(ws.path.join("app.py"), "print('half done')\n").unwrap();
        (tmp, remote, manager, ws)
    }

    #[tokio::test]
    async fn test_settle_commits_draft() {
        let (_tmp, _remote, manager, ws) = dirty_workspace().await;
        let before = manager.head_sha(&ws).await.unwrap();

        settle_workspace(&manager, &ws, InterruptPolicy::Draft, 7)
            .await
            .unwrap();

        assert!(!git::is_dirty(&ws.path).await.unwrap());
        assert_ne!(manager.head_sha(&ws).await.unwrap(), before);
        let content = std::fs::read_to_string(ws.path.join("app.py")).unwrap();
        assert_eq!(content, "print('half done')\n");
    }

    #[tokio::test]
    async fn test_settle_discards() {
        let (_tmp, _remote, manager, ws) = dirty_workspace().await;
        let before = manager.head_sha(&ws).await.unwrap();

        settle_workspace(&manager, &ws, InterruptPolicy::Discard, 7)
            .await
            .unwrap();

        assert!(!git::is_dirty(&ws.path).await.unwrap());
        assert_eq!(manager.head_sha(&ws).await.unwrap(), before);
        let content = std::fs::read_to_string(ws.path.join("app.py")).unwrap();
        assert_eq!(content, "print('hi')\n");
    }
}
