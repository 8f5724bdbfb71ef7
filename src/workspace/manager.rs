use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::config::{AppConfig, ChecksConfig};
use crate::error::{AppError, Result};
use crate::platform::types::RepoRef;
use crate::workspace::checks::{self, CheckResult};
use crate::workspace::git::{self, BranchSource};
use crate::workspace::patch::{FileChange, FileEdit, Patch};

/// Owns the single on-disk working copy.
pub struct WorkspaceManager {
    root: PathBuf,
    base_branch: String,
    git_base_url: String,
    token: String,
    author_name: String,
    author_email: String,
    checks: ChecksConfig,
    max_output_bytes: usize,
}

/// A checked-out workspace ready for the agent to work in.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub path: PathBuf,
    pub repo: RepoRef,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRef {
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Committed(CommitRef),
    /// The patch left the tree identical to HEAD.
    NoChanges,
}

impl WorkspaceManager {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            root: config.workspace.path.clone(),
            base_branch: config.workspace.base_branch.clone(),
            git_base_url: config.github.git_base_url.trim_end_matches('/').to_string(),
            token: config.github.token.clone(),
            author_name: config.workspace.author_name.clone(),
            author_email: config.workspace.author_email.clone(),
            checks: config.checks.clone(),
            max_output_bytes: config.agent.max_output_bytes,
        }
    }

    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    pub fn clone_url(&self, repo: &RepoRef) -> String {
        format!("{}/{}/{}.git", self.git_base_url, repo.owner, repo.name)
    }

    /// Clone `repo` into the workspace path, or reuse the existing clone after
    /// fetching and resetting it to the base branch.
    pub async fn acquire(&self, repo: &RepoRef) -> Result<Workspace> {
        let url = self.clone_url(repo);
        git::validate_remote_url(&url)?;

        if !self.root.join(".git").exists() {
            let occupied = self.root.exists()
                && std::fs::read_dir(&self.root)
                    .map_err(|e| {
                        AppError::Workspace(format!("Failed to read workspace dir: {e}"))
                    })?
                    .next()
                    .is_some();
            if occupied {
                return Err(AppError::Workspace(format!(
                    "{} exists and is not a git repository",
                    self.root.display()
                )));
            }
            if let Some(parent) = self.root.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AppError::Workspace(format!("Failed to create workspace dir: {e}"))
                })?;
            }
            tracing::info!(repo = %repo, path = %self.root.display(), "Cloning repository");
            git::clone(&url, &self.root, &self.token)
                .await
                .map_err(|e| AppError::Workspace(format!("Clone of {repo} failed: {e}")))?;
        } else {
            let origin = git::origin_url(&self.root).await?;
            if origin.as_deref().map(normalize_url) != Some(normalize_url(&url)) {
                return Err(AppError::Workspace(format!(
                    "{} belongs to another repository ({})",
                    self.root.display(),
                    origin.unwrap_or_else(|| "no origin".to_string())
                )));
            }
            if git::is_dirty(&self.root).await? {
                return Err(AppError::UncommittedChanges(self.root.display().to_string()));
            }
            tracing::info!(repo = %repo, path = %self.root.display(), "Reusing existing clone");
            git::fetch(&self.root, &self.token)
                .await
                .map_err(|e| AppError::Workspace(format!("Fetch of {repo} failed: {e}")))?;
        }

        git::reset_to_remote(&self.root, &self.base_branch).await?;

        Ok(Workspace {
            path: self.root.clone(),
            repo: repo.clone(),
            branch: self.base_branch.clone(),
        })
    }

    /// Switch to `branch`. Refuses when uncommitted changes would be lost.
    pub async fn checkout_branch(
        &self,
        workspace: &mut Workspace,
        branch: &str,
        create_if_missing: bool,
    ) -> Result<()> {
        git::validate_branch_name(branch)?;
        if git::is_dirty(&workspace.path).await? {
            return Err(AppError::UncommittedChanges(workspace.branch.clone()));
        }
        let source =
            git::checkout_branch(&workspace.path, branch, create_if_missing, &self.base_branch)
                .await?;
        tracing::info!(branch, source = ?source, "Checked out branch");
        if source == BranchSource::FastForwarded {
            tracing::debug!(branch, "Local branch was behind origin");
        }
        workspace.branch = branch.to_string();
        Ok(())
    }

    /// Write the patch's files, stage everything and commit.
    pub async fn apply_patch(&self, workspace: &Workspace, patch: &Patch) -> Result<ApplyOutcome> {
        for edit in &patch.edits {
            let path = Self::resolve_path(&workspace.path, &edit.path)?;
            match &edit.change {
                FileChange::Write(content) => {
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&path, content).await?;
                }
                FileChange::Delete => {
                    if path.exists() {
                        tokio::fs::remove_file(&path).await?;
                    }
                }
            }
        }

        match self.commit_all(workspace, &patch.message).await? {
            Some(commit) => {
                tracing::info!(sha = %commit.sha, files = patch.edits.len(), "Committed patch");
                Ok(ApplyOutcome::Committed(commit))
            }
            None => {
                tracing::info!("No changes to commit");
                Ok(ApplyOutcome::NoChanges)
            }
        }
    }

    /// Stage and commit whatever is in the working tree.
    pub async fn commit_all(&self, workspace: &Workspace, message: &str) -> Result<Option<CommitRef>> {
        git::add_all(&workspace.path).await?;
        let sha = git::commit(
            &workspace.path,
            message,
            &self.author_name,
            &self.author_email,
        )
        .await?;
        Ok(sha.map(|sha| CommitRef { sha }))
    }

    pub fn checks(&self) -> &ChecksConfig {
        &self.checks
    }

    /// Names of every configured check, in configuration order.
    pub fn check_names(&self) -> Vec<String> {
        self.checks.commands.iter().map(|c| c.name.clone()).collect()
    }

    pub async fn run_checks(
        &self,
        workspace: &Workspace,
        names: &[String],
    ) -> BTreeMap<String, CheckResult> {
        checks::run_checks(
            &workspace.path,
            &self.checks.commands,
            names,
            Duration::from_secs(self.checks.timeout_secs),
            self.max_output_bytes,
        )
        .await
    }

    pub async fn push(&self, workspace: &Workspace, branch: &str) -> Result<()> {
        tracing::info!(branch, "Pushing branch");
        git::push(&workspace.path, branch, &self.token)
            .await
            .map_err(|e| AppError::Workspace(format!("Push of {branch} failed: {e}")))
    }

    pub async fn is_dirty(&self, workspace: &Workspace) -> Result<bool> {
        git::is_dirty(&workspace.path).await
    }

    pub async fn head_sha(&self, workspace: &Workspace) -> Result<String> {
        git::head_sha(&workspace.path).await
    }

    /// Working-tree changes expressed as file edits.
    pub async fn changed_paths(&self, workspace: &Workspace) -> Result<Vec<FileEdit>> {
        let mut edits = Vec::new();
        for (path, deleted) in git::changed_paths(&workspace.path).await? {
            if deleted {
                edits.push(FileEdit {
                    path,
                    change: FileChange::Delete,
                });
                continue;
            }
            let bytes = tokio::fs::read(workspace.path.join(&path)).await?;
            match String::from_utf8(bytes) {
                Ok(content) => edits.push(FileEdit {
                    path,
                    change: FileChange::Write(content),
                }),
                Err(_) => tracing::warn!(path = %path, "Skipping non-UTF-8 file"),
            }
        }
        Ok(edits)
    }

    pub async fn discard_changes(&self, workspace: &Workspace) -> Result<()> {
        tracing::warn!(branch = %workspace.branch, "Discarding uncommitted changes");
        git::discard_changes(&workspace.path).await
    }

    /// Resolve an agent-supplied relative path inside the workspace.
    ///
    /// Rejects absolute paths, `..` escapes, anything under `.git`, and
    /// symlinks that lead outside the workspace.
    pub fn resolve_path(workspace_root: &Path, requested: &str) -> Result<PathBuf> {
        let requested_path = Path::new(requested);
        let mut normalized = PathBuf::new();
        for component in requested_path.components() {
            match component {
                Component::Normal(part) => {
                    if part == ".git" {
                        return Err(AppError::Workspace(format!(
                            "Access to .git is not allowed: {requested}"
                        )));
                    }
                    normalized.push(part);
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(AppError::Workspace(format!(
                            "Path traversal detected: {requested} is outside workspace"
                        )));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(AppError::Workspace(format!(
                        "Absolute paths are not allowed: {requested}"
                    )));
                }
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(AppError::Workspace("Empty file path".to_string()));
        }

        let canonical_root = workspace_root
            .canonicalize()
            .map_err(|e| AppError::Workspace(format!("Failed to resolve workspace root: {e}")))?;
        let full_path = canonical_root.join(&normalized);

        // Canonicalize the deepest existing ancestor to catch symlink escapes
        let mut existing = full_path.as_path();
        while !existing.exists() {
            existing = match existing.parent() {
                Some(parent) => parent,
                None => break,
            };
        }
        let canonical = existing
            .canonicalize()
            .map_err(|e| AppError::Workspace(format!("Failed to resolve path: {e}")))?;
        if !canonical.starts_with(&canonical_root) {
            return Err(AppError::Workspace(format!(
                "Path traversal detected: {requested} is outside workspace"
            )));
        }

        Ok(full_path)
    }
}

fn normalize_url(url: &str) -> String {
    url.trim_end_matches('/')
        .trim_end_matches(".git")
        .to_string()
}
