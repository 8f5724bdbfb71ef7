use std::path::Path;

use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    BranchType, Cred, FetchOptions, IndexAddOption, PushOptions, RemoteCallbacks, Repository,
    ResetType, Signature, Status, StatusOptions,
};

use crate::error::{AppError, Result};

/// Where a checked-out branch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchSource {
    Local,
    /// Local branch existed and was fast-forwarded to the remote.
    FastForwarded,
    Remote,
    Created,
}

/// Validate a branch name to prevent argument injection.
/// Rejects names starting with `-` as defence in depth.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.starts_with('-') {
        return Err(AppError::Git(format!(
            "Invalid branch name (starts with '-'): {name}"
        )));
    }
    if !git2::Branch::name_is_valid(name)? {
        return Err(AppError::Git(format!("Invalid branch name: {name}")));
    }
    Ok(())
}

/// Only HTTPS and local `file://` remotes are accepted.
pub fn validate_remote_url(url: &str) -> Result<()> {
    if url.starts_with("https://") || url.starts_with("file://") {
        Ok(())
    } else {
        Err(AppError::Git(format!(
            "Expected an https:// or file:// remote URL, got: {url}"
        )))
    }
}

fn auth_callbacks(token: &str) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username_from_url, _allowed_types| {
        Cred::userpass_plaintext("x-access-token", token)
    });
    callbacks
}

/// Build `FetchOptions` that authenticate via credential callback.
/// The token is captured by the closure and never written to disk.
fn make_fetch_options(token: &str) -> FetchOptions<'_> {
    let mut opts = FetchOptions::new();
    opts.remote_callbacks(auth_callbacks(token));
    opts
}

/// Build `PushOptions` that authenticate via credential callback and turn a
/// remote-side ref rejection into an error.
fn make_push_options(token: &str) -> PushOptions<'_> {
    let mut callbacks = auth_callbacks(token);
    callbacks.push_update_reference(|refname, status| match status {
        Some(message) => Err(git2::Error::from_str(&format!(
            "push of {refname} rejected: {message}"
        ))),
        None => Ok(()),
    });
    let mut opts = PushOptions::new();
    opts.remote_callbacks(callbacks);
    opts
}

async fn blocking<T, F>(what: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Git(format!("{what} task panicked: {e}")))?
}

/// Clone a repository into the target directory.
///
/// The remote URL stored in `.git/config` will be the **plain** URL
/// (no credentials). Authentication is handled via credential callback only.
pub async fn clone(url: &str, target: &Path, token: &str) -> Result<()> {
    validate_remote_url(url)?;

    let url = url.to_string();
    let target = target.to_path_buf();
    let token = token.to_string();

    blocking("Clone", move || {
        let fetch_opts = make_fetch_options(&token);
        RepoBuilder::new()
            .fetch_options(fetch_opts)
            .clone(&url, &target)?;
        Ok(())
    })
    .await
}

/// URL of the `origin` remote, if the directory is a repository with one.
pub async fn origin_url(dir: &Path) -> Result<Option<String>> {
    let dir = dir.to_path_buf();

    blocking("Origin-url", move || {
        let repo = Repository::open(&dir)?;
        let url = match repo.find_remote("origin") {
            Ok(remote) => remote.url().map(str::to_string),
            Err(_) => None,
        };
        Ok(url)
    })
    .await
}

/// Fetch all branches from origin into `refs/remotes/origin/*`.
pub async fn fetch(dir: &Path, token: &str) -> Result<()> {
    let dir = dir.to_path_buf();
    let token = token.to_string();

    blocking("Fetch", move || {
        let repo = Repository::open(&dir)?;
        let mut remote = repo.find_remote("origin")?;
        let mut fetch_opts = make_fetch_options(&token);
        remote.fetch(
            &["+refs/heads/*:refs/remotes/origin/*"],
            Some(&mut fetch_opts),
            None,
        )?;
        Ok(())
    })
    .await
}

/// Point local `branch` at `target`, check it out, and make it HEAD.
///
/// HEAD is detached first so the branch can be moved even when it is current.
fn switch_to(repo: &Repository, branch: &str, target: &git2::Commit<'_>) -> Result<()> {
    repo.set_head_detached(target.id())?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
    repo.branch(branch, target, true)?;
    repo.set_head(&format!("refs/heads/{branch}"))?;
    Ok(())
}

/// Check out `branch` as it exists on origin, discarding local history for it.
pub async fn reset_to_remote(dir: &Path, branch: &str) -> Result<()> {
    validate_branch_name(branch)?;

    let dir = dir.to_path_buf();
    let branch = branch.to_string();

    blocking("Reset", move || {
        let repo = Repository::open(&dir)?;
        let commit = repo
            .find_reference(&format!("refs/remotes/origin/{branch}"))
            .map_err(|_| AppError::Git(format!("Remote branch origin/{branch} not found")))?
            .peel_to_commit()?;
        switch_to(&repo, &branch, &commit)
    })
    .await
}

/// Check out `branch`: the local branch (fast-forwarded when origin is ahead),
/// else the remote branch, else a new branch from `base` when allowed.
pub async fn checkout_branch(
    dir: &Path,
    branch: &str,
    create_if_missing: bool,
    base: &str,
) -> Result<BranchSource> {
    validate_branch_name(branch)?;
    validate_branch_name(base)?;

    let dir = dir.to_path_buf();
    let branch = branch.to_string();
    let base = base.to_string();

    blocking("Checkout", move || {
        let repo = Repository::open(&dir)?;
        let local = match repo.find_branch(&branch, BranchType::Local) {
            Ok(b) => Some(b.get().peel_to_commit()?),
            Err(_) => None,
        };
        let remote = match repo.find_reference(&format!("refs/remotes/origin/{branch}")) {
            Ok(r) => Some(r.peel_to_commit()?),
            Err(_) => None,
        };

        let (target, source) = match (local, remote) {
            (Some(l), Some(r)) if l.id() != r.id() && repo.graph_descendant_of(r.id(), l.id())? => {
                (r, BranchSource::FastForwarded)
            }
            (Some(l), _) => (l, BranchSource::Local),
            (None, Some(r)) => (r, BranchSource::Remote),
            (None, None) if create_if_missing => {
                let start = repo
                    .find_reference(&format!("refs/remotes/origin/{base}"))
                    .or_else(|_| repo.find_reference(&format!("refs/heads/{base}")))
                    .map_err(|_| AppError::Git(format!("Base branch {base} not found")))?
                    .peel_to_commit()?;
                (start, BranchSource::Created)
            }
            (None, None) => {
                return Err(AppError::Git(format!("Branch {branch} does not exist")));
            }
        };

        switch_to(&repo, &branch, &target)?;
        Ok(source)
    })
    .await
}

fn status_options() -> StatusOptions {
    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false);
    opts
}

/// Check if there are any staged, unstaged or untracked changes.
pub async fn is_dirty(dir: &Path) -> Result<bool> {
    let dir = dir.to_path_buf();

    blocking("Status", move || {
        let repo = Repository::open(&dir)?;
        let statuses = repo.statuses(Some(&mut status_options()))?;
        Ok(!statuses.is_empty())
    })
    .await
}

/// Paths with working-tree changes, flagged `true` when the file was deleted.
pub async fn changed_paths(dir: &Path) -> Result<Vec<(String, bool)>> {
    let dir = dir.to_path_buf();

    blocking("Status", move || {
        let repo = Repository::open(&dir)?;
        let statuses = repo.statuses(Some(&mut status_options()))?;
        let deleted = Status::WT_DELETED | Status::INDEX_DELETED;
        let mut paths: Vec<(String, bool)> = statuses
            .iter()
            .filter_map(|entry| {
                let path = entry.path()?.to_string();
                Some((path, entry.status().intersects(deleted)))
            })
            .collect();
        paths.sort();
        Ok(paths)
    })
    .await
}

/// Stage all changes, deletions included.
pub async fn add_all(dir: &Path) -> Result<()> {
    let dir = dir.to_path_buf();

    blocking("Add-all", move || {
        let repo = Repository::open(&dir)?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        Ok(())
    })
    .await
}

/// Commit the index. Returns `None` when the tree is unchanged from HEAD.
pub async fn commit(
    dir: &Path,
    message: &str,
    author_name: &str,
    author_email: &str,
) -> Result<Option<String>> {
    let dir = dir.to_path_buf();
    let message = message.to_string();
    let author_name = author_name.to_string();
    let author_email = author_email.to_string();

    blocking("Commit", move || {
        let repo = Repository::open(&dir)?;
        let mut index = repo.index()?;
        let tree_oid = index.write_tree()?;
        let parent = repo.head()?.peel_to_commit()?;
        if parent.tree_id() == tree_oid {
            return Ok(None);
        }
        let tree = repo.find_tree(tree_oid)?;
        let sig = Signature::now(&author_name, &author_email)?;
        let oid = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?;
        Ok(Some(oid.to_string()))
    })
    .await
}

pub async fn head_sha(dir: &Path) -> Result<String> {
    let dir = dir.to_path_buf();

    blocking("Head", move || {
        let repo = Repository::open(&dir)?;
        let oid = repo.head()?.peel_to_commit()?.id();
        Ok(oid.to_string())
    })
    .await
}

/// Push the branch to origin. Non-fast-forward updates are refused.
pub async fn push(dir: &Path, branch_name: &str, token: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();
    let token = token.to_string();

    blocking("Push", move || {
        let repo = Repository::open(&dir)?;
        let mut remote = repo.find_remote("origin")?;
        let refspec = format!("refs/heads/{branch_name}:refs/heads/{branch_name}");
        let mut push_opts = make_push_options(&token);
        remote.push(&[&refspec], Some(&mut push_opts))?;
        Ok(())
    })
    .await
}

/// Throw away staged, unstaged and untracked changes.
pub async fn discard_changes(dir: &Path) -> Result<()> {
    let dir = dir.to_path_buf();

    blocking("Discard", move || {
        let repo = Repository::open(&dir)?;
        let head = repo.head()?.peel_to_commit()?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        repo.reset(head.as_object(), ResetType::Hard, Some(&mut checkout))?;
        Ok(())
    })
    .await
}
