pub mod checks;
pub mod git;
pub mod manager;
pub mod patch;

pub use checks::CheckResult;
pub use manager::{ApplyOutcome, CommitRef, Workspace, WorkspaceManager};
pub use patch::{FileChange, FileEdit, Patch};
