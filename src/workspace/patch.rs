/// What happens to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    /// Replace (or create) the file with this content.
    Write(String),
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEdit {
    /// Path relative to the workspace root, `/`-separated.
    pub path: String,
    pub change: FileChange,
}

/// An ordered set of file edits plus the commit message that describes them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    pub edits: Vec<FileEdit>,
    pub message: String,
}

impl Patch {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            edits: Vec::new(),
            message: message.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Record an edit. A later edit to the same path replaces the earlier one
    /// but keeps its position.
    pub fn record(&mut self, edit: FileEdit) {
        match self.edits.iter_mut().find(|e| e.path == edit.path) {
            Some(existing) => existing.change = edit.change,
            None => self.edits.push(edit),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.edits.iter().any(|e| e.path == path)
    }

    pub fn paths(&self) -> Vec<&str> {
        self.edits.iter().map(|e| e.path.as_str()).collect()
    }
}
