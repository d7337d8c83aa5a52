//! Version control access: file contents at a commit and per-file patches
//! between two commits.

pub mod diff;
pub mod git;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use diff::compute_hunks;
pub use git::GitRepository;

/// Which side of a diff a line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineOrigin {
    Addition,
    Deletion,
    Context,
}

/// One line of a diff hunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkLine {
    pub origin: LineOrigin,
    /// Line text without its line terminator
    pub content: String,
    /// 1-based line number in the old revision (context and deletions)
    pub old_line_number: Option<u32>,
    /// 1-based line number in the new revision (context and additions)
    pub new_line_number: Option<u32>,
}

/// A hunk of a file patch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    pub lines: Vec<HunkLine>,
}

impl DiffHunk {
    /// Lines present in the old revision
    pub fn old_side(&self) -> impl Iterator<Item = &HunkLine> {
        self.lines.iter().filter(|l| l.origin != LineOrigin::Addition)
    }

    /// Lines present in the new revision
    pub fn new_side(&self) -> impl Iterator<Item = &HunkLine> {
        self.lines.iter().filter(|l| l.origin != LineOrigin::Deletion)
    }
}

/// How a file changed between two commits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Added,
    Deleted,
    Modified,
    Renamed,
}

/// Changes to one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePatch {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub status: FileStatus,
    pub hunks: Vec<DiffHunk>,
}

impl FilePatch {
    /// Path the file has after the change, or had before a deletion
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or_default()
    }
}

/// Read access to a version-controlled repository
pub trait VersionControl {
    /// Name reported in repository-level results
    fn repository_name(&self) -> String;

    /// Full ID of a commit reference
    fn resolve_commit(&self, rev: &str) -> Result<String>;

    /// Paths of every file at a commit, sorted
    fn list_files(&self, commit: &str) -> Result<Vec<String>>;

    /// File contents at a commit, `None` when the file does not exist there
    fn read_file_at_commit(&self, path: &str, commit: &str) -> Result<Option<String>>;

    /// Per-file patches between two commits, ordered by path
    fn diff(&self, from_commit: &str, to_commit: &str) -> Result<Vec<FilePatch>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(origin: LineOrigin, old: Option<u32>, new: Option<u32>) -> HunkLine {
        HunkLine {
            origin,
            content: String::new(),
            old_line_number: old,
            new_line_number: new,
        }
    }

    #[test]
    fn test_hunk_sides() {
        let hunk = DiffHunk {
            old_start: 4,
            old_lines: 2,
            new_start: 4,
            new_lines: 3,
            lines: vec![
                line(LineOrigin::Context, Some(4), Some(4)),
                line(LineOrigin::Deletion, Some(5), None),
                line(LineOrigin::Addition, None, Some(5)),
                line(LineOrigin::Addition, None, Some(6)),
            ],
        };
        assert_eq!(hunk.old_side().count(), 2);
        assert_eq!(hunk.new_side().count(), 3);
    }

    #[test]
    fn test_patch_path_prefers_new_path() {
        let patch = FilePatch {
            old_path: Some("old.md".to_string()),
            new_path: Some("new.md".to_string()),
            status: FileStatus::Renamed,
            hunks: Vec::new(),
        };
        assert_eq!(patch.path(), "new.md");

        let deleted = FilePatch {
            old_path: Some("gone.md".to_string()),
            new_path: None,
            status: FileStatus::Deleted,
            hunks: Vec::new(),
        };
        assert_eq!(deleted.path(), "gone.md");
    }
}
