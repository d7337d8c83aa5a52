use std::path::Path;

use anyhow::{Context, Result};
use git2::{
    Commit, Delta, DiffFindOptions, DiffOptions, ObjectType, Patch, Repository, TreeWalkMode, TreeWalkResult,
};

use crate::vcs::diff::DEFAULT_CONTEXT_LINES;
use crate::vcs::{DiffHunk, FilePatch, FileStatus, HunkLine, LineOrigin, VersionControl};

/// Git-backed version control access
pub struct GitRepository {
    repo: Repository,
}

impl GitRepository {
    /// Open the repository containing `path`
    pub fn discover(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path).context(
            "Not in a git repository. \
             Run 'git init' to create one, or 'cd' to a directory containing a .git folder.",
        )?;
        Ok(Self { repo })
    }

    pub fn from_repository(repo: Repository) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Working directory, `None` for bare repositories
    pub fn workdir(&self) -> Option<&Path> {
        self.repo.workdir()
    }

    fn commit(&self, rev: &str) -> Result<Commit<'_>> {
        let obj = self
            .repo
            .revparse_single(rev)
            .with_context(|| format!("Failed to resolve '{}'", rev))?;
        obj.peel_to_commit()
            .with_context(|| format!("'{}' is not a valid commit reference", rev))
    }
}

impl VersionControl for GitRepository {
    fn repository_name(&self) -> String {
        let root = self.repo.workdir().unwrap_or_else(|| self.repo.path());
        root.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| root.display().to_string())
    }

    fn resolve_commit(&self, rev: &str) -> Result<String> {
        Ok(self.commit(rev)?.id().to_string())
    }

    fn list_files(&self, commit: &str) -> Result<Vec<String>> {
        let tree = self.commit(commit)?.tree()?;
        let mut paths = Vec::new();

        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    paths.push(format!("{}{}", root, name));
                }
            }
            TreeWalkResult::Ok
        })
        .with_context(|| format!("Failed to list files at {}", commit))?;

        paths.sort();
        Ok(paths)
    }

    fn read_file_at_commit(&self, path: &str, commit: &str) -> Result<Option<String>> {
        let tree = self.commit(commit)?.tree()?;

        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to look up {} at {}", path, commit))
            }
        };

        let blob = entry
            .to_object(&self.repo)?
            .peel_to_blob()
            .with_context(|| format!("{} is not a file at {}", path, commit))?;
        if blob.is_binary() {
            anyhow::bail!("{} is a binary file at {}", path, commit);
        }

        let content = String::from_utf8(blob.content().to_vec())
            .with_context(|| format!("{} is not valid UTF-8 at {}", path, commit))?;
        Ok(Some(content))
    }

    fn diff(&self, from_commit: &str, to_commit: &str) -> Result<Vec<FilePatch>> {
        let old_tree = self.commit(from_commit)?.tree()?;
        let new_tree = self.commit(to_commit)?.tree()?;

        let mut opts = DiffOptions::new();
        opts.context_lines(DEFAULT_CONTEXT_LINES as u32);
        let mut diff = self
            .repo
            .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), Some(&mut opts))
            .with_context(|| format!("Failed to diff {}..{}", from_commit, to_commit))?;

        let mut find_opts = DiffFindOptions::new();
        find_opts.renames(true);
        diff.find_similar(Some(&mut find_opts))?;

        let mut patches = Vec::new();
        for idx in 0..diff.deltas().len() {
            let Some(patch) = Patch::from_diff(&diff, idx)? else {
                continue;
            };
            if let Some(file_patch) = convert_patch(&patch)? {
                patches.push(file_patch);
            }
        }

        Ok(patches)
    }
}

fn convert_patch(patch: &Patch<'_>) -> Result<Option<FilePatch>> {
    let delta = patch.delta();
    let status = match delta.status() {
        Delta::Added => FileStatus::Added,
        Delta::Deleted => FileStatus::Deleted,
        Delta::Modified => FileStatus::Modified,
        Delta::Renamed => FileStatus::Renamed,
        _ => return Ok(None),
    };

    let path_of = |file: git2::DiffFile<'_>| file.path().map(|p| p.to_string_lossy().to_string());
    let old_path = match status {
        FileStatus::Added => None,
        _ => path_of(delta.old_file()),
    };
    let new_path = match status {
        FileStatus::Deleted => None,
        _ => path_of(delta.new_file()),
    };

    let mut hunks = Vec::with_capacity(patch.num_hunks());
    for hunk_idx in 0..patch.num_hunks() {
        let (hunk, line_count) = patch.hunk(hunk_idx)?;
        let mut lines = Vec::with_capacity(line_count);

        for line_idx in 0..line_count {
            let line = patch.line_in_hunk(hunk_idx, line_idx)?;
            let origin = match line.origin() {
                '+' => LineOrigin::Addition,
                '-' => LineOrigin::Deletion,
                ' ' => LineOrigin::Context,
                // end-of-file newline markers
                _ => continue,
            };
            let content = String::from_utf8_lossy(line.content())
                .trim_end_matches(['\n', '\r'])
                .to_string();
            lines.push(HunkLine {
                origin,
                content,
                old_line_number: line.old_lineno(),
                new_line_number: line.new_lineno(),
            });
        }

        hunks.push(DiffHunk {
            old_start: hunk.old_start(),
            old_lines: hunk.old_lines(),
            new_start: hunk.new_start(),
            new_lines: hunk.new_lines(),
            lines,
        });
    }

    Ok(Some(FilePatch {
        old_path,
        new_path,
        status,
        hunks,
    }))
}
