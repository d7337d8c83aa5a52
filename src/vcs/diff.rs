use std::ops::Range;

use similar::{ChangeTag, TextDiff};

use crate::vcs::{DiffHunk, HunkLine, LineOrigin};

/// Context lines around each change, as in `git diff`
pub const DEFAULT_CONTEXT_LINES: usize = 3;

/// Compute unified-diff hunks between two in-memory texts
pub fn compute_hunks(old_content: &str, new_content: &str, context: usize) -> Vec<DiffHunk> {
    let diff = TextDiff::from_lines(old_content, new_content);
    let mut hunks = Vec::new();

    for group in diff.grouped_ops(context) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };

        let old_range = first.old_range().start..last.old_range().end;
        let new_range = first.new_range().start..last.new_range().end;
        let mut lines = Vec::new();

        for op in &group {
            for change in diff.iter_changes(op) {
                let content = change.value().trim_end_matches(['\n', '\r']).to_string();
                let old_line_number = change.old_index().map(|i| i as u32 + 1);
                let new_line_number = change.new_index().map(|i| i as u32 + 1);

                let origin = match change.tag() {
                    ChangeTag::Equal => LineOrigin::Context,
                    ChangeTag::Insert => LineOrigin::Addition,
                    ChangeTag::Delete => LineOrigin::Deletion,
                };

                lines.push(HunkLine {
                    origin,
                    content,
                    old_line_number,
                    new_line_number,
                });
            }
        }

        hunks.push(DiffHunk {
            old_start: hunk_start(&old_range),
            old_lines: old_range.len() as u32,
            new_start: hunk_start(&new_range),
            new_lines: new_range.len() as u32,
            lines,
        });
    }

    hunks
}

/// 1-based first line of a range; an empty range names the line before it,
/// as git does
fn hunk_start(range: &Range<usize>) -> u32 {
    if range.is_empty() {
        range.start as u32
    } else {
        range.start as u32 + 1
    }
}
