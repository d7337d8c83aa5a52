//! Whole-file and per-hunk operation pipelines, temporary-ID finalization
//! and repository-wide tracking.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};

use crate::align::sequence::Alignment;
use crate::align::subtitle::{ScoringMode, SubtitleAligner};
use crate::config::{FileErrorPolicy, SubtrackConfig};
use crate::core::operation::{
    FileOperations, InsertAnchor, Operation, OperationIdSequence, OperationType, RepositoryOperations,
};
use crate::core::subtitle::{parse_marked_text, Markers, PersistentId, Subtitle, SubtitleAttrs};
use crate::operations::classify::OperationClassifier;
use crate::operations::group::extract_groups;
use crate::operations::pair::{enrich_pairs, AlignedSubtitlePair};
use crate::storage::allocator::PersistentIdAllocator;
use crate::storage::records::{FileRecords, SubtitleRecord, SubtitleRecordStore};
use crate::text::TextExtractor;
use crate::utils::short_commit;
use crate::vcs::diff::{compute_hunks, DEFAULT_CONTEXT_LINES};
use crate::vcs::{DiffHunk, FilePatch, FileStatus, HunkLine, LineOrigin, VersionControl};

/// Granularity of the alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
    /// Align all subtitles of the two revisions
    #[default]
    File,
    /// Align only the subtitles touched by each diff hunk
    Hunk,
}

/// One revision of a file as the pipelines see it
#[derive(Debug, Clone, Copy)]
pub struct FileRevision<'a> {
    pub path: &'a str,
    pub commit: &'a str,
    /// Marked plain text
    pub text: &'a str,
    /// Stored records of this revision, in subtitle order
    pub records: Option<&'a [SubtitleRecord]>,
}

/// Result of running a pipeline over one file
#[derive(Debug, Clone, PartialEq)]
pub struct FileOutcome {
    pub operations: FileOperations,
    /// Subtitles of the "to" revision in document order
    pub after: Vec<Subtitle>,
    /// Persistent ID of the last aligned pair
    pub last_stid: Option<PersistentId>,
}

impl FileOutcome {
    /// Records describing the "to" revision
    pub fn records(&self) -> Result<Vec<SubtitleRecord>> {
        self.after
            .iter()
            .map(|subtitle| {
                if subtitle.persistent_id.is_temporary() {
                    anyhow::bail!(
                        "Temporary ID {} in {} was never finalized",
                        subtitle.persistent_id,
                        self.operations.file_path
                    );
                }
                Ok(SubtitleRecord::new(
                    subtitle.persistent_id.clone(),
                    subtitle.record_id.clone(),
                    subtitle.after.as_deref().unwrap_or_default(),
                ))
            })
            .collect()
    }
}

/// A whole-file run together with the pairs it was classified from
#[derive(Debug, Clone, PartialEq)]
pub struct FileAlignment {
    pub pairs: Vec<AlignedSubtitlePair>,
    pub outcome: FileOutcome,
}

/// Runs alignment, enrichment, grouping and classification
#[derive(Debug, Clone)]
pub struct OperationsPipeline {
    aligner: SubtitleAligner,
    classifier: OperationClassifier,
    markers: Markers,
    repetition_window: usize,
}

impl OperationsPipeline {
    pub fn new(config: &SubtrackConfig) -> Self {
        Self {
            aligner: SubtitleAligner::new(&config.alignment, &config.markers),
            classifier: OperationClassifier::new(&config.operations),
            markers: config.markers,
            repetition_window: config.alignment.repetition_window,
        }
    }

    /// Subtitles of a marked plain text
    pub fn parse(&self, text: &str) -> Vec<SubtitleAttrs> {
        parse_marked_text(text, &self.markers, self.repetition_window)
    }

    /// Records with fresh IDs for every subtitle of `text`
    pub fn initial_records(&self, text: &str, allocator: &dyn PersistentIdAllocator) -> Result<Vec<SubtitleRecord>> {
        let subtitles = self.parse(text);
        let ids = allocator.allocate(subtitles.len())?;
        if ids.len() != subtitles.len() {
            anyhow::bail!(
                "ID allocator returned {} IDs for {} subtitles",
                ids.len(),
                subtitles.len()
            );
        }

        Ok(subtitles
            .iter()
            .zip(ids)
            .map(|(subtitle, id)| SubtitleRecord::new(PersistentId::Real(id), None, &subtitle.content))
            .collect())
    }

    /// Parse a revision and attach its stored records
    pub fn revision_subtitles(&self, revision: &FileRevision<'_>) -> Result<Vec<SubtitleAttrs>> {
        let mut subtitles = self.parse(revision.text);
        if let Some(records) = revision.records {
            attach_records(&mut subtitles, records, revision)?;
        }
        Ok(subtitles)
    }

    /// Subtitles of the "from" revision, which must all carry IDs
    fn tracked_subtitles(&self, revision: &FileRevision<'_>) -> Result<Vec<SubtitleAttrs>> {
        let subtitles = self.revision_subtitles(revision)?;
        if revision.records.is_none() && !subtitles.is_empty() {
            anyhow::bail!(
                "No subtitle records for {} at {}; run 'subtrack init {}' first",
                revision.path,
                short_commit(revision.commit),
                revision.commit
            );
        }
        Ok(subtitles)
    }

    /// Operations between two complete revisions of a file
    pub fn file_operations(&self, from: &FileRevision<'_>, to: &FileRevision<'_>) -> Result<FileOutcome> {
        Ok(self.align_revisions(from, to)?.outcome)
    }

    /// Like [`Self::file_operations`], keeping the enriched pairs
    pub fn align_revisions(&self, from: &FileRevision<'_>, to: &FileRevision<'_>) -> Result<FileAlignment> {
        let from_subtitles = self.tracked_subtitles(from)?;
        let to_subtitles = self.revision_subtitles(to)?;

        let mode = if !to_subtitles.is_empty() && to_subtitles.iter().all(|s| s.persistent_id.is_some()) {
            ScoringMode::Ids
        } else {
            ScoringMode::Content
        };

        let alignment = self.aligner.align_file(&from_subtitles, &to_subtitles, mode);
        warn_on_band_exhaustion(&alignment, from, to, None);

        let pairs = enrich_pairs(&alignment.aligned_a, &alignment.aligned_b, None)
            .with_context(|| describe(from, to))?;
        let mut ids = OperationIdSequence::for_file();
        let operations = self
            .classify_pairs(&pairs, None, &mut ids)
            .with_context(|| describe(from, to))?;

        let after = pairs
            .iter()
            .filter(|pair| !pair.to.is_gap())
            .map(|pair| pair.subtitle.clone())
            .collect();

        let outcome = FileOutcome {
            operations: file_operations(from, to, operations),
            after,
            last_stid: pairs.last().map(|pair| pair.persistent_id().clone()),
        };
        Ok(FileAlignment { pairs, outcome })
    }

    /// Operations between two revisions, one diff hunk at a time.
    ///
    /// `hunks` must describe the change from `from.text` to `to.text`.
    pub fn hunk_operations(
        &self,
        from: &FileRevision<'_>,
        to: &FileRevision<'_>,
        hunks: &[DiffHunk],
    ) -> Result<FileOutcome> {
        let from_subtitles = self.tracked_subtitles(from)?;
        let to_subtitles = self.revision_subtitles(to)?;
        let from_lines: Vec<&str> = from.text.lines().collect();
        let to_lines: Vec<&str> = to.text.lines().collect();

        let mut operations = Vec::new();
        let mut covered: BTreeMap<usize, Subtitle> = BTreeMap::new();
        let mut carried: Option<PersistentId> = None;

        for (position, hunk) in hunks.iter().enumerate() {
            let hunk_index = position + 1;
            verify_hunk(hunk, hunk_index, &from_lines, &to_lines, from, to)?;

            let old_lines: BTreeSet<usize> = hunk
                .old_side()
                .filter_map(|l| l.old_line_number)
                .filter_map(|n| (n as usize).checked_sub(1))
                .collect();
            let new_lines: BTreeSet<usize> = hunk
                .new_side()
                .filter_map(|l| l.new_line_number)
                .filter_map(|n| (n as usize).checked_sub(1))
                .collect();

            let deleted: Vec<SubtitleAttrs> = from_subtitles
                .iter()
                .filter(|s| old_lines.contains(&s.line))
                .cloned()
                .collect();
            let added: Vec<SubtitleAttrs> = to_subtitles
                .iter()
                .filter(|s| new_lines.contains(&s.line))
                .cloned()
                .collect();
            if deleted.is_empty() && added.is_empty() {
                continue;
            }

            // first old line the hunk reaches; git names the preceding line
            // for hunks without old lines
            let hunk_begin = old_lines.first().copied().unwrap_or(hunk.old_start as usize);
            let preceding = from_subtitles
                .iter()
                .filter(|s| s.line < hunk_begin)
                .last()
                .and_then(|s| s.persistent_id.clone());
            let before = continue_from(carried.take(), preceding);

            let alignment = self.aligner.align_hunk(&deleted, &added);
            warn_on_band_exhaustion(&alignment, from, to, Some(hunk_index));

            let pairs = enrich_pairs(&alignment.aligned_a, &alignment.aligned_b, before.as_ref())
                .with_context(|| format!("Hunk {} of {}", hunk_index, describe(from, to)))?;
            let mut ids = OperationIdSequence::for_hunk(hunk_index);
            operations.extend(
                self.classify_pairs(&pairs, before.as_ref(), &mut ids)
                    .with_context(|| format!("Hunk {} of {}", hunk_index, describe(from, to)))?,
            );

            for pair in pairs.iter().filter(|pair| !pair.to.is_gap()) {
                covered.insert(pair.to.index, pair.subtitle.clone());
            }
            carried = pairs.last().map(|pair| pair.persistent_id().clone()).or(before);
        }

        let after = unchanged_subtitles(&from_subtitles, &to_subtitles, hunks, covered, &from_lines, &to_lines)
            .with_context(|| describe(from, to))?;
        let last_stid = carried.or_else(|| after.last().map(|s| s.persistent_id.clone()));

        Ok(FileOutcome {
            operations: file_operations(from, to, operations),
            after,
            last_stid,
        })
    }

    /// Group the pairs and classify every group
    pub fn classify_pairs(
        &self,
        pairs: &[AlignedSubtitlePair],
        before: Option<&PersistentId>,
        ids: &mut OperationIdSequence,
    ) -> Result<Vec<Operation>> {
        let mut operations = Vec::new();

        for group in extract_groups(pairs)? {
            let prev = match group.start.checked_sub(1) {
                Some(previous) => InsertAnchor::After(pairs[previous].persistent_id().clone()),
                None => before.map_or(InsertAnchor::StartOfFile, |id| InsertAnchor::After(id.clone())),
            };
            operations.extend(self.classifier.classify(&group, &prev, ids)?);
        }

        Ok(operations)
    }
}

/// Attach stored records to freshly parsed subtitles, checking that they
/// describe the same content
pub fn attach_records(
    subtitles: &mut [SubtitleAttrs],
    records: &[SubtitleRecord],
    revision: &FileRevision<'_>,
) -> Result<()> {
    if records.len() != subtitles.len() {
        anyhow::bail!(
            "Subtitle count mismatch for {} at {}: {} stored records, {} parsed subtitles",
            revision.path,
            short_commit(revision.commit),
            records.len(),
            subtitles.len()
        );
    }

    for (subtitle, record) in subtitles.iter_mut().zip(records) {
        if !record.matches(&subtitle.content_sim) {
            anyhow::bail!(
                "Subtitle {} of {} at {} does not match its stored record {}: found {:?}",
                subtitle.index + 1,
                revision.path,
                short_commit(revision.commit),
                record.persistent_id,
                subtitle.content.trim_end()
            );
        }
        subtitle.persistent_id = Some(record.persistent_id.clone());
        subtitle.record_id = record.record_id.clone();
    }

    Ok(())
}

/// Replace every temporary ID of `outcome` with a freshly allocated real ID.
///
/// Returns the mapping that was applied.
pub fn finalize_temporary_ids(
    outcome: &mut FileOutcome,
    allocator: &dyn PersistentIdAllocator,
) -> Result<BTreeMap<PersistentId, PersistentId>> {
    let temporaries: Vec<PersistentId> = outcome
        .after
        .iter()
        .map(|subtitle| subtitle.persistent_id.clone())
        .filter(PersistentId::is_temporary)
        .collect();

    let unique: BTreeSet<&PersistentId> = temporaries.iter().collect();
    if unique.len() != temporaries.len() {
        anyhow::bail!(
            "Temporary IDs of {} are not unique; refusing to finalize",
            outcome.operations.file_path
        );
    }
    if temporaries.is_empty() {
        return Ok(BTreeMap::new());
    }

    let fresh = allocator.allocate(temporaries.len())?;
    if fresh.len() != temporaries.len() {
        anyhow::bail!(
            "ID allocator returned {} IDs for {} new subtitles",
            fresh.len(),
            temporaries.len()
        );
    }

    let resolved: BTreeMap<PersistentId, PersistentId> = temporaries
        .into_iter()
        .zip(fresh.into_iter().map(PersistentId::Real))
        .collect();

    for subtitle in &mut outcome.after {
        if let Some(real) = resolved.get(&subtitle.persistent_id) {
            subtitle.persistent_id = real.clone();
        }
    }
    for operation in &mut outcome.operations.operations {
        operation.resolve_ids(&resolved);
    }
    if let Some(last) = &mut outcome.last_stid {
        if let Some(real) = resolved.get(last) {
            *last = real.clone();
        }
    }

    Ok(resolved)
}

/// One delete per stored subtitle of a removed file
pub fn deleted_file_operations(
    path: &str,
    from_commit: &str,
    to_commit: &str,
    records: &[SubtitleRecord],
) -> FileOperations {
    let mut ids = OperationIdSequence::for_file();
    let operations = records
        .iter()
        .enumerate()
        .map(|(position, record)| Operation {
            operation_id: ids.next_id(position + 1),
            operation_type: OperationType::Delete,
            affected_stids: vec![record.persistent_id.clone()],
            after_stid: None,
        })
        .collect();

    FileOperations {
        file_path: path.to_string(),
        from_commit: from_commit.to_string(),
        to_commit: to_commit.to_string(),
        operations,
    }
}

/// One processed file of a repository run
#[derive(Debug, Clone, PartialEq)]
pub enum TrackedFile {
    Changed(FileOutcome),
    Deleted(FileOperations),
}

impl TrackedFile {
    pub fn operations(&self) -> &FileOperations {
        match self {
            Self::Changed(outcome) => &outcome.operations,
            Self::Deleted(operations) => operations,
        }
    }
}

/// Everything a repository run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryRun {
    pub operations: RepositoryOperations,
    /// Every processed file, including those without operations
    pub files: Vec<TrackedFile>,
    /// Paths whose records no longer apply at the "to" commit
    pub removed_paths: Vec<String>,
    /// Paths of files left out under the skip policy
    pub skipped_paths: Vec<String>,
}

/// Collaborators of a repository run
pub struct Tracker<'a> {
    pub vcs: &'a dyn VersionControl,
    pub extractor: &'a dyn TextExtractor,
    pub store: &'a dyn SubtitleRecordStore,
    pub config: &'a SubtrackConfig,
}

/// Compute the operations of every changed subtitle file between two commits
pub fn track_repository(tracker: &Tracker<'_>, from: &str, to: &str, mode: PipelineMode) -> Result<RepositoryRun> {
    let from_commit = tracker.vcs.resolve_commit(from)?;
    let to_commit = tracker.vcs.resolve_commit(to)?;
    let include = tracker.config.operations.include_regex()?;
    let pipeline = OperationsPipeline::new(tracker.config);

    let mut run = RepositoryRun {
        operations: RepositoryOperations {
            repository_name: tracker.vcs.repository_name(),
            from_commit: from_commit.clone(),
            to_commit: to_commit.clone(),
            files: Vec::new(),
        },
        files: Vec::new(),
        removed_paths: Vec::new(),
        skipped_paths: Vec::new(),
    };

    for patch in tracker.vcs.diff(&from_commit, &to_commit)? {
        let included = [patch.old_path.as_deref(), patch.new_path.as_deref()]
            .into_iter()
            .flatten()
            .any(|path| include.is_match(path));
        if !included {
            continue;
        }

        match track_file(tracker, &pipeline, &patch, &from_commit, &to_commit, mode) {
            Ok(tracked) => {
                if let (FileStatus::Deleted | FileStatus::Renamed, Some(old_path)) =
                    (patch.status, patch.old_path.as_ref())
                {
                    run.removed_paths.push(old_path.clone());
                }
                if !tracked.operations().operations.is_empty() {
                    run.operations.files.push(tracked.operations().clone());
                }
                run.files.push(tracked);
            }
            Err(e) => match tracker.config.operations.on_file_error {
                FileErrorPolicy::Abort => {
                    return Err(e.context(format!(
                        "Failed to track {} between {} and {}",
                        patch.path(),
                        short_commit(&from_commit),
                        short_commit(&to_commit)
                    )));
                }
                FileErrorPolicy::Skip => {
                    eprintln!("subtrack: Warning - skipping {}: {:#}", patch.path(), e);
                    for path in patch.old_path.iter().chain(patch.new_path.iter()) {
                        if !run.skipped_paths.contains(path) {
                            run.skipped_paths.push(path.clone());
                        }
                    }
                }
            },
        }
    }

    Ok(run)
}

/// Records with fresh IDs for every included file at `commit`
pub fn initialize_records(
    vcs: &dyn VersionControl,
    extractor: &dyn TextExtractor,
    config: &SubtrackConfig,
    allocator: &dyn PersistentIdAllocator,
    commit: &str,
) -> Result<FileRecords> {
    let include = config.operations.include_regex()?;
    let pipeline = OperationsPipeline::new(config);
    let mut files = FileRecords::new();

    for path in vcs.list_files(commit)? {
        if !include.is_match(&path) {
            continue;
        }
        let source = vcs
            .read_file_at_commit(&path, commit)?
            .ok_or_else(|| anyhow::anyhow!("{} disappeared from {}", path, short_commit(commit)))?;
        let text = extractor
            .to_marked_plain_text(&source)
            .with_context(|| format!("Failed to extract subtitles from {} at {}", path, short_commit(commit)))?;
        let records = pipeline.initial_records(&text, allocator)?;
        files.insert(path, records);
    }

    Ok(files)
}

/// Finalize every tracked file of `run` and build the records of its "to"
/// commit from `carried`, the records of its "from" commit.
///
/// Files the run did not touch keep their records. The aggregate of `run`
/// is rebuilt so it reports the finalized IDs.
pub fn finalize_run(
    run: &mut RepositoryRun,
    carried: FileRecords,
    allocator: &dyn PersistentIdAllocator,
) -> Result<FileRecords> {
    let mut files = carried;
    for path in run.removed_paths.iter().chain(&run.skipped_paths) {
        files.remove(path);
    }

    for tracked in &mut run.files {
        if let TrackedFile::Changed(outcome) = tracked {
            finalize_temporary_ids(outcome, allocator)?;
            files.insert(outcome.operations.file_path.clone(), outcome.records()?);
        }
    }

    run.operations.files = run
        .files
        .iter()
        .map(TrackedFile::operations)
        .filter(|ops| !ops.operations.is_empty())
        .cloned()
        .collect();

    Ok(files)
}

fn track_file(
    tracker: &Tracker<'_>,
    pipeline: &OperationsPipeline,
    patch: &FilePatch,
    from_commit: &str,
    to_commit: &str,
    mode: PipelineMode,
) -> Result<TrackedFile> {
    let old_path = patch.old_path.as_deref();
    let new_path = patch.new_path.as_deref();

    if patch.status == FileStatus::Deleted {
        let path = patch.path();
        let records = tracker.store.load(path, from_commit)?.unwrap_or_default();
        return Ok(TrackedFile::Deleted(deleted_file_operations(
            path,
            from_commit,
            to_commit,
            &records,
        )));
    }

    let new_path = new_path.ok_or_else(|| anyhow::anyhow!("Patch for {} has no new path", patch.path()))?;
    let to_text = marked_text_at(tracker, new_path, to_commit)?;
    let to_records = tracker.store.load(new_path, to_commit)?;

    let (from_path, from_text, from_records) = match (patch.status, old_path) {
        (FileStatus::Added, _) | (_, None) => (new_path, String::new(), Some(Vec::new())),
        (_, Some(old_path)) => (
            old_path,
            marked_text_at(tracker, old_path, from_commit)?,
            tracker.store.load(old_path, from_commit)?,
        ),
    };

    let from = FileRevision {
        path: from_path,
        commit: from_commit,
        text: &from_text,
        records: from_records.as_deref(),
    };
    let to = FileRevision {
        path: new_path,
        commit: to_commit,
        text: &to_text,
        records: to_records.as_deref(),
    };

    let mut outcome = match mode {
        PipelineMode::File => pipeline.file_operations(&from, &to)?,
        PipelineMode::Hunk => {
            let hunks = compute_hunks(&from_text, &to_text, DEFAULT_CONTEXT_LINES);
            pipeline.hunk_operations(&from, &to, &hunks)?
        }
    };
    outcome.operations.file_path = new_path.to_string();
    Ok(TrackedFile::Changed(outcome))
}

fn marked_text_at(tracker: &Tracker<'_>, path: &str, commit: &str) -> Result<String> {
    let source = tracker
        .vcs
        .read_file_at_commit(path, commit)?
        .ok_or_else(|| anyhow::anyhow!("{} does not exist at {}", path, short_commit(commit)))?;
    tracker
        .extractor
        .to_marked_plain_text(&source)
        .with_context(|| format!("Failed to extract subtitles from {} at {}", path, short_commit(commit)))
}

fn file_operations(from: &FileRevision<'_>, to: &FileRevision<'_>, operations: Vec<Operation>) -> FileOperations {
    FileOperations {
        file_path: to.path.to_string(),
        from_commit: from.commit.to_string(),
        to_commit: to.commit.to_string(),
        operations,
    }
}

fn describe(from: &FileRevision<'_>, to: &FileRevision<'_>) -> String {
    format!(
        "{} between {} and {}",
        to.path,
        short_commit(from.commit),
        short_commit(to.commit)
    )
}

fn warn_on_band_exhaustion(
    alignment: &Alignment<SubtitleAttrs>,
    from: &FileRevision<'_>,
    to: &FileRevision<'_>,
    hunk: Option<usize>,
) {
    if !alignment.band_exhausted() {
        return;
    }
    let location = match hunk {
        Some(hunk) => format!("hunk {} of {}", hunk, describe(from, to)),
        None => describe(from, to),
    };
    eprintln!(
        "subtrack: Warning - alignment of {} reached offset {} of band width {}; review the result or widen the band",
        location, alignment.max_offset, alignment.band_width
    );
}

/// ID temporary minting continues from: the previous hunk's last ID when it
/// was minted after the subtitle preceding this hunk, else that subtitle
fn continue_from(carried: Option<PersistentId>, preceding: Option<PersistentId>) -> Option<PersistentId> {
    match (carried, preceding) {
        (Some(carried @ PersistentId::Temporary { .. }), Some(preceding)) => {
            let anchored_here = matches!(&carried, PersistentId::Temporary { anchor, .. } if *anchor == preceding.to_string());
            if anchored_here {
                Some(carried)
            } else {
                Some(preceding)
            }
        }
        (_, Some(preceding)) => Some(preceding),
        (carried, None) => carried,
    }
}

/// Check the hunk's lines against both revisions
fn verify_hunk(
    hunk: &DiffHunk,
    hunk_index: usize,
    from_lines: &[&str],
    to_lines: &[&str],
    from: &FileRevision<'_>,
    to: &FileRevision<'_>,
) -> Result<()> {
    for line in &hunk.lines {
        let sides = [
            (line.origin != LineOrigin::Addition, line.old_line_number, from_lines, from),
            (line.origin != LineOrigin::Deletion, line.new_line_number, to_lines, to),
        ];
        for (present, number, lines, revision) in sides {
            if !present {
                continue;
            }
            let number = number.ok_or_else(|| {
                anyhow::anyhow!(
                    "Hunk {} of {} has a line without a line number in {}",
                    hunk_index,
                    revision.path,
                    short_commit(revision.commit)
                )
            })?;
            let actual = (number as usize).checked_sub(1).and_then(|i| lines.get(i));
            if actual != Some(&line.content.as_str()) {
                anyhow::bail!(
                    "Hunk {} of {} does not match {} at line {}: expected {:?}, found {:?}",
                    hunk_index,
                    revision.path,
                    short_commit(revision.commit),
                    number,
                    line.content,
                    actual.copied().unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

/// 0-based line indices one side of the hunks touches
fn lines_in_hunks(hunks: &[DiffHunk], side: impl Fn(&HunkLine) -> Option<u32>) -> BTreeSet<usize> {
    hunks
        .iter()
        .flat_map(|h| h.lines.iter())
        .filter_map(side)
        .filter_map(|n| (n as usize).checked_sub(1))
        .collect()
}

/// The "to" subtitles in order: those inside hunks from `covered`, the
/// others matched to their unchanged counterpart in the "from" revision
fn unchanged_subtitles(
    from_subtitles: &[SubtitleAttrs],
    to_subtitles: &[SubtitleAttrs],
    hunks: &[DiffHunk],
    mut covered: BTreeMap<usize, Subtitle>,
    from_lines: &[&str],
    to_lines: &[&str],
) -> Result<Vec<Subtitle>> {
    let old_in_hunks = lines_in_hunks(hunks, |l| l.old_line_number);
    let new_in_hunks = lines_in_hunks(hunks, |l| l.new_line_number);

    let old_outside: Vec<usize> = (0..from_lines.len()).filter(|i| !old_in_hunks.contains(i)).collect();
    let new_outside: Vec<usize> = (0..to_lines.len()).filter(|i| !new_in_hunks.contains(i)).collect();
    if old_outside.len() != new_outside.len() {
        anyhow::bail!(
            "Hunks leave {} unchanged lines in the old revision but {} in the new one",
            old_outside.len(),
            new_outside.len()
        );
    }
    let old_line_of: BTreeMap<usize, usize> = new_outside.into_iter().zip(old_outside).collect();

    let mut after = Vec::with_capacity(to_subtitles.len());
    for subtitle in to_subtitles {
        if let Some(covered) = covered.remove(&subtitle.index) {
            after.push(covered);
            continue;
        }

        let old_line = old_line_of.get(&subtitle.line).copied().ok_or_else(|| {
            anyhow::anyhow!(
                "Subtitle {} on line {} is neither in a hunk nor on an unchanged line",
                subtitle.index + 1,
                subtitle.line + 1
            )
        })?;
        let ordinal = to_subtitles
            .iter()
            .filter(|s| s.line == subtitle.line && s.index < subtitle.index)
            .count();
        let counterpart = from_subtitles
            .iter()
            .filter(|s| s.line == old_line)
            .nth(ordinal)
            .filter(|s| s.content_sim == subtitle.content_sim)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unchanged line {} has no matching subtitle for {:?}",
                    old_line + 1,
                    subtitle.content.trim_end()
                )
            })?;
        let persistent_id = counterpart.persistent_id.clone().ok_or_else(|| {
            anyhow::anyhow!("Subtitle {} has no persistent ID", counterpart.index + 1)
        })?;

        let mut unchanged = Subtitle::new(persistent_id, counterpart.record_id.clone());
        unchanged.before = Some(counterpart.content.clone());
        unchanged.after = Some(subtitle.content.clone());
        after.push(unchanged);
    }

    Ok(after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::operation::OperationId;
    use crate::storage::allocator::SequentialIdAllocator;
    use crate::text::MarkedTextPassthrough;

    const FOX: &str = "@The quick brown fox jumps over the lazy dog. ";
    const PACK: &str = "@Pack my box with five dozen liquor jugs. ";
    const SPHINX: &str = "@Sphinx of black quartz, judge my vow. ";

    fn pipeline() -> OperationsPipeline {
        OperationsPipeline::new(&SubtrackConfig::default())
    }

    /// Records numbering the subtitles of `text` st1, st2, ...
    fn numbered_records(text: &str) -> Vec<SubtitleRecord> {
        pipeline()
            .parse(text)
            .iter()
            .enumerate()
            .map(|(i, s)| SubtitleRecord::new(PersistentId::real(format!("st{}", i + 1)), None, &s.content))
            .collect()
    }

    fn revision<'a>(text: &'a str, records: Option<&'a [SubtitleRecord]>, commit: &'a str) -> FileRevision<'a> {
        FileRevision {
            path: "docs/a.md",
            commit,
            text,
            records,
        }
    }

    fn run(from_text: &str, to_text: &str) -> FileOutcome {
        let records = numbered_records(from_text);
        let from = revision(from_text, Some(&records), "c1");
        let to = revision(to_text, None, "c2");
        pipeline().file_operations(&from, &to).unwrap()
    }

    fn summary(outcome: &FileOutcome) -> Vec<(OperationType, Vec<String>)> {
        outcome
            .operations
            .operations
            .iter()
            .map(|op| {
                (
                    op.operation_type,
                    op.affected_stids.iter().map(ToString::to_string).collect(),
                )
            })
            .collect()
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn marked(source: &str) -> String {
        MarkedTextPassthrough::default().to_marked_plain_text(source).unwrap()
    }

    fn after_ids(outcome: &FileOutcome) -> Vec<String> {
        outcome.after.iter().map(|s| s.persistent_id.to_string()).collect()
    }

    /// File and hunk pipeline outcomes for the same edit
    fn both_modes(from_text: &str, to_text: &str) -> Vec<FileOutcome> {
        let records = numbered_records(from_text);
        let from = revision(from_text, Some(&records), "c1");
        let to = revision(to_text, None, "c2");
        let hunks = compute_hunks(from_text, to_text, DEFAULT_CONTEXT_LINES);
        vec![
            pipeline().file_operations(&from, &to).unwrap(),
            pipeline().hunk_operations(&from, &to, &hunks).unwrap(),
        ]
    }

    #[test]
    fn test_unchanged_file_has_no_operations() {
        let text = format!("{FOX}{PACK}\n");
        let outcome = run(&text, &text);
        assert!(outcome.operations.operations.is_empty());
        let after: Vec<String> = outcome.after.iter().map(|s| s.persistent_id.to_string()).collect();
        assert_eq!(after, vec!["st1", "st2"]);
    }

    #[test]
    fn test_single_insertion() {
        let outcome = run(&format!("{FOX}{PACK}\n"), &format!("{FOX}{SPHINX}{PACK}\n"));

        assert_eq!(summary(&outcome), vec![(OperationType::Insert, ids(&["tmp-st1+1"]))]);
        let insert = &outcome.operations.operations[0];
        assert_eq!(insert.after_stid, Some(InsertAnchor::After(PersistentId::real("st1"))));
        assert_eq!(insert.operation_id, OperationId::Sequence(1));
        assert_eq!(outcome.operations.file_path, "docs/a.md");
        assert_eq!(outcome.operations.from_commit, "c1");
        assert_eq!(outcome.last_stid, Some(PersistentId::real("st2")));
    }

    #[test]
    fn test_split() {
        let outcome = run(&format!("@hello world {FOX}\n"), &format!("@hello @world {FOX}\n"));
        assert_eq!(summary(&outcome), vec![(OperationType::Split, ids(&["st1", "tmp-st1+1"]))]);
    }

    #[test]
    fn test_merge() {
        let outcome = run(&format!("@hello @world {FOX}\n"), &format!("@hello world {FOX}\n"));
        assert_eq!(summary(&outcome), vec![(OperationType::Merge, ids(&["st1", "st2"]))]);
        assert_eq!(outcome.after.len(), 2);
    }

    #[test]
    fn test_deletion() {
        let outcome = run(&format!("{FOX}{SPHINX}{PACK}\n"), &format!("{FOX}{PACK}\n"));
        assert_eq!(summary(&outcome), vec![(OperationType::Delete, ids(&["st2"]))]);
    }

    #[test]
    fn test_new_file_inserts_chain_from_start() {
        let to_text = format!("{FOX}{PACK}\n{SPHINX}\n");
        let empty: Vec<SubtitleRecord> = Vec::new();
        let from = revision("", Some(&empty), "c1");
        let to = revision(&to_text, None, "c2");
        let outcome = pipeline().file_operations(&from, &to).unwrap();

        let anchors: Vec<String> = outcome
            .operations
            .operations
            .iter()
            .map(|op| op.after_stid.as_ref().unwrap().to_string())
            .collect();
        assert_eq!(anchors, vec!["new_file", "tmp-new_file+1", "tmp-new_file+2"]);
        assert_eq!(outcome.operations.operations[0].after_stid, Some(InsertAnchor::StartOfFile));
    }

    #[test]
    fn test_pipeline_is_deterministic() {
        let from_text = format!("@hello @world {FOX}\n{PACK}\n");
        let to_text = format!("@hello world {FOX}\n{SPHINX}{PACK}\n");
        let first = serde_json::to_string(&run(&from_text, &to_text).operations).unwrap();
        let second = serde_json::to_string(&run(&from_text, &to_text).operations).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_id_mode_keeps_identities() {
        let text = format!("{FOX}{PACK}\n");
        let records = numbered_records(&text);
        let from = revision(&text, Some(&records), "c1");
        let to = revision(&text, Some(&records), "c2");
        let outcome = pipeline().file_operations(&from, &to).unwrap();
        assert!(outcome.operations.operations.is_empty());
        assert_eq!(outcome.after[1].persistent_id, PersistentId::real("st2"));
    }

    #[test]
    fn test_id_mode_keeps_recorded_ids_of_new_subtitles() {
        let from_text = format!("{FOX}{PACK}\n");
        let to_text = format!("{FOX}{SPHINX}{PACK}\n");
        let from_records = numbered_records(&from_text);
        let to_records = vec![
            SubtitleRecord::new(PersistentId::real("st1"), None, FOX),
            SubtitleRecord::new(PersistentId::real("st9"), None, SPHINX),
            SubtitleRecord::new(PersistentId::real("st2"), None, PACK),
        ];
        let from = revision(&from_text, Some(&from_records), "c1");
        let to = revision(&to_text, Some(&to_records), "c2");

        let mut outcome = pipeline().file_operations(&from, &to).unwrap();
        assert_eq!(summary(&outcome), vec![(OperationType::Insert, ids(&["st9"]))]);
        assert_eq!(after_ids(&outcome), vec!["st1", "st9", "st2"]);

        let allocator = SequentialIdAllocator::new("st", 100);
        assert!(finalize_temporary_ids(&mut outcome, &allocator).unwrap().is_empty());
        assert_eq!(outcome.records().unwrap(), to_records);
    }

    #[test]
    fn test_insert_before_opening_subtitle() {
        let from_text = marked(&format!("{FOX}{PACK}\n"));
        let to_text = marked(&format!("{SPHINX}{FOX}{PACK}\n"));

        for outcome in both_modes(&from_text, &to_text) {
            assert_eq!(summary(&outcome), vec![(OperationType::Insert, ids(&["tmp-new_file+1"]))]);
            assert_eq!(outcome.operations.operations[0].after_stid, Some(InsertAnchor::StartOfFile));
            assert_eq!(after_ids(&outcome), vec!["tmp-new_file+1", "st1", "st2"]);
        }
    }

    #[test]
    fn test_delete_opening_subtitle() {
        let from_text = marked(&format!("{SPHINX}{FOX}{PACK}\n"));
        let to_text = marked(&format!("{FOX}{PACK}\n"));

        for outcome in both_modes(&from_text, &to_text) {
            assert_eq!(summary(&outcome), vec![(OperationType::Delete, ids(&["st1"]))]);
            assert_eq!(after_ids(&outcome), vec!["st2", "st3"]);
        }
    }

    #[test]
    fn test_replace_opening_subtitle() {
        let from_text = marked(&format!("{FOX}{PACK}\n"));
        let to_text = marked(&format!("{SPHINX}{PACK}\n"));

        for outcome in both_modes(&from_text, &to_text) {
            assert_eq!(
                summary(&outcome),
                vec![
                    (OperationType::Insert, ids(&["tmp-new_file+1"])),
                    (OperationType::Delete, ids(&["st1"])),
                ]
            );
            assert_eq!(outcome.operations.operations[0].after_stid, Some(InsertAnchor::StartOfFile));
            assert_eq!(after_ids(&outcome), vec!["tmp-new_file+1", "st2"]);
        }
    }

    #[test]
    fn test_record_count_mismatch_is_fatal() {
        let records = numbered_records(FOX);
        let text = format!("{FOX}{PACK}\n");
        let from = revision(&text, Some(&records), "c1");
        let to = revision(&text, None, "c2");
        let err = pipeline().file_operations(&from, &to).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("docs/a.md"));
        assert!(message.contains("1 stored records, 2 parsed subtitles"));
    }

    #[test]
    fn test_record_content_mismatch_is_fatal() {
        let records = numbered_records(FOX);
        let from = revision(PACK, Some(&records), "c1");
        let to = revision(PACK, None, "c2");
        let err = pipeline().file_operations(&from, &to).unwrap_err();
        assert!(err.to_string().contains("does not match its stored record st1"));
    }

    #[test]
    fn test_missing_records_are_fatal() {
        let from = revision(FOX, None, "c1");
        let to = revision(FOX, None, "c2");
        let err = pipeline().file_operations(&from, &to).unwrap_err();
        assert!(err.to_string().contains("No subtitle records"));
    }

    #[test]
    fn test_finalize_temporary_ids() {
        let mut outcome = run(&format!("{FOX}{PACK}\n"), &format!("{FOX}{SPHINX}{PACK}\n"));
        let allocator = SequentialIdAllocator::new("st", 100);

        let resolved = finalize_temporary_ids(&mut outcome, &allocator).unwrap();

        assert_eq!(
            resolved.get(&PersistentId::temporary("st1", 1)),
            Some(&PersistentId::real("st000100"))
        );
        assert_eq!(summary(&outcome), vec![(OperationType::Insert, ids(&["st000100"]))]);
        let after: Vec<String> = outcome.after.iter().map(|s| s.persistent_id.to_string()).collect();
        assert_eq!(after, vec!["st1", "st000100", "st2"]);

        let records = outcome.records().unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[1].matches("sphinxofblackquartzjudgemyvow"));
    }

    #[test]
    fn test_unfinalized_records_are_rejected() {
        let outcome = run(&format!("{FOX}{PACK}\n"), &format!("{FOX}{SPHINX}{PACK}\n"));
        assert!(outcome.records().is_err());
    }

    #[test]
    fn test_initial_records() {
        let allocator = SequentialIdAllocator::new("st", 1);
        let records = pipeline()
            .initial_records(&format!("{FOX}{PACK}\n"), &allocator)
            .unwrap();
        let ids: Vec<String> = records.iter().map(|r| r.persistent_id.to_string()).collect();
        assert_eq!(ids, vec!["st000001", "st000002"]);
    }

    #[test]
    fn test_hunk_pipeline_insertion() {
        let from_text = format!("{FOX}\n{PACK}\n@How vexingly quick daft zebras jump.\n");
        let to_text = format!("{FOX}\n{SPHINX}\n{PACK}\n@How vexingly quick daft zebras jump.\n");
        let records = numbered_records(&from_text);
        let from = revision(&from_text, Some(&records), "c1");
        let to = revision(&to_text, None, "c2");

        for context in [0, 3] {
            let hunks = compute_hunks(&from_text, &to_text, context);
            let outcome = pipeline().hunk_operations(&from, &to, &hunks).unwrap();

            assert_eq!(summary(&outcome), vec![(OperationType::Insert, ids(&["tmp-st1+1"]))]);
            let insert = &outcome.operations.operations[0];
            assert_eq!(insert.after_stid, Some(InsertAnchor::After(PersistentId::real("st1"))));
            let expected_pair = if context == 0 { 1 } else { 2 };
            assert_eq!(insert.operation_id, OperationId::Hunk { hunk: 1, pair: expected_pair });

            let after: Vec<String> = outcome.after.iter().map(|s| s.persistent_id.to_string()).collect();
            assert_eq!(after, vec!["st1", "tmp-st1+1", "st2", "st3"]);
        }
    }

    #[test]
    fn test_hunk_pipeline_matches_file_pipeline_on_merge() {
        let from_text = format!("{PACK}\n@hello @world {FOX}\n");
        let to_text = format!("{PACK}\n@hello world {FOX}\n");
        let records = numbered_records(&from_text);
        let from = revision(&from_text, Some(&records), "c1");
        let to = revision(&to_text, None, "c2");

        let hunks = compute_hunks(&from_text, &to_text, 0);
        let outcome = pipeline().hunk_operations(&from, &to, &hunks).unwrap();
        assert_eq!(summary(&outcome), vec![(OperationType::Merge, ids(&["st2", "st3"]))]);
        assert_eq!(
            outcome.operations.operations[0].operation_id,
            OperationId::Hunk { hunk: 1, pair: 2 }
        );
    }

    #[test]
    fn test_hunk_content_mismatch_is_fatal() {
        let from_text = format!("{FOX}\n{PACK}\n");
        let to_text = format!("{FOX}\n{SPHINX}\n");
        let records = numbered_records(&from_text);
        let from = revision(&from_text, Some(&records), "c1");
        let to = revision(&to_text, None, "c2");

        let mut hunks = compute_hunks(&from_text, &to_text, 0);
        hunks[0].lines[0].content = "something else".to_string();

        let err = pipeline().hunk_operations(&from, &to, &hunks).unwrap_err();
        assert!(err.to_string().contains("Hunk 1 of docs/a.md does not match c1 at line 2"));
    }

    #[test]
    fn test_deleted_file_operations() {
        let records = numbered_records(&format!("{FOX}{PACK}\n"));
        let ops = deleted_file_operations("gone.md", "c1", "c2", &records);
        let affected: Vec<String> = ops.operations.iter().map(|op| op.affected_stids[0].to_string()).collect();
        assert_eq!(affected, vec!["st1", "st2"]);
        assert!(ops.operations.iter().all(|op| op.operation_type == OperationType::Delete));
    }

    #[test]
    fn test_finalize_run_carries_untouched_files() {
        let from_text = format!("{FOX}{PACK}\n");
        let outcome = run(&from_text, &format!("{FOX}{SPHINX}{PACK}\n"));

        let mut carried = FileRecords::new();
        carried.insert("docs/a.md".to_string(), numbered_records(&from_text));
        carried.insert("docs/untouched.md".to_string(), numbered_records(PACK));
        carried.insert("docs/gone.md".to_string(), numbered_records(FOX));
        let gone = deleted_file_operations("docs/gone.md", "c1", "c2", &carried["docs/gone.md"]);

        let mut repository_run = RepositoryRun {
            operations: RepositoryOperations {
                repository_name: "repo".to_string(),
                from_commit: "c1".to_string(),
                to_commit: "c2".to_string(),
                files: vec![outcome.operations.clone(), gone.clone()],
            },
            files: vec![TrackedFile::Changed(outcome), TrackedFile::Deleted(gone)],
            removed_paths: vec!["docs/gone.md".to_string()],
            skipped_paths: Vec::new(),
        };
        let allocator = SequentialIdAllocator::new("st", 50);

        let files = finalize_run(&mut repository_run, carried, &allocator).unwrap();

        let paths: Vec<&str> = files.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["docs/a.md", "docs/untouched.md"]);
        assert_eq!(files["docs/a.md"].len(), 3);
        assert_eq!(files["docs/a.md"][1].persistent_id, PersistentId::real("st000050"));
        assert_eq!(
            repository_run.operations.files[0].operations[0].affected_stids,
            vec![PersistentId::real("st000050")]
        );
        assert_eq!(repository_run.operations.total_operations(), 3);
    }

    #[test]
    fn test_continue_from() {
        let st1 = PersistentId::real("st1");
        let tmp = PersistentId::temporary("st1", 2);
        let other_tmp = PersistentId::temporary("st0", 1);

        assert_eq!(continue_from(Some(tmp.clone()), Some(st1.clone())), Some(tmp));
        assert_eq!(continue_from(Some(other_tmp.clone()), Some(st1.clone())), Some(st1.clone()));
        assert_eq!(continue_from(Some(PersistentId::real("st9")), Some(st1.clone())), Some(st1));
        assert_eq!(continue_from(Some(other_tmp.clone()), None), Some(other_tmp));
        assert_eq!(continue_from(None, None), None);
    }
}
