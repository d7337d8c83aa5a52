use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::operations::initialize_records;
use crate::storage::{NotesRecordStore, SubtitleRecordStore};
use crate::text::MarkedTextPassthrough;
use crate::utils::short_commit;
use crate::vcs::VersionControl;

/// Init command arguments
#[derive(Debug, Args)]
pub struct InitArgs {
    /// Commit whose subtitles get IDs (default: HEAD)
    #[arg(default_value = "HEAD")]
    pub commit: String,

    /// Replace records already stored for the commit
    #[arg(long)]
    pub force: bool,
}

/// Run the init command
pub fn run(args: InitArgs) -> Result<()> {
    let (git, config) = super::open_repository()?;
    let store = NotesRecordStore::new(git.repository(), config.storage.notes_ref.clone());

    let commit = git.resolve_commit(&args.commit)?;
    let commit_short = short_commit(&commit);

    let existing = store.load_all(&commit)?;
    if !existing.is_empty() && !args.force {
        anyhow::bail!(
            "Commit {} already has subtitle records for {} files. Use --force to replace them.",
            commit_short,
            existing.len()
        );
    }

    let extractor = MarkedTextPassthrough::new(config.markers);
    let allocator = super::build_allocator(&config, &store)?;
    let files = initialize_records(&git, &extractor, &config, allocator.as_ref(), &commit)?;
    store.save_all(&commit, &files)?;

    let subtitle_count: usize = files.values().map(Vec::len).sum();
    println!(
        "{} {} subtitles in {} files at {}",
        "Initialized".green().bold(),
        subtitle_count,
        files.len(),
        commit_short.yellow()
    );
    for (path, records) in &files {
        println!("  {} ({} subtitles)", path, records.len());
    }

    Ok(())
}
