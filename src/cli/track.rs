use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::cli::output::{format_operations, OutputFormat};
use crate::operations::{finalize_run, track_repository, Tracker};
use crate::storage::{NotesRecordStore, SubtitleRecordStore};
use crate::text::MarkedTextPassthrough;
use crate::utils::short_commit;

/// Track command arguments
#[derive(Debug, Args)]
pub struct TrackArgs {
    /// Commit that already has subtitle records
    pub from: String,

    /// Commit to store records for (default: HEAD)
    #[arg(default_value = "HEAD")]
    pub to: String,

    /// Align the subtitles of each diff hunk instead of whole files
    #[arg(long)]
    pub per_hunk: bool,
}

/// Run the track command
pub fn run(args: TrackArgs) -> Result<()> {
    let (git, config) = super::open_repository()?;
    let store = NotesRecordStore::new(git.repository(), config.storage.notes_ref.clone());
    let extractor = MarkedTextPassthrough::new(config.markers);

    let tracker = Tracker {
        vcs: &git,
        extractor: &extractor,
        store: &store,
        config: &config,
    };
    let mut run = track_repository(&tracker, &args.from, &args.to, super::pipeline_mode(args.per_hunk))?;

    let allocator = super::build_allocator(&config, &store)?;
    let carried = store.load_all(&run.operations.from_commit)?;
    let files = finalize_run(&mut run, carried, allocator.as_ref())?;
    store.save_all(&run.operations.to_commit, &files)?;

    println!("{}", format_operations(&run.operations, OutputFormat::Pretty));
    println!(
        "{} records for {} files at {}",
        "Stored".green().bold(),
        files.len(),
        short_commit(&run.operations.to_commit).yellow()
    );
    if !run.skipped_paths.is_empty() {
        println!(
            "{} {} (run 'subtrack init' on them to start tracking again)",
            "Untracked:".yellow(),
            run.skipped_paths.join(", ")
        );
    }

    Ok(())
}
