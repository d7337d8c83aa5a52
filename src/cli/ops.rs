use anyhow::Result;
use clap::Args;

use crate::cli::output::{format_operations, OutputFormat};
use crate::operations::{track_repository, Tracker};
use crate::storage::NotesRecordStore;
use crate::text::MarkedTextPassthrough;

/// Ops command arguments
#[derive(Debug, Args)]
pub struct OpsArgs {
    /// Starting commit
    pub from: String,

    /// Ending commit (default: HEAD)
    #[arg(default_value = "HEAD")]
    pub to: String,

    /// Align the subtitles of each diff hunk instead of whole files
    #[arg(long)]
    pub per_hunk: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,
}

/// Run the ops command
pub fn run(args: OpsArgs) -> Result<()> {
    let (git, config) = super::open_repository()?;
    let store = NotesRecordStore::new(git.repository(), config.storage.notes_ref.clone());
    let extractor = MarkedTextPassthrough::new(config.markers);

    let tracker = Tracker {
        vcs: &git,
        extractor: &extractor,
        store: &store,
        config: &config,
    };
    let run = track_repository(&tracker, &args.from, &args.to, super::pipeline_mode(args.per_hunk))?;

    println!("{}", format_operations(&run.operations, args.format));
    Ok(())
}
