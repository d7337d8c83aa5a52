pub mod align;
pub mod init;
pub mod ops;
pub mod output;
pub mod track;

use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::{AllocatorKind, SubtrackConfig};
use crate::operations::PipelineMode;
use crate::storage::{PersistentIdAllocator, SequentialIdAllocator, SubtitleRecordStore, UuidIdAllocator};
use crate::vcs::GitRepository;

/// Track subtitles and their edit operations across git revisions
#[derive(Debug, Parser)]
#[command(name = "subtrack")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Assign persistent IDs to every subtitle at a commit
    Init(init::InitArgs),

    /// Show the subtitle operations between two commits
    Ops(ops::OpsArgs),

    /// Carry subtitle IDs from one commit to a later one and store them
    Track(track::TrackArgs),

    /// Align the subtitles of two local files
    Align(align::AlignArgs),
}

/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init(args) => init::run(args),
        Commands::Ops(args) => ops::run(args),
        Commands::Track(args) => track::run(args),
        Commands::Align(args) => align::run(args),
    }
}

/// Open the repository around the current directory with its configuration
fn open_repository() -> Result<(GitRepository, SubtrackConfig)> {
    let git = GitRepository::discover(Path::new("."))?;
    let repo_root = git
        .workdir()
        .ok_or_else(|| anyhow::anyhow!("No working directory"))?;
    let config = SubtrackConfig::load(repo_root)?;
    Ok((git, config))
}

/// ID allocator as configured; sequential IDs continue after the highest
/// ID already stored
fn build_allocator(
    config: &SubtrackConfig,
    store: &dyn SubtitleRecordStore,
) -> Result<Box<dyn PersistentIdAllocator>> {
    let prefix = config.storage.id_prefix.clone();
    Ok(match config.storage.allocator {
        AllocatorKind::Sequential => {
            let existing = store.persistent_ids()?;
            Box::new(SequentialIdAllocator::continuing(
                prefix,
                existing.iter().map(String::as_str),
            ))
        }
        AllocatorKind::Uuid => Box::new(UuidIdAllocator::new(prefix)),
    })
}

fn pipeline_mode(per_hunk: bool) -> PipelineMode {
    if per_hunk {
        PipelineMode::Hunk
    } else {
        PipelineMode::File
    }
}
