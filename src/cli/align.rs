use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::output::{format_alignment, OutputFormat};
use crate::config::SubtrackConfig;
use crate::core::PersistentId;
use crate::operations::{FileRevision, OperationsPipeline};
use crate::storage::SubtitleRecord;
use crate::text::{MarkedTextPassthrough, TextExtractor};

/// Labels standing in for commits of the two local files
const FROM_LABEL: &str = "old";
const TO_LABEL: &str = "new";

/// Align command arguments
#[derive(Debug, Args)]
pub struct AlignArgs {
    /// Earlier version of the document
    pub from_file: PathBuf,

    /// Later version of the document
    pub to_file: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,
}

/// Run the align command
pub fn run(args: AlignArgs) -> Result<()> {
    let config = SubtrackConfig::load(Path::new("."))?;
    let extractor = MarkedTextPassthrough::new(config.markers);
    let pipeline = OperationsPipeline::new(&config);

    let from_text = extractor.to_marked_plain_text(&read_document(&args.from_file)?)?;
    let to_text = extractor.to_marked_plain_text(&read_document(&args.to_file)?)?;
    let from_path = args.from_file.display().to_string();
    let to_path = args.to_file.display().to_string();

    let records = positional_records(&pipeline, &from_text, &config.storage.id_prefix);
    let from = FileRevision {
        path: &from_path,
        commit: FROM_LABEL,
        text: &from_text,
        records: Some(&records),
    };
    let to = FileRevision {
        path: &to_path,
        commit: TO_LABEL,
        text: &to_text,
        records: None,
    };

    let alignment = pipeline.align_revisions(&from, &to)?;
    println!(
        "{}",
        format_alignment(&alignment.pairs, &alignment.outcome.operations.operations, args.format)
    );
    Ok(())
}

/// Records numbering the subtitles of `text` in document order
fn positional_records(pipeline: &OperationsPipeline, text: &str, prefix: &str) -> Vec<SubtitleRecord> {
    pipeline
        .parse(text)
        .iter()
        .map(|s| SubtitleRecord::new(PersistentId::real(format!("{}{}", prefix, s.index + 1)), None, &s.content))
        .collect()
}

fn read_document(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
