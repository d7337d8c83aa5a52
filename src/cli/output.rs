use clap::ValueEnum;
use colored::{ColoredString, Colorize};

use crate::core::{FileOperations, Operation, OperationType, RepositoryOperations};
use crate::operations::{AlignedSubtitlePair, PairType};
use crate::utils::{short_commit, truncate, truncate_or_pad};

/// Width of the separator lines
const RULE_WIDTH: usize = 85;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable terminal output with colors
    #[default]
    Pretty,
    /// JSON output for machine consumption
    Json,
}

/// Format the operations of a repository run for display
pub fn format_operations(result: &RepositoryOperations, format: OutputFormat) -> String {
    match format {
        OutputFormat::Pretty => format_operations_pretty(result),
        OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_else(|_| "{}".to_string()),
    }
}

fn format_operations_pretty(result: &RepositoryOperations) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "\n{} {} {} {}\n",
        "Operations".bold(),
        short_commit(&result.from_commit).yellow(),
        "→".dimmed(),
        short_commit(&result.to_commit).yellow()
    ));
    output.push_str(&format!("{}\n", "─".repeat(RULE_WIDTH).dimmed()));

    if result.files.is_empty() {
        output.push_str("No subtitle operations.\n");
        return output;
    }

    for file in &result.files {
        output.push_str(&format!("{} ({})\n", file.file_path.bold(), describe_counts(file)));
        for op in &file.operations {
            output.push_str(&format_operation(op));
        }
        output.push('\n');
    }

    output.push_str(&format!("{}\n", "─".repeat(RULE_WIDTH).dimmed()));
    output.push_str(&format!(
        "{} operations in {} files of {}\n",
        result.total_operations(),
        result.files.len(),
        result.repository_name
    ));

    output
}

fn format_operation(op: &Operation) -> String {
    let affected: Vec<String> = op.affected_stids.iter().map(ToString::to_string).collect();
    let after = op
        .after_stid
        .as_ref()
        .map(|anchor| format!(" after {}", anchor).dimmed().to_string())
        .unwrap_or_default();

    format!(
        "  {} {} {}{}\n",
        format!("{:>6}", op.operation_id.to_string()).dimmed(),
        paint_operation(op.operation_type, &truncate_or_pad(&op.operation_type.to_string(), 13)),
        affected.join(", "),
        after
    )
}

fn describe_counts(file: &FileOperations) -> String {
    file.count_by_type()
        .iter()
        .map(|(ty, count)| format!("{} {}", count, ty))
        .collect::<Vec<_>>()
        .join(", ")
}

fn paint_operation(ty: OperationType, text: &str) -> ColoredString {
    match ty {
        OperationType::Insert => text.green(),
        OperationType::Delete => text.red(),
        OperationType::Split | OperationType::Merge => text.cyan(),
        OperationType::MoveLeft | OperationType::MoveRight => text.yellow(),
        OperationType::SplitCombo | OperationType::MergeCombo => text.magenta(),
        OperationType::ContentChange => text.dimmed(),
    }
}

/// Format aligned pairs and the operations found in them
pub fn format_alignment(pairs: &[AlignedSubtitlePair], operations: &[Operation], format: OutputFormat) -> String {
    match format {
        OutputFormat::Pretty => format_alignment_pretty(pairs, operations),
        OutputFormat::Json => format_alignment_json(pairs, operations),
    }
}

fn format_alignment_pretty(pairs: &[AlignedSubtitlePair], operations: &[Operation]) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "\n {} │ {} │ {} │ {} │ {}\n",
        "PAIR".dimmed(),
        "TYPE          ".dimmed(),
        "ID          ".dimmed(),
        "FROM                        ".dimmed(),
        "TO".dimmed()
    ));
    output.push_str(&format!("{}\n", "─".repeat(RULE_WIDTH).dimmed()));

    for pair in pairs {
        let marker = match pair.pair_type {
            PairType::FullyAligned => truncate_or_pad("fully_aligned", 14).dimmed(),
            PairType::StAdded => truncate_or_pad("st_added", 14).green(),
            PairType::StRemoved => truncate_or_pad("st_removed", 14).red(),
            other => truncate_or_pad(&other.to_string(), 14).yellow(),
        };
        output.push_str(&format!(
            " {} │ {} │ {} │ {} │ {}\n",
            format!("{:>4}", pair.index).dimmed(),
            marker,
            truncate_or_pad(&pair.persistent_id().to_string(), 12),
            truncate_or_pad(pair.from.content.trim_end(), 28),
            truncate(pair.to.content.trim_end(), 28)
        ));
    }

    output.push_str(&format!("{}\n", "─".repeat(RULE_WIDTH).dimmed()));
    if operations.is_empty() {
        output.push_str("No subtitle operations.\n");
    }
    for op in operations {
        output.push_str(&format_operation(op));
    }

    output
}

fn format_alignment_json(pairs: &[AlignedSubtitlePair], operations: &[Operation]) -> String {
    let pairs_json: Vec<serde_json::Value> = pairs
        .iter()
        .map(|pair| {
            serde_json::json!({
                "index": pair.index,
                "pair_type": pair.pair_type,
                "persistent_id": pair.persistent_id(),
                "from": (!pair.from.is_gap()).then_some(&pair.from.content),
                "to": (!pair.to.is_gap()).then_some(&pair.to.content),
                "sim_abs": { "sim": pair.sim_abs.sim, "confidence": pair.sim_abs.confidence },
                "sim_left": { "sim": pair.sim_left.sim, "confidence": pair.sim_left.confidence },
                "sim_right": { "sim": pair.sim_right.sim, "confidence": pair.sim_right.confidence },
                "content_length_change": pair.content_length_change,
            })
        })
        .collect();

    serde_json::to_string_pretty(&serde_json::json!({
        "pairs": pairs_json,
        "operations": operations,
    }))
    .unwrap_or_else(|_| "{}".to_string())
}
