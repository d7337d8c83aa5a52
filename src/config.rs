//! Configuration for subtrack
//!
//! Loaded from `.subtrack.toml` (repo) or `~/.config/subtrack/config.toml` (global).

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::align::similarity::DEFAULT_REPETITION_WINDOW;
use crate::core::subtitle::Markers;

/// Repo-local configuration file name
pub const REPO_CONFIG_FILE: &str = ".subtrack.toml";

/// Full subtrack configuration file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SubtrackConfig {
    /// Alignment tuning
    pub alignment: AlignmentConfig,

    /// Marker characters of the marked plain-text format
    pub markers: Markers,

    /// Operation reporting
    pub operations: OperationsConfig,

    /// Record storage
    pub storage: StorageConfig,
}

/// Alignment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Score of a single gap (negative)
    pub gap_penalty: f64,

    /// Band width grows with the subtitle count difference by this factor
    pub band_growth: f64,

    /// Minimum band width for whole-file alignment
    pub file_band_floor: usize,

    /// Minimum band width for per-hunk alignment
    pub hunk_band_floor: usize,

    /// Content scores below this never pair two subtitles
    pub min_content_score: f64,

    /// Subtracted from right-aligned scores so left alignment wins ties
    pub right_alignment_penalty: f64,

    /// Window size for repeated n-gram detection
    pub repetition_window: usize,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            gap_penalty: -10.0,
            band_growth: 1.2,
            file_band_floor: 25,
            hunk_band_floor: 10,
            min_content_score: 64.0,
            right_alignment_penalty: 20.0,
            repetition_window: DEFAULT_REPETITION_WINDOW,
        }
    }
}

/// What to do when one file of a repository run fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileErrorPolicy {
    /// Abort the whole run
    #[default]
    Abort,
    /// Warn and leave the file out of the aggregate
    Skip,
}

/// Operation reporting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationsConfig {
    /// Emit contentChange for lone changed subtitles
    pub report_content_changes: bool,

    /// Fold a split or merge and the moves of its group into one combo operation
    pub collapse_combos: bool,

    /// Failure policy for repository runs
    pub on_file_error: FileErrorPolicy,

    /// Regex selecting the files that carry subtitles
    pub include_pattern: String,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            report_content_changes: false,
            collapse_combos: false,
            on_file_error: FileErrorPolicy::Abort,
            include_pattern: r"\.(md|markdown)$".to_string(),
        }
    }
}

impl OperationsConfig {
    /// Compile the include pattern
    pub fn include_regex(&self) -> Result<Regex> {
        Regex::new(&self.include_pattern)
            .with_context(|| format!("Invalid include_pattern: {}", self.include_pattern))
    }
}

/// How new persistent IDs are generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocatorKind {
    /// Prefixed counter continuing after the highest stored ID
    #[default]
    Sequential,
    /// Prefixed random UUIDs
    Uuid,
}

/// Record storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Notes reference holding subtitle records
    pub notes_ref: String,

    /// Prefix of allocated persistent IDs
    pub id_prefix: String,

    /// ID generation scheme
    pub allocator: AllocatorKind,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            notes_ref: "refs/notes/subtrack".to_string(),
            id_prefix: "st".to_string(),
            allocator: AllocatorKind::Sequential,
        }
    }
}

impl SubtrackConfig {
    /// Load configuration from repo root, falling back to global config
    pub fn load(repo_root: &Path) -> Result<Self> {
        let repo_config = Self::repo_config_path(repo_root);
        if repo_config.exists() {
            return Self::load_from_file(&repo_config);
        }

        if let Some(global_config) = Self::global_config_path() {
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Reject settings the aligner cannot work with
    pub fn validate(&self) -> Result<()> {
        let alignment = &self.alignment;
        if alignment.gap_penalty >= 0.0 {
            anyhow::bail!("alignment.gap_penalty must be negative, got {}", alignment.gap_penalty);
        }
        if alignment.band_growth < 1.0 {
            anyhow::bail!("alignment.band_growth must be at least 1.0, got {}", alignment.band_growth);
        }
        if alignment.repetition_window == 0 {
            anyhow::bail!("alignment.repetition_window must be positive");
        }
        let markers = &self.markers;
        if markers.subtitle == markers.gap
            || markers.subtitle == markers.start
            || markers.gap == markers.start
        {
            anyhow::bail!("markers.subtitle, markers.gap and markers.start must differ");
        }
        if !self.storage.notes_ref.starts_with("refs/notes/") {
            anyhow::bail!(
                "storage.notes_ref must live under refs/notes/, got {}",
                self.storage.notes_ref
            );
        }
        self.operations.include_regex()?;
        Ok(())
    }

    /// Get global config path (~/.config/subtrack/config.toml)
    pub fn global_config_path() -> Option<PathBuf> {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(dirs::config_dir)
            .map(|p| p.join("subtrack").join("config.toml"))
    }

    /// Get repo-local config path
    pub fn repo_config_path(repo_root: &Path) -> PathBuf {
        repo_root.join(REPO_CONFIG_FILE)
    }
}
