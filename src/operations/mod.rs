pub mod classify;
pub mod group;
pub mod pair;
pub mod pipeline;

pub use classify::OperationClassifier;
pub use group::{extract_groups, OperationsGroup};
pub use pair::{enrich_pairs, AlignedSubtitlePair, PairType};
pub use pipeline::{
    finalize_run, finalize_temporary_ids, initialize_records, track_repository, FileAlignment, FileOutcome, FileRevision,
    OperationsPipeline, PipelineMode, RepositoryRun, TrackedFile, Tracker,
};
