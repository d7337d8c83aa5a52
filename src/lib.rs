pub mod align;
pub mod cli;
pub mod config;
pub mod core;
pub mod operations;
pub mod storage;
pub mod text;
pub mod utils;
pub mod vcs;

pub use config::SubtrackConfig;
pub use core::operation::{FileOperations, Operation, OperationType, RepositoryOperations};
pub use core::subtitle::{PersistentId, Subtitle};
pub use operations::pipeline::{track_repository, OperationsPipeline, PipelineMode};
pub use storage::records::NotesRecordStore;
