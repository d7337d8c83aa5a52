pub mod operation;
pub mod subtitle;

pub use operation::{
    FileOperations, InsertAnchor, Operation, OperationId, OperationIdSequence, OperationType,
    RepositoryOperations,
};
pub use subtitle::{parse_marked_text, Markers, PersistentId, Subtitle, SubtitleAttrs};
