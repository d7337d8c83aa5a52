pub mod allocator;
pub mod records;

pub use allocator::{PersistentIdAllocator, SequentialIdAllocator, UuidIdAllocator};
pub use records::{
    FileRecords, MemoryRecordStore, NotesRecordStore, RecordsNote, SubtitleRecord, SubtitleRecordStore,
};
