//! Infrastructure layer: job persistence adapters.

pub mod storage;

pub use storage::{
    ItemStatusUpdate, JobFilter, JobPage, JobStatusUpdate, JobStorage, JobStorageError,
    MemoryJobStorage, NewJobItem, PgJobStorage,
};
