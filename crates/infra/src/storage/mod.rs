//! Job persistence: the sole gateway between the job aggregate and storage.
//!
//! ## Design
//!
//! - `JobStorage` is the storage abstraction; callers never see SQL
//! - Items are always returned ordered by `index` ascending
//! - Listing jobs never loads items (counters only, avoids over-fetch)
//! - Cancel and retry are bulk status sweeps, not runtime signals
//! - Progress counters are recomputed from item statuses on every mutation
//!
//! ## Components
//!
//! - `JobStorage` / `JobStorageError`: the trait and its error type
//! - `MemoryJobStorage`: in-memory implementation for tests/dev
//! - `PgJobStorage`: Postgres implementation (sqlx)
//! - `mapper`: row shapes and lossless row/domain conversions

pub mod mapper;
pub mod memory;
pub mod postgres;
pub mod r#trait;

pub use memory::MemoryJobStorage;
pub use postgres::PgJobStorage;
pub use r#trait::{
    ItemStatusUpdate, JobFilter, JobPage, JobStatusUpdate, JobStorage, JobStorageError, NewJobItem,
};
