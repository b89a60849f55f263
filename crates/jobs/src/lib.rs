//! Bulk background-work tracking model.
//!
//! ## Design
//!
//! - A `Job` is one batch of asynchronous work (e.g. bulk asset generation)
//! - It exclusively owns an ordered collection of `JobItem`s
//! - Each item progresses through its own status lifecycle independently
//! - Progress counters live on the job; `total_items` is fixed at creation
//! - Execution is external: this crate models state, it does not run work
//!
//! ## Components
//!
//! - `Job`: aggregate root with counters, payload, and duration estimates
//! - `JobItem`: one unit of work with input/output payloads and timestamps
//! - `JobStatus` / `JobItemStatus`: the two status lifecycles

pub mod item;
pub mod job;
pub mod status;

pub use item::JobItem;
pub use job::Job;
pub use status::{JobItemStatus, JobStatus};
