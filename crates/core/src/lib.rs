//! `jobtrack-core` — foundation building blocks for the job tracking domain.
//!
//! Pure domain primitives only (no persistence or runtime concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, JobItemId, UserId};
