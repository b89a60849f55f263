use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use jobtrack_core::{JobId, JobItemId};
use jobtrack_jobs::{Job, JobItem, JobItemStatus, JobStatus};

/// Input for one item in a bulk insert.
///
/// Items carry their explicit zero-based `index`; the index is the stable
/// ordering key within the job and must be unique in `[0, total_items)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJobItem {
    pub index: u32,
    pub input: serde_json::Value,
}

impl NewJobItem {
    pub fn new(index: u32, input: serde_json::Value) -> Self {
        Self { index, input }
    }
}

/// Partial update applied to a single item.
///
/// `status` is always written; the optional fields only overwrite when
/// `Some`. An absent field means "leave the stored value alone", which lets
/// an executor report a status change without clobbering payloads written
/// earlier.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemStatusUpdate {
    pub status: JobItemStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ItemStatusUpdate {
    /// Update that only changes the status.
    pub fn new(status: JobItemStatus) -> Self {
        Self {
            status,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }
}

/// Partial update applied to the job row itself.
///
/// Job-level transitions are driven by the external executor; storage only
/// records them.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatusUpdate {
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub actual_duration: Option<Duration>,
}

impl JobStatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            started_at: None,
            completed_at: None,
            actual_duration: None,
        }
    }

    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn with_actual_duration(mut self, duration: Duration) -> Self {
        self.actual_duration = Some(duration);
        self
    }
}

/// Listing filter: optional work-type plus offset pagination.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFilter {
    pub job_type: Option<String>,
    pub skip: u64,
    pub take: u64,
}

impl JobFilter {
    pub fn page(skip: u64, take: u64) -> Self {
        Self {
            job_type: None,
            skip,
            take,
        }
    }

    pub fn with_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::page(0, 50)
    }
}

/// One page of a job listing.
///
/// Jobs in a page carry counters but NO items (list views never need them,
/// and loading them would over-fetch).
#[derive(Debug, Clone, PartialEq)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: u64,
}

/// Job storage operation error.
#[derive(Debug, Clone, Error)]
pub enum JobStorageError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    #[error("job item not found: job {job_id}, index {index}")]
    ItemNotFound { job_id: JobId, index: u32 },
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Sole gateway between the job aggregate and persistent storage.
///
/// ## Item state machine
///
/// ```text
/// Pending -> InProgress -> { Completed | Failed }
/// { Pending, InProgress } -> Canceled      (cancel_items only)
/// { Failed, Canceled } -> Pending          (retry_items only)
/// ```
///
/// `update_item_status` does not police transition legality beyond the
/// cancel/retry sweeps above; the executor owns the lifecycle and storage
/// records it. There is no optimistic concurrency token on items: two
/// executors racing on the same item is last-write-wins.
///
/// ## Ordering
///
/// Whenever items are returned as a collection they are ordered by `index`
/// ascending. Job listings are ordered by creation time descending. No
/// ordering guarantee exists across different jobs' items.
///
/// ## Counters
///
/// Implementations recompute `completed_items`/`failed_items` from item
/// statuses after every item mutation, so the invariant
/// `completed_items + failed_items <= total_items` holds under any call
/// sequence, including retries that move items back out of terminal states.
#[async_trait]
pub trait JobStorage: Send + Sync {
    /// Persist a new job row. Creates no items.
    async fn create_job(&self, job: &Job) -> Result<JobId, JobStorageError>;

    /// Bulk-insert items for an existing job.
    ///
    /// Indices must be unique (within the batch and against existing items)
    /// and fall in `[0, total_items)`; violations return `Validation`.
    async fn add_items(&self, job_id: JobId, items: &[NewJobItem])
        -> Result<(), JobStorageError>;

    /// Load the full aggregate: job plus all items ordered by index.
    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, JobStorageError>;

    /// Paginated listing, newest first, optionally filtered by work-type.
    /// Items are not loaded.
    async fn list_jobs(&self, filter: JobFilter) -> Result<JobPage, JobStorageError>;

    /// Items of a job, optionally filtered by status, ordered by index.
    async fn get_items(
        &self,
        job_id: JobId,
        status: Option<JobItemStatus>,
    ) -> Result<Vec<JobItem>, JobStorageError>;

    /// Point lookup of one item by its position.
    async fn get_item_by_index(
        &self,
        job_id: JobId,
        index: u32,
    ) -> Result<Option<JobItem>, JobStorageError>;

    /// Partial update of one item; recomputes the parent job's counters.
    ///
    /// Returns `ItemNotFound` if the item does not exist.
    async fn update_item_status(
        &self,
        job_id: JobId,
        index: u32,
        update: ItemStatusUpdate,
    ) -> Result<(), JobStorageError>;

    /// Partial update of the job row (status, timestamps, measured duration).
    async fn update_job_status(
        &self,
        job_id: JobId,
        update: JobStatusUpdate,
    ) -> Result<(), JobStorageError>;

    /// Transition all Pending/InProgress items to Canceled, stamping
    /// completion time. Idempotent; returns the number of items touched.
    async fn cancel_items(&self, job_id: JobId) -> Result<u64, JobStorageError>;

    /// Transition all Failed/Canceled items back to Pending, clearing
    /// output, error, and timestamps. The sole backwards transition.
    /// Returns the number of items touched.
    async fn retry_items(&self, job_id: JobId) -> Result<u64, JobStorageError>;

    /// Pending items ordered by index; the work queue for an external
    /// executor.
    async fn get_pending_items(&self, job_id: JobId) -> Result<Vec<JobItem>, JobStorageError>;

    /// Failed items, optionally restricted to an id subset (selective retry
    /// tooling).
    async fn get_failed_items(
        &self,
        job_id: JobId,
        item_ids: Option<&[JobItemId]>,
    ) -> Result<Vec<JobItem>, JobStorageError>;

    /// Delete a job and, with it, all of its items.
    async fn delete_job(&self, job_id: JobId) -> Result<(), JobStorageError>;
}

#[async_trait]
impl<S> JobStorage for Arc<S>
where
    S: JobStorage + ?Sized,
{
    async fn create_job(&self, job: &Job) -> Result<JobId, JobStorageError> {
        (**self).create_job(job).await
    }

    async fn add_items(
        &self,
        job_id: JobId,
        items: &[NewJobItem],
    ) -> Result<(), JobStorageError> {
        (**self).add_items(job_id, items).await
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, JobStorageError> {
        (**self).get_job(job_id).await
    }

    async fn list_jobs(&self, filter: JobFilter) -> Result<JobPage, JobStorageError> {
        (**self).list_jobs(filter).await
    }

    async fn get_items(
        &self,
        job_id: JobId,
        status: Option<JobItemStatus>,
    ) -> Result<Vec<JobItem>, JobStorageError> {
        (**self).get_items(job_id, status).await
    }

    async fn get_item_by_index(
        &self,
        job_id: JobId,
        index: u32,
    ) -> Result<Option<JobItem>, JobStorageError> {
        (**self).get_item_by_index(job_id, index).await
    }

    async fn update_item_status(
        &self,
        job_id: JobId,
        index: u32,
        update: ItemStatusUpdate,
    ) -> Result<(), JobStorageError> {
        (**self).update_item_status(job_id, index, update).await
    }

    async fn update_job_status(
        &self,
        job_id: JobId,
        update: JobStatusUpdate,
    ) -> Result<(), JobStorageError> {
        (**self).update_job_status(job_id, update).await
    }

    async fn cancel_items(&self, job_id: JobId) -> Result<u64, JobStorageError> {
        (**self).cancel_items(job_id).await
    }

    async fn retry_items(&self, job_id: JobId) -> Result<u64, JobStorageError> {
        (**self).retry_items(job_id).await
    }

    async fn get_pending_items(&self, job_id: JobId) -> Result<Vec<JobItem>, JobStorageError> {
        (**self).get_pending_items(job_id).await
    }

    async fn get_failed_items(
        &self,
        job_id: JobId,
        item_ids: Option<&[JobItemId]>,
    ) -> Result<Vec<JobItem>, JobStorageError> {
        (**self).get_failed_items(job_id, item_ids).await
    }

    async fn delete_job(&self, job_id: JobId) -> Result<(), JobStorageError> {
        (**self).delete_job(job_id).await
    }
}
