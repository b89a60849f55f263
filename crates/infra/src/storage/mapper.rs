//! Row shapes and lossless conversions between the relational schema and
//! the domain model.
//!
//! `JobRow`/`JobItemRow` are the persisted shapes: their `FromRow` impls
//! are the query-side projection (columns are read straight into the row,
//! never materialized through the domain first). Conversions are total in
//! both directions; no field is dropped or silently defaulted.

use chrono::{DateTime, Utc};
use sqlx::Row;
use std::time::Duration;
use uuid::Uuid;

use jobtrack_core::{JobId, JobItemId, UserId};
use jobtrack_jobs::{Job, JobItem};

use super::r#trait::JobStorageError;

/// Persisted shape of the `jobs` table.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: Uuid,
    pub owner_id: Option<Uuid>,
    pub job_type: String,
    pub status: String,
    pub total_items: i32,
    pub completed_items: i32,
    pub failed_items: i32,
    pub input: serde_json::Value,
    pub estimated_duration_ms: Option<i64>,
    pub actual_duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Persisted shape of the `job_items` table.
#[derive(Debug, Clone, PartialEq)]
pub struct JobItemRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub item_index: i32,
    pub status: String,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for JobRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            job_type: row.try_get("job_type")?,
            status: row.try_get("status")?,
            total_items: row.try_get("total_items")?,
            completed_items: row.try_get("completed_items")?,
            failed_items: row.try_get("failed_items")?,
            input: row.try_get("input")?,
            estimated_duration_ms: row.try_get("estimated_duration_ms")?,
            actual_duration_ms: row.try_get("actual_duration_ms")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for JobItemRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobItemRow {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            item_index: row.try_get("item_index")?,
            status: row.try_get("status")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            error_message: row.try_get("error_message")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

fn duration_to_ms(duration: Duration) -> i64 {
    // Durations near i64::MAX ms are nonsensical estimates; clamp rather
    // than fail the write.
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn ms_to_duration(ms: i64, column: &str) -> Result<Duration, JobStorageError> {
    u64::try_from(ms)
        .map(Duration::from_millis)
        .map_err(|_| JobStorageError::Storage(format!("negative {column}: {ms}")))
}

fn count_from_column(value: i32, column: &str) -> Result<u32, JobStorageError> {
    u32::try_from(value)
        .map_err(|_| JobStorageError::Storage(format!("negative {column}: {value}")))
}

impl JobRow {
    /// Domain → entity.
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: (*job.id.as_uuid()),
            owner_id: job.owner.map(|o| *o.as_uuid()),
            job_type: job.job_type.clone(),
            status: job.status.as_str().to_string(),
            total_items: job.total_items as i32,
            completed_items: job.completed_items as i32,
            failed_items: job.failed_items as i32,
            input: job.input.clone(),
            estimated_duration_ms: job.estimated_duration.map(duration_to_ms),
            actual_duration_ms: job.actual_duration.map(duration_to_ms),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }

    /// Entity → domain, attaching pre-converted items.
    pub fn into_job(self, items: Vec<JobItem>) -> Result<Job, JobStorageError> {
        let status = self
            .status
            .parse()
            .map_err(|e| JobStorageError::Storage(format!("bad job status column: {e}")))?;
        Ok(Job {
            id: JobId::from_uuid(self.id),
            owner: self.owner_id.map(UserId::from_uuid),
            job_type: self.job_type,
            status,
            total_items: count_from_column(self.total_items, "total_items")?,
            completed_items: count_from_column(self.completed_items, "completed_items")?,
            failed_items: count_from_column(self.failed_items, "failed_items")?,
            input: self.input,
            estimated_duration: self
                .estimated_duration_ms
                .map(|ms| ms_to_duration(ms, "estimated_duration_ms"))
                .transpose()?,
            actual_duration: self
                .actual_duration_ms
                .map(|ms| ms_to_duration(ms, "actual_duration_ms"))
                .transpose()?,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            items,
        })
    }

    /// In-place refresh from the domain object for full-aggregate saves.
    /// Identity (`id`) and `created_at` are left untouched.
    pub fn update_from(&mut self, job: &Job) {
        self.owner_id = job.owner.map(|o| *o.as_uuid());
        self.job_type = job.job_type.clone();
        self.status = job.status.as_str().to_string();
        self.total_items = job.total_items as i32;
        self.completed_items = job.completed_items as i32;
        self.failed_items = job.failed_items as i32;
        self.input = job.input.clone();
        self.estimated_duration_ms = job.estimated_duration.map(duration_to_ms);
        self.actual_duration_ms = job.actual_duration.map(duration_to_ms);
        self.started_at = job.started_at;
        self.completed_at = job.completed_at;
    }
}

impl JobItemRow {
    /// Domain → entity.
    pub fn from_item(item: &JobItem) -> Self {
        Self {
            id: *item.id.as_uuid(),
            job_id: *item.job_id.as_uuid(),
            item_index: item.index as i32,
            status: item.status.as_str().to_string(),
            input: item.input.clone(),
            output: item.output.clone(),
            error_message: item.error.clone(),
            started_at: item.started_at,
            completed_at: item.completed_at,
        }
    }

    /// Entity → domain.
    pub fn into_item(self) -> Result<JobItem, JobStorageError> {
        let status = self
            .status
            .parse()
            .map_err(|e| JobStorageError::Storage(format!("bad item status column: {e}")))?;
        Ok(JobItem {
            id: JobItemId::from_uuid(self.id),
            job_id: JobId::from_uuid(self.job_id),
            index: u32::try_from(self.item_index).map_err(|_| {
                JobStorageError::Storage(format!("negative item_index: {}", self.item_index))
            })?,
            status,
            input: self.input,
            output: self.output,
            error: self.error_message,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }

    /// In-place refresh from the domain object. Identity fields (`id`,
    /// `job_id`, `item_index`) are left untouched.
    pub fn update_from(&mut self, item: &JobItem) {
        self.status = item.status.as_str().to_string();
        self.input = item.input.clone();
        self.output = item.output.clone();
        self.error_message = item.error.clone();
        self.started_at = item.started_at;
        self.completed_at = item.completed_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobtrack_jobs::JobItemStatus;
    use serde_json::json;

    fn sample_item(job_id: JobId) -> JobItem {
        let mut item = JobItem::new(job_id, 4, json!({"prompt": "goblin archer"}));
        item.status = JobItemStatus::Failed;
        item.output = Some(json!({"attempt": 1}));
        item.error = Some("rate limited".to_string());
        item.started_at = Some(Utc::now());
        item.completed_at = Some(Utc::now());
        item
    }

    #[test]
    fn job_round_trip_is_lossless() {
        let mut job = Job::new("bulk_asset_generation", json!({"style": "noir"}), 7)
            .with_owner(UserId::new())
            .with_estimated_duration(Duration::from_secs(600));
        job.status = "in_progress".parse().unwrap();
        job.completed_items = 2;
        job.failed_items = 1;
        job.started_at = Some(Utc::now());
        job.actual_duration = Some(Duration::from_millis(1234));

        let row = JobRow::from_job(&job);
        let back = row.into_job(Vec::new()).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn item_round_trip_is_lossless() {
        let item = sample_item(JobId::new());
        let back = JobItemRow::from_item(&item).into_item().unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn unknown_status_column_is_a_storage_error() {
        let mut row = JobItemRow::from_item(&sample_item(JobId::new()));
        row.status = "exploded".to_string();
        assert!(matches!(
            row.into_item(),
            Err(JobStorageError::Storage(_))
        ));
    }

    #[test]
    fn negative_index_is_a_storage_error() {
        let mut row = JobItemRow::from_item(&sample_item(JobId::new()));
        row.item_index = -1;
        assert!(matches!(
            row.into_item(),
            Err(JobStorageError::Storage(_))
        ));
    }

    #[test]
    fn update_from_keeps_row_identity() {
        let job_id = JobId::new();
        let original = sample_item(job_id);
        let mut row = JobItemRow::from_item(&original);

        let mut changed = original.clone();
        changed.reset_for_retry();
        row.update_from(&changed);

        assert_eq!(row.id, *original.id.as_uuid());
        assert_eq!(row.item_index, 4);
        assert_eq!(row.status, "pending");
        assert!(row.output.is_none());
        assert!(row.error_message.is_none());
    }

    #[test]
    fn job_update_from_refreshes_counters_and_status() {
        let job = Job::new("test", json!({}), 3);
        let mut row = JobRow::from_job(&job);

        let mut done = job.clone();
        done.status = "completed".parse().unwrap();
        done.completed_items = 3;
        done.completed_at = Some(Utc::now());
        done.actual_duration = Some(Duration::from_secs(5));
        row.update_from(&done);

        assert_eq!(row.status, "completed");
        assert_eq!(row.completed_items, 3);
        assert!(row.completed_at.is_some());
        assert_eq!(row.actual_duration_ms, Some(5000));
        assert_eq!(row.id, *job.id.as_uuid());
        assert_eq!(row.created_at, job.created_at);
    }
}
