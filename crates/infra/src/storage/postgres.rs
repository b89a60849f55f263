//! Postgres-backed job storage.
//!
//! Each operation is a single round-trip or one transaction where the job
//! and item tables are touched together (bulk insert, counter recompute).
//! There is no retry or backpressure layer here; connectivity and
//! constraint failures surface to the caller as `JobStorageError::Storage`.
//!
//! ## Thread safety
//!
//! `PgJobStorage` is `Send + Sync`; the sqlx pool handles connection
//! management across tasks.

use std::sync::Arc;

use chrono::Utc;
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

use async_trait::async_trait;

use jobtrack_core::{JobId, JobItemId};
use jobtrack_jobs::{Job, JobItem, JobItemStatus};

use super::mapper::{JobItemRow, JobRow};
use super::r#trait::{
    ItemStatusUpdate, JobFilter, JobPage, JobStatusUpdate, JobStorage, JobStorageError, NewJobItem,
};

const PG_UNIQUE_VIOLATION: &str = "23505";

/// Postgres implementation of `JobStorage`.
///
/// Schema lives in `migrations/0001_jobs.sql`: a `jobs` table plus a
/// `job_items` table with `ON DELETE CASCADE` and a unique constraint on
/// `(job_id, item_index)`.
#[derive(Debug, Clone)]
pub struct PgJobStorage {
    pool: Arc<PgPool>,
}

impl PgJobStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Recompute the job's progress counters from item statuses.
    ///
    /// Run inside the same transaction as the item mutation so the
    /// counters and the items can never be observed out of sync.
    async fn recount_items(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        job_id: JobId,
    ) -> Result<(), JobStorageError> {
        sqlx::query(
            r#"
            UPDATE jobs SET
                completed_items = (SELECT COUNT(*) FROM job_items WHERE job_id = $1 AND status = 'completed'),
                failed_items = (SELECT COUNT(*) FROM job_items WHERE job_id = $1 AND status = 'failed')
            WHERE id = $1
            "#,
        )
        .bind(job_id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("recount_items", e))?;
        Ok(())
    }

    async fn job_exists(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        job_id: JobId,
    ) -> Result<bool, JobStorageError> {
        let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM jobs WHERE id = $1")
            .bind(job_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("job_exists", e))?;
        Ok(found.is_some())
    }

    async fn fetch_items(
        &self,
        job_id: JobId,
        status: Option<JobItemStatus>,
    ) -> Result<Vec<JobItem>, JobStorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, item_index, status, input, output, error_message,
                   started_at, completed_at
            FROM job_items
            WHERE job_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY item_index ASC
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_items", e))?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let item_row = JobItemRow::from_row(&row)
                .map_err(|e| JobStorageError::Storage(format!("bad item row: {e}")))?;
            items.push(item_row.into_item()?);
        }
        Ok(items)
    }
}

#[async_trait]
impl JobStorage for PgJobStorage {
    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type), err)]
    async fn create_job(&self, job: &Job) -> Result<JobId, JobStorageError> {
        let row = JobRow::from_job(job);
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, owner_id, job_type, status, total_items, completed_items,
                failed_items, input, estimated_duration_ms, actual_duration_ms,
                created_at, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(row.id)
        .bind(row.owner_id)
        .bind(&row.job_type)
        .bind(&row.status)
        .bind(row.total_items)
        .bind(row.completed_items)
        .bind(row.failed_items)
        .bind(&row.input)
        .bind(row.estimated_duration_ms)
        .bind(row.actual_duration_ms)
        .bind(row.created_at)
        .bind(row.started_at)
        .bind(row.completed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStorageError::AlreadyExists(job.id)
            } else {
                map_sqlx_error("create_job", e)
            }
        })?;

        Ok(job.id)
    }

    #[instrument(skip(self, items), fields(job_id = %job_id, item_count = items.len()), err)]
    async fn add_items(
        &self,
        job_id: JobId,
        items: &[NewJobItem],
    ) -> Result<(), JobStorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let total_items: Option<i32> =
            sqlx::query_scalar("SELECT total_items FROM jobs WHERE id = $1")
                .bind(job_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("add_items", e))?;
        let total_items = total_items.ok_or(JobStorageError::JobNotFound(job_id))? as u32;

        let mut seen = Vec::with_capacity(items.len());
        for new in items {
            if new.index >= total_items {
                return Err(JobStorageError::Validation(format!(
                    "item index {} out of range for job with {total_items} items",
                    new.index
                )));
            }
            if seen.contains(&new.index) {
                return Err(JobStorageError::Validation(format!(
                    "duplicate item index {}",
                    new.index
                )));
            }
            seen.push(new.index);
        }

        for new in items {
            let row = JobItemRow::from_item(&JobItem::new(job_id, new.index, new.input.clone()));
            sqlx::query(
                r#"
                INSERT INTO job_items (
                    id, job_id, item_index, status, input, output, error_message,
                    started_at, completed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(row.id)
            .bind(row.job_id)
            .bind(row.item_index)
            .bind(&row.status)
            .bind(&row.input)
            .bind(&row.output)
            .bind(&row.error_message)
            .bind(row.started_at)
            .bind(row.completed_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                // Collision with an index inserted by an earlier batch.
                if is_unique_violation(&e) {
                    JobStorageError::Validation(format!("duplicate item index {}", new.index))
                } else {
                    map_sqlx_error("add_items", e)
                }
            })?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, JobStorageError> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, job_type, status, total_items, completed_items,
                   failed_items, input, estimated_duration_ms, actual_duration_ms,
                   created_at, started_at, completed_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_job", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let job_row =
            JobRow::from_row(&row).map_err(|e| JobStorageError::Storage(format!("bad job row: {e}")))?;
        let items = self.fetch_items(job_id, None).await?;
        Ok(Some(job_row.into_job(items)?))
    }

    #[instrument(skip(self), fields(job_type = ?filter.job_type, skip = filter.skip, take = filter.take), err)]
    async fn list_jobs(&self, filter: JobFilter) -> Result<JobPage, JobStorageError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE ($1::text IS NULL OR job_type = $1)",
        )
        .bind(filter.job_type.as_deref())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs", e))?;

        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, job_type, status, total_items, completed_items,
                   failed_items, input, estimated_duration_ms, actual_duration_ms,
                   created_at, started_at, completed_at
            FROM jobs
            WHERE ($1::text IS NULL OR job_type = $1)
            ORDER BY created_at DESC, id DESC
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(filter.job_type.as_deref())
        .bind(filter.skip as i64)
        .bind(filter.take as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs", e))?;

        let mut page = Vec::with_capacity(rows.len());
        for row in rows {
            let job_row = JobRow::from_row(&row)
                .map_err(|e| JobStorageError::Storage(format!("bad job row: {e}")))?;
            // Listing never loads items.
            page.push(job_row.into_job(Vec::new())?);
        }

        Ok(JobPage {
            jobs: page,
            total: total as u64,
        })
    }

    #[instrument(skip(self), fields(job_id = %job_id, status = ?status), err)]
    async fn get_items(
        &self,
        job_id: JobId,
        status: Option<JobItemStatus>,
    ) -> Result<Vec<JobItem>, JobStorageError> {
        let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM jobs WHERE id = $1")
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_items", e))?;
        if found.is_none() {
            return Err(JobStorageError::JobNotFound(job_id));
        }
        self.fetch_items(job_id, status).await
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get_item_by_index(
        &self,
        job_id: JobId,
        index: u32,
    ) -> Result<Option<JobItem>, JobStorageError> {
        let row = sqlx::query(
            r#"
            SELECT id, job_id, item_index, status, input, output, error_message,
                   started_at, completed_at
            FROM job_items
            WHERE job_id = $1 AND item_index = $2
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(index as i32)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_item_by_index", e))?;

        row.map(|row| {
            JobItemRow::from_row(&row)
                .map_err(|e| JobStorageError::Storage(format!("bad item row: {e}")))?
                .into_item()
        })
        .transpose()
    }

    #[instrument(skip(self, update), fields(job_id = %job_id, status = %update.status), err)]
    async fn update_item_status(
        &self,
        job_id: JobId,
        index: u32,
        update: ItemStatusUpdate,
    ) -> Result<(), JobStorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        if !Self::job_exists(&mut tx, job_id).await? {
            return Err(JobStorageError::JobNotFound(job_id));
        }

        // COALESCE keeps stored values where the update leaves a field unset.
        let result = sqlx::query(
            r#"
            UPDATE job_items SET
                status = $3,
                output = COALESCE($4, output),
                error_message = COALESCE($5, error_message),
                started_at = COALESCE($6, started_at),
                completed_at = COALESCE($7, completed_at)
            WHERE job_id = $1 AND item_index = $2
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(index as i32)
        .bind(update.status.as_str())
        .bind(update.output)
        .bind(update.error)
        .bind(update.started_at)
        .bind(update.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_item_status", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStorageError::ItemNotFound { job_id, index });
        }

        Self::recount_items(&mut tx, job_id).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    #[instrument(skip(self, update), fields(job_id = %job_id, status = %update.status), err)]
    async fn update_job_status(
        &self,
        job_id: JobId,
        update: JobStatusUpdate,
    ) -> Result<(), JobStorageError> {
        let actual_duration_ms = update
            .actual_duration
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = $2,
                started_at = COALESCE($3, started_at),
                completed_at = COALESCE($4, completed_at),
                actual_duration_ms = COALESCE($5, actual_duration_ms)
            WHERE id = $1
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(update.status.as_str())
        .bind(update.started_at)
        .bind(update.completed_at)
        .bind(actual_duration_ms)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_job_status", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStorageError::JobNotFound(job_id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn cancel_items(&self, job_id: JobId) -> Result<u64, JobStorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        if !Self::job_exists(&mut tx, job_id).await? {
            return Err(JobStorageError::JobNotFound(job_id));
        }

        let result = sqlx::query(
            r#"
            UPDATE job_items SET status = 'canceled', completed_at = $2
            WHERE job_id = $1 AND status IN ('pending', 'in_progress')
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("cancel_items", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn retry_items(&self, job_id: JobId) -> Result<u64, JobStorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        if !Self::job_exists(&mut tx, job_id).await? {
            return Err(JobStorageError::JobNotFound(job_id));
        }

        let result = sqlx::query(
            r#"
            UPDATE job_items SET
                status = 'pending',
                output = NULL,
                error_message = NULL,
                started_at = NULL,
                completed_at = NULL
            WHERE job_id = $1 AND status IN ('failed', 'canceled')
            "#,
        )
        .bind(job_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("retry_items", e))?;

        Self::recount_items(&mut tx, job_id).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get_pending_items(&self, job_id: JobId) -> Result<Vec<JobItem>, JobStorageError> {
        self.get_items(job_id, Some(JobItemStatus::Pending)).await
    }

    #[instrument(skip(self, item_ids), fields(job_id = %job_id), err)]
    async fn get_failed_items(
        &self,
        job_id: JobId,
        item_ids: Option<&[JobItemId]>,
    ) -> Result<Vec<JobItem>, JobStorageError> {
        let ids: Option<Vec<Uuid>> =
            item_ids.map(|ids| ids.iter().map(|id| *id.as_uuid()).collect());

        let rows = sqlx::query(
            r#"
            SELECT id, job_id, item_index, status, input, output, error_message,
                   started_at, completed_at
            FROM job_items
            WHERE job_id = $1 AND status = 'failed'
              AND ($2::uuid[] IS NULL OR id = ANY($2))
            ORDER BY item_index ASC
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_failed_items", e))?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let item_row = JobItemRow::from_row(&row)
                .map_err(|e| JobStorageError::Storage(format!("bad item row: {e}")))?;
            items.push(item_row.into_item()?);
        }
        Ok(items)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn delete_job(&self, job_id: JobId) -> Result<(), JobStorageError> {
        // job_items go with it via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_job", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStorageError::JobNotFound(job_id));
        }
        Ok(())
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(PG_UNIQUE_VIOLATION)
    )
}

fn map_sqlx_error(operation: &str, error: sqlx::Error) -> JobStorageError {
    JobStorageError::Storage(format!("{operation}: {error}"))
}
