//! In-memory job storage for tests and development.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use jobtrack_core::{JobId, JobItemId};
use jobtrack_jobs::{Job, JobItem, JobItemStatus};

use super::r#trait::{
    ItemStatusUpdate, JobFilter, JobPage, JobStatusUpdate, JobStorage, JobStorageError, NewJobItem,
};

/// In-memory `JobStorage` backed by a `RwLock<HashMap>`.
///
/// Reference implementation of every storage contract; useful for unit
/// tests and local development without a database.
#[derive(Debug, Default)]
pub struct MemoryJobStorage {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn with_job<T>(
        &self,
        job_id: JobId,
        f: impl FnOnce(&mut Job) -> Result<T, JobStorageError>,
    ) -> Result<T, JobStorageError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(&job_id)
            .ok_or(JobStorageError::JobNotFound(job_id))?;
        f(job)
    }
}

#[async_trait]
impl JobStorage for MemoryJobStorage {
    async fn create_job(&self, job: &Job) -> Result<JobId, JobStorageError> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(JobStorageError::AlreadyExists(job.id));
        }
        // The job row only; items arrive through add_items.
        let mut stored = job.clone();
        stored.items.clear();
        let id = stored.id;
        jobs.insert(id, stored);
        Ok(id)
    }

    async fn add_items(
        &self,
        job_id: JobId,
        items: &[NewJobItem],
    ) -> Result<(), JobStorageError> {
        self.with_job(job_id, |job| {
            let mut seen: Vec<u32> = job.items.iter().map(|i| i.index).collect();
            for new in items {
                if new.index >= job.total_items {
                    return Err(JobStorageError::Validation(format!(
                        "item index {} out of range for job with {} items",
                        new.index, job.total_items
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
                job.items
                    .push(JobItem::new(job_id, new.index, new.input.clone()));
            }
            job.items.sort_by_key(|i| i.index);
            Ok(())
        })
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, JobStorageError> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs.get(&job_id).cloned())
    }

    async fn list_jobs(&self, filter: JobFilter) -> Result<JobPage, JobStorageError> {
        let jobs = self.jobs.read().unwrap();
        let mut matched: Vec<&Job> = jobs
            .values()
            .filter(|j| {
                filter
                    .job_type
                    .as_deref()
                    .is_none_or(|t| j.job_type == t)
            })
            .collect();
        let total = matched.len() as u64;

        // Newest first; id breaks created_at ties (UUIDv7 is time-ordered).
        matched.sort_by(|a, b| (b.created_at, b.id.as_uuid()).cmp(&(a.created_at, a.id.as_uuid())));

        let page = matched
            .into_iter()
            .skip(filter.skip as usize)
            .take(filter.take as usize)
            .map(|j| {
                let mut job = j.clone();
                job.items.clear();
                job
            })
            .collect();

        Ok(JobPage { jobs: page, total })
    }

    async fn get_items(
        &self,
        job_id: JobId,
        status: Option<JobItemStatus>,
    ) -> Result<Vec<JobItem>, JobStorageError> {
        let jobs = self.jobs.read().unwrap();
        let job = jobs
            .get(&job_id)
            .ok_or(JobStorageError::JobNotFound(job_id))?;
        Ok(job
            .items
            .iter()
            .filter(|i| status.is_none_or(|s| i.status == s))
            .cloned()
            .collect())
    }

    async fn get_item_by_index(
        &self,
        job_id: JobId,
        index: u32,
    ) -> Result<Option<JobItem>, JobStorageError> {
        let jobs = self.jobs.read().unwrap();
        let job = jobs
            .get(&job_id)
            .ok_or(JobStorageError::JobNotFound(job_id))?;
        Ok(job.items.iter().find(|i| i.index == index).cloned())
    }

    async fn update_item_status(
        &self,
        job_id: JobId,
        index: u32,
        update: ItemStatusUpdate,
    ) -> Result<(), JobStorageError> {
        self.with_job(job_id, |job| {
            let item = job
                .items
                .iter_mut()
                .find(|i| i.index == index)
                .ok_or(JobStorageError::ItemNotFound { job_id, index })?;

            item.status = update.status;
            if let Some(output) = update.output {
                item.output = Some(output);
            }
            if let Some(error) = update.error {
                item.error = Some(error);
            }
            if let Some(at) = update.started_at {
                item.started_at = Some(at);
            }
            if let Some(at) = update.completed_at {
                item.completed_at = Some(at);
            }

            job.recount_from_items();
            Ok(())
        })
    }

    async fn update_job_status(
        &self,
        job_id: JobId,
        update: JobStatusUpdate,
    ) -> Result<(), JobStorageError> {
        self.with_job(job_id, |job| {
            job.status = update.status;
            if let Some(at) = update.started_at {
                job.started_at = Some(at);
            }
            if let Some(at) = update.completed_at {
                job.completed_at = Some(at);
            }
            if let Some(duration) = update.actual_duration {
                job.actual_duration = Some(duration);
            }
            Ok(())
        })
    }

    async fn cancel_items(&self, job_id: JobId) -> Result<u64, JobStorageError> {
        let now = Utc::now();
        self.with_job(job_id, |job| {
            let mut touched = 0u64;
            for item in &mut job.items {
                if item.status.is_cancelable() {
                    item.cancel(now);
                    touched += 1;
                }
            }
            job.recount_from_items();
            Ok(touched)
        })
    }

    async fn retry_items(&self, job_id: JobId) -> Result<u64, JobStorageError> {
        self.with_job(job_id, |job| {
            let mut touched = 0u64;
            for item in &mut job.items {
                if item.status.is_retryable() {
                    item.reset_for_retry();
                    touched += 1;
                }
            }
            job.recount_from_items();
            Ok(touched)
        })
    }

    async fn get_pending_items(&self, job_id: JobId) -> Result<Vec<JobItem>, JobStorageError> {
        self.get_items(job_id, Some(JobItemStatus::Pending)).await
    }

    async fn get_failed_items(
        &self,
        job_id: JobId,
        item_ids: Option<&[JobItemId]>,
    ) -> Result<Vec<JobItem>, JobStorageError> {
        let jobs = self.jobs.read().unwrap();
        let job = jobs
            .get(&job_id)
            .ok_or(JobStorageError::JobNotFound(job_id))?;
        Ok(job
            .items
            .iter()
            .filter(|i| i.status == JobItemStatus::Failed)
            .filter(|i| item_ids.is_none_or(|ids| ids.contains(&i.id)))
            .cloned()
            .collect())
    }

    async fn delete_job(&self, job_id: JobId) -> Result<(), JobStorageError> {
        let mut jobs = self.jobs.write().unwrap();
        jobs.remove(&job_id)
            .map(|_| ())
            .ok_or(JobStorageError::JobNotFound(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded_job(storage: &MemoryJobStorage, total: u32) -> JobId {
        let job = Job::new("bulk_asset_generation", json!({"style": "fantasy"}), total);
        let job_id = storage.create_job(&job).await.unwrap();
        let items: Vec<NewJobItem> = (0..total)
            .map(|i| NewJobItem::new(i, json!({"slot": i})))
            .collect();
        storage.add_items(job_id, &items).await.unwrap();
        job_id
    }

    #[tokio::test]
    async fn create_persists_no_items() {
        let storage = MemoryJobStorage::new();
        let mut job = Job::new("test", json!({}), 2);
        job.items.push(JobItem::new(job.id, 0, json!({})));
        let job_id = storage.create_job(&job).await.unwrap();

        let loaded = storage.get_job(job_id).await.unwrap().unwrap();
        assert!(loaded.items.is_empty());
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let storage = MemoryJobStorage::new();
        let job = Job::new("test", json!({}), 0);
        storage.create_job(&job).await.unwrap();
        assert!(matches!(
            storage.create_job(&job).await,
            Err(JobStorageError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn items_come_back_ordered_by_index() {
        let storage = MemoryJobStorage::new();
        let job = Job::new("test", json!({}), 3);
        let job_id = storage.create_job(&job).await.unwrap();

        // Insert out of order; reads must still be index-ascending.
        let items = vec![
            NewJobItem::new(2, json!({})),
            NewJobItem::new(0, json!({})),
            NewJobItem::new(1, json!({})),
        ];
        storage.add_items(job_id, &items).await.unwrap();

        let loaded = storage.get_items(job_id, None).await.unwrap();
        let indices: Vec<u32> = loaded.iter().map(|i| i.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn add_items_rejects_out_of_range_index() {
        let storage = MemoryJobStorage::new();
        let job = Job::new("test", json!({}), 2);
        let job_id = storage.create_job(&job).await.unwrap();

        let err = storage
            .add_items(job_id, &[NewJobItem::new(2, json!({}))])
            .await
            .unwrap_err();
        assert!(matches!(err, JobStorageError::Validation(_)));
    }

    #[tokio::test]
    async fn add_items_rejects_colliding_index() {
        let storage = MemoryJobStorage::new();
        let job = Job::new("test", json!({}), 4);
        let job_id = storage.create_job(&job).await.unwrap();

        storage
            .add_items(job_id, &[NewJobItem::new(0, json!({}))])
            .await
            .unwrap();
        let err = storage
            .add_items(job_id, &[NewJobItem::new(0, json!({}))])
            .await
            .unwrap_err();
        assert!(matches!(err, JobStorageError::Validation(_)));
    }

    #[tokio::test]
    async fn status_only_update_preserves_payloads() {
        let storage = MemoryJobStorage::new();
        let job_id = seeded_job(&storage, 1).await;

        storage
            .update_item_status(
                job_id,
                0,
                ItemStatusUpdate::new(JobItemStatus::Completed)
                    .with_output(json!({"url": "https://cdn/img.png"}))
                    .with_error("transient glitch"),
            )
            .await
            .unwrap();

        // A later status-only update must not clobber output or error.
        storage
            .update_item_status(job_id, 0, ItemStatusUpdate::new(JobItemStatus::Failed))
            .await
            .unwrap();

        let item = storage.get_item_by_index(job_id, 0).await.unwrap().unwrap();
        assert_eq!(item.status, JobItemStatus::Failed);
        assert_eq!(item.output, Some(json!({"url": "https://cdn/img.png"})));
        assert_eq!(item.error, Some("transient glitch".to_string()));
    }

    #[tokio::test]
    async fn update_of_missing_item_is_an_error() {
        let storage = MemoryJobStorage::new();
        let job_id = seeded_job(&storage, 1).await;

        let err = storage
            .update_item_status(job_id, 9, ItemStatusUpdate::new(JobItemStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, JobStorageError::ItemNotFound { index: 9, .. }));
    }

    #[tokio::test]
    async fn counters_track_terminal_items() {
        let storage = MemoryJobStorage::new();
        let job_id = seeded_job(&storage, 3).await;

        storage
            .update_item_status(job_id, 0, ItemStatusUpdate::new(JobItemStatus::Completed))
            .await
            .unwrap();
        storage
            .update_item_status(job_id, 1, ItemStatusUpdate::new(JobItemStatus::Failed))
            .await
            .unwrap();

        let job = storage.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.completed_items, 1);
        assert_eq!(job.failed_items, 1);
        assert!(job.completed_items + job.failed_items <= job.total_items);
    }

    #[tokio::test]
    async fn retry_returns_failed_and_canceled_items_to_pending() {
        let storage = MemoryJobStorage::new();
        let job_id = seeded_job(&storage, 3).await;

        storage
            .update_item_status(
                job_id,
                1,
                ItemStatusUpdate::new(JobItemStatus::Failed)
                    .with_error("provider timeout")
                    .with_started_at(Utc::now())
                    .with_completed_at(Utc::now()),
            )
            .await
            .unwrap();
        storage
            .update_item_status(job_id, 2, ItemStatusUpdate::new(JobItemStatus::Completed))
            .await
            .unwrap();
        storage.cancel_items(job_id).await.unwrap(); // cancels item 0

        let touched = storage.retry_items(job_id).await.unwrap();
        assert_eq!(touched, 2); // the failed and the canceled item

        let pending = storage.get_pending_items(job_id).await.unwrap();
        let indices: Vec<u32> = pending.iter().map(|i| i.index).collect();
        assert_eq!(indices, vec![0, 1]);
        for item in &pending {
            assert!(item.error.is_none());
            assert!(item.output.is_none());
            assert!(item.started_at.is_none());
            assert!(item.completed_at.is_none());
        }

        // Failed counter dropped back to zero after the retry.
        let job = storage.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.failed_items, 0);
        assert_eq!(job.completed_items, 1);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let storage = MemoryJobStorage::new();
        let job_id = seeded_job(&storage, 3).await;

        storage
            .update_item_status(job_id, 0, ItemStatusUpdate::new(JobItemStatus::Completed))
            .await
            .unwrap();

        let first = storage.cancel_items(job_id).await.unwrap();
        assert_eq!(first, 2);
        let snapshot = storage.get_items(job_id, None).await.unwrap();

        let second = storage.cancel_items(job_id).await.unwrap();
        assert_eq!(second, 0);
        assert_eq!(storage.get_items(job_id, None).await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn canceled_items_are_stamped() {
        let storage = MemoryJobStorage::new();
        let job_id = seeded_job(&storage, 1).await;

        storage.cancel_items(job_id).await.unwrap();

        let item = storage.get_item_by_index(job_id, 0).await.unwrap().unwrap();
        assert_eq!(item.status, JobItemStatus::Canceled);
        assert!(item.completed_at.is_some());
    }

    #[tokio::test]
    async fn failed_items_can_be_filtered_by_id() {
        let storage = MemoryJobStorage::new();
        let job_id = seeded_job(&storage, 3).await;

        for index in [0, 2] {
            storage
                .update_item_status(job_id, index, ItemStatusUpdate::new(JobItemStatus::Failed))
                .await
                .unwrap();
        }

        let item_2 = storage.get_item_by_index(job_id, 2).await.unwrap().unwrap();
        let filtered = storage
            .get_failed_items(job_id, Some(&[item_2.id]))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].index, 2);

        let all = storage.get_failed_items(job_id, None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_excludes_items() {
        let storage = MemoryJobStorage::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            let job_type = if i == 1 { "map_generation" } else { "bulk_asset_generation" };
            let job = Job::new(job_type, json!({}), 1);
            let job_id = storage.create_job(&job).await.unwrap();
            storage
                .add_items(job_id, &[NewJobItem::new(0, json!({}))])
                .await
                .unwrap();
            ids.push(job_id);
        }

        let page = storage.list_jobs(JobFilter::default()).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.jobs[0].id, ids[2]);
        assert!(page.jobs.iter().all(|j| j.items.is_empty()));

        let filtered = storage
            .list_jobs(JobFilter::default().with_job_type("map_generation"))
            .await
            .unwrap();
        assert_eq!(filtered.total, 1);
        assert_eq!(filtered.jobs[0].id, ids[1]);

        let paged = storage.list_jobs(JobFilter::page(1, 1)).await.unwrap();
        assert_eq!(paged.total, 3);
        assert_eq!(paged.jobs.len(), 1);
        assert_eq!(paged.jobs[0].id, ids[1]);
    }

    #[tokio::test]
    async fn job_status_update_is_partial() {
        let storage = MemoryJobStorage::new();
        let job_id = seeded_job(&storage, 1).await;
        let started = Utc::now();

        storage
            .update_job_status(
                job_id,
                JobStatusUpdate::new(jobtrack_jobs::JobStatus::InProgress)
                    .with_started_at(started),
            )
            .await
            .unwrap();
        storage
            .update_job_status(
                job_id,
                JobStatusUpdate::new(jobtrack_jobs::JobStatus::Completed)
                    .with_completed_at(Utc::now())
                    .with_actual_duration(std::time::Duration::from_secs(42)),
            )
            .await
            .unwrap();

        let job = storage.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, jobtrack_jobs::JobStatus::Completed);
        assert_eq!(job.started_at, Some(started)); // untouched by second update
        assert!(job.completed_at.is_some());
        assert_eq!(job.actual_duration, Some(std::time::Duration::from_secs(42)));
    }

    #[tokio::test]
    async fn delete_removes_job_and_items() {
        let storage = MemoryJobStorage::new();
        let job_id = seeded_job(&storage, 2).await;

        storage.delete_job(job_id).await.unwrap();
        assert!(storage.get_job(job_id).await.unwrap().is_none());
        assert!(matches!(
            storage.delete_job(job_id).await,
            Err(JobStorageError::JobNotFound(_))
        ));
    }
}
