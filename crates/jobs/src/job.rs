//! The job aggregate.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobtrack_core::{JobId, UserId};

use crate::item::JobItem;
use crate::status::{JobItemStatus, JobStatus};

/// One batch of asynchronous work.
///
/// A job exclusively owns its items: they are created through the job,
/// ordered by `JobItem::index`, and deleted only with the job. Progress
/// counters are derived from item statuses; `total_items` is fixed at
/// creation and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Owning user, if any
    pub owner: Option<UserId>,
    /// Work-type tag used for routing and filtering (e.g. "bulk_asset_generation")
    pub job_type: String,
    /// Overall status, driven by the external executor
    pub status: JobStatus,
    /// Number of items this job was created for; fixed at creation
    pub total_items: u32,
    /// Items that reached Completed
    pub completed_items: u32,
    /// Items that reached Failed
    pub failed_items: u32,
    /// Opaque input payload for the whole batch
    pub input: serde_json::Value,
    /// Caller-supplied duration estimate
    pub estimated_duration: Option<Duration>,
    /// Measured duration, set on completion
    pub actual_duration: Option<Duration>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the first item started
    pub started_at: Option<DateTime<Utc>>,
    /// When all items reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// Owned items, ordered by index (empty in listing projections)
    pub items: Vec<JobItem>,
}

impl Job {
    /// Create a new pending job with a fixed item count.
    pub fn new(job_type: impl Into<String>, input: serde_json::Value, total_items: u32) -> Self {
        Self {
            id: JobId::new(),
            owner: None,
            job_type: job_type.into(),
            status: JobStatus::Pending,
            total_items,
            completed_items: 0,
            failed_items: 0,
            input,
            estimated_duration: None,
            actual_duration: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            items: Vec::new(),
        }
    }

    /// Attach an owning user.
    pub fn with_owner(mut self, owner: UserId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Attach a duration estimate.
    pub fn with_estimated_duration(mut self, estimate: Duration) -> Self {
        self.estimated_duration = Some(estimate);
        self
    }

    /// Recompute `completed_items`/`failed_items` from the attached items.
    ///
    /// Counters are always derived, never incremented blindly, so they stay
    /// correct across retries that move items back out of terminal states.
    pub fn recount_from_items(&mut self) {
        let mut completed = 0u32;
        let mut failed = 0u32;
        for item in &self.items {
            match item.status {
                JobItemStatus::Completed => completed += 1,
                JobItemStatus::Failed => failed += 1,
                _ => {}
            }
        }
        self.completed_items = completed;
        self.failed_items = failed;
        debug_assert!(self.completed_items + self.failed_items <= self.total_items);
    }

    /// Items in a terminal state (Completed, Failed, or Canceled).
    pub fn terminal_items(&self) -> usize {
        self.items.iter().filter(|i| i.status.is_terminal()).count()
    }

    /// Fraction of items that finished (successfully or not), in `[0, 1]`.
    ///
    /// A zero-item job reports 1.0: there is nothing left to do.
    pub fn progress(&self) -> f64 {
        if self.total_items == 0 {
            return 1.0;
        }
        f64::from(self.completed_items + self.failed_items) / f64::from(self.total_items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn terminal_status() -> impl Strategy<Value = JobItemStatus> {
        prop_oneof![
            Just(JobItemStatus::Completed),
            Just(JobItemStatus::Failed),
            Just(JobItemStatus::Canceled),
        ]
    }

    #[test]
    fn new_job_has_zeroed_counters() {
        let job = Job::new("bulk_asset_generation", json!({"count": 3}), 3);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_items, 3);
        assert_eq!(job.completed_items, 0);
        assert_eq!(job.failed_items, 0);
        assert!(job.items.is_empty());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn builder_methods_attach_owner_and_estimate() {
        let owner = UserId::new();
        let job = Job::new("bulk_asset_generation", json!({}), 1)
            .with_owner(owner)
            .with_estimated_duration(Duration::from_secs(90));
        assert_eq!(job.owner, Some(owner));
        assert_eq!(job.estimated_duration, Some(Duration::from_secs(90)));
    }

    #[test]
    fn recount_reflects_item_statuses() {
        let mut job = Job::new("test", json!({}), 3);
        for index in 0..3 {
            job.items.push(JobItem::new(job.id, index, json!({})));
        }
        job.items[0].status = JobItemStatus::Completed;
        job.items[1].status = JobItemStatus::Failed;

        job.recount_from_items();
        assert_eq!(job.completed_items, 1);
        assert_eq!(job.failed_items, 1);
        assert_eq!(job.terminal_items(), 2);
    }

    #[test]
    fn retry_then_recount_shrinks_counters() {
        let mut job = Job::new("test", json!({}), 2);
        for index in 0..2 {
            job.items.push(JobItem::new(job.id, index, json!({})));
        }
        job.items[0].status = JobItemStatus::Failed;
        job.items[1].status = JobItemStatus::Completed;
        job.recount_from_items();
        assert_eq!(job.failed_items, 1);

        job.items[0].reset_for_retry();
        job.recount_from_items();
        assert_eq!(job.failed_items, 0);
        assert_eq!(job.completed_items, 1);
    }

    #[test]
    fn progress_of_empty_job_is_done() {
        let job = Job::new("test", json!({}), 0);
        assert_eq!(job.progress(), 1.0);
    }

    proptest! {
        // Counters never exceed total_items for any mix of item outcomes.
        #[test]
        fn counters_bounded_by_total(statuses in prop::collection::vec(terminal_status(), 0..32)) {
            let total = statuses.len() as u32;
            let mut job = Job::new("test", json!({}), total);
            for (index, status) in statuses.into_iter().enumerate() {
                let mut item = JobItem::new(job.id, index as u32, json!({}));
                item.status = status;
                job.items.push(item);
            }
            job.recount_from_items();
            prop_assert!(job.completed_items + job.failed_items <= job.total_items);
            prop_assert!(job.progress() <= 1.0);
        }
    }
}
