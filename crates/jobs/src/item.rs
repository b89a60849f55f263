//! A single unit of work within a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobtrack_core::{JobId, JobItemId};

use crate::status::JobItemStatus;

/// One unit of work within a `Job`.
///
/// Items are created in bulk right after their job and mutated in place as
/// work proceeds. They are never deleted individually; only the whole job
/// is deleted (cascading in storage).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobItem {
    /// Unique item ID
    pub id: JobItemId,
    /// Owning job
    pub job_id: JobId,
    /// Zero-based position within the job; stable ordering key
    pub index: u32,
    /// Current status
    pub status: JobItemStatus,
    /// Opaque input payload (format is the producer's concern)
    pub input: serde_json::Value,
    /// Opaque output payload, set on completion
    pub output: Option<serde_json::Value>,
    /// Error message, set on failure
    pub error: Option<String>,
    /// When an executor picked the item up
    pub started_at: Option<DateTime<Utc>>,
    /// When the item reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobItem {
    /// Create a pending item at the given position.
    pub fn new(job_id: JobId, index: u32, input: serde_json::Value) -> Self {
        Self {
            id: JobItemId::new(),
            job_id,
            index,
            status: JobItemStatus::Pending,
            input,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Mark the item canceled, stamping completion time.
    ///
    /// Callers are expected to check `status.is_cancelable()` first; the
    /// cancel sweep in storage only touches Pending/InProgress items.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = JobItemStatus::Canceled;
        self.completed_at = Some(now);
    }

    /// Move the item back to Pending for a retry.
    ///
    /// Clears output, error, and both timestamps. This is the sole
    /// backwards transition in the item lifecycle.
    pub fn reset_for_retry(&mut self) {
        self.status = JobItemStatus::Pending;
        self.output = None;
        self.error = None;
        self.started_at = None;
        self.completed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_item_starts_pending_and_empty() {
        let item = JobItem::new(JobId::new(), 3, json!({"prompt": "a dragon"}));
        assert_eq!(item.status, JobItemStatus::Pending);
        assert_eq!(item.index, 3);
        assert!(item.output.is_none());
        assert!(item.error.is_none());
        assert!(item.started_at.is_none());
        assert!(item.completed_at.is_none());
    }

    #[test]
    fn cancel_stamps_completion_time() {
        let mut item = JobItem::new(JobId::new(), 0, json!({}));
        let now = Utc::now();
        item.cancel(now);
        assert_eq!(item.status, JobItemStatus::Canceled);
        assert_eq!(item.completed_at, Some(now));
    }

    #[test]
    fn retry_reset_clears_all_execution_state() {
        let mut item = JobItem::new(JobId::new(), 0, json!({"n": 1}));
        item.status = JobItemStatus::Failed;
        item.output = Some(json!({"partial": true}));
        item.error = Some("provider timeout".to_string());
        item.started_at = Some(Utc::now());
        item.completed_at = Some(Utc::now());

        item.reset_for_retry();

        assert_eq!(item.status, JobItemStatus::Pending);
        assert!(item.output.is_none());
        assert!(item.error.is_none());
        assert!(item.started_at.is_none());
        assert!(item.completed_at.is_none());
        // Input is preserved; the retry reruns the same work.
        assert_eq!(item.input, json!({"n": 1}));
    }
}
