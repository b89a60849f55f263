//! Status lifecycles for jobs and their items.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use jobtrack_core::DomainError;

/// Overall status of a job.
///
/// Transitions are driven by whatever executes the items; this crate only
/// records them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, no item picked up yet
    Pending,
    /// At least one item has started
    InProgress,
    /// All items finished successfully
    Completed,
    /// Finished with at least one failed item
    Failed,
    /// Canceled before all items finished
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "canceled" => Ok(JobStatus::Canceled),
            other => Err(DomainError::validation(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// Status of a single work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobItemStatus {
    /// Waiting to be picked up by an executor
    Pending,
    /// Currently being executed
    InProgress,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Canceled before completion
    Canceled,
}

impl JobItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobItemStatus::Pending => "pending",
            JobItemStatus::InProgress => "in_progress",
            JobItemStatus::Completed => "completed",
            JobItemStatus::Failed => "failed",
            JobItemStatus::Canceled => "canceled",
        }
    }

    /// Completed, Failed, or Canceled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobItemStatus::Completed | JobItemStatus::Failed | JobItemStatus::Canceled
        )
    }

    /// States a retry may move back to Pending.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobItemStatus::Failed | JobItemStatus::Canceled)
    }

    /// States a cancel sweep transitions to Canceled.
    pub fn is_cancelable(&self) -> bool {
        matches!(self, JobItemStatus::Pending | JobItemStatus::InProgress)
    }
}

impl fmt::Display for JobItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobItemStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobItemStatus::Pending),
            "in_progress" => Ok(JobItemStatus::InProgress),
            "completed" => Ok(JobItemStatus::Completed),
            "failed" => Ok(JobItemStatus::Failed),
            "canceled" => Ok(JobItemStatus::Canceled),
            other => Err(DomainError::validation(format!(
                "unknown job item status: {other}"
            ))),
        }
    }
}
