use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Process-unique, monotonically assigned job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a job.
///
/// Statuses only move forward along
/// `queued → dispatched → downloading → downloaded → uploading → completed`
/// (steps may be skipped), and `failed` is reachable from every
/// non-terminal status. `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Dispatched,
    Downloading,
    Downloaded,
    Uploading,
    Completed,
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Dispatched => 1,
            JobStatus::Downloading => 2,
            JobStatus::Downloaded => 3,
            JobStatus::Uploading => 4,
            JobStatus::Completed => 5,
            JobStatus::Failed => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == JobStatus::Failed || next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Dispatched => "dispatched",
            JobStatus::Downloading => "downloading",
            JobStatus::Downloaded => "downloaded",
            JobStatus::Uploading => "uploading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work: one submitted URL. Owned by exactly one stage at a time.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Move to `next`.
    ///
    /// # Panics
    ///
    /// On a transition the state machine does not allow; stages only ever
    /// request legal ones.
    pub fn transition(&mut self, next: JobStatus) {
        assert!(
            self.status.can_transition_to(next),
            "illegal status transition {} -> {} for job {}",
            self.status,
            next,
            self.id
        );
        debug!(job_id = %self.id, from = %self.status, to = %next, "Job status changed");

        let now = Utc::now();
        if next == JobStatus::Downloading {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
    }

    pub fn fail(&mut self) {
        self.transition(JobStatus::Failed);
    }

    /// Time from submission to reaching a terminal status.
    pub fn turnaround(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.created_at)
    }
}
