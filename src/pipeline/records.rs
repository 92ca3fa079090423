use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use super::error::JobError;
use super::job::{Job, JobId, JobStatus};
use super::target::JobTarget;

/// Dispatch → Download
#[derive(Debug)]
pub struct DispatchedJob {
    pub job: Job,
    pub target: JobTarget,
}

/// Files produced by a successful download.
#[derive(Debug, Clone)]
pub struct DownloadedMedia {
    pub media_file: PathBuf,
    pub thumbnail: Option<PathBuf>,
    /// The merged file was already on disk from an earlier run
    pub reused: bool,
}

/// Download → Upload. Always produced, successful or not.
#[derive(Debug)]
pub struct DownloadResult {
    pub job: Job,
    pub target: JobTarget,
    pub result: Result<DownloadedMedia, JobError>,
}

/// Work for the remote branch of the upload stage.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub media: DownloadedMedia,
    pub destination: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The dedup store already lists the target
    AlreadyProcessed,
    /// Another job in this process is working on the same target
    InProgress,
}

/// How a job completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Skipped(SkipReason),
    Kept { media_file: PathBuf },
    Distributed { parts: usize },
}

impl Completion {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Completion::Skipped(_))
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Skipped(SkipReason::AlreadyProcessed) => f.write_str("skipped (already processed)"),
            Completion::Skipped(SkipReason::InProgress) => f.write_str("skipped (already in progress)"),
            Completion::Kept { media_file } => write!(f, "saved to {}", media_file.display()),
            Completion::Distributed { parts } => write!(f, "distributed in {parts} part(s)"),
        }
    }
}

/// Terminal record consumed by the result stage, from Upload or directly
/// from Dispatch.
#[derive(Debug)]
pub struct JobOutcome {
    pub job: Job,
    pub target: Option<JobTarget>,
    pub result: Result<Completion, JobError>,
}

impl JobOutcome {
    /// Whether this job holds an in-flight claim on its target. Jobs
    /// finished at dispatch (invalid URL or skipped) never took one.
    pub fn holds_claim(&self) -> bool {
        self.target.is_some() && !matches!(self.result, Ok(Completion::Skipped(_)))
    }
}

/// Summary of a finished job, broadcast to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub url: String,
    pub status: JobStatus,
    pub skipped: Option<SkipReason>,
    pub error_kind: Option<&'static str>,
    pub error: Option<String>,
}

impl JobReport {
    pub fn new(job: &Job, result: &Result<Completion, JobError>) -> Self {
        let (skipped, error_kind, error) = match result {
            Ok(Completion::Skipped(reason)) => (Some(*reason), None, None),
            Ok(_) => (None, None, None),
            Err(e) => (None, Some(e.kind()), Some(e.to_string())),
        };
        Self {
            job_id: job.id,
            url: job.url.clone(),
            status: job.status(),
            skipped,
            error_kind,
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}
