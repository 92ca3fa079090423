//! Upload stage: finish locally, or split and distribute.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::download::cancellable;
use super::error::JobError;
use super::job::{Job, JobStatus};
use super::records::{Completion, DownloadResult, DownloadedMedia, JobOutcome, UploadTask};
use super::target::JobTarget;
use super::{RemoteTarget, Shared};
use crate::queue::{StageReceiver, StageSender};
use crate::transport::UploadRequest;

pub(super) async fn run(
    worker_id: usize,
    shared: Arc<Shared>,
    inbox: StageReceiver<DownloadResult>,
    results: StageSender<JobOutcome>,
) {
    while let Some(DownloadResult { mut job, target, result }) = inbox.recv().await {
        // download errors pass straight through
        let result = match result {
            Ok(media) => finish(&shared, &mut job, &target, media).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => job.transition(JobStatus::Completed),
            Err(_) if !job.status().is_terminal() => job.fail(),
            Err(_) => {}
        }

        let outcome = JobOutcome {
            job,
            target: Some(target),
            result,
        };
        if let Err(e) = results.send(outcome).await {
            error!(worker_id, error = %e, "Upload worker lost its downstream queue");
            break;
        }
    }
    debug!(worker_id, "Upload worker finished");
}

async fn finish(
    shared: &Shared,
    job: &mut Job,
    target: &JobTarget,
    media: DownloadedMedia,
) -> Result<Completion, JobError> {
    let Some(remote) = &shared.remote else {
        record_processed(shared, job, target).await;
        return Ok(Completion::Kept {
            media_file: media.media_file,
        });
    };

    job.transition(JobStatus::Uploading);
    let _active = shared.stats.upload_started();

    let task = UploadTask {
        media,
        destination: remote.destination.clone(),
    };
    let parts = distribute(shared, remote, job, target, &task).await?;

    record_processed(shared, job, target).await;
    remove_artifacts(job, &target.output_dir).await;
    Ok(Completion::Distributed { parts })
}

/// Split, then upload each part in order. The first failed part aborts the
/// rest; parts already written stay on disk.
async fn distribute(
    shared: &Shared,
    remote: &RemoteTarget,
    job: &Job,
    target: &JobTarget,
    task: &UploadTask,
) -> Result<usize, JobError> {
    let cancel = &shared.cancel;
    let parts = cancellable(
        cancel,
        shared
            .collaborators
            .splitter
            .split(&task.media.media_file, shared.split_threshold),
    )
    .await?
    .map_err(JobError::Split)?;

    let count = parts.len();
    for (i, part) in parts.iter().enumerate() {
        let request = UploadRequest {
            file: part.clone(),
            destination: task.destination.clone(),
            caption: caption(&target.name, i + 1, count),
            thumbnail: task.media.thumbnail.clone(),
        };

        let receipt = cancellable(cancel, remote.transport.upload(&request))
            .await?
            .map_err(|source| JobError::Upload {
                part: i + 1,
                parts: count,
                source,
            })?;
        info!(job_id = %job.id, part = i + 1, parts = count, key = %receipt.key, size = receipt.size, "Part uploaded");
    }
    Ok(count)
}

fn caption(name: &str, part: usize, parts: usize) -> String {
    if parts > 1 {
        format!("{name} (part {part}/{parts})")
    } else {
        name.to_string()
    }
}

async fn record_processed(shared: &Shared, job: &Job, target: &JobTarget) {
    if let Err(e) = shared.collaborators.dedup.insert(&target.dedup_key).await {
        warn!(job_id = %job.id, key = %target.dedup_key, error = %e, "Failed to record job as processed");
    }
}

async fn remove_artifacts(job: &Job, dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(job_id = %job.id, dir = %dir.display(), "Removed local artifacts"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(job_id = %job.id, dir = %dir.display(), error = %e, "Failed to remove local artifacts"),
    }
}
