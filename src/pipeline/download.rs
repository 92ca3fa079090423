//! Download stage: extract, fetch segments, verify, merge.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::Shared;
use super::error::JobError;
use super::job::{Job, JobStatus};
use super::records::{DispatchedJob, DownloadResult, DownloadedMedia};
use super::target::JobTarget;
use crate::extract::ExtractedStream;
use crate::fetch::{atomic, count_completed_segments};
use crate::queue::{StageReceiver, StageSender};

pub(crate) const THUMBNAIL_FILE: &str = "thumbnail.jpg";

pub(super) async fn run(
    worker_id: usize,
    shared: Arc<Shared>,
    inbox: StageReceiver<DispatchedJob>,
    outbox: StageSender<DownloadResult>,
) {
    while let Some(DispatchedJob { mut job, target }) = inbox.recv().await {
        job.transition(JobStatus::Downloading);
        info!(worker_id, job_id = %job.id, url = %job.url, "Download started");

        let result = {
            let _active = shared.stats.download_started();
            download(&shared, &job, &target).await
        };

        match &result {
            Ok(media) => {
                job.transition(JobStatus::Downloaded);
                info!(job_id = %job.id, file = %media.media_file.display(), reused = media.reused, "Download finished");
            }
            Err(_) => job.fail(),
        }

        if let Err(e) = outbox.send(DownloadResult { job, target, result }).await {
            error!(worker_id, error = %e, "Download worker lost its downstream queue");
            break;
        }
    }
    debug!(worker_id, "Download worker finished");
}

/// Run `fut` unless the pipeline is cancelled first.
pub(super) async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, JobError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(JobError::Cancelled),
        output = fut => Ok(output),
    }
}

async fn download(shared: &Shared, job: &Job, target: &JobTarget) -> Result<DownloadedMedia, JobError> {
    let cancel = &shared.cancel;
    if cancel.is_cancelled() {
        return Err(JobError::Cancelled);
    }

    let media_file = target.media_file();
    if let Some(size) = atomic::non_empty_size(&media_file).await {
        info!(job_id = %job.id, size, "Merged media already on disk, skipping download");
        let thumbnail = target.output_dir.join(THUMBNAIL_FILE);
        return Ok(DownloadedMedia {
            media_file,
            thumbnail: atomic::non_empty_size(&thumbnail).await.map(|_| thumbnail),
            reused: true,
        });
    }

    let stream = cancellable(cancel, shared.collaborators.extractor.extract(&target.canonical_url))
        .await?
        .map_err(JobError::Extraction)?;
    debug!(job_id = %job.id, playlist = %stream.playlist_url, "Stream extracted");

    let segments = cancellable(cancel, shared.fetcher.resolve_playlist(&stream.playlist_url)).await??;
    let total = segments.len();
    info!(job_id = %job.id, segments = total, "Fetching segments");

    let report = {
        let handle = shared.progress.register(job.id, &target.name, total);
        shared
            .fetcher
            .fetch_all(&segments, &target.output_dir, handle.tracker(), cancel)
            .await?
    };
    if cancel.is_cancelled() {
        return Err(JobError::Cancelled);
    }

    let completed = count_completed_segments(&target.output_dir, total).await;
    if completed < total {
        let detail = report
            .first_error()
            .map(|(index, e)| format!(" (segment {index}: {e})"))
            .unwrap_or_default();
        return Err(JobError::IncompleteSegments {
            missing: total - completed,
            total,
            detail,
        });
    }

    let thumbnail = fetch_thumbnail(shared, job, &stream, &target.output_dir).await;

    cancellable(
        cancel,
        shared
            .collaborators
            .merger
            .merge(&target.output_dir, thumbnail.as_deref(), &media_file),
    )
    .await?
    .map_err(JobError::Merge)?;

    Ok(DownloadedMedia {
        media_file,
        thumbnail,
        reused: false,
    })
}

/// Best effort: a missing cover never fails the job.
async fn fetch_thumbnail(shared: &Shared, job: &Job, stream: &ExtractedStream, dir: &Path) -> Option<PathBuf> {
    let reference = stream.thumbnail.as_deref()?;

    match Url::parse(reference) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            let dest = dir.join(THUMBNAIL_FILE);
            if atomic::non_empty_size(&dest).await.is_some() {
                return Some(dest);
            }
            match shared.fetcher.fetch_file(&url, &dest, &shared.cancel).await {
                Ok(_) => Some(dest),
                Err(e) => {
                    warn!(job_id = %job.id, %url, error = %e, "Thumbnail download failed, continuing without");
                    None
                }
            }
        }
        _ => {
            let local = PathBuf::from(reference);
            if local.is_file() {
                Some(local)
            } else {
                warn!(job_id = %job.id, thumbnail = reference, "Thumbnail reference is not usable");
                None
            }
        }
    }
}
