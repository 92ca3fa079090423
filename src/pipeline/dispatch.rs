//! Dispatch stage: canonicalize, consult the dedup store, route.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::Shared;
use super::job::{Job, JobStatus};
use super::records::{Completion, DispatchedJob, JobOutcome, SkipReason};
use super::target::JobTarget;
use crate::queue::{StageReceiver, StageSender};

enum Route {
    Download(DispatchedJob),
    Finished(JobOutcome),
}

pub(super) async fn run(
    worker_id: usize,
    shared: Arc<Shared>,
    inbox: StageReceiver<Job>,
    download: StageSender<DispatchedJob>,
    results: StageSender<JobOutcome>,
) {
    while let Some(job) = inbox.recv().await {
        let sent = match dispatch(&shared, job).await {
            Route::Download(next) => download.send(next).await.map_err(|e| e.to_string()),
            Route::Finished(outcome) => results.send(outcome).await.map_err(|e| e.to_string()),
        };
        if let Err(e) = sent {
            error!(worker_id, error = %e, "Dispatch worker lost its downstream queue");
            break;
        }
    }
    debug!(worker_id, "Dispatch worker finished");
}

async fn dispatch(shared: &Shared, mut job: Job) -> Route {
    job.transition(JobStatus::Dispatched);

    let target = match JobTarget::resolve(&job.url, &shared.pipeline.output_dir) {
        Ok(target) => target,
        Err(e) => {
            job.fail();
            return Route::Finished(JobOutcome {
                job,
                target: None,
                result: Err(e),
            });
        }
    };

    match shared.collaborators.dedup.contains(&target.dedup_key).await {
        Ok(true) => {
            info!(job_id = %job.id, key = %target.dedup_key, "Already processed, skipping");
            return skip(job, target, SkipReason::AlreadyProcessed);
        }
        Ok(false) => {}
        Err(e) => warn!(job_id = %job.id, error = %e, "Dedup lookup failed, processing anyway"),
    }

    if !shared.in_flight.claim(&target.dedup_key) {
        warn!(
            job_id = %job.id,
            key = %target.dedup_key,
            kind = "dedup_race",
            "Same target is already being processed, skipping"
        );
        return skip(job, target, SkipReason::InProgress);
    }

    debug!(job_id = %job.id, dir = %target.output_dir.display(), "Forwarding to download");
    Route::Download(DispatchedJob { job, target })
}

fn skip(mut job: Job, target: JobTarget, reason: SkipReason) -> Route {
    job.transition(JobStatus::Completed);
    Route::Finished(JobOutcome {
        job,
        target: Some(target),
        result: Ok(Completion::Skipped(reason)),
    })
}
