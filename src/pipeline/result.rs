//! Result stage: the only place terminal counters are updated.

use std::sync::Arc;
use tracing::{debug, error, info};

use super::Shared;
use super::records::{JobOutcome, JobReport};
use crate::queue::StageReceiver;

pub(super) async fn run(shared: Arc<Shared>, inbox: StageReceiver<JobOutcome>) {
    while let Some(outcome) = inbox.recv().await {
        record(&shared, &outcome);
    }
    debug!("Result stage finished");
}

fn record(shared: &Shared, outcome: &JobOutcome) {
    let job = &outcome.job;
    let elapsed_ms = job.turnaround().map(|d| d.num_milliseconds());

    match &outcome.result {
        Ok(completion) => {
            shared.stats.job_completed(completion.is_skipped());
            info!(job_id = %job.id, url = %job.url, status = %job.status(), elapsed_ms, "Job {completion}");
        }
        Err(e) => {
            shared.stats.job_failed();
            error!(job_id = %job.id, url = %job.url, kind = e.kind(), elapsed_ms, "Job failed: {e}");
        }
    }

    if let Some(target) = outcome.target.as_ref().filter(|_| outcome.holds_claim()) {
        shared.in_flight.release(&target.dedup_key);
    }

    // no subscribers is fine
    let _ = shared.reports.send(JobReport::new(job, &outcome.result));
}
