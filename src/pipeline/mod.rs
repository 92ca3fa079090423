//! Staged job pipeline.
//!
//! ```text
//! submit ─▶ [dispatch] ─▶ [download × W] ─▶ [upload] ─▶ [result]
//!               │                                           ▲
//!               └──────────── skipped / invalid ────────────┘
//! ```
//!
//! Every arrow is a bounded queue. A full queue blocks the sending worker.
//! A stage's outbound queue closes once all of its workers have exited, so
//! closing intake drains the whole pipeline in order.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let pipeline = Pipeline::start(&config, http, collaborators)?;
//! pipeline.submit("https://example.com/watch/show").await?;
//! let stats = pipeline.close().await;
//! ```

mod collaborators;
mod dispatch;
mod download;
pub mod error;
pub mod job;
pub mod records;
mod result;
pub mod target;
mod upload;

pub use collaborators::Collaborators;
pub use error::{JobError, PipelineError};
pub use job::{Job, JobId, JobStatus};
pub use records::{Completion, JobReport, SkipReason};
pub use target::JobTarget;

use futures::future::join_all;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{Config, PipelineConfig};
use crate::fetch::{HttpClient, SegmentFetcher};
use crate::humanize::ByteSize;
use crate::progress::{ProgressDisplay, ProgressRegistry, spawn_renderer};
use crate::queue::{self, StageSender};
use crate::stats::{PipelineStats, StatsSnapshot, log_snapshot, spawn_collector};
use crate::transport::UploadTransport;
use collaborators::InFlight;

const REPORT_CAPACITY: usize = 256;

/// Where distributed media goes.
pub(crate) struct RemoteTarget {
    transport: Arc<dyn UploadTransport>,
    destination: String,
}

/// State every stage worker reads.
pub(crate) struct Shared {
    pipeline: PipelineConfig,
    split_threshold: ByteSize,
    remote: Option<RemoteTarget>,
    collaborators: Collaborators,
    fetcher: SegmentFetcher,
    stats: Arc<PipelineStats>,
    progress: Arc<ProgressRegistry>,
    in_flight: InFlight,
    cancel: CancellationToken,
    reports: broadcast::Sender<JobReport>,
}

/// Handle to a running pipeline.
pub struct Pipeline {
    shared: Arc<Shared>,
    intake: Mutex<Option<StageSender<Job>>>,
    next_id: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    background_cancel: CancellationToken,
}

impl Pipeline {
    /// Spawn every stage. Must be called inside a tokio runtime.
    ///
    /// Fails only when remote distribution is enabled without a transport
    /// or a destination.
    pub fn start(config: &Config, http: HttpClient, collaborators: Collaborators) -> Result<Self, PipelineError> {
        let remote = if config.distribution.enabled {
            let transport = collaborators
                .transport
                .clone()
                .ok_or(PipelineError::Misconfigured("an upload transport"))?;
            let destination = config
                .distribution
                .destination
                .clone()
                .filter(|d| !d.trim().is_empty())
                .ok_or(PipelineError::Misconfigured("a distribution destination"))?;
            Some(RemoteTarget { transport, destination })
        } else {
            None
        };

        let pc = &config.pipeline;
        let stats = Arc::new(PipelineStats::new(remote.is_some()));
        let progress = Arc::new(ProgressRegistry::new(config.progress.render_interval()));
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);

        let shared = Arc::new(Shared {
            pipeline: pc.clone(),
            split_threshold: config.media.split_threshold,
            remote,
            collaborators,
            fetcher: SegmentFetcher::new(http, pc.segment_concurrency),
            stats: Arc::clone(&stats),
            progress: Arc::clone(&progress),
            in_flight: InFlight::default(),
            cancel: CancellationToken::new(),
            reports,
        });

        let (intake_tx, intake_rx) = queue::bounded("dispatch", pc.queue_size.max(1));
        let (download_tx, download_rx) = queue::bounded("download", pc.queue_size.max(1));
        let (upload_tx, upload_rx) = queue::bounded("upload", pc.queue_size.max(1));
        let (result_tx, result_rx) = queue::bounded("result", pc.result_queue_size().max(1));

        let mut workers = Vec::new();
        for worker_id in 0..pc.dispatch_workers.max(1) {
            workers.push(tokio::spawn(dispatch::run(
                worker_id,
                Arc::clone(&shared),
                intake_rx.clone(),
                download_tx.clone(),
                result_tx.clone(),
            )));
        }
        for worker_id in 0..pc.download_workers.max(1) {
            workers.push(tokio::spawn(download::run(
                worker_id,
                Arc::clone(&shared),
                download_rx.clone(),
                upload_tx.clone(),
            )));
        }
        for worker_id in 0..pc.upload_workers.max(1) {
            workers.push(tokio::spawn(upload::run(
                worker_id,
                Arc::clone(&shared),
                upload_rx.clone(),
                result_tx.clone(),
            )));
        }
        workers.push(tokio::spawn(result::run(Arc::clone(&shared), result_rx)));

        // only worker-held clones may keep downstream queues open
        drop((download_tx, upload_tx, result_tx));

        let background_cancel = CancellationToken::new();
        let mut background = vec![spawn_collector(stats, pc.stats_interval(), background_cancel.clone())];
        if config.progress.enabled {
            let display = shared
                .collaborators
                .display
                .clone()
                .unwrap_or_else(ProgressDisplay::stderr);
            background.push(spawn_renderer(progress, display, background_cancel.clone()));
        }

        info!(
            dispatch = pc.dispatch_workers,
            download = pc.download_workers,
            upload = pc.upload_workers,
            queue_size = pc.queue_size,
            remote = shared.remote.is_some(),
            output_dir = %pc.output_dir.display(),
            "Pipeline started"
        );

        Ok(Self {
            shared,
            intake: Mutex::new(Some(intake_tx)),
            next_id: AtomicU64::new(1),
            workers: Mutex::new(workers),
            background: Mutex::new(background),
            background_cancel,
        })
    }

    /// Enqueue a URL, waiting while the dispatch queue is full.
    ///
    /// Returns [`PipelineError::Closed`] once `close` or `shutdown` has been
    /// called. A submission already waiting for capacity is withdrawn with
    /// `Closed` only on `cancel`/`shutdown`; under `close` it still goes
    /// through, since dispatch keeps draining the queue.
    pub async fn submit(&self, url: &str) -> Result<JobId, PipelineError> {
        let cancel = &self.shared.cancel;
        if cancel.is_cancelled() {
            return Err(PipelineError::Closed);
        }
        let sender = self
            .intake
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PipelineError::Closed)?;

        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let job = Job::new(id, url.trim());
        self.shared.stats.job_submitted();

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            result = sender.send(job) => result.is_ok(),
        };
        if !sent {
            self.shared.stats.submission_withdrawn();
            return Err(PipelineError::Closed);
        }

        debug!(job_id = %id, url, "Job queued");
        Ok(id)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Terminal reports for jobs finishing after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<JobReport> {
        self.shared.reports.subscribe()
    }

    /// Stop accepting work, let every queued job run to its terminal state
    /// and wait for all stage workers to exit. Logs and returns the final
    /// snapshot.
    pub async fn close(&self) -> StatsSnapshot {
        drop(self.intake.lock().unwrap_or_else(PoisonError::into_inner).take());

        let workers = mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        if !workers.is_empty() {
            debug!(workers = workers.len(), "Waiting for stage workers");
        }
        for joined in join_all(workers).await {
            if let Err(e) = joined {
                error!(error = %e, "Stage worker panicked");
            }
        }

        self.background_cancel.cancel();
        let background = mem::take(&mut *self.background.lock().unwrap_or_else(PoisonError::into_inner));
        join_all(background).await;

        let snapshot = self.shared.stats.snapshot();
        log_snapshot(&snapshot);
        info!("{}", snapshot.render_final());
        snapshot
    }

    /// Abort in-flight network and command work and refuse new submissions.
    /// Does not wait; pair with [`close`](Self::close).
    pub fn cancel(&self) {
        if !self.shared.cancel.is_cancelled() {
            info!("Cancelling in-flight work");
            self.shared.cancel.cancel();
        }
    }

    /// Cancel in-flight work, then [`close`](Self::close). Jobs still queued
    /// drain through the stages as cancelled failures.
    pub async fn shutdown(&self) -> StatsSnapshot {
        self.cancel();
        self.close().await
    }
}
