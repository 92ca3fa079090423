//! Per-job segment progress and the registry of jobs currently downloading.
//!
//! Fetch workers call [`ProgressTracker::record`] once per segment. Trackers
//! are rate limited: a record only asks for a redraw when the render
//! interval has passed or the job just reached 100%. Redraw requests wake
//! the renderer (see [`render`]), which keeps one terminal bar per
//! registered job.

pub mod render;

pub use render::{ProgressDisplay, ProgressRenderer, SuspendingWriter, spawn_renderer};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{trace, warn};

use crate::humanize::{format_bytes, format_rate};
use crate::pipeline::JobId;

#[derive(Debug, Default)]
struct TrackerState {
    completed: usize,
    failed: usize,
    bytes: u64,
    last_render: Option<Instant>,
}

/// Segment counters for one job.
#[derive(Debug)]
pub struct ProgressTracker {
    job_id: JobId,
    label: String,
    total: usize,
    started: Instant,
    render_interval: Duration,
    state: Mutex<TrackerState>,
    redraw: Arc<Notify>,
}

impl ProgressTracker {
    /// A tracker not attached to any registry.
    pub fn new(job_id: JobId, label: impl Into<String>, total: usize, render_interval: Duration) -> Self {
        Self::with_notify(job_id, label.into(), total, render_interval, Arc::new(Notify::new()))
    }

    fn with_notify(
        job_id: JobId,
        label: String,
        total: usize,
        render_interval: Duration,
        redraw: Arc<Notify>,
    ) -> Self {
        Self {
            job_id,
            label,
            total,
            started: Instant::now(),
            render_interval,
            state: Mutex::new(TrackerState::default()),
            redraw,
        }
    }

    /// Record the outcome of one segment. Only successes count towards
    /// completion and bytes. Returns `true` when this record triggered a
    /// redraw.
    pub fn record(&self, index: usize, success: bool, bytes: u64) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if success {
            if state.completed < self.total {
                state.completed += 1;
                state.bytes += bytes;
            } else {
                warn!(job_id = %self.job_id, index, "Segment recorded past total, ignoring");
            }
        } else {
            state.failed += 1;
        }
        trace!(job_id = %self.job_id, index, success, bytes, "Segment recorded");

        let now = Instant::now();
        let finished = success && state.completed == self.total;
        let due = finished
            || state
                .last_render
                .is_none_or(|last| now.duration_since(last) >= self.render_interval);

        if due {
            state.last_render = Some(now);
            drop(state);
            self.redraw.notify_one();
        }
        due
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        ProgressSnapshot {
            job_id: self.job_id,
            label: self.label.clone(),
            total: self.total,
            completed: state.completed,
            failed: state.failed,
            bytes: state.bytes,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Point-in-time copy of a tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    pub label: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 * 100.0 / self.total as f64
    }

    /// `45.0% (9/20) 12.3 MB @ 1.2 MB/s`
    pub fn status(&self) -> String {
        let mut status = format!(
            "{:.1}% ({}/{}) {} @ {}",
            self.percent(),
            self.completed,
            self.total,
            format_bytes(self.bytes),
            format_rate(self.bytes, self.elapsed),
        );
        if self.failed > 0 {
            status.push_str(&format!(" ({} failed)", self.failed));
        }
        status
    }
}

/// Jobs with an active download, keyed and rendered in job-id order.
#[derive(Debug)]
pub struct ProgressRegistry {
    trackers: RwLock<BTreeMap<JobId, Arc<ProgressTracker>>>,
    redraw: Arc<Notify>,
    render_interval: Duration,
}

impl ProgressRegistry {
    pub fn new(render_interval: Duration) -> Self {
        Self {
            trackers: RwLock::new(BTreeMap::new()),
            redraw: Arc::new(Notify::new()),
            render_interval,
        }
    }

    /// Track a job until the returned handle is dropped.
    pub fn register(self: &Arc<Self>, job_id: JobId, label: &str, total: usize) -> ProgressHandle {
        let tracker = Arc::new(ProgressTracker::with_notify(
            job_id,
            label.to_string(),
            total,
            self.render_interval,
            Arc::clone(&self.redraw),
        ));

        self.trackers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, Arc::clone(&tracker));
        self.redraw.notify_one();

        ProgressHandle {
            registry: Arc::clone(self),
            tracker,
        }
    }

    fn remove(&self, job_id: JobId) {
        self.trackers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id);
        self.redraw.notify_one();
    }

    pub fn snapshot(&self) -> Vec<ProgressSnapshot> {
        self.trackers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|t| t.snapshot())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.trackers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves when some tracker asked for a redraw or membership changed.
    pub async fn changed(&self) {
        self.redraw.notified().await
    }
}

/// Registration of one job; unregisters on drop.
#[derive(Debug)]
pub struct ProgressHandle {
    registry: Arc<ProgressRegistry>,
    tracker: Arc<ProgressTracker>,
}

impl ProgressHandle {
    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }
}

impl Drop for ProgressHandle {
    fn drop(&mut self) {
        self.registry.remove(self.tracker.job_id());
    }
}
