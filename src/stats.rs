//! Pipeline-wide job counters and the periodic reporter.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::humanize::format_duration;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    total_jobs: u64,
    completed_jobs: u64,
    skipped_jobs: u64,
    failed_jobs: u64,
    active_downloads: u64,
    active_uploads: u64,
}

/// Shared counters. Writers take the write lock for one increment; readers
/// copy everything out under the read lock.
#[derive(Debug)]
pub struct PipelineStats {
    counters: RwLock<Counters>,
    started: Instant,
    remote: bool,
}

#[derive(Debug, Clone, Copy)]
enum Activity {
    Download,
    Upload,
}

impl PipelineStats {
    pub fn new(remote: bool) -> Self {
        Self {
            counters: RwLock::new(Counters::default()),
            started: Instant::now(),
            remote,
        }
    }

    fn update(&self, f: impl FnOnce(&mut Counters)) {
        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut counters);
    }

    pub fn job_submitted(&self) {
        self.update(|c| c.total_jobs += 1);
        debug!(counter = "total_jobs", "Metric incremented");
    }

    /// Undo `job_submitted` for a job that never entered the pipeline.
    pub fn submission_withdrawn(&self) {
        self.update(|c| c.total_jobs = c.total_jobs.saturating_sub(1));
    }

    /// A job reached `completed`; `skipped` when no work was needed.
    pub fn job_completed(&self, skipped: bool) {
        self.update(|c| {
            c.completed_jobs += 1;
            if skipped {
                c.skipped_jobs += 1;
            }
        });
        debug!(counter = "completed_jobs", skipped, "Metric incremented");
    }

    pub fn job_failed(&self) {
        self.update(|c| c.failed_jobs += 1);
        debug!(counter = "failed_jobs", "Metric incremented");
    }

    /// Counts an active download until the guard is dropped.
    pub fn download_started(self: &Arc<Self>) -> ActivityGuard {
        self.begin(Activity::Download)
    }

    /// Counts an active upload until the guard is dropped.
    pub fn upload_started(self: &Arc<Self>) -> ActivityGuard {
        self.begin(Activity::Upload)
    }

    fn begin(self: &Arc<Self>, activity: Activity) -> ActivityGuard {
        self.update(|c| match activity {
            Activity::Download => c.active_downloads += 1,
            Activity::Upload => c.active_uploads += 1,
        });
        ActivityGuard {
            stats: Arc::clone(self),
            activity,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = *self.counters.read().unwrap_or_else(PoisonError::into_inner);
        StatsSnapshot {
            total_jobs: c.total_jobs,
            completed_jobs: c.completed_jobs,
            skipped_jobs: c.skipped_jobs,
            failed_jobs: c.failed_jobs,
            active_downloads: c.active_downloads,
            active_uploads: c.active_uploads,
            uptime: self.started.elapsed(),
            remote: self.remote,
        }
    }
}

#[derive(Debug)]
pub struct ActivityGuard {
    stats: Arc<PipelineStats>,
    activity: Activity,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        let activity = self.activity;
        self.stats.update(|c| match activity {
            Activity::Download => c.active_downloads = c.active_downloads.saturating_sub(1),
            Activity::Upload => c.active_uploads = c.active_uploads.saturating_sub(1),
        });
    }
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub total_jobs: u64,
    pub completed_jobs: u64,
    pub skipped_jobs: u64,
    pub failed_jobs: u64,
    pub active_downloads: u64,
    pub active_uploads: u64,
    pub uptime: Duration,
    pub remote: bool,
}

impl StatsSnapshot {
    /// Submitted jobs that have not reached a terminal state.
    pub fn pending(&self) -> u64 {
        self.total_jobs
            .saturating_sub(self.completed_jobs + self.failed_jobs)
    }

    /// Completed share of finished jobs, in percent.
    pub fn success_rate(&self) -> Option<f64> {
        let finished = self.completed_jobs + self.failed_jobs;
        (finished > 0).then(|| self.completed_jobs as f64 * 100.0 / finished as f64)
    }

    /// Closing summary: the regular tree plus runtime and success rate.
    pub fn render_final(&self) -> String {
        let rate = self
            .success_rate()
            .map_or_else(|| "n/a".to_string(), |r| format!("{r:.1}%"));
        format!(
            "Final statistics\n{}\nTotal runtime: {}\nSuccess rate:  {}",
            self,
            format_duration(self.uptime),
            rate
        )
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline stats (uptime {})", format_duration(self.uptime))?;
        writeln!(f, "├─ Total:            {}", self.total_jobs)?;
        if self.skipped_jobs > 0 {
            writeln!(f, "├─ Completed:        {} ({} skipped)", self.completed_jobs, self.skipped_jobs)?;
        } else {
            writeln!(f, "├─ Completed:        {}", self.completed_jobs)?;
        }
        writeln!(f, "├─ Failed:           {}", self.failed_jobs)?;
        writeln!(f, "├─ Active downloads: {}", self.active_downloads)?;
        if self.remote {
            writeln!(f, "├─ Active uploads:   {}", self.active_uploads)?;
        }
        write!(f, "└─ Pending:          {}", self.pending())
    }
}

/// Log a snapshot every `interval` until `cancel` fires.
pub fn spawn_collector(
    stats: Arc<PipelineStats>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => log_snapshot(&stats.snapshot()),
            }
        }
        debug!("Stats collector stopped");
    })
}

pub fn log_snapshot(snapshot: &StatsSnapshot) {
    info!(
        total = snapshot.total_jobs,
        completed = snapshot.completed_jobs,
        skipped = snapshot.skipped_jobs,
        failed = snapshot.failed_jobs,
        active_downloads = snapshot.active_downloads,
        active_uploads = snapshot.active_uploads,
        pending = snapshot.pending(),
        "Pipeline stats"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_pending() {
        let stats = Arc::new(PipelineStats::new(false));
        for _ in 0..5 {
            stats.job_submitted();
        }
        stats.job_completed(false);
        stats.job_completed(true);
        stats.job_failed();

        let snap = stats.snapshot();
        assert_eq!(snap.total_jobs, 5);
        assert_eq!(snap.completed_jobs, 2);
        assert_eq!(snap.skipped_jobs, 1);
        assert_eq!(snap.failed_jobs, 1);
        assert_eq!(snap.pending(), 2);
        let rate = snap.success_rate().unwrap();
        assert!((rate - 66.666).abs() < 0.01);

        stats.submission_withdrawn();
        assert_eq!(stats.snapshot().pending(), 1);
    }

    #[test]
    fn test_activity_guards() {
        let stats = Arc::new(PipelineStats::new(true));
        let d1 = stats.download_started();
        let d2 = stats.download_started();
        let u = stats.upload_started();
        assert_eq!(stats.snapshot().active_downloads, 2);
        assert_eq!(stats.snapshot().active_uploads, 1);

        drop(d1);
        drop(u);
        let snap = stats.snapshot();
        assert_eq!(snap.active_downloads, 1);
        assert_eq!(snap.active_uploads, 0);
        drop(d2);
        assert_eq!(stats.snapshot().active_downloads, 0);
    }

    #[test]
    fn test_display_hides_uploads_in_local_mode() {
        let local = PipelineStats::new(false).snapshot().to_string();
        assert!(!local.contains("Active uploads"));
        assert!(local.ends_with("└─ Pending:          0"));

        let remote = PipelineStats::new(true).snapshot().to_string();
        assert!(remote.contains("Active uploads"));
    }

    #[test]
    fn test_final_render_without_finished_jobs() {
        let snap = PipelineStats::new(false).snapshot();
        assert_eq!(snap.success_rate(), None);
        assert!(snap.render_final().contains("Success rate:  n/a"));
    }

    #[tokio::test]
    async fn test_collector_stops_on_cancel() {
        let stats = Arc::new(PipelineStats::new(false));
        let cancel = CancellationToken::new();
        let handle = spawn_collector(stats, Duration::from_millis(20), cancel.clone());

        tokio::time::sleep(Duration::from_millis(70)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
