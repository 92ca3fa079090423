use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;

use super::{ProgressRegistry, ProgressSnapshot};
use crate::pipeline::JobId;

const TEMPLATE: &str = "{prefix} [{bar:40}] {msg}";

/// Terminal area shared by the progress bars and log output.
///
/// Cloning is cheap and every clone draws to the same place. Installed as a
/// tracing writer, each log line clears the bars, is written above them and
/// the bars are redrawn below.
#[derive(Clone, Debug)]
pub struct ProgressDisplay {
    multi: MultiProgress,
}

impl ProgressDisplay {
    pub fn stderr() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::stderr()),
        }
    }

    /// Draws nothing; log lines pass straight through.
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
        }
    }

    /// Run `f` with the bars cleared from the terminal.
    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        self.multi.suspend(f)
    }
}

/// Log writer that never interleaves with a bar frame.
pub struct SuspendingWriter {
    multi: MultiProgress,
}

impl Write for SuspendingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.multi.suspend(|| io::stderr().lock().write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().lock().flush()
    }
}

impl<'a> MakeWriter<'a> for ProgressDisplay {
    type Writer = SuspendingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SuspendingWriter {
            multi: self.multi.clone(),
        }
    }
}

/// One bar per registered job, kept in step with registry snapshots.
pub struct ProgressRenderer {
    display: ProgressDisplay,
    style: ProgressStyle,
    bars: BTreeMap<JobId, ProgressBar>,
}

impl ProgressRenderer {
    pub fn new(display: ProgressDisplay) -> Self {
        let style = ProgressStyle::with_template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█░");
        Self {
            display,
            style,
            bars: BTreeMap::new(),
        }
    }

    /// Bring the bars in line with `snapshots`: jobs no longer present lose
    /// their bar, new jobs get one, the rest are updated in place.
    pub fn render(&mut self, snapshots: &[ProgressSnapshot]) {
        let multi = &self.display.multi;
        let live: BTreeSet<JobId> = snapshots.iter().map(|s| s.job_id).collect();

        self.bars.retain(|job_id, bar| {
            let keep = live.contains(job_id);
            if !keep {
                bar.finish_and_clear();
                multi.remove(bar);
            }
            keep
        });

        for snapshot in snapshots {
            let bar = self.bars.entry(snapshot.job_id).or_insert_with(|| {
                let bar = multi.add(ProgressBar::new(snapshot.total as u64));
                bar.set_style(self.style.clone());
                bar.set_prefix(format!("{} {}", snapshot.job_id, snapshot.label));
                bar
            });
            bar.set_length(snapshot.total as u64);
            bar.set_position(snapshot.completed as u64);
            bar.set_message(snapshot.status());
        }
    }

    /// Clear every bar from the terminal.
    pub fn finish(&mut self) {
        let multi = &self.display.multi;
        for bar in std::mem::take(&mut self.bars).into_values() {
            bar.finish_and_clear();
            multi.remove(&bar);
        }
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }
}

/// Update the bars whenever a tracker asks for it, until `cancel` fires.
pub fn spawn_renderer(
    registry: Arc<ProgressRegistry>,
    display: ProgressDisplay,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut renderer = ProgressRenderer::new(display);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = registry.changed() => {}
            }
            renderer.render(&registry.snapshot());
        }
        renderer.finish();
    })
}
