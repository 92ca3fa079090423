//! Segment fetching: playlist resolution and a bounded pool of workers that
//! write each segment to disk atomically.
//!
//! Fetching is resumable by construction. A segment whose file already exists
//! with a non-zero size is counted as done without a request, and a segment
//! file only ever appears under its final name once fully written. There is
//! no retry here; a failed index is reported and the caller decides.

pub mod atomic;
pub mod http;
pub mod playlist;

pub use http::HttpClient;
pub use playlist::{Playlist, PlaylistError, Variant};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::progress::ProgressTracker;
use crate::queue;

const SEGMENT_PREFIX: &str = "segment_";
const SEGMENT_EXT: &str = ".ts";
const MIN_INDEX_WIDTH: usize = 4;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} returned an empty body")]
    EmptyBody { url: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Playlist(#[from] PlaylistError),

    #[error("download cancelled")]
    Cancelled,

    #[error("segment was not attempted")]
    NotAttempted,

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        FetchError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Failures caused by the remote side or the network path to it.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            FetchError::Request { .. }
                | FetchError::Timeout { .. }
                | FetchError::Status { .. }
                | FetchError::EmptyBody { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Per-index outcome of [`SegmentFetcher::fetch_all`]; `None` is success.
#[derive(Debug)]
pub struct FetchReport {
    pub errors: Vec<Option<FetchError>>,
}

impl FetchReport {
    pub fn failed(&self) -> usize {
        self.errors.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.failed() == 0
    }

    pub fn first_error(&self) -> Option<(usize, &FetchError)> {
        self.errors
            .iter()
            .enumerate()
            .find_map(|(i, e)| e.as_ref().map(|e| (i, e)))
    }
}

/// File name for segment `index` of `total`: `segment_0007.ts`. The index is
/// zero-padded to a fixed width (at least four digits) so that lexical order
/// is playback order.
pub fn segment_file_name(index: usize, total: usize) -> String {
    let digits = total.saturating_sub(1).to_string().len();
    let width = digits.max(MIN_INDEX_WIDTH);
    format!("{SEGMENT_PREFIX}{index:0width$}{SEGMENT_EXT}")
}

pub fn is_segment_file_name(name: &str) -> bool {
    name.strip_prefix(SEGMENT_PREFIX)
        .and_then(|rest| rest.strip_suffix(SEGMENT_EXT))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Number of segments `0..total` present on disk with a non-zero size.
pub async fn count_completed_segments(dir: &Path, total: usize) -> usize {
    let mut present = 0;
    for index in 0..total {
        if atomic::non_empty_size(&dir.join(segment_file_name(index, total)))
            .await
            .is_some()
        {
            present += 1;
        }
    }
    present
}

/// Fetches playlists and the segments they list.
#[derive(Clone)]
pub struct SegmentFetcher {
    http: HttpClient,
    concurrency: usize,
}

impl SegmentFetcher {
    pub fn new(http: HttpClient, concurrency: usize) -> Self {
        Self {
            http,
            concurrency: concurrency.max(1),
        }
    }

    /// Ordered segment URLs of the playlist at `url`. A master playlist is
    /// followed once, to its highest-bandwidth variant.
    pub async fn resolve_playlist(&self, url: &Url) -> Result<Vec<Url>> {
        let content = self.http.get_text(url).await?;

        let segments = match playlist::parse(&content, url) {
            Playlist::Media(segments) => segments,
            master @ Playlist::Master(_) => {
                let Some(variant) = master.best_variant() else {
                    return Err(PlaylistError::NoSegments.into());
                };
                info!(variant = %variant.uri, bandwidth = variant.bandwidth, "Selected playlist variant");

                let content = self.http.get_text(&variant.uri).await?;
                match playlist::parse(&content, &variant.uri) {
                    Playlist::Media(segments) => segments,
                    Playlist::Master(_) => return Err(PlaylistError::NestedMaster.into()),
                }
            }
        };

        if segments.is_empty() {
            return Err(PlaylistError::NoSegments.into());
        }
        Ok(segments)
    }

    /// Download a single file atomically, giving up when `cancel` fires.
    pub async fn fetch_file(&self, url: &Url, dest: &Path, cancel: &CancellationToken) -> Result<u64> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = self.http.download_to(url, dest) => result,
        }
    }

    /// Fetch every segment into `output_dir` with at most `concurrency`
    /// requests in flight.
    ///
    /// Every index is attempted; a failing index never stops its siblings.
    /// Only a failure to prepare `output_dir` is returned as an error.
    pub async fn fetch_all(
        &self,
        segments: &[Url],
        output_dir: &Path,
        progress: &Arc<ProgressTracker>,
        cancel: &CancellationToken,
    ) -> Result<FetchReport> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| FetchError::io(output_dir, e))?;
        atomic::sweep_temp_files(output_dir)
            .await
            .map_err(|e| FetchError::io(output_dir, e))?;

        let total = segments.len();
        let mut errors: Vec<Option<FetchError>> = (0..total).map(|_| Some(FetchError::NotAttempted)).collect();
        if total == 0 {
            return Ok(FetchReport { errors });
        }

        let workers = self.concurrency.min(total);
        debug!(total, workers, dir = %output_dir.display(), "Fetching segments");

        let (tx, rx) = queue::bounded("segments", total);
        for (index, url) in segments.iter().enumerate() {
            let dest = output_dir.join(segment_file_name(index, total));
            if tx.send((index, url.clone(), dest)).await.is_err() {
                break;
            }
        }
        drop(tx);

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            let rx = rx.clone();
            let http = self.http.clone();
            let progress = Arc::clone(progress);
            let cancel = cancel.clone();

            pool.spawn(async move {
                let mut outcomes = Vec::new();
                while let Some((index, url, dest)) = rx.recv().await {
                    let outcome = fetch_segment(&http, index, &url, &dest, &progress, &cancel).await;
                    outcomes.push((index, outcome));
                }
                debug!(worker_id, handled = outcomes.len(), "Segment worker finished");
                outcomes
            });
        }

        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(outcomes) => {
                    for (index, outcome) in outcomes {
                        errors[index] = outcome;
                    }
                }
                Err(e) => error!(error = %e, "Segment worker panicked"),
            }
        }

        Ok(FetchReport { errors })
    }
}

async fn fetch_segment(
    http: &HttpClient,
    index: usize,
    url: &Url,
    dest: &Path,
    progress: &ProgressTracker,
    cancel: &CancellationToken,
) -> Option<FetchError> {
    if let Some(size) = atomic::non_empty_size(dest).await {
        debug!(index, size, "Segment already on disk");
        progress.record(index, true, size);
        return None;
    }

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = http.download_to(url, dest) => result,
    };

    match result {
        Ok(bytes) => {
            progress.record(index, true, bytes);
            None
        }
        Err(e) => {
            if !matches!(e, FetchError::Cancelled) {
                warn!(index, %url, error = %e, "Segment download failed");
            }
            progress.record(index, false, 0);
            Some(e)
        }
    }
}
