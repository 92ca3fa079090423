//! Merging fetched segments into one media file and cutting oversized files
//! into uploadable parts.

mod ffmpeg;

pub use ffmpeg::Ffmpeg;

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::humanize::ByteSize;

/// Transient list file handed to the concat demuxer.
pub const CONCAT_MANIFEST: &str = "concat_list.txt";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("no segment files in {}", dir.display())]
    NoSegments { dir: PathBuf },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("could not determine duration: {0}")]
    Duration(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MediaError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        MediaError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;

#[async_trait]
pub trait MediaMerger: Send + Sync {
    /// Concatenate the segment files of `segment_dir` in index order into
    /// `output`, attaching `thumbnail` as cover art when given.
    async fn merge(&self, segment_dir: &Path, thumbnail: Option<&Path>, output: &Path) -> Result<()>;
}

#[async_trait]
pub trait MediaSplitter: Send + Sync {
    /// Files at or below `threshold` come back unchanged as a single part.
    async fn split(&self, media: &Path, threshold: ByteSize) -> Result<Vec<PathBuf>>;
}

/// Number of parts a file of `size` bytes is cut into. Sizes are compared in
/// whole mebibytes.
pub fn part_count(size: u64, threshold: ByteSize) -> usize {
    let size_mib = size / crate::humanize::MIB;
    let threshold_mib = threshold.whole_mib().max(1);
    if size_mib <= threshold_mib {
        1
    } else {
        size_mib.div_ceil(threshold_mib) as usize
    }
}

/// `<dir>/<stem>_part<n><.ext>`, numbered from 1.
pub fn part_path(media: &Path, n: usize) -> PathBuf {
    let stem = media
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = media
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    media.with_file_name(format!("{stem}_part{n}{ext}"))
}

/// `HH:MM:SS.mmm` as accepted by `-ss` and `-t`.
pub fn format_timestamp(seconds: f64) -> String {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let (h, rem) = (millis / 3_600_000, millis % 3_600_000);
    let (m, rem) = (rem / 60_000, rem % 60_000);
    let (s, ms) = (rem / 1000, rem % 1000);
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}

/// Concat demuxer input listing `names` in order.
pub fn concat_manifest<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|name| format!("file '{}'\n", name.as_ref().replace('\'', "'\\''")))
        .collect()
}
