use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::extract::ExtractError;
use crate::fetch::{FetchError, PlaylistError};
use crate::media::MediaError;
use crate::transport::TransportError;

/// Refusals from the pipeline itself (as opposed to a failed job).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline is closed")]
    Closed,

    #[error("remote distribution is enabled but {0} is missing")]
    Misconfigured(&'static str),
}

/// Why a job ended in `failed`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("extraction failed: {0}")]
    Extraction(#[source] ExtractError),

    #[error("network error: {0}")]
    Network(#[source] FetchError),

    #[error(transparent)]
    Playlist(PlaylistError),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{missing} of {total} segments missing{detail}")]
    IncompleteSegments {
        missing: usize,
        total: usize,
        detail: String,
    },

    #[error("merge failed: {0}")]
    Merge(#[source] MediaError),

    #[error("split failed: {0}")]
    Split(#[source] MediaError),

    #[error("upload of part {part}/{parts} failed: {source}")]
    Upload {
        part: usize,
        parts: usize,
        #[source]
        source: TransportError,
    },

    #[error("cancelled")]
    Cancelled,
}

impl JobError {
    /// Stable machine-readable error class
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::InvalidUrl { .. } => "invalid_url",
            JobError::Extraction(_) => "extraction",
            JobError::Network(_) => "network",
            JobError::Playlist(_) => "playlist",
            JobError::Io { .. } => "io",
            JobError::IncompleteSegments { .. } => "incomplete_segments",
            JobError::Merge(_) => "merge",
            JobError::Split(_) => "split",
            JobError::Upload { .. } => "upload",
            JobError::Cancelled => "cancelled",
        }
    }
}

impl From<FetchError> for JobError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => JobError::Cancelled,
            FetchError::Playlist(p) => JobError::Playlist(p),
            FetchError::Io { path, source } => JobError::Io { path, source },
            other => JobError::Network(other),
        }
    }
}
