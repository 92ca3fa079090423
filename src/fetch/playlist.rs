//! Line-oriented HLS playlist parsing.
//!
//! Only what the fetcher needs is understood: media URIs (every non-empty,
//! non-`#` line) and `#EXT-X-STREAM-INF` variants of a master playlist.
//! Relative URIs resolve against the playlist's own URL.

use thiserror::Error;
use tracing::warn;
use url::Url;

const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF:";

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("playlist contains no segments")]
    NoSegments,

    #[error("master playlist did not resolve to a media playlist")]
    NestedMaster,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub uri: Url,
    pub bandwidth: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Playlist {
    /// Ordered segment URLs
    Media(Vec<Url>),
    /// Alternative renditions
    Master(Vec<Variant>),
}

impl Playlist {
    /// The variant with the highest advertised bandwidth.
    pub fn best_variant(&self) -> Option<&Variant> {
        match self {
            Playlist::Master(variants) => variants.iter().max_by_key(|v| v.bandwidth),
            Playlist::Media(_) => None,
        }
    }
}

pub fn parse(content: &str, base: &Url) -> Playlist {
    let mut segments = Vec::new();
    let mut variants = Vec::new();
    let mut pending_bandwidth: Option<u64> = None;

    for line in content.lines().map(str::trim) {
        if let Some(attrs) = line.strip_prefix(STREAM_INF_TAG) {
            pending_bandwidth = Some(bandwidth(attrs));
            continue;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let uri = match base.join(line) {
            Ok(uri) => uri,
            Err(e) => {
                warn!(line, error = %e, "Skipping unresolvable playlist entry");
                pending_bandwidth = None;
                continue;
            }
        };

        match pending_bandwidth.take() {
            Some(bandwidth) => variants.push(Variant { uri, bandwidth }),
            None => segments.push(uri),
        }
    }

    if variants.is_empty() {
        Playlist::Media(segments)
    } else {
        Playlist::Master(variants)
    }
}

/// `BANDWIDTH=` from an attribute list; 0 when absent or malformed.
fn bandwidth(attrs: &str) -> u64 {
    attrs
        .split(',')
        .filter_map(|attr| attr.trim().strip_prefix("BANDWIDTH="))
        .find_map(|value| value.parse().ok())
        .unwrap_or(0)
}
