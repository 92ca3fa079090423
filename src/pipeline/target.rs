use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use url::Url;

use super::error::JobError;

const NAME_MAX: usize = 200;
const STRIPPED_EXTENSIONS: [&str; 6] = ["m3u8", "html", "htm", "php", "aspx", "mp4"];

/// Where a job's work lives, derived only from its URL.
///
/// Two submissions that canonicalize to the same URL basename share an
/// output directory and a dedup key; different basenames never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTarget {
    /// Submitted URL without fragment or trailing slash
    pub canonical_url: Url,
    /// Filesystem-safe basename
    pub name: String,
    pub output_dir: PathBuf,
    pub dedup_key: String,
}

impl JobTarget {
    pub fn resolve(raw: &str, output_root: &Path) -> Result<Self, JobError> {
        let invalid = |reason: &str| JobError::InvalidUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("only http and https URLs are supported"));
        }
        url.set_fragment(None);

        let path = url.path().to_string();
        let trimmed = path.trim_end_matches('/');
        if trimmed.len() != path.len() && !trimmed.is_empty() {
            url.set_path(trimmed);
        }

        let basename = url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .map(|segment| percent_decode_str(segment).decode_utf8_lossy())
            .map(|segment| sanitize_name(strip_extension(&segment)))
            .filter(|name| !name.is_empty())
            .or_else(|| url.host_str().map(sanitize_name))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| invalid("cannot derive a name from the URL"))?;

        let output_dir = output_root.join(&basename);
        let dedup_key = output_dir.to_string_lossy().into_owned();

        Ok(Self {
            canonical_url: url,
            name: basename,
            output_dir,
            dedup_key,
        })
    }

    /// Final merged file: `<output_dir>/<name>.mp4`
    pub fn media_file(&self) -> PathBuf {
        self.output_dir.join(format!("{}.mp4", self.name))
    }
}

fn strip_extension(segment: &str) -> &str {
    match segment.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && STRIPPED_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)) =>
        {
            stem
        }
        _ => segment,
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` with `_`, collapse runs of
/// `_`, trim separators from both ends and cap the length.
fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let keep = c.is_ascii_alphanumeric() || matches!(c, '.' | '-');
        if keep {
            out.push(c);
            prev_underscore = false;
        } else if !prev_underscore {
            out.push('_');
            prev_underscore = true;
        }
    }

    out.trim_matches(|c| c == '.' || c == '_' || c == '-')
        .chars()
        .take(NAME_MAX)
        .collect()
}
