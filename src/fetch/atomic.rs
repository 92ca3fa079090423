//! Temp-then-rename writes.
//!
//! Content is written to `<final>.tmp` and only renamed onto the final name
//! once complete, so a file under its final name is always whole. A
//! `TempFile` that is dropped before `commit` removes its temp path, which
//! covers failed, cancelled and aborted writes alike.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tracing::{debug, warn};

pub const TEMP_SUFFIX: &str = ".tmp";

/// `<final>.tmp`, next to the final path.
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut name: OsString = final_path.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    committed: bool,
}

impl TempFile {
    /// Claim the temp path for `final_path` without creating it (for writers
    /// such as external tools that create the file themselves).
    pub fn reserve(final_path: &Path) -> Self {
        Self {
            path: temp_path(final_path),
            committed: false,
        }
    }

    /// Create (truncating) the temp file for `final_path`.
    pub async fn create(final_path: &Path) -> io::Result<(Self, File)> {
        let guard = Self::reserve(final_path);
        let file = File::create(&guard.path).await?;
        Ok((guard, file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically move the finished temp file onto `final_path`.
    pub async fn commit(mut self, final_path: &Path) -> io::Result<()> {
        fs::rename(&self.path, final_path).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed incomplete temp file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove temp file"),
        }
    }
}

/// Size of `path` when it exists as a non-empty regular file.
pub async fn non_empty_size(path: &Path) -> Option<u64> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Some(meta.len()),
        _ => None,
    }
}

/// Remove leftover `*.tmp` files in `dir` from interrupted runs.
pub async fn sweep_temp_files(dir: &Path) -> io::Result<usize> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let is_temp = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(TEMP_SUFFIX));
        if is_temp && entry.file_type().await?.is_file() {
            fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }

    if removed > 0 {
        debug!(dir = %dir.display(), removed, "Swept stale temp files");
    }
    Ok(removed)
}
