use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{
    CONCAT_MANIFEST, MediaError, MediaMerger, MediaSplitter, Result, concat_manifest,
    format_timestamp, part_count, part_path,
};
use crate::config::MediaConfig;
use crate::fetch::atomic::TempFile;
use crate::fetch::is_segment_file_name;
use crate::humanize::ByteSize;

const STDERR_TAIL: usize = 600;

/// Merge and split by shelling out to `ffmpeg` / `ffprobe` with stream copy.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    keep_segments: bool,
}

impl Ffmpeg {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
            keep_segments: config.keep_segments,
        }
    }

    async fn run(&self, program: &Path, args: Vec<OsString>) -> Result<Output> {
        let name = program.display().to_string();
        debug!(program = %name, ?args, "Running media tool");

        let output = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| MediaError::Spawn {
                program: name.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail_start = stderr.len().saturating_sub(STDERR_TAIL);
            let tail_start = (tail_start..stderr.len())
                .find(|&i| stderr.is_char_boundary(i))
                .unwrap_or(stderr.len());
            return Err(MediaError::Command {
                program: name,
                status: output.status.to_string(),
                stderr: stderr[tail_start..].trim().to_string(),
            });
        }

        Ok(output)
    }

    async fn probe_duration(&self, media: &Path) -> Result<f64> {
        let args = args([
            "-v".into(),
            "error".into(),
            "-show_entries".into(),
            "format=duration".into(),
            "-of".into(),
            "default=noprint_wrappers=1:nokey=1".into(),
            media.into(),
        ]);
        let output = self.run(&self.ffprobe, args).await?;
        let text = String::from_utf8_lossy(&output.stdout);

        text.trim()
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite() && *d > 0.0)
            .ok_or_else(|| MediaError::Duration(format!("unexpected ffprobe output {:?}", text.trim())))
    }
}

fn args<const N: usize>(items: [OsString; N]) -> Vec<OsString> {
    items.into()
}

/// Segment file names in `dir`, in index order.
async fn segment_names(dir: &Path) -> Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| MediaError::io(dir, e))?;

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| MediaError::io(dir, e))? {
        if let Some(name) = entry.file_name().to_str() {
            if is_segment_file_name(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[async_trait]
impl MediaMerger for Ffmpeg {
    async fn merge(&self, segment_dir: &Path, thumbnail: Option<&Path>, output: &Path) -> Result<()> {
        let names = segment_names(segment_dir).await?;
        if names.is_empty() {
            return Err(MediaError::NoSegments {
                dir: segment_dir.to_path_buf(),
            });
        }

        let manifest = segment_dir.join(CONCAT_MANIFEST);
        tokio::fs::write(&manifest, concat_manifest(&names))
            .await
            .map_err(|e| MediaError::io(&manifest, e))?;

        let temp = TempFile::reserve(output);
        let mut cmd = args([
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            manifest.clone().into(),
        ]);
        match thumbnail {
            Some(thumb) => cmd.extend(args([
                "-i".into(),
                thumb.into(),
                "-map".into(),
                "0".into(),
                "-map".into(),
                "1".into(),
                "-c".into(),
                "copy".into(),
                "-disposition:v:1".into(),
                "attached_pic".into(),
            ])),
            None => cmd.extend(args(["-c".into(), "copy".into()])),
        }
        cmd.extend(args(["-f".into(), "mp4".into(), "-y".into(), temp.path().into()]));

        let result = self.run(&self.ffmpeg, cmd).await;

        if let Err(e) = tokio::fs::remove_file(&manifest).await {
            warn!(path = %manifest.display(), error = %e, "Failed to remove concat manifest");
        }
        result?;

        temp.commit(output).await.map_err(|e| MediaError::io(output, e))?;
        info!(output = %output.display(), segments = names.len(), "Merged segments");

        if !self.keep_segments {
            for name in &names {
                let path = segment_dir.join(name);
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to remove segment");
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl MediaSplitter for Ffmpeg {
    async fn split(&self, media: &Path, threshold: ByteSize) -> Result<Vec<PathBuf>> {
        let size = tokio::fs::metadata(media)
            .await
            .map_err(|e| MediaError::io(media, e))?
            .len();

        let parts = part_count(size, threshold);
        if parts <= 1 {
            return Ok(vec![media.to_path_buf()]);
        }

        let duration = self.probe_duration(media).await?;
        let part_duration = duration / parts as f64;
        info!(media = %media.display(), size, parts, duration, "Splitting media");

        let mut created: Vec<PathBuf> = Vec::with_capacity(parts);
        for i in 0..parts {
            let part = part_path(media, i + 1);
            let cmd = args([
                "-hide_banner".into(),
                "-loglevel".into(),
                "error".into(),
                "-i".into(),
                media.into(),
                "-ss".into(),
                format_timestamp(part_duration * i as f64).into(),
                "-t".into(),
                format_timestamp(part_duration).into(),
                "-c".into(),
                "copy".into(),
                "-avoid_negative_ts".into(),
                "make_zero".into(),
                "-y".into(),
                part.clone().into(),
            ]);

            if let Err(e) = self.run(&self.ffmpeg, cmd).await {
                created.push(part);
                for path in &created {
                    let _ = tokio::fs::remove_file(path).await;
                }
                return Err(e);
            }
            debug!(part = %part.display(), index = i + 1, parts, "Wrote part");
            created.push(part);
        }

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::MIB;
    use tempfile::TempDir;

    fn tools_at(bin: &str) -> Ffmpeg {
        Ffmpeg {
            ffmpeg: PathBuf::from(bin),
            ffprobe: PathBuf::from(bin),
            keep_segments: true,
        }
    }

    #[tokio::test]
    async fn test_small_file_is_not_split() {
        let dir = TempDir::new().unwrap();
        let media = dir.path().join("clip.mp4");
        std::fs::write(&media, vec![0u8; 4096]).unwrap();

        // the tool is never invoked for files under the threshold
        let parts = tools_at("/nonexistent/ffmpeg")
            .split(&media, ByteSize(MIB))
            .await
            .unwrap();
        assert_eq!(parts, vec![media]);
    }

    #[tokio::test]
    async fn test_merge_without_segments_fails_early() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let err = tools_at("/nonexistent/ffmpeg")
            .merge(dir.path(), None, &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::NoSegments { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error_and_cleans_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("segment_0000.ts"), b"x").unwrap();

        let err = tools_at("/nonexistent/ffmpeg")
            .merge(dir.path(), None, &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Spawn { .. }));
        assert!(!dir.path().join(CONCAT_MANIFEST).exists());
        assert!(!dir.path().join("out.mp4").exists());
    }

    #[tokio::test]
    async fn test_segment_names_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        for name in ["segment_0002.ts", "segment_0000.ts", "segment_0001.ts.tmp", "cover.jpg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let names = segment_names(dir.path()).await.unwrap();
        assert_eq!(names, vec!["segment_0000.ts", "segment_0002.ts"]);
    }
}
