use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub distribution: DistributionConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
}

/// Stage pool sizes, queue capacities and where jobs write their files
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,
    #[serde(default = "default_download_workers")]
    pub download_workers: usize,
    #[serde(default = "default_upload_workers")]
    pub upload_workers: usize,
    /// Capacity of every inter-stage queue except the result queue
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Concurrent segment requests inside one job
    #[serde(default = "default_segment_concurrency")]
    pub segment_concurrency: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl PipelineConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// The result stage only counts and logs, so its queue holds one slot per
    /// worker that can feed it plus the regular queue depth.
    pub fn result_queue_size(&self) -> usize {
        self.queue_size + self.dispatch_workers + self.download_workers + self.upload_workers
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dispatch_workers: default_dispatch_workers(),
            download_workers: default_download_workers(),
            upload_workers: default_upload_workers(),
            queue_size: default_queue_size(),
            segment_concurrency: default_segment_concurrency(),
            output_dir: default_output_dir(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

fn default_dispatch_workers() -> usize {
    1
}

fn default_download_workers() -> usize {
    3
}

fn default_upload_workers() -> usize {
    1
}

fn default_queue_size() -> usize {
    3
}

fn default_segment_concurrency() -> usize {
    8
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./")
}

fn default_stats_interval_secs() -> u64 {
    10
}

/// Outbound HTTP settings shared by playlist, page and segment requests
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpSettings {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_user_agent() -> String {
    format!("StreamBox/{}", env!("CARGO_PKG_VERSION"))
}

/// Terminal progress display
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProgressConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_render_interval_ms")]
    pub render_interval_ms: u64,
}

impl ProgressConfig {
    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms)
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            render_interval_ms: default_render_interval_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_render_interval_ms() -> u64 {
    100
}

/// External media tooling used for merge and split
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    /// Files larger than this are cut into parts before upload
    #[serde(default = "default_split_threshold")]
    pub split_threshold: ByteSize,
    /// Keep segment files next to the merged output
    #[serde(default = "default_true")]
    pub keep_segments: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            split_threshold: default_split_threshold(),
            keep_segments: true,
        }
    }
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_split_threshold() -> ByteSize {
    ByteSize::mib(1900)
}

/// Upload backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionProvider {
    #[default]
    Local,
    Memory,
}

/// Remote distribution of finished media
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DistributionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub provider: DistributionProvider,
    /// Root directory for the local provider
    pub root: Option<PathBuf>,
    /// Target channel/prefix the parts are published under (may come from
    /// the environment, see `DISTRIBUTION_TARGET`)
    pub destination: Option<String>,
}

/// Persistent record of completed jobs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_path")]
    pub path: PathBuf,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            path: default_dedup_path(),
        }
    }
}

fn default_dedup_path() -> PathBuf {
    PathBuf::from("data/dedup")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.pipeline.download_workers, 3);
        assert_eq!(config.pipeline.upload_workers, 1);
        assert_eq!(config.pipeline.segment_concurrency, 8);
        assert_eq!(config.pipeline.stats_interval(), Duration::from_secs(10));
        assert_eq!(config.progress.render_interval(), Duration::from_millis(100));
        assert_eq!(config.media.split_threshold.whole_mib(), 1900);
        assert!(!config.distribution.enabled);
    }

    #[test]
    fn test_result_queue_covers_all_producers() {
        let pipeline = PipelineConfig::default();
        assert_eq!(pipeline.result_queue_size(), 3 + 1 + 3 + 1);
    }
}
