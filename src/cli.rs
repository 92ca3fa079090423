use clap::Parser;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use streambox::config::Config;

#[derive(Parser, Debug)]
#[command(name = "streambox", version)]
#[command(about = "Download segmented video streams and optionally distribute them", long_about = None)]
pub struct Cli {
    /// Config file (defaults to $STREAMBOX_CONFIG or config/streambox.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Root directory for per-job output directories
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Upload finished media to the configured destination
    #[arg(long)]
    pub remote: bool,

    /// Concurrent download jobs; prompted for when omitted
    #[arg(short, long)]
    pub workers: Option<NonZeroUsize>,

    /// Disable the live progress display
    #[arg(long)]
    pub no_progress: bool,

    /// File with one URL per line (`#` starts a comment). Without it,
    /// URLs are read interactively.
    #[arg(value_name = "URL_FILE")]
    pub url_file: Option<PathBuf>,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(output) = &self.output {
            config.pipeline.output_dir = output.clone();
        }
        if self.remote {
            config.distribution.enabled = true;
        }
        if let Some(workers) = self.workers {
            config.pipeline.download_workers = workers.get();
        }
        if self.no_progress {
            config.progress.enabled = false;
        }
    }
}
