use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use streambox::config::Config;
use streambox::extract::PageExtractor;
use streambox::fetch::HttpClient;
use streambox::ledger::FjallDedupStore;
use streambox::media::Ffmpeg;
use streambox::pipeline::{Collaborators, JobReport, Pipeline, PipelineError};
use streambox::progress::ProgressDisplay;
use streambox::transport::{ObjectStoreTransport, UploadTransport};

use crate::cli::Cli;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;
type StdinLines = Lines<BufReader<Stdin>>;

pub async fn run(cli: Cli, display: ProgressDisplay) -> Result<(), AnyError> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path.clone())?,
        None => Config::load()?,
    };
    cli.apply(&mut config);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    if cli.workers.is_none() {
        config.pipeline.download_workers = prompt_workers(&mut stdin, config.pipeline.download_workers).await?;
    }
    config.validate()?;

    let http = HttpClient::new(&config.http)?;
    let collaborators = build_collaborators(&config, &http, display.clone())?;
    let pipeline = Pipeline::start(&config, http, collaborators)?;

    match &cli.url_file {
        Some(path) => run_batch(pipeline, path).await,
        None => run_interactive(pipeline, stdin, &display).await,
    }
}

fn build_collaborators(
    config: &Config,
    http: &HttpClient,
    display: ProgressDisplay,
) -> Result<Collaborators, AnyError> {
    let ffmpeg = Arc::new(Ffmpeg::new(&config.media));
    let transport: Option<Arc<dyn UploadTransport>> = if config.distribution.enabled {
        Some(Arc::new(ObjectStoreTransport::from_config(&config.distribution)?))
    } else {
        None
    };

    Ok(Collaborators::builder()
        .extractor(Arc::new(PageExtractor::new(http.clone())?))
        .merger(ffmpeg.clone())
        .splitter(ffmpeg)
        .maybe_transport(transport)
        .dedup(Arc::new(FjallDedupStore::open(&config.dedup.path)?))
        .display(display)
        .build())
}

/// Ask for the download worker count. Empty or invalid input keeps `default`.
async fn prompt_workers(stdin: &mut StdinLines, default: usize) -> Result<usize, AnyError> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("Number of concurrent downloads [{default}]: ").as_bytes())
        .await?;
    stdout.flush().await?;

    let line = stdin.next_line().await?.unwrap_or_default();
    Ok(parse_workers(&line, default))
}

fn parse_workers(input: &str, default: usize) -> usize {
    let input = input.trim();
    if input.is_empty() {
        return default;
    }
    match input.parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => {
            warn!(input, default, "Invalid worker count, using default");
            default
        }
    }
}

/// URLs from a file, `#` lines and blanks ignored.
fn parse_url_list(content: &str) -> Vec<&str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

/// Submit every URL from `path`, then drain. A signal cancels the rest.
async fn run_batch(pipeline: Pipeline, path: &Path) -> Result<(), AnyError> {
    let content = tokio::fs::read_to_string(path).await?;
    let urls = parse_url_list(&content);
    info!(count = urls.len(), file = %path.display(), "Submitting URLs");

    let failures = spawn_failure_collector(&pipeline);

    let snapshot = {
        let drain = async {
            for url in &urls {
                if let Err(PipelineError::Closed) = pipeline.submit(url).await {
                    warn!("Pipeline closed, remaining URLs not submitted");
                    break;
                }
            }
            pipeline.close().await
        };
        tokio::pin!(drain);

        tokio::select! {
            snapshot = &mut drain => snapshot,
            _ = shutdown_signal() => {
                pipeline.cancel();
                drain.await
            }
        }
    };
    // closes the report feed
    drop(pipeline);

    let failed = failures.await.unwrap_or_default();
    print_summary(&snapshot.render_final(), &failed);
    Ok(())
}

/// Read commands from stdin until `exit`, end of input or a signal.
async fn run_interactive(pipeline: Pipeline, mut stdin: StdinLines, display: &ProgressDisplay) -> Result<(), AnyError> {
    println!("Enter a URL per line. Commands: stats, exit");

    let signal = shutdown_signal();
    tokio::pin!(signal);

    let drain = loop {
        let line = tokio::select! {
            _ = &mut signal => break false,
            line = stdin.next_line() => line?,
        };
        let Some(line) = line else {
            // end of input: let submitted jobs finish
            break true;
        };

        match line.trim() {
            "" => {}
            "exit" | "quit" => break false,
            "stats" => display.suspend(|| println!("{}", pipeline.stats())),
            url => {
                let submitted = tokio::select! {
                    _ = &mut signal => break false,
                    submitted = pipeline.submit(url) => submitted,
                };
                display.suspend(|| match submitted {
                    Ok(id) => println!("Queued job {id}"),
                    Err(e) => println!("Not queued: {e}"),
                });
            }
        }
    };

    let snapshot = if drain {
        pipeline.close().await
    } else {
        pipeline.shutdown().await
    };
    println!("{}", snapshot.render_final());
    Ok(())
}

fn spawn_failure_collector(pipeline: &Pipeline) -> tokio::task::JoinHandle<Vec<JobReport>> {
    let mut reports = pipeline.subscribe();
    tokio::spawn(async move {
        let mut failed = Vec::new();
        loop {
            match reports.recv().await {
                Ok(report) if !report.is_success() => failed.push(report),
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "Some job reports were not collected"),
                Err(RecvError::Closed) => break,
            }
        }
        failed
    })
}

fn print_summary(stats: &str, failed: &[JobReport]) {
    println!("{stats}");
    if failed.is_empty() {
        return;
    }
    println!("Failed jobs:");
    for report in failed {
        let reason = report.error.as_deref().unwrap_or("unknown error");
        println!("  {} {}: {}", report.job_id, report.url, reason);
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
            }
        }
        Err(e) => {
            warn!(error = %e, "Could not register SIGTERM handler, waiting for Ctrl+C only");
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
            } else {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl+C");
    } else {
        std::future::pending::<()>().await;
    }
}
