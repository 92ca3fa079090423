mod app;
mod cli;

use clap::Parser;
use cli::Cli;
use streambox::progress::ProgressDisplay;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // log lines go through the bars' terminal so neither overwrites the other
    let display = ProgressDisplay::stderr();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(display.clone())
        .init();

    let cli = Cli::parse();
    app::run(cli, display).await
}
