//! Smoke-test harness for the gallery download engine.
//!
//! Stands in for the GUI embedding process (§5): builds the default
//! collaborators, enqueues one or more gallery URLs, and drives the
//! orchestrator to completion while printing the event stream.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use gallery_core::{
    CircuitBreaker, DefaultNamingProvider, DownloadOptions, EventBus, GalleryProcessor,
    GalleryTask, NullUiSink, Orchestrator, ResumeStore, RetryExecutor, StateStore,
    TokioFileSystem,
};
use tracing::{debug, info};

/// Drive the gallery download engine against one or more gallery URLs.
#[derive(Parser, Debug)]
#[command(name = "gallery-harness")]
#[command(author, version, about)]
struct Args {
    /// Gallery URLs to download. Read from stdin (one per line) if omitted.
    urls: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory resume/state files and downloaded galleries are written under.
    #[arg(short, long, default_value = ".")]
    base_dir: PathBuf,

    /// Override the per-page retry limit (default comes from error category policy).
    #[arg(short = 'r', long)]
    max_retries: Option<u32>,

    /// Raw `Cookie:` header value forwarded to every request (for ExHentai sessions).
    #[arg(long)]
    cookies: Option<String>,

    /// Only download pages in this 1-based absolute range, e.g. --range 30-50.
    #[arg(long)]
    range: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "harness arguments parsed");

    let urls = if !args.urls.is_empty() {
        args.urls.clone()
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer.lines().map(str::to_string).filter(|line| !line.trim().is_empty()).collect()
    } else {
        info!("No gallery URLs provided. Pass them as arguments or pipe via stdin.");
        return Ok(());
    };

    let range = args
        .range
        .as_deref()
        .and_then(parse_range);

    let bus = EventBus::new();
    let state = Arc::new(StateStore::new(bus.clone()));
    let resume = Arc::new(
        ResumeStore::load(args.base_dir.join("resume.json"))
            .await
            .map_err(|error| anyhow::anyhow!("failed to load resume store: {error}"))?,
    );
    let processor = Arc::new(GalleryProcessor::new(
        RetryExecutor::new(CircuitBreaker::with_defaults(), bus.clone()),
        resume,
        Arc::clone(&state),
        bus.clone(),
        Arc::new(DefaultNamingProvider),
        Arc::new(TokioFileSystem),
        Arc::new(NullUiSink),
    ));
    let orchestrator = Arc::new(Orchestrator::new(processor, bus.clone(), state));

    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            info!(?event, "engine event");
        }
    });

    for (index, url) in urls.iter().enumerate() {
        let mut task = GalleryTask::new(url.clone(), index, args.base_dir.clone());
        task.applied_range = range;
        task.user_max_retries = args.max_retries;
        orchestrator.enqueue(task).await;
    }

    let options = DownloadOptions {
        cookies: args.cookies.clone(),
        ..DownloadOptions::default()
    };

    orchestrator
        .run_all(&options, &|| false)
        .await
        .map_err(|error| anyhow::anyhow!("engine run failed: {error}"))?;

    info!("harness run complete");
    Ok(())
}

fn parse_range(raw: &str) -> Option<gallery_core::DownloadRange> {
    let (start, end) = raw.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = end.trim().parse().ok()?;
    Some(gallery_core::DownloadRange { start, end })
}
