//! # feedrake
//!
//! An incremental article harvester that reads an RSS feed, fetches each
//! article published on a target date through a curl subprocess, and writes
//! Markdown documents plus a durable progress ledger so interrupted runs
//! resume where they stopped.
//!
//! ## Features
//!
//! - Candidate discovery from any RSS 2.0 feed, filtered to one publication
//!   date in local time
//! - First-seen dedup against the per-date ledger; failed articles stay
//!   eligible for the next run
//! - Wall-clock-aware pacing (slower during the day, faster overnight) with
//!   exponential retry backoff per article
//! - A bounded worker pool (at most 3 concurrent fetches) built on
//!   `buffer_unordered`
//! - Crash-safe output: documents first, ledger second, atomic ledger writes
//!
//! ## Usage
//!
//! ```sh
//! feedrake --feed-url https://example.com/feed.xml -o ./harvest
//! feedrake --date yesterday --list-only
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Discovery**: Fetch and parse the feed, keep the target date's items
//! 2. **Dedup**: Drop candidates the per-date ledger already marks done
//! 3. **Fetching**: Paced, bounded, retried curl fetches (parallel, 3 at a time)
//! 4. **Output**: Markdown documents, ledgers, and a run report

use clap::Parser;
use std::error::Error;
use tracing::{debug, info, instrument};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod cli;
mod config;
mod executor;
mod extract;
mod feed;
mod fetcher;
mod governor;
mod ledger;
mod models;
mod pipeline;
mod report;
mod utils;
mod writer;

use cli::Cli;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("feedrake starting up");

    let args = Cli::parse();
    debug!(?args.date, ?args.list_only, "Parsed CLI arguments");

    pipeline::run(args).await?;

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}
