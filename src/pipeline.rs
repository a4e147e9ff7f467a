//! Ties one run together: candidates in, documents and a report out.

use crate::cli::Cli;
use crate::config::HarvestConfig;
use crate::executor::{harvest_stream, ItemOutcome};
use crate::feed;
use crate::fetcher::{ensure_curl_available, CurlFetcher, Fetcher};
use crate::governor::RateGovernor;
use crate::ledger::{dedup_filter, DateLedger};
use crate::models::ArticleIdentity;
use crate::report::{render_listing, FailureNote, RunReport};
use crate::utils::ensure_writable_dir;
use crate::writer::{DocumentWriter, WriteError};
use chrono::{Local, NaiveDate};
use futures::StreamExt;
use std::error::Error;
use std::path::Path;
use std::time::Instant;
use tracing::{info, instrument};

/// Run the harvester for the CLI's target date.
///
/// Fatal errors (bad config, missing curl, unreachable feed, unusable
/// ledger) abort the run; per-article failures never do.
pub async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let date = cli.date.resolve(Local::now().date_naive());
    let config = HarvestConfig::resolve(&cli)?;
    ensure_curl_available().await?;
    ensure_writable_dir(&config.output_dir).await?;
    info!(%date, feed_url = %config.feed_url, "Starting harvest run");

    let feed_fetcher = CurlFetcher::for_feeds(config.timeout_secs);
    let candidates = feed::fetch_candidates(&feed_fetcher, &config.feed_url, date).await?;
    let output_root = Path::new(&config.output_dir);

    if cli.list_only {
        let date_dir = output_root.join(date.to_string());
        let ledger = DateLedger::load_or_new(&date_dir, date).await?;
        print!("{}", render_listing(date, &candidates, &ledger));
        return Ok(());
    }

    let mut writer = DocumentWriter::open(output_root, date).await?;
    let page_fetcher = CurlFetcher::for_pages(config.timeout_secs);
    let report = execute(&page_fetcher, &config, date, candidates, &mut writer).await?;

    print!("{}", report.render_markdown());
    if cli.save_report {
        report.save(output_root).await?;
    }
    Ok(())
}

/// Fetch everything still outstanding for `date` and persist the outcomes.
///
/// The stream completes items in arbitrary order; this single consumer
/// commits them serially, so sequence numbers and ledger writes never race.
#[instrument(level = "info", skip_all, fields(date = %date))]
pub async fn execute<F: Fetcher>(
    fetcher: &F,
    config: &HarvestConfig,
    date: NaiveDate,
    candidates: Vec<ArticleIdentity>,
    writer: &mut DocumentWriter,
) -> Result<RunReport, WriteError> {
    let started = Instant::now();
    let feed_total = candidates.len();
    let eligible = dedup_filter(candidates, writer.ledger());
    let skipped = feed_total - eligible.len();
    let attempted = eligible.len();
    info!(feed_total, skipped, attempted, "Dispatching candidates");

    let governor = RateGovernor::new(config.delays);
    let mut outcomes = harvest_stream(
        fetcher,
        &governor,
        config.retry_limit,
        config.max_workers,
        eligible,
    );

    let mut succeeded = 0;
    let mut failures = Vec::new();
    while let Some(outcome) = outcomes.next().await {
        match outcome {
            ItemOutcome::Success(document) => {
                writer.commit(&document).await?;
                succeeded += 1;
            }
            ItemOutcome::Failure {
                identity,
                error,
                attempts,
            } => {
                writer.record_failure(&identity.source_url, &error).await?;
                failures.push(FailureNote {
                    title: identity.title,
                    url: identity.source_url,
                    error,
                    attempts,
                });
            }
        }
    }

    info!(succeeded, failed = failures.len(), "Run complete");
    Ok(RunReport {
        date,
        feed_total,
        skipped,
        attempted,
        succeeded,
        failed: failures.len(),
        failures,
        elapsed: started.elapsed(),
        date_dir: writer.date_dir().to_path_buf(),
    })
}
