//! Command-line interface definitions for feedrake.
//!
//! This module defines the CLI arguments and options using the `clap` crate,
//! plus the `today`/`yesterday`/`YYYY-MM-DD` date selector they share.

use chrono::NaiveDate;
use clap::Parser;
use std::str::FromStr;

/// Command-line arguments for the feedrake binary.
///
/// Anything not given here falls back to the config file and then to the
/// built-in defaults; numeric knobs are clamped to their hard ceilings no
/// matter where the value came from.
///
/// # Examples
///
/// ```sh
/// # Harvest today's articles
/// feedrake --feed-url https://example.com/feed.xml -o ./harvest
///
/// # Preview yesterday's candidates without fetching anything
/// feedrake --date yesterday --list-only
///
/// # A specific day, smaller pool, saved report
/// feedrake --date 2026-08-20 --max-workers 2 --save-report
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Target publication date: today, yesterday, or YYYY-MM-DD
    #[arg(short, long, default_value = "today")]
    pub date: DateSelector,

    /// List the date's candidates without fetching anything
    #[arg(long)]
    pub list_only: bool,

    /// Optional path to a feedrake.yaml config file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Feed URL to harvest from
    #[arg(long, env = "FEEDRAKE_FEED_URL")]
    pub feed_url: Option<String>,

    /// Root directory for harvested documents and ledgers
    #[arg(short, long)]
    pub output_dir: Option<String>,

    /// Maximum simultaneous fetches
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Maximum fetch attempts per article
    #[arg(long)]
    pub retry_limit: Option<u32>,

    /// Per-fetch timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Save the run report as Markdown under the output directory
    #[arg(long)]
    pub save_report: bool,
}

/// Which publication date to harvest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DateSelector {
    Today,
    Yesterday,
    Exact(NaiveDate),
}

impl DateSelector {
    /// Resolve to a concrete date, given today's local date.
    pub fn resolve(self, today: NaiveDate) -> NaiveDate {
        match self {
            Self::Today => today,
            Self::Yesterday => today.pred_opt().unwrap_or(today),
            Self::Exact(date) => date,
        }
    }
}

impl FromStr for DateSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" => Ok(Self::Today),
            "yesterday" => Ok(Self::Yesterday),
            other => NaiveDate::parse_from_str(other, "%Y-%m-%d")
                .map(Self::Exact)
                .map_err(|_| format!("expected today, yesterday, or YYYY-MM-DD, got {other:?}")),
        }
    }
}
