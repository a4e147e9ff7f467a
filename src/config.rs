//! Harvest configuration: file loading, CLI merging, and hard-bound clamping.
//!
//! Configuration comes from three layers, highest precedence first: CLI
//! flags, a YAML config file (`--config`, or `feedrake.yaml` when present),
//! and built-in defaults. Whatever the source, the numeric knobs are clamped
//! to the hard ceilings below; the upstream treats aggressive crawlers
//! harshly, so the ceilings are not tunable.

use crate::cli::Cli;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Hard ceiling on simultaneous fetches.
pub const MAX_WORKERS_CEILING: usize = 3;
/// Hard ceiling on fetch attempts per article.
pub const RETRY_LIMIT_CEILING: u32 = 3;
/// Hard bounds on every delay-band edge, in seconds.
pub const DELAY_FLOOR_SECS: f64 = 3.0;
pub const DELAY_CEILING_SECS: f64 = 15.0;
/// Hard bounds on the per-fetch timeout, in seconds.
pub const TIMEOUT_MIN_SECS: u64 = 5;
pub const TIMEOUT_MAX_SECS: u64 = 120;

const DEFAULT_OUTPUT_DIR: &str = "harvest";
const DEFAULT_MAX_WORKERS: usize = 3;
const DEFAULT_RETRY_LIMIT: u32 = 3;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Errors surfaced while assembling the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("feed url is required (pass --feed-url, set FEEDRAKE_FEED_URL, or add feed_url to the config file)")]
    MissingFeedUrl,
    #[error("invalid feed url {url:?}: {reason}")]
    InvalidFeedUrl { url: String, reason: String },
}

/// One delay-sampling range, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DelayBand {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DelayBand {
    fn clamped(self, label: &str) -> DelayBand {
        let mut min = self.min_secs.clamp(DELAY_FLOOR_SECS, DELAY_CEILING_SECS);
        let max = self.max_secs.clamp(DELAY_FLOOR_SECS, DELAY_CEILING_SECS);
        if (min, max) != (self.min_secs, self.max_secs) {
            warn!(
                band = label,
                requested_min = self.min_secs,
                requested_max = self.max_secs,
                "Delay band outside {DELAY_FLOOR_SECS}-{DELAY_CEILING_SECS}s, clamping"
            );
        }
        if min > max {
            warn!(band = label, "Delay band min exceeds max, using max for both");
            min = max;
        }
        DelayBand {
            min_secs: min,
            max_secs: max,
        }
    }
}

/// Per-band delay bounds plus the wall-clock hours where each band starts.
///
/// Daytime runs [daytime_start_hour, evening_start_hour), evening runs
/// [evening_start_hour, 24), overnight covers the rest.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct DelaySchedule {
    pub daytime: DelayBand,
    pub evening: DelayBand,
    pub overnight: DelayBand,
    pub daytime_start_hour: u32,
    pub evening_start_hour: u32,
}

impl Default for DelaySchedule {
    fn default() -> Self {
        DelaySchedule {
            daytime: DelayBand {
                min_secs: 10.0,
                max_secs: 15.0,
            },
            evening: DelayBand {
                min_secs: 7.0,
                max_secs: 12.0,
            },
            overnight: DelayBand {
                min_secs: 3.0,
                max_secs: 7.0,
            },
            daytime_start_hour: 9,
            evening_start_hour: 19,
        }
    }
}

/// The shape of the YAML config file. Every field is optional; missing
/// values fall through to the CLI layer's defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub feed_url: Option<String>,
    pub output_dir: Option<String>,
    pub max_workers: Option<usize>,
    pub retry_limit: Option<u32>,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub delays: DelaySchedule,
}

impl ConfigFile {
    /// Load and parse a YAML config file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }
}

/// The resolved, clamped configuration the pipeline runs with.
///
/// Immutable once built; the executor and governor receive it by reference
/// at construction and never renegotiate the bounds.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub feed_url: String,
    pub output_dir: String,
    pub max_workers: usize,
    pub retry_limit: u32,
    pub timeout_secs: u64,
    pub delays: DelaySchedule,
}

impl HarvestConfig {
    pub const DEFAULT_CONFIG_PATH: &'static str = "feedrake.yaml";

    /// Assemble the configuration from CLI flags, the config file, and
    /// defaults, then clamp everything to the hard bounds.
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match cli.config.as_deref() {
            Some(path) => ConfigFile::load(path)?,
            None if Path::new(Self::DEFAULT_CONFIG_PATH).exists() => {
                ConfigFile::load(Self::DEFAULT_CONFIG_PATH)?
            }
            None => ConfigFile::default(),
        };

        let feed_url = cli
            .feed_url
            .clone()
            .or(file.feed_url)
            .ok_or(ConfigError::MissingFeedUrl)?;
        validate_feed_url(&feed_url)?;

        let mut config = HarvestConfig {
            feed_url,
            output_dir: cli
                .output_dir
                .clone()
                .or(file.output_dir)
                .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()),
            max_workers: cli
                .max_workers
                .or(file.max_workers)
                .unwrap_or(DEFAULT_MAX_WORKERS),
            retry_limit: cli
                .retry_limit
                .or(file.retry_limit)
                .unwrap_or(DEFAULT_RETRY_LIMIT),
            timeout_secs: cli
                .timeout_secs
                .or(file.timeout_secs)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            delays: file.delays,
        };
        config.clamp();
        Ok(config)
    }

    /// Force every knob into its hard bounds, warning per adjustment.
    fn clamp(&mut self) {
        if self.max_workers < 1 || self.max_workers > MAX_WORKERS_CEILING {
            let clamped = self.max_workers.clamp(1, MAX_WORKERS_CEILING);
            warn!(
                requested = self.max_workers,
                clamped, "max_workers outside 1-{MAX_WORKERS_CEILING}, clamping"
            );
            self.max_workers = clamped;
        }
        if self.retry_limit < 1 || self.retry_limit > RETRY_LIMIT_CEILING {
            let clamped = self.retry_limit.clamp(1, RETRY_LIMIT_CEILING);
            warn!(
                requested = self.retry_limit,
                clamped, "retry_limit outside 1-{RETRY_LIMIT_CEILING}, clamping"
            );
            self.retry_limit = clamped;
        }
        if self.timeout_secs < TIMEOUT_MIN_SECS || self.timeout_secs > TIMEOUT_MAX_SECS {
            let clamped = self.timeout_secs.clamp(TIMEOUT_MIN_SECS, TIMEOUT_MAX_SECS);
            warn!(
                requested = self.timeout_secs,
                clamped, "timeout_secs outside {TIMEOUT_MIN_SECS}-{TIMEOUT_MAX_SECS}, clamping"
            );
            self.timeout_secs = clamped;
        }
        self.delays.daytime = self.delays.daytime.clamped("daytime");
        self.delays.evening = self.delays.evening.clamped("evening");
        self.delays.overnight = self.delays.overnight.clamped("overnight");
        if self.delays.daytime_start_hour >= 24
            || self.delays.evening_start_hour >= 24
            || self.delays.evening_start_hour <= self.delays.daytime_start_hour
        {
            warn!(
                daytime_start_hour = self.delays.daytime_start_hour,
                evening_start_hour = self.delays.evening_start_hour,
                "Band start hours must be below 24 and in order, using defaults"
            );
            let defaults = DelaySchedule::default();
            self.delays.daytime_start_hour = defaults.daytime_start_hour;
            self.delays.evening_start_hour = defaults.evening_start_hour;
        }
    }
}

fn validate_feed_url(raw: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(raw).map_err(|e| ConfigError::InvalidFeedUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidFeedUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}
