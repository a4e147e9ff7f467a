//! Durable progress tracking for harvested articles.
//!
//! Two JSON files record what has already been done:
//!
//! ```text
//! output_dir/
//! ├── _ledger.json            aggregate across all dates, with statistics
//! └── 2026-08-20/
//!     ├── _ledger.json        per-date, authoritative for dedup
//!     └── 001_Some Title.md
//! ```
//!
//! The per-date ledger is loaded once before any fetch starts and persisted
//! after every terminal outcome, via a temp file and rename, so an
//! interrupted run loses at most its in-flight articles. The aggregate is
//! upserted alongside it but never consulted for decisions.

use crate::models::ArticleIdentity;
use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, instrument};

/// Both ledger files share this name; the directory disambiguates.
pub const LEDGER_FILE: &str = "_ledger.json";

const LEDGER_VERSION: &str = "1.0";

/// Errors touching the ledger files.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to read ledger {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger {path} is corrupt; refusing to guess what was fetched")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("ledger {path} is for {found}, expected {expected}")]
    DateMismatch {
        path: String,
        expected: String,
        found: String,
    },
    #[error("failed to write ledger {path}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode ledger")]
    Encode(#[from] serde_json::Error),
}

/// Terminal outcome recorded for one article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Success,
    Failed,
}

/// One article's durable record, keyed by its URL in the ledger maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Local wall-clock time of the terminal outcome, `YYYY-MM-DD HH:MM:SS`.
    pub fetched_at: String,
    pub status: LedgerStatus,
    /// Document filename within the date directory; present iff `success`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Last error text; present iff `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The per-date ledger. Authoritative: a `success` entry here means the
/// named document file exists in the same directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateLedger {
    pub date: String,
    pub entries: BTreeMap<String, LedgerEntry>,
}

impl DateLedger {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date: date.to_string(),
            entries: BTreeMap::new(),
        }
    }

    /// Load the ledger from `date_dir`, or start fresh if none exists.
    ///
    /// A ledger that cannot be parsed, or that belongs to a different date,
    /// is a hard error: silently starting fresh would refetch everything
    /// and overwrite documents.
    #[instrument(level = "debug", skip_all, fields(dir = %date_dir.display()))]
    pub async fn load_or_new(date_dir: &Path, date: NaiveDate) -> Result<Self, LedgerError> {
        let path = date_dir.join(LEDGER_FILE);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No date ledger yet, starting fresh");
                return Ok(Self::new(date));
            }
            Err(source) => {
                return Err(LedgerError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        let ledger: DateLedger =
            serde_json::from_str(&raw).map_err(|source| LedgerError::Corrupt {
                path: path.display().to_string(),
                source,
            })?;
        if ledger.date != date.to_string() {
            return Err(LedgerError::DateMismatch {
                path: path.display().to_string(),
                expected: date.to_string(),
                found: ledger.date,
            });
        }
        debug!(entries = ledger.entries.len(), "Loaded date ledger");
        Ok(ledger)
    }

    pub fn record_success(&mut self, url: &str, file: &str, fetched_at: String) {
        self.entries.insert(
            url.to_string(),
            LedgerEntry {
                fetched_at,
                status: LedgerStatus::Success,
                file: Some(file.to_string()),
                error: None,
            },
        );
    }

    pub fn record_failure(&mut self, url: &str, error: &str, fetched_at: String) {
        self.entries.insert(
            url.to_string(),
            LedgerEntry {
                fetched_at,
                status: LedgerStatus::Failed,
                file: None,
                error: Some(error.to_string()),
            },
        );
    }

    pub fn entry(&self, url: &str) -> Option<&LedgerEntry> {
        self.entries.get(url)
    }

    /// Persist into `date_dir` atomically.
    pub async fn persist(&self, date_dir: &Path) -> Result<(), LedgerError> {
        write_atomic(&date_dir.join(LEDGER_FILE), &serde_json::to_string_pretty(self)?).await
    }
}

/// Running totals across every run and date. Counts record terminal
/// outcomes, so a failure later retried successfully bumps both counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStatistics {
    pub total_fetched: u64,
    pub success_count: u64,
    pub failed_count: u64,
}

/// The aggregate ledger at the output root. Informational only; dedup reads
/// the per-date ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateLedger {
    pub version: String,
    pub entries: BTreeMap<String, LedgerEntry>,
    pub statistics: LedgerStatistics,
}

impl AggregateLedger {
    pub fn new() -> Self {
        Self {
            version: LEDGER_VERSION.to_string(),
            entries: BTreeMap::new(),
            statistics: LedgerStatistics::default(),
        }
    }

    /// Load the aggregate from the output root, or start fresh.
    ///
    /// Unlike the date ledger, corruption here is also a hard error, so a
    /// damaged file surfaces instead of quietly resetting the statistics.
    pub async fn load_or_new(output_root: &Path) -> Result<Self, LedgerError> {
        let path = output_root.join(LEDGER_FILE);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(source) => {
                return Err(LedgerError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        serde_json::from_str(&raw).map_err(|source| LedgerError::Corrupt {
            path: path.display().to_string(),
            source,
        })
    }

    /// Insert or replace the entry for `url` and bump the statistics.
    pub fn upsert(&mut self, url: &str, entry: LedgerEntry) {
        self.statistics.total_fetched += 1;
        match entry.status {
            LedgerStatus::Success => self.statistics.success_count += 1,
            LedgerStatus::Failed => self.statistics.failed_count += 1,
        }
        self.entries.insert(url.to_string(), entry);
    }

    pub async fn persist(&self, output_root: &Path) -> Result<(), LedgerError> {
        write_atomic(
            &output_root.join(LEDGER_FILE),
            &serde_json::to_string_pretty(self)?,
        )
        .await
    }
}

impl Default for AggregateLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop already-completed candidates, preserving order.
///
/// Pure function of the candidate sequence and the date ledger. A URL with a
/// `success` entry is skipped; a `failed` entry stays eligible for another
/// try. Duplicate URLs within the sequence collapse to the first occurrence.
pub fn dedup_filter(candidates: Vec<ArticleIdentity>, ledger: &DateLedger) -> Vec<ArticleIdentity> {
    candidates
        .into_iter()
        .unique_by(|c| c.source_url.clone())
        .filter(|c| match ledger.entry(&c.source_url) {
            Some(entry) => entry.status == LedgerStatus::Failed,
            None => true,
        })
        .collect()
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), LedgerError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)
        .await
        .map_err(|source| LedgerError::Write {
            path: tmp.display().to_string(),
            source,
        })?;
    fs::rename(&tmp, path)
        .await
        .map_err(|source| LedgerError::Write {
            path: path.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 20).unwrap()
    }

    fn identity(url: &str) -> ArticleIdentity {
        ArticleIdentity {
            source_url: url.to_string(),
            title: "t".to_string(),
            author: "a".to_string(),
            published_at: DateTime::parse_from_rfc3339("2026-08-20T10:00:00+08:00").unwrap(),
        }
    }

    fn stamp() -> String {
        "2026-08-20 12:00:00".to_string()
    }

    #[tokio::test]
    async fn test_load_absent_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = DateLedger::load_or_new(dir.path(), date()).await.unwrap();
        assert_eq!(ledger.date, "2026-08-20");
        assert!(ledger.entries.is_empty());
    }

    #[tokio::test]
    async fn test_persist_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = DateLedger::new(date());
        ledger.record_success("https://example.com/1", "001_t.md", stamp());
        ledger.record_failure("https://example.com/2", "http status 500", stamp());
        ledger.persist(dir.path()).await.unwrap();

        let loaded = DateLedger::load_or_new(dir.path(), date()).await.unwrap();
        assert_eq!(loaded.entries.len(), 2);
        let ok = loaded.entry("https://example.com/1").unwrap();
        assert_eq!(ok.status, LedgerStatus::Success);
        assert_eq!(ok.file.as_deref(), Some("001_t.md"));
        let bad = loaded.entry("https://example.com/2").unwrap();
        assert_eq!(bad.status, LedgerStatus::Failed);
        assert_eq!(bad.error.as_deref(), Some("http status 500"));
    }

    #[tokio::test]
    async fn test_persist_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        DateLedger::new(date()).persist(dir.path()).await.unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![LEDGER_FILE.to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_ledger_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LEDGER_FILE), "{ not json").unwrap();
        let err = DateLedger::load_or_new(dir.path(), date()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_date_mismatch_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        DateLedger::new(date()).persist(dir.path()).await.unwrap();
        let other = NaiveDate::from_ymd_opt(2026, 8, 21).unwrap();
        let err = DateLedger::load_or_new(dir.path(), other).await.unwrap_err();
        assert!(matches!(err, LedgerError::DateMismatch { .. }));
    }

    #[test]
    fn test_dedup_skips_success_keeps_failed_and_absent() {
        let mut ledger = DateLedger::new(date());
        ledger.record_success("https://example.com/done", "001_t.md", stamp());
        ledger.record_failure("https://example.com/flaky", "timeout", stamp());

        let candidates = vec![
            identity("https://example.com/done"),
            identity("https://example.com/flaky"),
            identity("https://example.com/new"),
        ];
        let filtered = dedup_filter(candidates, &ledger);
        let urls: Vec<&str> = filtered.iter().map(|c| c.source_url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://example.com/flaky", "https://example.com/new"]
        );
    }

    #[test]
    fn test_dedup_collapses_in_sequence_duplicates() {
        let ledger = DateLedger::new(date());
        let candidates = vec![
            identity("https://example.com/a"),
            identity("https://example.com/b"),
            identity("https://example.com/a"),
        ];
        let filtered = dedup_filter(candidates, &ledger);
        let urls: Vec<&str> = filtered.iter().map(|c| c.source_url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/b"]);
    }

    #[test]
    fn test_dedup_on_empty_ledger_keeps_order() {
        let ledger = DateLedger::new(date());
        let candidates = vec![
            identity("https://example.com/3"),
            identity("https://example.com/1"),
            identity("https://example.com/2"),
        ];
        let filtered = dedup_filter(candidates.clone(), &ledger);
        assert_eq!(filtered, candidates);
    }

    #[tokio::test]
    async fn test_aggregate_upsert_replaces_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut agg = AggregateLedger::new();
        agg.upsert(
            "https://example.com/1",
            LedgerEntry {
                fetched_at: stamp(),
                status: LedgerStatus::Failed,
                file: None,
                error: Some("timeout".to_string()),
            },
        );
        agg.upsert(
            "https://example.com/1",
            LedgerEntry {
                fetched_at: stamp(),
                status: LedgerStatus::Success,
                file: Some("001_t.md".to_string()),
                error: None,
            },
        );
        agg.persist(dir.path()).await.unwrap();

        let loaded = AggregateLedger::load_or_new(dir.path()).await.unwrap();
        assert_eq!(loaded.entries.len(), 1);
        let entry = loaded.entries.get("https://example.com/1").unwrap();
        assert_eq!(entry.status, LedgerStatus::Success);
        assert_eq!(entry.file.as_deref(), Some("001_t.md"));
        assert_eq!(loaded.statistics.total_fetched, 2);
        assert_eq!(loaded.statistics.success_count, 1);
        assert_eq!(loaded.statistics.failed_count, 1);
    }
}
