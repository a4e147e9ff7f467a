//! Data models for feed articles and their processed representations.
//!
//! This module defines the core data structures used throughout the application:
//! - [`ArticleIdentity`]: An article as announced by the feed, keyed by URL
//! - [`NormalizedDocument`]: Readable text extracted from a fetched article
//! - [`StoredDocument`]: Where a document landed on disk

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use std::path::PathBuf;

/// An article as announced by the content feed.
///
/// The identity is immutable once produced by the feed parser. The
/// `source_url` is the unique key for deduplication; two candidates with the
/// same URL are the same article regardless of any other field.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleIdentity {
    /// The canonical article URL, unique key across the whole pipeline.
    pub source_url: String,
    /// The title as announced by the feed.
    pub title: String,
    /// The author as announced by the feed.
    pub author: String,
    /// Publication timestamp from the feed entry.
    pub published_at: DateTime<FixedOffset>,
}

impl ArticleIdentity {
    /// The calendar date this article was published on, in the given zone.
    ///
    /// The feed reports timestamps with their own offsets; date filtering
    /// happens in the harvester's local zone, so the conversion lives here.
    pub fn published_date_in<Tz: TimeZone>(&self, tz: &Tz) -> NaiveDate {
        self.published_at.with_timezone(tz).date_naive()
    }
}

/// Readable text extracted from a fetched article page.
///
/// Title and author fall back to the feed identity when the page's own
/// metadata is missing, so both fields are always populated.
#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    /// The feed identity this document was derived from.
    pub identity: ArticleIdentity,
    /// Best available title (page metadata, falling back to the feed).
    pub title: String,
    /// Best available author (page metadata, falling back to the feed).
    pub author: String,
    /// Publication timestamp as claimed by the page itself, if any.
    pub published_hint: Option<String>,
    /// The normalized article text, paragraphs separated by blank lines.
    pub body: String,
}

/// Where a committed document landed on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Full path of the written Markdown file.
    pub path: PathBuf,
    /// 1-based position within the date partition, in first-success order.
    pub sequence_index: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn identity(url: &str, ts: &str) -> ArticleIdentity {
        ArticleIdentity {
            source_url: url.to_string(),
            title: "Test Article".to_string(),
            author: "Reporter".to_string(),
            published_at: DateTime::parse_from_rfc3339(ts).unwrap(),
        }
    }

    #[test]
    fn test_published_date_same_zone() {
        let id = identity("https://example.com/a", "2026-08-20T10:00:00+08:00");
        let cst = FixedOffset::east_opt(8 * 3600).unwrap();
        assert_eq!(
            id.published_date_in(&cst),
            NaiveDate::from_ymd_opt(2026, 8, 20).unwrap()
        );
    }

    #[test]
    fn test_published_date_crosses_midnight_in_other_zone() {
        // 23:30 UTC on the 20th is already the 21st at UTC+8.
        let id = identity("https://example.com/a", "2026-08-20T23:30:00+00:00");
        let cst = FixedOffset::east_opt(8 * 3600).unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(
            id.published_date_in(&cst),
            NaiveDate::from_ymd_opt(2026, 8, 21).unwrap()
        );
        assert_eq!(
            id.published_date_in(&utc),
            NaiveDate::from_ymd_opt(2026, 8, 20).unwrap()
        );
    }
}
