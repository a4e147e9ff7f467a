//! Candidate retrieval: fetch the feed and parse its entries.
//!
//! The feed is plain RSS 2.0. Parsing is a single streaming pass over the
//! XML events; each `<item>` accumulates into a partial entry that becomes
//! an [`ArticleIdentity`] when its closing tag arrives. Entries missing a
//! link or a parseable `pubDate` are skipped with a warning, feed order is
//! preserved, and only entries published on the target date (in the
//! harvester's zone) survive.

use crate::fetcher::{FetchError, Fetcher};
use crate::models::ArticleIdentity;
use chrono::{DateTime, FixedOffset, Local, NaiveDate, TimeZone};
use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors while producing the candidate list.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed unreachable")]
    Unreachable(#[from] FetchError),
    #[error("feed is not parseable xml")]
    Parse(#[from] quick_xml::Error),
}

/// Fetch the feed and return the candidates published on `target_date`.
///
/// An unreachable feed is fatal for the run; an empty candidate list is not
/// an error.
#[instrument(level = "info", skip_all, fields(feed_url = %feed_url, date = %target_date))]
pub async fn fetch_candidates<F: Fetcher>(
    fetcher: &F,
    feed_url: &str,
    target_date: NaiveDate,
) -> Result<Vec<ArticleIdentity>, FeedError> {
    let body = fetcher.fetch(feed_url).await?;
    let candidates = parse_feed(&body, target_date)?;
    info!(candidates = candidates.len(), "Feed parsed");
    Ok(candidates)
}

/// Parse an RSS 2.0 document, keeping entries published on `target_date`
/// in local time. Feed order is preserved.
pub fn parse_feed(xml: &str, target_date: NaiveDate) -> Result<Vec<ArticleIdentity>, FeedError> {
    parse_feed_in(xml, target_date, &Local)
}

/// [`parse_feed`] against an explicit zone.
fn parse_feed_in<Tz: TimeZone>(
    xml: &str,
    target_date: NaiveDate,
    tz: &Tz,
) -> Result<Vec<ArticleIdentity>, FeedError> {
    let mut reader = Reader::from_str(xml);
    let mut candidates = Vec::new();
    let mut inside_item = false;
    let mut entry = PartialEntry::default();
    let mut field: Option<Field> = None;
    let mut text_buf = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => match e.name().as_ref() {
                b"item" => {
                    inside_item = true;
                    entry = PartialEntry::default();
                }
                b"title" if inside_item => field = begin_field(Field::Title, &mut text_buf),
                b"link" if inside_item => field = begin_field(Field::Link, &mut text_buf),
                b"author" | b"dc:creator" if inside_item => {
                    field = begin_field(Field::Author, &mut text_buf)
                }
                b"pubDate" if inside_item => field = begin_field(Field::PubDate, &mut text_buf),
                _ => {}
            },
            Event::Text(ref e) => {
                if field.is_some() {
                    if let Ok(text) = e.unescape() {
                        text_buf.push_str(&text);
                    }
                }
            }
            Event::CData(ref e) => {
                if field.is_some() {
                    text_buf.push_str(&String::from_utf8_lossy(e));
                }
            }
            Event::End(ref e) => {
                if e.name().as_ref() == b"item" {
                    inside_item = false;
                    if let Some(identity) = entry.take().finalize(target_date, tz) {
                        candidates.push(identity);
                    }
                } else if let Some(f) = field.take() {
                    entry.assign(f, text_buf.trim());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(candidates)
}

#[derive(Clone, Copy)]
enum Field {
    Title,
    Link,
    Author,
    PubDate,
}

fn begin_field(f: Field, text_buf: &mut String) -> Option<Field> {
    text_buf.clear();
    Some(f)
}

#[derive(Debug, Default)]
struct PartialEntry {
    title: Option<String>,
    link: Option<String>,
    author: Option<String>,
    pub_date: Option<String>,
}

impl PartialEntry {
    fn take(&mut self) -> PartialEntry {
        std::mem::take(self)
    }

    fn assign(&mut self, field: Field, value: &str) {
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Author => &mut self.author,
            Field::PubDate => &mut self.pub_date,
        };
        // First occurrence wins; some feeds repeat author as dc:creator.
        if slot.is_none() && !value.is_empty() {
            *slot = Some(value.to_string());
        }
    }

    fn finalize<Tz: TimeZone>(self, target_date: NaiveDate, tz: &Tz) -> Option<ArticleIdentity> {
        let Some(link) = self.link else {
            warn!(title = ?self.title, "Feed entry has no link, skipping");
            return None;
        };
        let Some(published_at) = self.pub_date.as_deref().and_then(parse_pub_date) else {
            warn!(url = %link, "Feed entry has no parseable pubDate, skipping");
            return None;
        };

        let identity = ArticleIdentity {
            source_url: link,
            title: self.title.unwrap_or_else(|| "Untitled".to_string()),
            author: self.author.unwrap_or_else(|| "Unknown".to_string()),
            published_at,
        };

        if identity.published_date_in(tz) != target_date {
            debug!(url = %identity.source_url, published = %identity.published_at, "Outside target date");
            return None;
        }
        Some(identity)
    }
}

fn parse_pub_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
}
