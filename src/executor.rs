//! Bounded concurrent fetching with per-item pacing and retries.
//!
//! Each candidate becomes one future that paces itself, fetches, retries on
//! transient errors, and normalizes the page. `buffer_unordered` keeps at
//! most `max_workers` of those futures in flight; outcomes surface in
//! completion order for the caller to persist serially.

use crate::extract::normalize;
use crate::fetcher::Fetcher;
use crate::governor::{retry_backoff, RateGovernor};
use crate::models::{ArticleIdentity, NormalizedDocument};
use chrono::Local;
use futures::stream::{self, Stream, StreamExt};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Terminal result for one candidate.
#[derive(Debug)]
pub enum ItemOutcome {
    Success(NormalizedDocument),
    Failure {
        identity: ArticleIdentity,
        error: String,
        attempts: u32,
    },
}

/// Build the fetch stream for one run.
///
/// Candidates are polled in order but complete in whatever order the
/// network allows. `retry_limit` is clamped upstream to at least 1.
pub fn harvest_stream<'a, F: Fetcher>(
    fetcher: &'a F,
    governor: &'a RateGovernor,
    retry_limit: u32,
    max_workers: usize,
    items: Vec<ArticleIdentity>,
) -> impl Stream<Item = ItemOutcome> + 'a {
    stream::iter(items.into_iter().enumerate())
        .map(move |(index, item)| process_item(fetcher, governor, retry_limit, index, item))
        .buffer_unordered(max_workers)
}

/// Fetch and normalize one candidate, retrying transient fetch errors.
///
/// The base pacing delay is sampled once and re-served before every
/// attempt with the retry backoff stacked on top, so successive attempts
/// for the same item are spaced strictly further apart. Unusable content
/// is terminal; retrying would refetch the same page.
async fn process_item<F: Fetcher>(
    fetcher: &F,
    governor: &RateGovernor,
    retry_limit: u32,
    index: usize,
    item: ArticleIdentity,
) -> ItemOutcome {
    let base = governor.delay_for(Local::now());
    let mut last_error = String::new();

    for attempt in 1..=retry_limit {
        let pause = base + retry_backoff(attempt);
        debug!(
            index,
            attempt,
            pause_ms = pause.as_millis() as u64,
            "Pacing before fetch"
        );
        sleep(pause).await;

        match fetcher.fetch(&item.source_url).await {
            Ok(html) => match normalize(&html, &item) {
                Ok(document) => {
                    info!(index, attempt, url = %item.source_url, "Fetched and normalized");
                    return ItemOutcome::Success(document);
                }
                Err(e) => {
                    warn!(index, url = %item.source_url, error = %e, "Content unusable, not retrying");
                    return ItemOutcome::Failure {
                        identity: item,
                        error: e.to_string(),
                        attempts: attempt,
                    };
                }
            },
            Err(e) => {
                warn!(index, attempt, url = %item.source_url, error = %e, "Fetch attempt failed");
                last_error = e.to_string();
            }
        }
    }

    ItemOutcome::Failure {
        identity: item,
        error: last_error,
        attempts: retry_limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DelaySchedule;
    use crate::fetcher::testing::ScriptedFetcher;
    use crate::fetcher::FetchError;
    use chrono::DateTime;
    use std::time::Duration;

    const PAGE: &str = r#"<html><head><title>Page</title></head><body>
        <div id="js_content"><p>Body text of the article.</p></div>
        </body></html>"#;

    fn identity(url: &str) -> ArticleIdentity {
        ArticleIdentity {
            source_url: url.to_string(),
            title: "Title".to_string(),
            author: "Author".to_string(),
            published_at: DateTime::parse_from_rfc3339("2026-08-20T10:00:00+08:00").unwrap(),
        }
    }

    fn governor() -> RateGovernor {
        RateGovernor::new(DelaySchedule::default())
    }

    async fn collect<F: Fetcher>(
        fetcher: &F,
        retry_limit: u32,
        max_workers: usize,
        items: Vec<ArticleIdentity>,
    ) -> Vec<ItemOutcome> {
        let governor = governor();
        harvest_stream(fetcher, &governor, retry_limit, max_workers, items)
            .collect()
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let fetcher = ScriptedFetcher::new();
        fetcher.script("https://example.com/a", vec![Ok(PAGE.to_string())]);

        let outcomes = collect(&fetcher, 3, 3, vec![identity("https://example.com/a")]).await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], ItemOutcome::Success(doc)
            if doc.body == "Body text of the article."));
        assert_eq!(fetcher.total_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_then_recovers() {
        let fetcher = ScriptedFetcher::new();
        fetcher.script("https://example.com/a", vec![Ok(PAGE.to_string())]);
        fetcher.script(
            "https://example.com/b",
            vec![Err(FetchError::HttpStatus(500)), Ok(PAGE.to_string())],
        );
        fetcher.script("https://example.com/c", vec![Ok(PAGE.to_string())]);

        let items = vec![
            identity("https://example.com/a"),
            identity("https://example.com/b"),
            identity("https://example.com/c"),
        ];
        let outcomes = collect(&fetcher, 3, 3, items).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, ItemOutcome::Success(_))));
        assert_eq!(fetcher.total_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_stop_at_retry_limit() {
        let fetcher = ScriptedFetcher::new();
        fetcher.script(
            "https://example.com/down",
            vec![
                Err(FetchError::HttpStatus(500)),
                Err(FetchError::HttpStatus(502)),
                Err(FetchError::Timeout),
            ],
        );

        let outcomes = collect(&fetcher, 3, 3, vec![identity("https://example.com/down")]).await;
        assert_eq!(fetcher.total_calls(), 3);
        match &outcomes[0] {
            ItemOutcome::Failure {
                identity,
                error,
                attempts,
            } => {
                assert_eq!(identity.source_url, "https://example.com/down");
                assert_eq!(error, "request timed out");
                assert_eq!(*attempts, 3);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_content_is_terminal() {
        let fetcher = ScriptedFetcher::new();
        fetcher.script(
            "https://example.com/empty",
            vec![Ok("<html><body><p>stray</p></body></html>".to_string())],
        );

        let outcomes = collect(&fetcher, 3, 3, vec![identity("https://example.com/empty")]).await;
        assert_eq!(fetcher.total_calls(), 1);
        assert!(matches!(&outcomes[0], ItemOutcome::Failure { error, attempts: 1, .. }
            if error == "page has no readable content"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_fetches_bounded_by_max_workers() {
        let fetcher = ScriptedFetcher::with_fetch_duration(Duration::from_secs(60));
        let mut items = Vec::new();
        for i in 0..6 {
            let url = format!("https://example.com/{i}");
            fetcher.script(&url, vec![Ok(PAGE.to_string())]);
            items.push(identity(&url));
        }

        let outcomes = collect(&fetcher, 3, 2, items).await;
        assert_eq!(outcomes.len(), 6);
        assert_eq!(fetcher.max_in_flight(), 2);
    }
}
