//! HTML to readable-text conversion.
//!
//! Takes a fetched article page and produces a [`NormalizedDocument`]: the
//! best available title, author, and publication hint from the page's
//! OpenGraph metadata, plus the article body flattened to text paragraphs.
//! Pure, no side effects.
//!
//! A page without a recognizable content container is malformed. That is a
//! terminal verdict for the article, not a transient one; refetching the
//! same page yields the same bytes, so the caller must not retry.

use crate::models::{ArticleIdentity, NormalizedDocument};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::debug;

/// Content containers, most specific first. The first two are the
/// WeChat-style article shells, the rest generic fallbacks.
static CONTENT_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["#js_content", ".rich_media_content", "article", "main"]
        .iter()
        .map(|s| Selector::parse(s).unwrap())
        .collect()
});

static OG_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static OG_AUTHOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:article:author"]"#).unwrap());
static OG_PUBLISHED: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:article:published_time"]"#).unwrap());
static TITLE_TAG: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());

/// Errors while normalizing a fetched page.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("page has no readable content")]
    MalformedContent,
}

/// Convert a fetched article page into a [`NormalizedDocument`].
///
/// Title and author prefer the page's own metadata and fall back to the
/// feed identity, so the result always has both.
pub fn normalize(html: &str, identity: &ArticleIdentity) -> Result<NormalizedDocument, ExtractError> {
    let document = Html::parse_document(html);

    let container = CONTENT_SELECTORS
        .iter()
        .find_map(|sel| document.select(sel).next())
        .ok_or(ExtractError::MalformedContent)?;

    let body = flatten_paragraphs(container);
    if body.is_empty() {
        return Err(ExtractError::MalformedContent);
    }

    let title = meta_content(&document, &OG_TITLE)
        .or_else(|| {
            document
                .select(&TITLE_TAG)
                .next()
                .map(|t| collapse_whitespace(&t.text().collect::<String>()))
                .filter(|t| !t.is_empty())
        })
        .unwrap_or_else(|| identity.title.clone());

    let author = meta_content(&document, &OG_AUTHOR).unwrap_or_else(|| identity.author.clone());
    let published_hint = meta_content(&document, &OG_PUBLISHED);

    debug!(
        url = %identity.source_url,
        bytes = body.len(),
        "Normalized article"
    );

    Ok(NormalizedDocument {
        identity: identity.clone(),
        title,
        author,
        published_hint,
        body,
    })
}

/// One paragraph per direct child of the container, blank lines between.
///
/// WeChat article shells hold a flat run of `<p>` (or `<section>`) children;
/// a container with no element children degrades to its raw text.
fn flatten_paragraphs(container: ElementRef) -> String {
    let mut paragraphs = Vec::new();
    for child in container.children() {
        if let Some(element) = ElementRef::wrap(child) {
            let text = collapse_whitespace(&element.text().collect::<String>());
            if !text.is_empty() {
                paragraphs.push(text);
            }
        } else if let Some(text) = child.value().as_text() {
            let text = collapse_whitespace(text);
            if !text.is_empty() {
                paragraphs.push(text);
            }
        }
    }
    if paragraphs.is_empty() {
        let whole = collapse_whitespace(&container.text().collect::<String>());
        if !whole.is_empty() {
            paragraphs.push(whole);
        }
    }
    paragraphs.join("\n\n")
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(collapse_whitespace)
        .filter(|c| !c.is_empty())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
