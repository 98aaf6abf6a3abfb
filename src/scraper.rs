//! Full-page content scraping for feeds with the crawler option.
//!
//! Feeds often ship truncated summaries; when `feed.crawler` is set the
//! pipeline replaces the content of new entries with the article body
//! scraped from the entry URL. Failure here degrades to the summary content
//! and is never pipeline-fatal.

use scraper::{Html, Selector};

use crate::fetch::{FetchClient, FetchError};
use crate::storage::Feed;

/// CSS selectors targeting main article content across common platforms.
/// Order matters: more specific selectors first, generic fallbacks last.
const TARGET_SELECTORS: &[&str] = &[
    "article",
    ".entry-content",
    ".post-content",
    ".article-content",
    ".post-body",
    "main .content",
    "main",
    "body",
];

/// Minimum extracted length (in bytes) to accept a selector match;
/// shorter matches fall through to the next selector.
const MIN_CONTENT_LEN: usize = 200;

/// Fetch the entry's page and extract its article content.
///
/// Returns `Ok(None)` when the page fetched but nothing useful could be
/// extracted; the caller keeps the feed-provided summary in that case.
pub async fn scrape_article(
    client: &FetchClient,
    feed: &Feed,
    url: &str,
) -> Result<Option<String>, FetchError> {
    if url.is_empty() {
        return Ok(None);
    }
    let html = client.fetch_page(feed, url).await?;
    Ok(extract_content(&html))
}

/// Pick the first selector whose match looks like a real article body.
/// `Html` is not `Send`, so parsing stays synchronous and local.
fn extract_content(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let mut fallback: Option<String> = None;
    for selector_str in TARGET_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let content = element.inner_html();
            let content = content.trim();
            if content.len() >= MIN_CONTENT_LEN {
                return Some(content.to_string());
            }
            if fallback.is_none() && !content.is_empty() {
                fallback = Some(content.to_string());
            }
        }
    }

    fallback
}
