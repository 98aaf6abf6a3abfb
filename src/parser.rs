//! Wire-format parsing into candidate entries.
//!
//! `feed-rs` sniffs the document content to pick RSS, Atom, JSON Feed or RDF,
//! so a lying `Content-Type` header does not matter. A document that parses
//! structurally but contains zero items is a valid empty feed; only a
//! document that fails to parse at all is an error.

use feed_rs::parser;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::storage::{CandidateEntry, Enclosure, Feed};

#[derive(Debug, Error)]
#[error("Parse error: {0}")]
pub struct ParseError(#[from] feed_rs::parser::ParseFeedError);

/// Parse a fetched document into candidate entries.
///
/// `fetched_at` is the fallback published timestamp for items whose source
/// carries no date. Relative entry URLs are resolved against the feed's site
/// URL.
pub fn parse(body: &[u8], feed: &Feed, fetched_at: i64) -> Result<Vec<CandidateEntry>, ParseError> {
    let document = parser::parse(body)?;

    let candidates = document
        .entries
        .into_iter()
        .map(|entry| {
            let raw_url = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref() != Some("enclosure"))
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let url = canonicalize_url(&feed.site_url, &raw_url);

            let published_at = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.timestamp())
                .unwrap_or(fetched_at);

            let title = entry
                .title
                .map(|t| t.content)
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Untitled".to_string());

            let author = entry
                .authors
                .first()
                .map(|person| person.name.clone())
                .unwrap_or_default();

            let content = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content))
                .unwrap_or_default();

            let tags = entry
                .categories
                .iter()
                .map(|c| c.term.clone())
                .filter(|t| !t.is_empty())
                .collect();

            let enclosures = collect_enclosures(&entry.media, &entry.links);

            let source_guid = if entry.id.trim().is_empty() {
                None
            } else {
                Some(entry.id.as_str())
            };
            let hash = entry_hash(source_guid, &url, &title, published_at);

            CandidateEntry {
                hash,
                title,
                url,
                author,
                content,
                published_at,
                tags,
                enclosures,
            }
        })
        .collect();

    Ok(candidates)
}

/// Resolve a possibly-relative entry link against the feed's site URL.
/// An unresolvable link is passed through untouched rather than dropped.
fn canonicalize_url(site_url: &str, href: &str) -> String {
    if href.is_empty() {
        return String::new();
    }
    if let Ok(absolute) = Url::parse(href) {
        return absolute.to_string();
    }
    if let Ok(base) = Url::parse(site_url) {
        if let Ok(joined) = base.join(href) {
            return joined.to_string();
        }
    }
    href.to_string()
}

fn collect_enclosures(
    media: &[feed_rs::model::MediaObject],
    links: &[feed_rs::model::Link],
) -> Vec<Enclosure> {
    let mut enclosures = Vec::new();

    for object in media {
        for content in &object.content {
            if let Some(url) = &content.url {
                enclosures.push(Enclosure {
                    url: url.to_string(),
                    mime_type: content
                        .content_type
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                    length: content.size.map(|s| s as i64).unwrap_or(0),
                });
            }
        }
    }

    for link in links {
        if link.rel.as_deref() == Some("enclosure") && !link.href.is_empty() {
            enclosures.push(Enclosure {
                url: link.href.clone(),
                mime_type: link
                    .media_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                length: link.length.map(|l| l as i64).unwrap_or(0),
            });
        }
    }

    enclosures
}

/// Stable identity hash for an entry: the source GUID when present, else the
/// entry URL, else title plus date. Two documents describing the same item
/// must produce the same hash or deduplication breaks.
fn entry_hash(source_guid: Option<&str>, url: &str, title: &str, published_at: i64) -> String {
    let input = match source_guid {
        Some(guid) => guid.trim().to_string(),
        None if !url.is_empty() => url.to_string(),
        None => format!("{}|{}", title, published_at),
    };
    let digest = Sha256::digest(input.as_bytes());
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_feed(site_url: &str) -> Feed {
        let mut feed = Feed::new(1, 1, "https://example.org/feed.xml");
        feed.site_url = site_url.to_string();
        feed
    }

    const RSS_WITH_GUID: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Example</title>
    <item>
        <guid>item-1</guid>
        <title>First post</title>
        <link>https://example.org/posts/1</link>
        <pubDate>Mon, 06 Sep 2021 12:00:00 GMT</pubDate>
        <category>rust</category>
        <enclosure url="https://example.org/audio/1.mp3" type="audio/mpeg" length="1024"/>
    </item>
</channel></rss>"#;

    #[test]
    fn test_parse_rss_item() {
        let feed = test_feed("https://example.org");
        let candidates = parse(RSS_WITH_GUID.as_bytes(), &feed, 1_700_000_000).unwrap();
        assert_eq!(candidates.len(), 1);

        let c = &candidates[0];
        assert_eq!(c.title, "First post");
        assert_eq!(c.url, "https://example.org/posts/1");
        assert_eq!(c.tags, vec!["rust".to_string()]);
        assert_eq!(c.enclosures.len(), 1);
        assert_eq!(c.enclosures[0].url, "https://example.org/audio/1.mp3");
        assert_eq!(c.enclosures[0].mime_type, "audio/mpeg");
        assert_eq!(c.enclosures[0].length, 1024);
        // Same GUID always hashes the same
        assert_eq!(c.hash, entry_hash(Some("item-1"), "", "", 0));
    }

    #[test]
    fn test_relative_url_resolved_against_site() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>a</guid><title>T</title><link>/posts/42</link></item>
</channel></rss>"#;
        let feed = test_feed("https://example.org/blog/");
        let candidates = parse(rss.as_bytes(), &feed, 0).unwrap();
        assert_eq!(candidates[0].url, "https://example.org/posts/42");
    }

    #[test]
    fn test_missing_date_falls_back_to_fetch_time() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>a</guid><title>T</title></item>
</channel></rss>"#;
        let feed = test_feed("https://example.org");
        let candidates = parse(rss.as_bytes(), &feed, 1_234_567).unwrap();
        assert_eq!(candidates[0].published_at, 1_234_567);
    }

    #[test]
    fn test_empty_feed_is_valid() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Empty</title></channel></rss>"#;
        let feed = test_feed("https://example.org");
        let candidates = parse(rss.as_bytes(), &feed, 0).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_garbage_is_hard_error() {
        let feed = test_feed("https://example.org");
        assert!(parse(b"not a feed at all", &feed, 0).is_err());
    }

    #[test]
    fn test_json_feed_parses() {
        let json = r#"{
            "version": "https://jsonfeed.org/version/1.1",
            "title": "JSON Example",
            "items": [
                {"id": "jf-1", "title": "Hello", "url": "https://example.org/hello"}
            ]
        }"#;
        let feed = test_feed("https://example.org");
        let candidates = parse(json.as_bytes(), &feed, 0).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Hello");
    }

    #[test]
    fn test_hash_prefers_guid_over_url() {
        let with_url = entry_hash(Some("guid-1"), "https://a.example", "t", 1);
        let without_url = entry_hash(Some("guid-1"), "https://b.example", "other", 2);
        assert_eq!(with_url, without_url);

        let url_only_a = entry_hash(None, "https://a.example", "t", 1);
        let url_only_b = entry_hash(None, "https://b.example", "t", 1);
        assert_ne!(url_only_a, url_only_b);
    }
}
