//! Conditional HTTP fetch for feed documents.
//!
//! One client is built per request so per-feed network options (proxy,
//! self-signed certificates, HTTP/2 disable) apply without sharing state
//! between feeds. Connection reuse across refreshes of the same feed is not
//! worth the bookkeeping at polling frequencies.

use futures::StreamExt;
use reqwest::header::{
    COOKIE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, RETRY_AFTER, USER_AGENT,
};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::storage::Feed;

/// Errors from fetching one feed document. `Timeout`, `Network` and
/// `HttpStatus` are source-side: they advance the feed's error counter.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, proxy, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with a status that is neither success nor 304
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// HTTP 429; the origin asked us to slow down. Not a feed defect, so it
    /// defers the next check instead of advancing the error counter.
    #[error("Rate limited by origin")]
    RateLimited { retry_after: Option<u64> },
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    TooLarge,
}

/// Result of a conditional fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The origin answered 304; the stored copy is current.
    NotModified,
    /// A fresh document with the validators to store for the next fetch.
    Fetched {
        body: Vec<u8>,
        etag: Option<String>,
        last_modified: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct FetchClient {
    timeout: Duration,
    max_body_size: usize,
    default_user_agent: String,
}

impl FetchClient {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(config.http_timeout_secs),
            max_body_size: config.max_body_size,
            default_user_agent: config.user_agent.clone(),
        }
    }

    /// Perform one conditional GET for a feed.
    ///
    /// Sends `If-None-Match`/`If-Modified-Since` when the feed has stored
    /// validators; a 304 response short-circuits to
    /// [`FetchOutcome::NotModified`] without reading a body.
    pub async fn fetch(&self, feed: &Feed) -> Result<FetchOutcome, FetchError> {
        let client = self.build_client(feed)?;

        let mut request = client.get(&feed.feed_url).header(
            USER_AGENT,
            feed.user_agent
                .as_deref()
                .unwrap_or(&self.default_user_agent),
        );

        if let Some(cookie) = &feed.cookie {
            request = request.header(COOKIE, cookie);
        }
        if let Some(username) = &feed.username {
            request = request.basic_auth(username, feed.password.as_deref());
        }
        if let Some(etag) = &feed.etag_header {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &feed.last_modified_header {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(classify_reqwest_error)?;

        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited {
                retry_after: retry_after_seconds(&response),
            });
        }
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let etag = header_string(&response, ETAG);
        let last_modified = header_string(&response, LAST_MODIFIED);
        let body = read_limited_bytes(response, self.max_body_size).await?;

        Ok(FetchOutcome::Fetched {
            body,
            etag,
            last_modified,
        })
    }

    /// Plain GET for the scraper sub-fetch, honoring the same per-feed
    /// network options as the feed fetch. Returns the decoded body text.
    pub async fn fetch_page(&self, feed: &Feed, url: &str) -> Result<String, FetchError> {
        let client = self.build_client(feed)?;

        let mut request = client.get(url).header(
            USER_AGENT,
            feed.user_agent
                .as_deref()
                .unwrap_or(&self.default_user_agent),
        );
        if let Some(cookie) = &feed.cookie {
            request = request.header(COOKIE, cookie);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(classify_reqwest_error)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, self.max_body_size).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn build_client(&self, feed: &Feed) -> Result<reqwest::Client, FetchError> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .redirect(Policy::limited(10));

        if feed.allow_self_signed_certificates {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if feed.disable_http2 {
            builder = builder.http1_only();
        }
        if let Some(proxy_url) = &feed.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(builder.build()?)
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(err)
    }
}

/// `Retry-After` in its delay-seconds form. The HTTP-date form is rare on
/// 429 responses and falls back to the configured rate-limit backoff.
fn retry_after_seconds(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Stream the response body with a hard size cap so a hostile or broken
/// origin cannot exhaust memory.
async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client() -> FetchClient {
        FetchClient::new(&Config::default())
    }

    fn test_feed(url: &str) -> Feed {
        let mut feed = Feed::new(1, 1, url);
        feed.id = 1;
        feed
    }

    #[tokio::test]
    async fn test_fetch_success_captures_validators() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<rss/>")
                    .insert_header("ETag", "\"abc123\"")
                    .insert_header("Last-Modified", "Tue, 01 Jan 2030 00:00:00 GMT"),
            )
            .mount(&mock_server)
            .await;

        let feed = test_feed(&format!("{}/feed", mock_server.uri()));
        match test_client().fetch(&feed).await.unwrap() {
            FetchOutcome::Fetched {
                body,
                etag,
                last_modified,
            } => {
                assert_eq!(body, b"<rss/>");
                assert_eq!(etag.as_deref(), Some("\"abc123\""));
                assert_eq!(
                    last_modified.as_deref(),
                    Some("Tue, 01 Jan 2030 00:00:00 GMT")
                );
            }
            other => panic!("Expected Fetched, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_sends_conditional_headers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("If-None-Match", "\"abc123\""))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut feed = test_feed(&format!("{}/feed", mock_server.uri()));
        feed.etag_header = Some("\"abc123\"".to_string());
        feed.last_modified_header = Some("Tue, 01 Jan 2030 00:00:00 GMT".to_string());

        let outcome = test_client().fetch(&feed).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::NotModified));

        // Date values contain a comma, which wiremock's header matcher
        // splits, so If-Modified-Since is checked on the raw request
        let requests = mock_server.received_requests().await.unwrap();
        let sent = requests[0]
            .headers
            .get("if-modified-since")
            .and_then(|v| v.to_str().ok());
        assert_eq!(sent, Some("Tue, 01 Jan 2030 00:00:00 GMT"));
    }

    #[tokio::test]
    async fn test_fetch_404_is_http_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let feed = test_feed(&format!("{}/feed", mock_server.uri()));
        match test_client().fetch(&feed).await {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_429_is_rate_limited_with_retry_after() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
            .mount(&mock_server)
            .await;

        let feed = test_feed(&format!("{}/feed", mock_server.uri()));
        match test_client().fetch(&feed).await {
            Err(FetchError::RateLimited {
                retry_after: Some(120),
            }) => {}
            other => panic!("Expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_429_without_retry_after() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let feed = test_feed(&format!("{}/feed", mock_server.uri()));
        match test_client().fetch(&feed).await {
            Err(FetchError::RateLimited { retry_after: None }) => {}
            other => panic!("Expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_oversized_body_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 4096]))
            .mount(&mock_server)
            .await;

        let mut config = Config::default();
        config.max_body_size = 1024;
        let client = FetchClient::new(&config);

        let feed = test_feed(&format!("{}/feed", mock_server.uri()));
        match client.fetch(&feed).await {
            Err(FetchError::TooLarge) => {}
            other => panic!("Expected TooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_custom_user_agent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("User-Agent", "custom-bot/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss/>"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut feed = test_feed(&format!("{}/feed", mock_server.uri()));
        feed.user_agent = Some("custom-bot/1.0".to_string());

        let outcome = test_client().fetch(&feed).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Fetched { .. }));
    }
}
