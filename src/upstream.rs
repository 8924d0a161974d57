//! Upstream Fetch
//!
//! The relay's only outbound call: fetch the upstream proxy list page and
//! reduce it to plain text. No retries; a failed fetch is reported as is.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::metrics;

/// Error types for upstream fetches
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Upstream request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Upstream {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to read upstream response body: {0}")]
    Body(#[source] reqwest::Error),
}

/// Source of the relayed resource
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the fixed upstream resource as plain text
    async fn fetch_text(&self) -> Result<String, FetchError>;
}

/// Fetches a fixed URL over HTTP and strips its markup
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpFetcher {
    /// Create a fetcher for `url` with a per-request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Create a fetcher for `url` using a preconfigured client
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Upstream URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_text(&self) -> Result<String, FetchError> {
        let start = Instant::now();
        let result = self.fetch_raw().await;
        metrics::UPSTREAM_FETCH_DURATION_SECONDS.observe(start.elapsed().as_secs_f64());

        match result {
            Ok(body) => {
                debug!(url = %self.url, bytes = body.len(), "Fetched upstream resource");
                Ok(extract_text(&body))
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "Upstream fetch failed");
                Err(e)
            }
        }
    }
}

impl HttpFetcher {
    async fn fetch_raw(&self) -> Result<String, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(FetchError::Body)
    }
}

/// Reduce an HTML document to its text content.
///
/// Tags and comments are dropped, `<script>` and `<style>` bodies are
/// skipped, and character references are decoded. Whitespace is kept as is.
pub fn extract_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(lt) = rest.find('<') {
        out.push_str(&decode_entities(&rest[..lt]));
        rest = &rest[lt..];

        if let Some(after) = rest.strip_prefix("<!--") {
            rest = after.find("-->").map_or("", |end| &after[end + 3..]);
            continue;
        }

        let Some(gt) = rest.find('>') else {
            // Unterminated tag: treat the remainder as text
            out.push_str(&decode_entities(rest));
            return out;
        };

        let tag = tag_name(&rest[1..gt]);
        rest = &rest[gt + 1..];

        if tag == "script" || tag == "style" {
            let close = format!("</{tag}");
            rest = find_ignore_case(rest, &close)
                .and_then(|start| rest[start..].find('>').map(|end| &rest[start + end + 1..]))
                .unwrap_or("");
        }
    }

    out.push_str(&decode_entities(rest));
    out
}

fn tag_name(inner: &str) -> String {
    inner
        .trim_start_matches('/')
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .to_ascii_lowercase()
        .find(&needle.to_ascii_lowercase())
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest[1..]
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| decode_entity(&rest[1..end + 1]).map(|c| (c, end + 2)));

        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }

    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => None,
    }
}
