//! Feed retrieval and parsing
//!
//! Every endpoint is fetched on its own task, at most `pool_size` at once,
//! each under its own timeout. Parsed entries are pushed into a channel as
//! soon as their feed is parsed, so the consumer can start deduplicating
//! before slow feeds finish. A failing endpoint only loses its own entries.

use super::error::FeedError;
use super::types::RawArticle;
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

const CHANNEL_BUFFER: usize = 256;

/// Host fragment -> human readable source label
const SOURCE_LABELS: &[(&str, &str)] = &[
    ("yahoo", "Yahoo Finance"),
    ("bloomberg", "Bloomberg"),
    ("cnbc", "CNBC"),
    ("reuters", "Reuters"),
    ("marketwatch", "MarketWatch"),
    ("ndtv", "NDTV Business"),
    ("feedburner.com/NDTV", "NDTV Business"),
    ("economictimes", "Economic Times"),
    ("business-standard", "Business Standard"),
    ("moneycontrol", "MoneyControl"),
    ("livemint", "LiveMint"),
    ("financialexpress", "Financial Express"),
    ("zeenews", "Zee Business"),
    ("thehindubusinessline", "Hindu BusinessLine"),
];

/// Raw bytes from a feed endpoint
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<Vec<u8>, FeedError>;
}

pub struct HttpFeedTransport {
    client: reqwest::Client,
}

impl HttpFeedTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; sentiflow/0.1)")
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedTransport for HttpFeedTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>, FeedError> {
        let transient = |e: reqwest::Error| FeedError::TransientIo {
            url: url.to_string(),
            message: e.to_string(),
        };
        let response = self.client.get(url).send().await.map_err(transient)?;
        if !response.status().is_success() {
            return Err(FeedError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(transient)?;
        Ok(bytes.to_vec())
    }
}

/// Per-endpoint result of one fetch round
#[derive(Debug)]
pub struct EndpointOutcome {
    pub url: String,
    pub entries: usize,
    pub skipped_entries: usize,
    pub error: Option<FeedError>,
}

#[derive(Debug, Default)]
pub struct FeedReport {
    pub outcomes: Vec<EndpointOutcome>,
}

impl FeedReport {
    pub fn failures(&self) -> impl Iterator<Item = (&str, &FeedError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.error.as_ref().map(|e| (o.url.as_str(), e)))
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_none()).count()
    }

    pub fn entries(&self) -> usize {
        self.outcomes.iter().map(|o| o.entries).sum()
    }
}

/// Lazily consumed output of one fetch round
pub struct FeedStream {
    articles: mpsc::Receiver<RawArticle>,
    report: JoinHandle<FeedReport>,
}

impl FeedStream {
    pub async fn next(&mut self) -> Option<RawArticle> {
        self.articles.recv().await
    }

    /// Drain whatever is left and collect the per-endpoint report
    pub async fn finish(mut self) -> FeedReport {
        while self.articles.recv().await.is_some() {}
        match self.report.await {
            Ok(report) => report,
            Err(e) => {
                log::error!("❌ Feed driver task failed: {}", e);
                FeedReport::default()
            }
        }
    }
}

pub struct FeedFetcher {
    transport: Arc<dyn FeedTransport>,
    pool: Arc<Semaphore>,
    timeout: Duration,
    max_per_feed: usize,
}

impl FeedFetcher {
    pub fn new(transport: Arc<dyn FeedTransport>, pool_size: usize, timeout: Duration, max_per_feed: usize) -> Self {
        Self {
            transport,
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
            timeout,
            max_per_feed,
        }
    }

    /// Start fetching every endpoint. Results arrive in no particular order.
    pub fn fetch(&self, endpoints: &[String]) -> FeedStream {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let endpoints = endpoints.to_vec();
        let transport = self.transport.clone();
        let pool = self.pool.clone();
        let timeout = self.timeout;
        let max_per_feed = self.max_per_feed;

        let report = tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            for url in endpoints {
                let tx = tx.clone();
                let transport = transport.clone();
                let pool = pool.clone();
                tasks.spawn(async move {
                    let _permit = pool.acquire_owned().await.ok();
                    fetch_one(transport.as_ref(), &url, timeout, max_per_feed, &tx).await
                });
            }
            drop(tx);

            let mut report = FeedReport::default();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcome) => report.outcomes.push(outcome),
                    Err(e) => log::error!("❌ Feed task panicked: {}", e),
                }
            }
            report
        });

        FeedStream { articles: rx, report }
    }
}

async fn fetch_one(
    transport: &dyn FeedTransport,
    url: &str,
    timeout: Duration,
    max_per_feed: usize,
    tx: &mpsc::Sender<RawArticle>,
) -> EndpointOutcome {
    let fetched = match tokio::time::timeout(timeout, transport.get(url)).await {
        Ok(result) => result,
        Err(_) => Err(FeedError::Timeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    };

    let parsed = fetched.and_then(|bytes| parse_feed(url, &bytes, max_per_feed));
    match parsed {
        Ok((articles, skipped_entries)) => {
            let entries = articles.len();
            for article in articles {
                if tx.send(article).await.is_err() {
                    break;
                }
            }
            log::debug!("📰 {} -> {} entries ({} skipped)", url, entries, skipped_entries);
            EndpointOutcome {
                url: url.to_string(),
                entries,
                skipped_entries,
                error: None,
            }
        }
        Err(e) => {
            log::warn!("⚠️  Feed {} failed [{}]: {}", url, e.category(), e);
            EndpointOutcome {
                url: url.to_string(),
                entries: 0,
                skipped_entries: 0,
                error: Some(e),
            }
        }
    }
}

/// Parse RSS/Atom bytes into at most `max_entries` articles
///
/// Entries without a title, link or timestamp are skipped and counted.
pub fn parse_feed(url: &str, bytes: &[u8], max_entries: usize) -> Result<(Vec<RawArticle>, usize), FeedError> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| FeedError::Parse {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let source = source_label(url);
    let mut articles = Vec::new();
    let mut skipped = 0;

    for entry in feed.entries.into_iter().take(max_entries) {
        let title = entry.title.map(|t| collapse_whitespace(&t.content)).unwrap_or_default();
        let link = entry.links.first().map(|l| l.href.trim().to_string()).unwrap_or_default();
        let published = entry.published.or(entry.updated);

        let Some(published_at) = published.filter(|_| !title.is_empty() && !link.is_empty()) else {
            skipped += 1;
            continue;
        };

        let body = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .map(|raw| strip_html(&raw))
            .unwrap_or_default();

        articles.push(RawArticle {
            source: source.clone(),
            url: link,
            published_at,
            title,
            body,
        });
    }

    Ok((articles, skipped))
}

/// Readable source name for a feed URL, falling back to its host
pub fn source_label(url: &str) -> String {
    if let Some((_, label)) = SOURCE_LABELS.iter().find(|(fragment, _)| url.contains(fragment)) {
        return label.to_string();
    }
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Remove tags, decode entities, collapse whitespace
pub fn strip_html(raw: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    static ENTITIES: OnceLock<Regex> = OnceLock::new();
    let tags = TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));
    let entities = ENTITIES
        .get_or_init(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").expect("static regex"));

    let text = tags.replace_all(raw, " ");
    // One pass, so decoded text is never decoded again (`&amp;lt;` stays `&lt;`)
    let text = entities.replace_all(&text, |caps: &regex::Captures| {
        decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });
    collapse_whitespace(&text)
}

fn decode_entity(entity: &str) -> Option<String> {
    if let Some(numeric) = entity.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    let decoded = match entity {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "lsquo" | "rsquo" => "'",
        "ldquo" | "rdquo" => "\"",
        "ndash" => "-",
        "mdash" => "-",
        "hellip" => "...",
        _ => return None,
    };
    Some(decoded.to_string())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Markets</title>
  <item>
    <title>Apple   beats estimates</title>
    <link>https://example.com/apple</link>
    <description>&lt;p&gt;Strong &lt;b&gt;iPhone&lt;/b&gt; sales&lt;/p&gt;</description>
    <pubDate>Tue, 02 Jan 2024 15:04:05 GMT</pubDate>
  </item>
  <item>
    <title>No date here</title>
    <link>https://example.com/nodate</link>
  </item>
  <item>
    <title>Tesla recalls vehicles</title>
    <link>https://example.com/tesla</link>
    <pubDate>Tue, 02 Jan 2024 16:00:00 GMT</pubDate>
  </item>
</channel></rss>"#;

    #[test]
    fn test_parse_skips_undated_entries() {
        let (articles, skipped) = parse_feed("https://www.cnbc.com/rss", RSS.as_bytes(), 50).unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(skipped, 1);
        assert_eq!(articles[0].title, "Apple beats estimates");
        assert_eq!(articles[0].body, "Strong iPhone sales");
        assert_eq!(articles[0].source, "CNBC");
    }

    #[test]
    fn test_entry_cap() {
        let (articles, _) = parse_feed("https://x.test/rss", RSS.as_bytes(), 1).unwrap();
        assert_eq!(articles.len(), 1);
    }

    #[test]
    fn test_malformed_feed_is_parse_error() {
        let err = parse_feed("https://x.test/rss", b"<html>not a feed", 10).unwrap_err();
        assert!(matches!(err, FeedError::Parse { .. }));
    }

    #[test]
    fn test_source_labels() {
        assert_eq!(source_label("https://feeds.finance.yahoo.com/rss/2.0/headline"), "Yahoo Finance");
        assert_eq!(source_label("https://feeds.feedburner.com/NDTV-Business"), "NDTV Business");
        assert_eq!(source_label("https://www.example.org/feed"), "example.org");
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(
            strip_html("<div>Q3 <i>profit</i>&nbsp;up &amp; rising</div>\n\n"),
            "Q3 profit up & rising"
        );
    }

    #[test]
    fn test_strip_html_entities_decoded_once() {
        // Escaped markup stays escaped
        assert_eq!(strip_html("Use &amp;lt;b&amp;gt; tags"), "Use &lt;b&gt; tags");
        assert_eq!(strip_html("Apple&#8217;s &rsquo;quote&rsquo; &#x27;x&#x27;"), "Apple\u{2019}s 'quote' 'x'");
        assert_eq!(strip_html("Q3 &mdash; beat &hellip;"), "Q3 - beat ...");
        // Unknown entities are left alone
        assert_eq!(strip_html("R&D &foo; spend"), "R&D &foo; spend");
    }
}
