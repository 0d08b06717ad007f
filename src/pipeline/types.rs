//! Core data structures shared by every pipeline stage

use super::symbol::Symbol;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Feed entry as parsed, before dedup
#[derive(Debug, Clone, PartialEq)]
pub struct RawArticle {
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
}

/// Accepted article. `id` is `None` until the store assigns one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: Option<i64>,
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub fingerprint: String,
}

impl Article {
    pub fn from_raw(raw: RawArticle, fingerprint: String) -> Self {
        Self {
            id: None,
            source: raw.source,
            url: raw.url,
            published_at: raw.published_at,
            title: raw.title,
            body: raw.body,
            fingerprint,
        }
    }

    /// Title and body joined for resolution and scoring
    pub fn text(&self) -> String {
        if self.body.is_empty() {
            self.title.clone()
        } else {
            format!("{}. {}", self.title, self.body)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Security {
    pub symbol: Symbol,
    pub company_name: String,
    pub aliases: BTreeSet<String>,
}

impl Security {
    pub fn new(symbol: Symbol, company_name: impl Into<String>) -> Self {
        Self {
            symbol,
            company_name: company_name.into(),
            aliases: BTreeSet::new(),
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    /// Company name followed by every alias
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.company_name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArticleSecurityLink {
    pub article_id: i64,
    pub symbol: Symbol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "positive" => Some(SentimentLabel::Positive),
            "neutral" => Some(SentimentLabel::Neutral),
            "negative" => Some(SentimentLabel::Negative),
            _ => None,
        }
    }

    /// Symmetric threshold labelling: `>= threshold` positive, `<= -threshold` negative
    pub fn from_polarity(polarity: f64, threshold: f64) -> Self {
        if polarity >= threshold {
            SentimentLabel::Positive
        } else if polarity <= -threshold {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }
}

/// One model's verdict on one article
#[derive(Debug, Clone, PartialEq)]
pub struct ModelScore {
    pub model_name: String,
    pub polarity: f64,
    pub label: SentimentLabel,
    pub confidence: Option<f64>,
}

/// Persisted score row, fanned out per linked symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    pub article_id: i64,
    pub symbol: Symbol,
    pub model_name: String,
    pub polarity: f64,
    pub label: SentimentLabel,
    pub confidence: Option<f64>,
}

/// Row in `aggregated_sentiment`
///
/// Bucket start is seconds since epoch, aligned to the bucket width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSentiment {
    pub symbol: Symbol,
    pub bucket_start: i64,
    pub model_name: String,
    pub mean_polarity: f64,
    pub article_count: i64,
    pub positive_count: i64,
    pub negative_count: i64,
    pub neutral_count: i64,
}

/// Latest market quote for one security, stored in `stock_prices`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub symbol: Symbol,
    /// Time of the quote, not of collection
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub volume: Option<i64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
}

/// Fixed bucket width, aligned to the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketWidth(i64);

impl BucketWidth {
    pub const HOURLY: BucketWidth = BucketWidth(3600);

    /// Returns `None` for widths under one second
    pub fn from_secs(secs: i64) -> Option<Self> {
        (secs > 0).then_some(Self(secs))
    }

    pub fn from_duration(duration: Duration) -> Option<Self> {
        i64::try_from(duration.as_secs()).ok().and_then(Self::from_secs)
    }

    pub fn secs(&self) -> i64 {
        self.0
    }

    pub fn bucket_start(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(self.0) * self.0
    }

    /// Half-open `[start, end)` range in seconds for the bucket starting at `start`
    pub fn range(&self, start: i64) -> (i64, i64) {
        (start, start + self.0)
    }
}

/// Convert stored unix seconds back to a UTC timestamp
pub fn utc_from_secs(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
