//! Pipeline configuration from environment variables
//!
//! Built once at startup, wrapped in `Arc`, never mutated afterwards.

use super::error::ConfigError;
use super::symbol::Symbol;
use super::types::BucketWidth;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Longest accepted dedup lookback
pub const MAX_DEDUP_LOOKBACK_DAYS: u64 = 3650;

pub const INDIAN_FEEDS: &[&str] = &[
    "https://feeds.feedburner.com/NDTV-Business",
    "https://economictimes.indiatimes.com/markets/rssfeeds/1977021501.cms",
    "https://www.business-standard.com/rss/markets-106.rss",
    "https://www.moneycontrol.com/rss/business.xml",
    "https://www.livemint.com/rss/money",
    "https://www.financialexpress.com/market/rss/",
    "https://zeenews.india.com/rss/business.xml",
    "https://www.thehindubusinessline.com/markets/?service=rss",
];

pub const US_FEEDS: &[&str] = &[
    "https://feeds.finance.yahoo.com/rss/2.0/headline",
    "https://feeds.bloomberg.com/markets/news.rss",
    "https://www.cnbc.com/id/100003114/device/rss/rss.html",
    "https://feeds.reuters.com/reuters/businessNews",
    "https://www.marketwatch.com/rss/topstories",
];

/// Market the deployment tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Us,
    In,
}

impl Region {
    /// Home-region feeds first, then the rest
    pub fn default_feeds(&self) -> Vec<String> {
        let (home, other) = match self {
            Region::Us => (US_FEEDS, INDIAN_FEEDS),
            Region::In => (INDIAN_FEEDS, US_FEEDS),
        };
        home.iter().chain(other.iter()).map(|s| s.to_string()).collect()
    }

    /// NSE/BSE listings belong to IN, everything else to US
    pub fn accepts(&self, symbol: &Symbol) -> bool {
        let indian = matches!(symbol.exchange_suffix(), Some("NS") | Some("BO"));
        match self {
            Region::Us => !indian,
            Region::In => indian,
        }
    }
}

impl FromStr for Region {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US" => Ok(Region::Us),
            "IN" => Ok(Region::In),
            other => Err(ConfigError::InvalidValue {
                var: "SENTIFLOW_REGION",
                message: format!("expected US or IN, got '{}'", other),
            }),
        }
    }
}

/// Sentiment model variants that can be enabled by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelKind {
    /// VADER compound score
    Vader,
    /// Financial word lexicon with negation handling
    Lexicon,
    /// Remote FinBERT-style classifier
    Transformer,
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Vader => "vader",
            ModelKind::Lexicon => "lexicon",
            ModelKind::Transformer => "finbert",
        }
    }
}

impl FromStr for ModelKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vader" => Ok(ModelKind::Vader),
            "lexicon" | "textblob" => Ok(ModelKind::Lexicon),
            "finbert" | "transformer" => Ok(ModelKind::Transformer),
            other => Err(ConfigError::UnknownModel(other.to_string())),
        }
    }
}

/// Where the transformer model is served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformerEndpoint {
    pub url: String,
    pub api_token: Option<String>,
}

/// Configuration for the collection pipeline
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to SQLite database file
    pub db_path: String,

    pub region: Region,

    /// Feed endpoints fetched every cycle
    pub feeds: Vec<String>,

    /// Models to load at startup, in scoring order
    pub enabled_models: Vec<ModelKind>,

    pub transformer: Option<TransformerEndpoint>,

    pub bucket_width: BucketWidth,

    pub collect_interval: Duration,

    /// How long fingerprints stay in the in-memory dedup index
    pub dedup_lookback: Duration,

    pub fetch_pool_size: usize,

    pub scoring_pool_size: usize,

    /// Per-endpoint fetch timeout
    pub feed_timeout: Duration,

    pub max_articles_per_feed: usize,

    /// Minimum Jaro-Winkler similarity for fuzzy name matches
    pub fuzzy_threshold: f64,

    /// Base delay before the single persistence retry
    pub persistence_retry_delay: Duration,

    /// Quote every known security each cycle
    pub collect_prices: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: "sentiflow.db".to_string(),
            region: Region::Us,
            feeds: Region::Us.default_feeds(),
            enabled_models: vec![ModelKind::Vader, ModelKind::Lexicon],
            transformer: None,
            bucket_width: BucketWidth::HOURLY,
            collect_interval: Duration::from_secs(15 * 60),
            dedup_lookback: Duration::from_secs(7 * 24 * 3600),
            fetch_pool_size: 4,
            scoring_pool_size: 2,
            feed_timeout: Duration::from_secs(10),
            max_articles_per_feed: 50,
            fuzzy_threshold: 0.92,
            persistence_retry_delay: Duration::from_millis(500),
            collect_prices: true,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `SENTIFLOW_DB_PATH` (default: sentiflow.db)
    /// - `SENTIFLOW_REGION` (default: US)
    /// - `NEWS_FEEDS` comma separated (default: region feed list)
    /// - `SENTIMENT_MODELS` comma separated (default: vader,lexicon)
    /// - `FINBERT_ENDPOINT`, `FINBERT_API_TOKEN` (default: unset)
    /// - `BUCKET_WIDTH_SECS` (default: 3600)
    /// - `COLLECT_INTERVAL_SECS` (default: 900)
    /// - `DEDUP_LOOKBACK_DAYS` (default: 7)
    /// - `FETCH_POOL_SIZE` (default: 4)
    /// - `SCORING_POOL_SIZE` (default: 2)
    /// - `FEED_TIMEOUT_MS` (default: 10000)
    /// - `MAX_ARTICLES_PER_FEED` (default: 50)
    /// - `FUZZY_MATCH_THRESHOLD` (default: 0.92)
    /// - `PERSISTENCE_RETRY_DELAY_MS` (default: 500)
    /// - `COLLECT_PRICES` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let region = match env::var("SENTIFLOW_REGION") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.region,
        };

        let feeds = env::var("NEWS_FEEDS")
            .ok()
            .map(|s| split_list(&s))
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| region.default_feeds());

        let enabled_models = match env::var("SENTIMENT_MODELS") {
            Ok(value) => split_list(&value)
                .iter()
                .map(|name| name.parse())
                .collect::<Result<Vec<ModelKind>, _>>()?,
            Err(_) => defaults.enabled_models.clone(),
        };

        let transformer = env::var("FINBERT_ENDPOINT")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(|url| TransformerEndpoint {
                url,
                api_token: env::var("FINBERT_API_TOKEN").ok(),
            });

        let bucket_secs: i64 = parse_var("BUCKET_WIDTH_SECS", defaults.bucket_width.secs())?;
        let bucket_width = BucketWidth::from_secs(bucket_secs).ok_or(ConfigError::InvalidValue {
            var: "BUCKET_WIDTH_SECS",
            message: "must be at least 1".to_string(),
        })?;

        let lookback_days: u64 = parse_var("DEDUP_LOOKBACK_DAYS", 7)?;
        let dedup_lookback = lookback_days
            .checked_mul(24 * 3600)
            .map(Duration::from_secs)
            .ok_or_else(|| invalid("DEDUP_LOOKBACK_DAYS", "value too large"))?;

        let config = Self {
            db_path: env::var("SENTIFLOW_DB_PATH").unwrap_or(defaults.db_path),
            region,
            feeds,
            enabled_models,
            transformer,
            bucket_width,
            collect_interval: Duration::from_secs(parse_var("COLLECT_INTERVAL_SECS", 900)?),
            dedup_lookback,
            fetch_pool_size: parse_var("FETCH_POOL_SIZE", defaults.fetch_pool_size)?,
            scoring_pool_size: parse_var("SCORING_POOL_SIZE", defaults.scoring_pool_size)?,
            feed_timeout: Duration::from_millis(parse_var("FEED_TIMEOUT_MS", 10_000)?),
            max_articles_per_feed: parse_var("MAX_ARTICLES_PER_FEED", defaults.max_articles_per_feed)?,
            fuzzy_threshold: parse_var("FUZZY_MATCH_THRESHOLD", defaults.fuzzy_threshold)?,
            persistence_retry_delay: Duration::from_millis(parse_var("PERSISTENCE_RETRY_DELAY_MS", 500)?),
            collect_prices: parse_var("COLLECT_PRICES", defaults.collect_prices)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.is_empty() {
            return Err(ConfigError::NoFeeds);
        }
        if self.fetch_pool_size == 0 {
            return Err(invalid("FETCH_POOL_SIZE", "must be at least 1"));
        }
        if self.scoring_pool_size == 0 {
            return Err(invalid("SCORING_POOL_SIZE", "must be at least 1"));
        }
        if self.collect_interval.is_zero() {
            return Err(invalid("COLLECT_INTERVAL_SECS", "must be at least 1"));
        }
        if self.feed_timeout.is_zero() {
            return Err(invalid("FEED_TIMEOUT_MS", "must be at least 1"));
        }
        if self.dedup_lookback > Duration::from_secs(MAX_DEDUP_LOOKBACK_DAYS * 24 * 3600) {
            return Err(invalid("DEDUP_LOOKBACK_DAYS", "must be at most 3650"));
        }
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(invalid("FUZZY_MATCH_THRESHOLD", "must be within [0, 1]"));
        }
        if self.enabled_models.contains(&ModelKind::Transformer) && self.transformer.is_none() {
            log::warn!("⚠️  finbert enabled but FINBERT_ENDPOINT is unset; it will be skipped");
        }
        Ok(())
    }
}

fn invalid(var: &'static str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var,
        message: message.to_string(),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_var<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
