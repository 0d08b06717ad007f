//! # News Sentiment Pipeline
//!
//! Periodically pulls financial news feeds, keeps each article once, links it
//! to the securities it mentions, scores it with every enabled sentiment
//! model and maintains per-symbol, per-model time-bucketed aggregates.
//!
//! ## Flow
//!
//! 1. `CollectionScheduler` ticks and starts a cycle (never two at once)
//! 2. `FeedFetcher` fetches every endpoint concurrently and streams entries
//! 3. `ArticleDeduplicator` drops entries whose fingerprint was seen before
//! 4. `StockResolver` links each article to known securities
//! 5. `SentimentScorer` runs each model once per linked article
//! 6. The store writes articles, links, scores and recomputed
//!    `Aggregator` buckets in one transaction
//! 7. `PriceCollector`, when enabled, quotes every known security during the
//!    same cycle and the snapshots are saved after the news batch
//!
//! ## Schema Reference
//!
//! All tables are created from `/sql/`:
//! - `securities`, `security_aliases` → `Security`
//! - `articles`, `article_securities` → `Article`, `ArticleSecurityLink`
//! - `sentiment_scores` → `SentimentScore`
//! - `aggregated_sentiment` → `AggregatedSentiment`
//! - `stock_prices` → `PriceSnapshot`
//!
//! ## Module Organization
//!
//! - `types` - Core data structures
//! - `symbol` - Validated ticker symbol
//! - `config` - Environment-driven configuration
//! - `error` - Error taxonomy
//! - `feeds` - Feed fetching and parsing
//! - `dedup` - Fingerprint index
//! - `directory` - Known securities
//! - `market_data` - Symbol validation and quotes
//! - `prices` - Per-cycle price snapshots
//! - `resolver` - Text and query to security resolution
//! - `sentiment` - Models and the scorer
//! - `aggregator` - Bucket aggregation
//! - `db` - Persistence gateway (SQLite)
//! - `engine` - One collection cycle
//! - `scheduler` - Periodic trigger
//! - `dashboard` - Read facade

pub mod aggregator;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod dedup;
pub mod directory;
pub mod engine;
pub mod error;
pub mod feeds;
pub mod market_data;
pub mod prices;
pub mod resolver;
pub mod scheduler;
pub mod sentiment;
pub mod symbol;
pub mod types;

// Re-export commonly used types
pub use aggregator::{Aggregator, ENSEMBLE_MODEL};
pub use config::{ModelKind, PipelineConfig, Region};
pub use dashboard::DashboardReader;
pub use db::{SentimentStore, SqliteSentimentStore};
pub use dedup::ArticleDeduplicator;
pub use directory::StockDirectory;
pub use engine::{CollectionEngine, CycleOutcome, CycleReport, CycleRunner};
pub use error::{ErrorCategory, PipelineError};
pub use feeds::{FeedFetcher, FeedTransport};
pub use market_data::{MarketData, SymbolValidation};
pub use prices::{PriceCollector, PriceReport};
pub use resolver::{SearchOutcome, StockResolver};
pub use scheduler::{CollectionScheduler, CycleState, TriggerOutcome};
pub use sentiment::{SentimentModel, SentimentScorer};
pub use symbol::Symbol;
pub use types::{
    AggregatedSentiment, Article, BucketWidth, PriceSnapshot, RawArticle, Security, SentimentLabel, SentimentScore,
};
