//! Shared fixtures for integration tests: scripted feeds, a store that can be
//! told to fail commits, and a fully wired collection engine.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sentiflow::pipeline::{
    aggregator::Aggregator,
    config::{ModelKind, PipelineConfig},
    db::{BatchEntry, BatchSummary, ScoredArticle, SentimentStore, SqliteSentimentStore},
    dedup::ArticleDeduplicator,
    directory::{StockDirectory, DEFAULT_SEED},
    engine::CollectionEngine,
    error::{FeedError, MarketDataError, ModelError, StoreError},
    feeds::{FeedFetcher, FeedTransport},
    market_data::{MarketData, SymbolValidation},
    prices::PriceCollector,
    resolver::StockResolver,
    sentiment::{transformer::ClassProbability, InferenceClient, SentimentScorer},
    symbol::Symbol,
    types::{AggregatedSentiment, PriceSnapshot, Security},
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

pub enum Route {
    Serve(String),
    Unreachable,
    Hang,
}

/// Feed transport answering from a fixed route table
pub struct ScriptedTransport {
    routes: HashMap<String, Route>,
}

impl ScriptedTransport {
    pub fn new(routes: Vec<(&str, Route)>) -> Self {
        Self {
            routes: routes.into_iter().map(|(u, r)| (u.to_string(), r)).collect(),
        }
    }
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>, FeedError> {
        match self.routes.get(url) {
            Some(Route::Serve(body)) => Ok(body.as_bytes().to_vec()),
            Some(Route::Unreachable) => Err(FeedError::TransientIo {
                url: url.to_string(),
                message: "connection refused".to_string(),
            }),
            Some(Route::Hang) => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Vec::new())
            }
            None => Err(FeedError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

/// RSS 2.0 document from (title, link, pubDate) triples
pub fn rss(items: &[(&str, &str, &str)]) -> String {
    let mut body = String::from(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Test</title>"#);
    for (title, link, date) in items {
        body.push_str(&format!(
            "<item><title>{}</title><link>{}</link><description>{}</description><pubDate>{}</pubDate></item>",
            title, link, title, date
        ));
    }
    body.push_str("</channel></rss>");
    body
}

/// SQLite store whose next `failures` commits fail
pub struct FlakyStore {
    pub inner: SqliteSentimentStore,
    pub failures_left: AtomicUsize,
    pub commit_calls: AtomicUsize,
}

#[async_trait]
impl SentimentStore for FlakyStore {
    async fn article_exists_by_fingerprint(&self, fingerprint: &str) -> Result<bool, StoreError> {
        self.inner.article_exists_by_fingerprint(fingerprint).await
    }

    async fn recent_fingerprints(&self, since: DateTime<Utc>) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        self.inner.recent_fingerprints(since).await
    }

    async fn get_or_create_security(&self, symbol: &Symbol, company_name: &str) -> Result<(Security, bool), StoreError> {
        self.inner.get_or_create_security(symbol, company_name).await
    }

    async fn add_alias(&self, symbol: &Symbol, alias: &str) -> Result<(), StoreError> {
        self.inner.add_alias(symbol, alias).await
    }

    async fn load_securities(&self) -> Result<Vec<Security>, StoreError> {
        self.inner.load_securities().await
    }

    async fn commit_batch(&self, batch: &[BatchEntry], aggregator: &Aggregator) -> Result<BatchSummary, StoreError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Corrupt("simulated write failure".to_string()));
        }
        self.inner.commit_batch(batch, aggregator).await
    }

    async fn aggregated_series(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        model_name: Option<&str>,
    ) -> Result<Vec<AggregatedSentiment>, StoreError> {
        self.inner.aggregated_series(symbol, from, to, model_name).await
    }

    async fn recent_articles(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScoredArticle>, StoreError> {
        self.inner.recent_articles(symbol, from, to, limit).await
    }

    async fn save_prices(&self, snapshots: &[PriceSnapshot]) -> Result<usize, StoreError> {
        self.inner.save_prices(snapshots).await
    }

    async fn price_series(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PriceSnapshot>, StoreError> {
        self.inner.price_series(symbol, from, to).await
    }
}

/// Knows AMD only. Quotes AAPL, fails TSLA, has no prices for the rest.
pub struct StaticMarketData {
    pub calls: AtomicUsize,
}

#[async_trait]
impl MarketData for StaticMarketData {
    async fn validate_symbol(&self, text: &str) -> Result<SymbolValidation, MarketDataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.eq_ignore_ascii_case("AMD") {
            return Ok(SymbolValidation::valid(
                Symbol::parse("AMD").expect("valid symbol"),
                "Advanced Micro Devices, Inc.",
            ));
        }
        Ok(SymbolValidation::invalid())
    }

    async fn latest_quote(&self, symbol: &Symbol) -> Result<Option<PriceSnapshot>, MarketDataError> {
        match symbol.as_str() {
            "AAPL" => Ok(Some(PriceSnapshot {
                symbol: symbol.clone(),
                timestamp: aapl_quote_time(),
                price: 187.25,
                volume: Some(12_500),
                open: Some(186.0),
                high: Some(188.0),
                low: Some(185.5),
                close: Some(187.25),
            })),
            "TSLA" => Err(MarketDataError::Status(503)),
            _ => Ok(None),
        }
    }
}

pub fn aapl_quote_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 15, 30, 0).single().expect("valid time")
}

/// Classifier that crashes on any text containing "poison"
pub struct CrashingClassifier;

#[async_trait]
impl InferenceClient for CrashingClassifier {
    async fn classify(&self, text: &str) -> Result<Vec<ClassProbability>, ModelError> {
        if text.contains("poison") {
            panic!("classifier crashed");
        }
        Ok(vec![
            ClassProbability {
                label: "positive".to_string(),
                score: 0.7,
            },
            ClassProbability {
                label: "negative".to_string(),
                score: 0.1,
            },
            ClassProbability {
                label: "neutral".to_string(),
                score: 0.2,
            },
        ])
    }
}

pub struct Harness {
    pub temp: NamedTempFile,
    pub config: Arc<PipelineConfig>,
    pub store: Arc<FlakyStore>,
    pub directory: Arc<StockDirectory>,
    pub dedup: Arc<ArticleDeduplicator>,
    pub resolver: Arc<StockResolver>,
    pub market: Arc<StaticMarketData>,
    pub engine: CollectionEngine,
}

impl Harness {
    pub fn row_count(&self, table: &str) -> i64 {
        let conn = rusqlite::Connection::open(self.temp.path()).expect("open db");
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .expect("count rows")
    }
}

pub struct HarnessOptions {
    pub models: Vec<ModelKind>,
    /// Replaces the scorer built from `models`
    pub scorer: Option<SentimentScorer>,
    pub commit_failures: usize,
    pub feed_timeout: Duration,
    pub collect_prices: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            models: vec![ModelKind::Vader, ModelKind::Lexicon],
            scorer: None,
            commit_failures: 0,
            feed_timeout: Duration::from_secs(5),
            collect_prices: false,
        }
    }
}

pub async fn harness(routes: Vec<(&str, Route)>, options: HarnessOptions) -> Harness {
    let temp = NamedTempFile::new().expect("temp file");
    let db_path = temp.path().to_str().expect("utf8 path").to_string();

    let feeds: Vec<String> = routes.iter().map(|(u, _)| u.to_string()).collect();
    let config = Arc::new(PipelineConfig {
        db_path: db_path.clone(),
        feeds,
        enabled_models: options.models,
        feed_timeout: options.feed_timeout,
        persistence_retry_delay: Duration::from_millis(10),
        collect_prices: options.collect_prices,
        ..PipelineConfig::default()
    });

    let store = Arc::new(FlakyStore {
        inner: SqliteSentimentStore::open(&db_path).expect("open store"),
        failures_left: AtomicUsize::new(options.commit_failures),
        commit_calls: AtomicUsize::new(0),
    });
    let dyn_store: Arc<dyn SentimentStore> = store.clone();

    let directory = Arc::new(StockDirectory::load(dyn_store.clone()).await.expect("load directory"));
    directory.seed(DEFAULT_SEED).await.expect("seed");

    let dedup = Arc::new(ArticleDeduplicator::new(dyn_store.clone(), config.dedup_lookback));
    let market = Arc::new(StaticMarketData {
        calls: AtomicUsize::new(0),
    });
    let resolver = Arc::new(StockResolver::new(
        directory.clone(),
        market.clone(),
        config.region,
        config.fuzzy_threshold,
    ));
    let scorer = Arc::new(match options.scorer {
        Some(scorer) => scorer,
        None => SentimentScorer::from_config(&config).await,
    });
    let fetcher = FeedFetcher::new(
        Arc::new(ScriptedTransport::new(routes)),
        config.fetch_pool_size,
        config.feed_timeout,
        config.max_articles_per_feed,
    );

    let mut engine = CollectionEngine::new(
        config.clone(),
        fetcher,
        dedup.clone(),
        resolver.clone(),
        scorer,
        dyn_store,
    );
    if config.collect_prices {
        engine = engine.with_price_collector(Arc::new(PriceCollector::new(
            market.clone(),
            directory.clone(),
            config.fetch_pool_size,
            config.feed_timeout,
        )));
    }

    Harness {
        temp,
        config,
        store,
        directory,
        dedup,
        resolver,
        market,
        engine,
    }
}
