//! Sentiflow Runtime - periodic news sentiment collection
//!
//! This binary wires the pipeline together:
//! - Opens the SQLite store (schema applied on open)
//! - Seeds the stock directory and warms the dedup index
//! - Loads the enabled sentiment models
//! - Runs the collection scheduler until CTRL+C
//!
//! Usage:
//!   cargo run --release --bin sentiflow_runtime
//!
//! Environment variables (see `PipelineConfig::from_env` for the full list):
//!   SENTIFLOW_DB_PATH - SQLite database path (default: sentiflow.db)
//!   SENTIFLOW_REGION - US or IN (default: US)
//!   SENTIMENT_MODELS - comma separated (default: vader,lexicon)
//!   COLLECT_INTERVAL_SECS - cycle interval (default: 900)
//!   COLLECT_PRICES - quote known securities each cycle (default: true)

use dotenv::dotenv;
use log::{error, info};
use sentiflow::pipeline::{
    config::PipelineConfig,
    db::{SentimentStore, SqliteSentimentStore},
    dedup::ArticleDeduplicator,
    directory::{StockDirectory, DEFAULT_SEED},
    engine::CollectionEngine,
    feeds::{FeedFetcher, HttpFeedTransport},
    market_data::{MarketData, YahooMarketData},
    prices::PriceCollector,
    resolver::StockResolver,
    scheduler::CollectionScheduler,
    sentiment::SentimentScorer,
};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Sentiflow Runtime");
    info!("   └─ Version: {}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(PipelineConfig::from_env()?);

    info!("✅ Configuration loaded");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Region: {:?}", config.region);
    info!("   ├─ Feeds: {}", config.feeds.len());
    info!("   ├─ Bucket width: {}s", config.bucket_width.secs());
    info!("   ├─ Interval: {}s", config.collect_interval.as_secs());
    info!("   └─ Pools: fetch={} scoring={}", config.fetch_pool_size, config.scoring_pool_size);

    info!("🔧 Initializing store...");
    let store: Arc<dyn SentimentStore> = Arc::new(SqliteSentimentStore::open(&config.db_path)?);

    let directory = Arc::new(StockDirectory::load(store.clone()).await?);
    let seeded = directory.seed(DEFAULT_SEED).await?;
    info!("✅ Directory ready ({} securities, {} newly seeded)", directory.len(), seeded);

    let dedup = Arc::new(ArticleDeduplicator::new(store.clone(), config.dedup_lookback));
    dedup.warm().await?;

    info!("🧠 Loading sentiment models...");
    let scorer = Arc::new(SentimentScorer::from_config(&config).await);
    if scorer.is_empty() {
        error!("❌ No sentiment model could be loaded; articles will be stored unscored");
    }

    let market_data: Arc<dyn MarketData> = Arc::new(YahooMarketData::new(config.feed_timeout)?);
    let resolver = Arc::new(StockResolver::new(
        directory.clone(),
        market_data.clone(),
        config.region,
        config.fuzzy_threshold,
    ));

    let fetcher = FeedFetcher::new(
        Arc::new(HttpFeedTransport::new()?),
        config.fetch_pool_size,
        config.feed_timeout,
        config.max_articles_per_feed,
    );

    let mut engine = CollectionEngine::new(config.clone(), fetcher, dedup, resolver, scorer, store);
    if config.collect_prices {
        info!("💹 Price collection enabled");
        engine = engine.with_price_collector(Arc::new(PriceCollector::new(
            market_data,
            directory,
            config.fetch_pool_size,
            config.feed_timeout,
        )));
    }
    let engine = Arc::new(engine);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::new(CollectionScheduler::new(engine, config.collect_interval, shutdown_rx));
    let scheduler_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    info!("🔄 Press CTRL+C to shutdown gracefully");

    // Wait for CTRL+C
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("");
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    shutdown_tx.send(true).ok();
    if let Err(e) = scheduler_task.await {
        error!("❌ Scheduler task failed: {}", e);
    }

    info!("✅ Sentiflow runtime stopped");
    Ok(())
}
