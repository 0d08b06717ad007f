//! One collection cycle: fetch -> dedup -> resolve -> score -> commit
//!
//! Feed, dedup-lookup and model failures are absorbed and counted. The only
//! failure that fails a cycle is a batch commit that still fails after its
//! single retry; in that case the batch's fingerprints are released from the
//! dedup index so the articles are picked up again next cycle.
//!
//! When a `PriceCollector` is attached, quotes are fetched alongside the news
//! work and saved after it. Price failures are reported but never fail a cycle.

use super::aggregator::Aggregator;
use super::config::PipelineConfig;
use super::db::{BatchEntry, BatchSummary, SentimentStore};
use super::dedup::ArticleDeduplicator;
use super::error::{ErrorCategory, StoreError};
use super::feeds::FeedFetcher;
use super::prices::{PriceCollector, PriceReport};
use super::resolver::StockResolver;
use super::sentiment::SentimentScorer;
use super::symbol::Symbol;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::watch;

/// Counters for one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub feeds_ok: usize,
    pub feed_failures: Vec<(String, ErrorCategory)>,
    pub candidates: usize,
    pub duplicates: usize,
    /// Candidates dropped because the dedup lookup itself failed
    pub lookup_errors: usize,
    pub accepted: usize,
    /// Accepted articles that referenced no known security
    pub unlinked: usize,
    pub scored: usize,
    pub persistence_attempts: u32,
    pub batch: Option<BatchSummary>,
    pub prices_saved: usize,
    pub price_failures: Vec<(Symbol, ErrorCategory)>,
    /// Shutdown was requested before the cycle got to commit everything
    pub interrupted: bool,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            feeds_ok: 0,
            feed_failures: Vec::new(),
            candidates: 0,
            duplicates: 0,
            lookup_errors: 0,
            accepted: 0,
            unlinked: 0,
            scored: 0,
            persistence_attempts: 0,
            batch: None,
            prices_saved: 0,
            price_failures: Vec::new(),
            interrupted: false,
        }
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleReport),
    Failed { report: CycleReport, error: StoreError },
}

impl CycleOutcome {
    pub fn report(&self) -> &CycleReport {
        match self {
            CycleOutcome::Completed(report) => report,
            CycleOutcome::Failed { report, .. } => report,
        }
    }

    fn report_mut(&mut self) -> &mut CycleReport {
        match self {
            CycleOutcome::Completed(report) => report,
            CycleOutcome::Failed { report, .. } => report,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CycleOutcome::Failed { .. })
    }
}

/// Something the scheduler can run once per tick
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> CycleOutcome;
}

pub struct CollectionEngine {
    config: Arc<PipelineConfig>,
    fetcher: FeedFetcher,
    dedup: Arc<ArticleDeduplicator>,
    resolver: Arc<StockResolver>,
    scorer: Arc<SentimentScorer>,
    aggregator: Aggregator,
    store: Arc<dyn SentimentStore>,
    prices: Option<Arc<PriceCollector>>,
}

impl CollectionEngine {
    pub fn new(
        config: Arc<PipelineConfig>,
        fetcher: FeedFetcher,
        dedup: Arc<ArticleDeduplicator>,
        resolver: Arc<StockResolver>,
        scorer: Arc<SentimentScorer>,
        store: Arc<dyn SentimentStore>,
    ) -> Self {
        let aggregator = Aggregator::new(config.bucket_width);
        Self {
            config,
            fetcher,
            dedup,
            resolver,
            scorer,
            aggregator,
            store,
            prices: None,
        }
    }

    pub fn with_price_collector(mut self, collector: Arc<PriceCollector>) -> Self {
        self.prices = Some(collector);
        self
    }

    async fn save_prices(&self, prices: PriceReport, report: &mut CycleReport) {
        report.price_failures = prices.failures;
        if prices.snapshots.is_empty() {
            log::info!("💹 No quotes this cycle ({} failed)", report.price_failures.len());
            return;
        }
        match self.store.save_prices(&prices.snapshots).await {
            Ok(saved) => {
                report.prices_saved = saved;
                log::info!(
                    "💹 Prices: {} saved, {} without data, {} failed",
                    saved,
                    prices.missing.len(),
                    report.price_failures.len()
                );
            }
            Err(e) => log::warn!(
                "⚠️  [{}] Saving {} quotes failed: {}",
                ErrorCategory::PersistenceFailure,
                prices.snapshots.len(),
                e
            ),
        }
    }

    async fn commit_with_retry(
        &self,
        batch: &[BatchEntry],
        report: &mut CycleReport,
    ) -> Result<BatchSummary, StoreError> {
        report.persistence_attempts = 1;
        match self.store.commit_batch(batch, &self.aggregator).await {
            Ok(summary) => return Ok(summary),
            Err(e) => {
                log::warn!("⚠️  Batch commit failed ({}), retrying once", e);
            }
        }

        let base = self.config.persistence_retry_delay;
        let jitter = rand::thread_rng().gen_range(0.0..1.0);
        tokio::time::sleep(base + base.mul_f64(jitter)).await;

        report.persistence_attempts = 2;
        self.store.commit_batch(batch, &self.aggregator).await
    }
}

#[async_trait]
impl CycleRunner for CollectionEngine {
    async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> CycleOutcome {
        let quotes = self
            .prices
            .clone()
            .map(|collector| tokio::spawn(async move { collector.collect().await }));

        let mut outcome = self.collect_news(shutdown).await;

        if let Some(handle) = quotes {
            if *shutdown.borrow() {
                handle.abort();
                return outcome;
            }
            match handle.await {
                Ok(prices) => self.save_prices(prices, outcome.report_mut()).await,
                Err(e) => log::error!("❌ Price collection task failed: {}", e),
            }
            outcome.report_mut().finished_at = Utc::now();
        }
        outcome
    }
}

impl CollectionEngine {
    async fn collect_news(&self, shutdown: &watch::Receiver<bool>) -> CycleOutcome {
        let started_at = Utc::now();
        let mut report = CycleReport::new(started_at);
        log::info!("🔄 Collection cycle started ({} feeds)", self.config.feeds.len());

        self.dedup.evict_expired(started_at);

        // Fetch + dedup + resolve, streaming
        let matcher = self.resolver.matcher();
        let mut stream = self.fetcher.fetch(&self.config.feeds);
        let mut entries: Vec<BatchEntry> = Vec::new();

        while let Some(raw) = stream.next().await {
            report.candidates += 1;
            let article = match self.dedup.accept(raw).await {
                Ok(Some(article)) => article,
                Ok(None) => {
                    report.duplicates += 1;
                    continue;
                }
                Err(e) => {
                    log::debug!("⚠️  Dedup lookup failed, candidate dropped: {}", e);
                    report.lookup_errors += 1;
                    continue;
                }
            };
            report.accepted += 1;

            let symbols: Vec<_> = matcher
                .match_text(&article.text())
                .into_iter()
                .map(|m| m.symbol)
                .collect();
            if symbols.is_empty() {
                report.unlinked += 1;
            }
            entries.push(BatchEntry {
                article,
                symbols,
                scores: Vec::new(),
            });
        }

        let feed_report = stream.finish().await;
        report.feeds_ok = feed_report.succeeded();
        report.feed_failures = feed_report
            .failures()
            .map(|(url, e)| (url.to_string(), e.category()))
            .collect();

        log::info!(
            "   ├─ Feeds: {} ok, {} failed | candidates: {} | new: {} | dupes: {}",
            report.feeds_ok,
            report.feed_failures.len(),
            report.candidates,
            report.accepted,
            report.duplicates
        );

        if *shutdown.borrow() {
            log::info!("   └─ ⏹️  Shutdown requested before scoring, releasing {} articles", entries.len());
            self.dedup.forget(entries.iter().map(|e| e.article.fingerprint.as_str()));
            report.interrupted = true;
            report.finished_at = Utc::now();
            return CycleOutcome::Completed(report);
        }

        // Score linked articles only; one model pass per article
        let linked: Vec<usize> = (0..entries.len()).filter(|&i| !entries[i].symbols.is_empty()).collect();
        let texts = linked.iter().map(|&i| entries[i].article.text()).collect();
        let results = self.scorer.score_batch(texts, Some(shutdown)).await;

        let mut unscored = Vec::new();
        for (&i, result) in linked.iter().zip(results) {
            match result {
                Some(scores) => {
                    report.scored += 1;
                    entries[i].scores = scores;
                }
                None => unscored.push(i),
            }
        }
        if !unscored.is_empty() {
            report.interrupted = true;
            log::info!("   ├─ ⏹️  {} articles left unscored at shutdown, releasing them", unscored.len());
            self.dedup.forget(unscored.iter().map(|&i| entries[i].article.fingerprint.as_str()));
            let mut idx = 0;
            entries.retain(|_| {
                let keep = !unscored.contains(&idx);
                idx += 1;
                keep
            });
        }

        if entries.is_empty() {
            log::info!("   └─ ✅ Nothing new to commit");
            report.finished_at = Utc::now();
            return CycleOutcome::Completed(report);
        }

        match self.commit_with_retry(&entries, &mut report).await {
            Ok(summary) => {
                log::info!(
                    "   └─ ✅ Committed {} articles, {} scores, {} aggregates",
                    summary.articles_inserted,
                    summary.scores_inserted,
                    summary.aggregates_upserted
                );
                report.batch = Some(summary);
                report.finished_at = Utc::now();
                CycleOutcome::Completed(report)
            }
            Err(error) => {
                log::error!(
                    "   └─ ❌ [{}] Batch commit failed after retry: {}",
                    ErrorCategory::PersistenceFailure,
                    error
                );
                self.dedup.forget(entries.iter().map(|e| e.article.fingerprint.as_str()));
                report.finished_at = Utc::now();
                CycleOutcome::Failed { report, error }
            }
        }
    }
}
