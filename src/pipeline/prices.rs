//! Price snapshots for every known security
//!
//! Runs next to news collection each cycle. Symbols are quoted
//! concurrently under a small pool, each with its own timeout; a failed or
//! slow symbol is reported as TRANSIENT_IO and simply retried next cycle.

use super::directory::StockDirectory;
use super::error::{ErrorCategory, MarketDataError};
use super::market_data::MarketData;
use super::symbol::Symbol;
use super::types::PriceSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// What one price pass produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceReport {
    pub snapshots: Vec<PriceSnapshot>,
    /// Symbols the source had no data for
    pub missing: Vec<Symbol>,
    pub failures: Vec<(Symbol, ErrorCategory)>,
}

pub struct PriceCollector {
    market_data: Arc<dyn MarketData>,
    directory: Arc<StockDirectory>,
    pool: Arc<Semaphore>,
    timeout: Duration,
}

impl PriceCollector {
    pub fn new(
        market_data: Arc<dyn MarketData>,
        directory: Arc<StockDirectory>,
        pool_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            market_data,
            directory,
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
            timeout,
        }
    }

    /// Quote every security currently in the directory
    pub async fn collect(&self) -> PriceReport {
        let symbols: Vec<Symbol> = self.directory.snapshot().into_iter().map(|s| s.symbol).collect();
        self.collect_for(symbols).await
    }

    pub async fn collect_for(&self, symbols: Vec<Symbol>) -> PriceReport {
        let mut tasks = JoinSet::new();
        for symbol in symbols {
            let market_data = self.market_data.clone();
            let pool = self.pool.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let _permit = pool.acquire_owned().await;
                let result = match tokio::time::timeout(timeout, market_data.latest_quote(&symbol)).await {
                    Ok(result) => result,
                    Err(_) => Err(MarketDataError::Timeout {
                        symbol: symbol.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                };
                (symbol, result)
            });
        }

        let mut report = PriceReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Some(snapshot)))) => report.snapshots.push(snapshot),
                Ok((symbol, Ok(None))) => {
                    log::debug!("📉 No quote available for {}", symbol);
                    report.missing.push(symbol);
                }
                Ok((symbol, Err(e))) => {
                    log::warn!("⚠️  [{}] Quote for {} failed: {}", e.category(), symbol, e);
                    report.failures.push((symbol, e.category()));
                }
                Err(e) => log::error!("❌ Quote task failed: {}", e),
            }
        }

        report.snapshots.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        report.missing.sort();
        report.failures.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }
}
