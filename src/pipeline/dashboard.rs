//! Read-side facade for the dashboard
//!
//! Time series come straight from `aggregated_sentiment`; article views add
//! an on-the-fly ensemble over whichever models scored each article.

use super::aggregator::ensemble_score;
use super::db::{ScoredArticle, SentimentStore};
use super::error::StoreError;
use super::resolver::{SearchOutcome, StockResolver, Suggestion};
use super::symbol::Symbol;
use super::types::{AggregatedSentiment, ModelScore, PriceSnapshot};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct ArticleView {
    pub scored: ScoredArticle,
    /// `None` when no model scored the article
    pub ensemble: Option<ModelScore>,
}

pub struct DashboardReader {
    store: Arc<dyn SentimentStore>,
    resolver: Arc<StockResolver>,
}

impl DashboardReader {
    pub fn new(store: Arc<dyn SentimentStore>, resolver: Arc<StockResolver>) -> Self {
        Self { store, resolver }
    }

    /// Buckets in `[from, to)`; `model_name = None` returns every model including `ensemble`
    pub async fn sentiment_series(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        model_name: Option<&str>,
    ) -> Result<Vec<AggregatedSentiment>, StoreError> {
        self.store.aggregated_series(symbol, from, to, model_name).await
    }

    pub async fn recent_articles(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ArticleView>, StoreError> {
        let articles = self.store.recent_articles(symbol, from, to, limit).await?;
        Ok(articles
            .into_iter()
            .map(|scored| {
                let ensemble = ensemble_score(&scored.scores);
                ArticleView { scored, ensemble }
            })
            .collect())
    }

    /// Stored quotes in `[from, to)`, oldest first
    pub async fn price_series(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PriceSnapshot>, StoreError> {
        self.store.price_series(symbol, from, to).await
    }

    pub async fn search(&self, query: &str) -> Result<SearchOutcome, StoreError> {
        self.resolver.search(query).await
    }

    pub fn suggestions(&self, query: &str, limit: usize) -> Vec<Suggestion> {
        self.resolver.suggestions(query, limit)
    }
}
