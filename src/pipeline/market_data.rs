//! Market data: symbol validation for search and latest quotes for price snapshots
//!
//! ## API Reference
//!
//! Search: https://query2.finance.yahoo.com/v1/finance/search?q={query}&quotesCount=N
//! Returns: `{ "quotes": [ { "symbol", "shortname", "longname", "quoteType", ... } ] }`
//!
//! A literal ticker is valid when a returned quote carries exactly that
//! symbol. Otherwise the first equity-like quote is taken as the company-name
//! resolution.
//!
//! Chart: https://query1.finance.yahoo.com/v8/finance/chart/{symbol}?interval=1m&range=1d
//! Returns: `{ "chart": { "result": [ { "meta", "timestamp": [..],
//! "indicators": { "quote": [ { "open", "high", "low", "close", "volume" } ] } } ] } }`
//!
//! The last minute bar with a close is the snapshot; the `meta` market price
//! is used when no bar has one.

use super::error::MarketDataError;
use super::symbol::Symbol;
use super::types::{utc_from_secs, PriceSnapshot};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const SEARCH_URL: &str = "https://query2.finance.yahoo.com/v1/finance/search";
const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Result of validating free text against a market-data source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolValidation {
    pub is_valid: bool,
    pub canonical_symbol: Option<Symbol>,
    pub company_name: Option<String>,
}

impl SymbolValidation {
    pub fn valid(symbol: Symbol, company_name: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            canonical_symbol: Some(symbol),
            company_name: Some(company_name.into()),
        }
    }

    pub fn invalid() -> Self {
        Self {
            is_valid: false,
            canonical_symbol: None,
            company_name: None,
        }
    }
}

#[async_trait]
pub trait MarketData: Send + Sync {
    /// Validate `text` as a ticker or resolve it as a company name
    async fn validate_symbol(&self, text: &str) -> Result<SymbolValidation, MarketDataError>;

    /// Most recent quote, `None` when the source has no data for the symbol
    async fn latest_quote(&self, symbol: &Symbol) -> Result<Option<PriceSnapshot>, MarketDataError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    quotes: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    symbol: String,
    #[serde(default)]
    shortname: Option<String>,
    #[serde(default)]
    longname: Option<String>,
    #[serde(rename = "quoteType", default)]
    quote_type: Option<String>,
}

impl Quote {
    fn is_equity_like(&self) -> bool {
        matches!(self.quote_type.as_deref(), Some("EQUITY") | Some("ETF"))
    }

    fn display_name(&self) -> String {
        self.longname
            .clone()
            .or_else(|| self.shortname.clone())
            .unwrap_or_else(|| self.symbol.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: Option<ChartMeta>,
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    indicators: Option<Indicators>,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(rename = "regularMarketPrice", default)]
    regular_market_price: Option<f64>,
    #[serde(rename = "regularMarketTime", default)]
    regular_market_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Bars>,
}

/// Bar series; Yahoo leaves `null` holes for minutes without trades
#[derive(Debug, Default, Deserialize)]
struct Bars {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<i64>>,
}

fn at<T: Copy>(series: &[Option<T>], idx: usize) -> Option<T> {
    series.get(idx).copied().flatten()
}

fn snapshot_from_chart(symbol: &Symbol, response: ChartResponse) -> Option<PriceSnapshot> {
    let result = response.chart.result?.into_iter().next()?;
    let bars = result
        .indicators
        .and_then(|i| i.quote.into_iter().next())
        .unwrap_or_default();

    let last_bar = (0..result.timestamp.len())
        .rev()
        .find(|&idx| at(&bars.close, idx).is_some());
    if let Some(idx) = last_bar {
        let close = at(&bars.close, idx)?;
        return Some(PriceSnapshot {
            symbol: symbol.clone(),
            timestamp: utc_from_secs(result.timestamp[idx])?,
            price: close,
            volume: at(&bars.volume, idx),
            open: at(&bars.open, idx),
            high: at(&bars.high, idx),
            low: at(&bars.low, idx),
            close: Some(close),
        });
    }

    let meta = result.meta?;
    Some(PriceSnapshot {
        symbol: symbol.clone(),
        timestamp: utc_from_secs(meta.regular_market_time?)?,
        price: meta.regular_market_price?,
        volume: None,
        open: None,
        high: None,
        low: None,
        close: None,
    })
}

/// Yahoo Finance search and chart client
pub struct YahooMarketData {
    client: reqwest::Client,
    quotes_count: u32,
}

impl YahooMarketData {
    pub fn new(timeout: Duration) -> Result<Self, MarketDataError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (compatible; sentiflow/0.1)")
            .build()?;
        Ok(Self {
            client,
            quotes_count: 6,
        })
    }
}

#[async_trait]
impl MarketData for YahooMarketData {
    async fn validate_symbol(&self, text: &str) -> Result<SymbolValidation, MarketDataError> {
        let query = text.trim();
        if query.is_empty() {
            return Ok(SymbolValidation::invalid());
        }

        let response = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("q", query.to_string()),
                ("quotesCount", self.quotes_count.to_string()),
                ("newsCount", "0".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MarketDataError::Status(response.status().as_u16()));
        }

        let body: SearchResponse = response.json().await?;
        Ok(pick_quote(query, &body.quotes))
    }

    async fn latest_quote(&self, symbol: &Symbol) -> Result<Option<PriceSnapshot>, MarketDataError> {
        let response = self
            .client
            .get(format!("{}/{}", CHART_URL, symbol.as_str()))
            .query(&[("interval", "1m"), ("range", "1d")])
            .send()
            .await?;

        // Unknown or delisted symbols come back as 404
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(MarketDataError::Status(response.status().as_u16()));
        }

        let body: ChartResponse = response.json().await?;
        Ok(snapshot_from_chart(symbol, body))
    }
}

fn pick_quote(query: &str, quotes: &[Quote]) -> SymbolValidation {
    let wanted = query.to_ascii_uppercase();
    let exact = quotes.iter().find(|q| q.symbol.eq_ignore_ascii_case(&wanted));
    let chosen = exact.or_else(|| quotes.iter().find(|q| q.is_equity_like()));

    match chosen.and_then(|q| Symbol::parse(&q.symbol).ok().map(|s| (s, q.display_name()))) {
        Some((symbol, name)) => SymbolValidation::valid(symbol, name),
        None => SymbolValidation::invalid(),
    }
}
