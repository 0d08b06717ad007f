//! Maps article text and search queries to known securities
//!
//! Match cascade, strongest first:
//! 1. ticker token (`$aapl` in any case, bare `AAPL` only in upper case)
//! 2. company name or alias as a whole-word substring
//! 3. Jaro-Winkler similarity over word windows, only when 1 and 2 found nothing
//!
//! Ingestion only ever links to securities already in the directory. The
//! search path may additionally ask the market-data collaborator and grow
//! the directory; that is the single place new securities are created.

use super::config::Region;
use super::directory::StockDirectory;
use super::error::StoreError;
use super::market_data::MarketData;
use super::symbol::Symbol;
use super::types::Security;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use strsim::jaro_winkler;

/// Trailing words dropped from company names before matching
const CORPORATE_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "corp", "corporation", "co", "company", "ltd", "limited", "plc",
    "llc", "holdings", "group", "com", "sa", "ag", "nv",
];

const MIN_NAME_LEN: usize = 3;
const MIN_FUZZY_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKind {
    Ticker,
    Alias,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMatch {
    pub symbol: Symbol,
    pub kind: MatchKind,
    /// 1.0 for ticker and alias hits, similarity for fuzzy ones
    pub score: f64,
}

/// Answer to an interactive search
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    Found {
        symbol: Symbol,
        company_name: String,
        is_new: bool,
    },
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionMatch {
    Exact,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub symbol: Symbol,
    pub company_name: String,
    pub match_type: SuggestionMatch,
}

/// Lowercase, punctuation to spaces, single spaces, padded with one space each side
fn normalize_for_match(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    format!(" {} ", words.join(" "))
}

fn core_name(name: &str) -> String {
    let normalized = normalize_for_match(name);
    let mut words: Vec<&str> = normalized.split_whitespace().collect();
    while words.len() > 1 && words.last().is_some_and(|w| CORPORATE_SUFFIXES.contains(w)) {
        words.pop();
    }
    words.join(" ")
}

/// `AAPL's` -> `AAPL`
fn strip_possessive(token: &str) -> &str {
    ["'s", "'S", "\u{2019}s", "\u{2019}S"]
        .iter()
        .find_map(|suffix| token.strip_suffix(*suffix))
        .unwrap_or(token)
}

/// Ticker-looking tokens. The flag is true for `$`-prefixed ones.
fn ticker_tokens(text: &str) -> Vec<(String, bool)> {
    let mut out = Vec::new();
    for raw in text.split_whitespace() {
        let token = raw.trim_matches(|c: char| !(c.is_ascii_alphanumeric() || c == '$' || c == '.' || c == '-'));
        let token = strip_possessive(token).trim_end_matches(['.', '-']);
        if let Some(rest) = token.strip_prefix('$') {
            if !rest.is_empty() {
                out.push((rest.to_ascii_uppercase(), true));
            }
            continue;
        }
        let letters = token.chars().filter(|c| c.is_ascii_alphabetic()).count();
        if token.len() >= 2 && letters > 0 && !token.chars().any(|c| c.is_ascii_lowercase()) {
            out.push((token.to_string(), false));
        }
    }
    out
}

/// Precomputed lookup tables over one directory snapshot
pub struct NameMatcher {
    tickers: HashMap<String, Symbol>,
    /// (normalized name, symbol), longest names first
    names: Vec<(String, Symbol)>,
    fuzzy_threshold: f64,
}

impl NameMatcher {
    pub fn new(securities: &[Security], fuzzy_threshold: f64) -> Self {
        let mut tickers = HashMap::new();
        let mut names = Vec::new();

        for security in securities {
            tickers.insert(security.symbol.as_str().to_string(), security.symbol.clone());
            if security.symbol.exchange_suffix().is_some() && security.symbol.base().len() >= 2 {
                tickers
                    .entry(security.symbol.base().to_string())
                    .or_insert_with(|| security.symbol.clone());
            }
            for name in security.names() {
                let core = core_name(name);
                if core.chars().count() >= MIN_NAME_LEN {
                    names.push((core, security.symbol.clone()));
                }
            }
        }
        names.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        names.dedup();

        Self {
            tickers,
            names,
            fuzzy_threshold,
        }
    }

    /// Every security referenced by `text`, one entry per symbol, strongest match kept
    pub fn match_text(&self, text: &str) -> Vec<ResolvedMatch> {
        let mut found: BTreeMap<Symbol, ResolvedMatch> = BTreeMap::new();

        for (token, _dollar) in ticker_tokens(text) {
            if let Some(symbol) = self.tickers.get(&token) {
                found.entry(symbol.clone()).or_insert(ResolvedMatch {
                    symbol: symbol.clone(),
                    kind: MatchKind::Ticker,
                    score: 1.0,
                });
            }
        }

        let haystack = normalize_for_match(text);
        for (name, symbol) in &self.names {
            if haystack.contains(&format!(" {} ", name)) {
                found.entry(symbol.clone()).or_insert(ResolvedMatch {
                    symbol: symbol.clone(),
                    kind: MatchKind::Alias,
                    score: 1.0,
                });
            }
        }

        if found.is_empty() {
            for m in self.fuzzy(&haystack) {
                found.insert(m.symbol.clone(), m);
            }
        }

        found.into_values().collect()
    }

    fn fuzzy(&self, haystack: &str) -> Vec<ResolvedMatch> {
        let words: Vec<&str> = haystack.split_whitespace().collect();
        let mut best: BTreeMap<Symbol, f64> = BTreeMap::new();

        for (name, symbol) in &self.names {
            if name.chars().count() < MIN_FUZZY_LEN {
                continue;
            }
            let width = name.split_whitespace().count();
            if width == 0 || width > words.len() {
                continue;
            }
            for window in words.windows(width) {
                let candidate = window.join(" ");
                let similarity = jaro_winkler(&candidate, name);
                if similarity >= self.fuzzy_threshold {
                    let entry = best.entry(symbol.clone()).or_insert(similarity);
                    if similarity > *entry {
                        *entry = similarity;
                    }
                }
            }
        }

        best.into_iter()
            .map(|(symbol, score)| ResolvedMatch {
                symbol,
                kind: MatchKind::Fuzzy,
                score,
            })
            .collect()
    }
}

pub struct StockResolver {
    directory: Arc<StockDirectory>,
    market_data: Arc<dyn MarketData>,
    region: Region,
    fuzzy_threshold: f64,
}

impl StockResolver {
    pub fn new(
        directory: Arc<StockDirectory>,
        market_data: Arc<dyn MarketData>,
        region: Region,
        fuzzy_threshold: f64,
    ) -> Self {
        Self {
            directory,
            market_data,
            region,
            fuzzy_threshold,
        }
    }

    pub fn directory(&self) -> &Arc<StockDirectory> {
        &self.directory
    }

    /// Matcher over the directory as it is right now
    ///
    /// Build one per cycle and reuse it for every article.
    pub fn matcher(&self) -> NameMatcher {
        NameMatcher::new(&self.directory.snapshot(), self.fuzzy_threshold)
    }

    /// Known securities referenced by article text. Never creates securities.
    pub fn resolve_article(&self, text: &str) -> Vec<Symbol> {
        self.matcher()
            .match_text(text)
            .into_iter()
            .map(|m| m.symbol)
            .collect()
    }

    /// Interactive lookup
    ///
    /// Falls back to the market-data collaborator when nothing in the
    /// directory matches, and inserts the validated security. Validation
    /// failures and lookup errors both return `NotFound` without touching
    /// the directory.
    pub async fn search(&self, query: &str) -> Result<SearchOutcome, StoreError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(SearchOutcome::NotFound);
        }

        if let Some(security) = self.lookup_existing(query) {
            return Ok(SearchOutcome::Found {
                symbol: security.symbol,
                company_name: security.company_name,
                is_new: false,
            });
        }

        let validation = match self.market_data.validate_symbol(query).await {
            Ok(validation) => validation,
            Err(e) => {
                log::warn!("⚠️  Market data lookup for '{}' failed: {}", query, e);
                return Ok(SearchOutcome::NotFound);
            }
        };

        let (symbol, company_name) = match (validation.is_valid, validation.canonical_symbol) {
            (true, Some(symbol)) => {
                let name = validation
                    .company_name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| symbol.as_str().to_string());
                (symbol, name)
            }
            _ => {
                log::debug!("🔍 '{}' did not validate", query);
                return Ok(SearchOutcome::NotFound);
            }
        };

        if !self.region.accepts(&symbol) {
            log::debug!("🔍 '{}' resolved to {} outside region {:?}", query, symbol, self.region);
            return Ok(SearchOutcome::NotFound);
        }

        let (security, is_new) = self.directory.get_or_create(&symbol, &company_name).await?;
        if !query.eq_ignore_ascii_case(symbol.as_str()) {
            self.directory.add_alias(&symbol, query).await?;
        }

        Ok(SearchOutcome::Found {
            symbol: security.symbol,
            company_name: security.company_name,
            is_new,
        })
    }

    /// Exact then partial directory matches, never consulting market data
    pub fn suggestions(&self, query: &str, limit: usize) -> Vec<Suggestion> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut exact = Vec::new();
        let mut partial = Vec::new();
        for security in self.directory.snapshot() {
            let symbol_lower = security.symbol.as_str().to_lowercase();
            let names: Vec<String> = security.names().map(str::to_lowercase).collect();

            let match_type = if symbol_lower == needle || names.iter().any(|n| *n == needle) {
                Some(SuggestionMatch::Exact)
            } else if symbol_lower.starts_with(&needle) || names.iter().any(|n| n.contains(&needle)) {
                Some(SuggestionMatch::Partial)
            } else {
                None
            };

            let Some(match_type) = match_type else { continue };
            let suggestion = Suggestion {
                symbol: security.symbol,
                company_name: security.company_name,
                match_type,
            };
            match match_type {
                SuggestionMatch::Exact => exact.push(suggestion),
                SuggestionMatch::Partial => partial.push(suggestion),
            }
        }

        exact.into_iter().chain(partial).take(limit).collect()
    }

    fn lookup_existing(&self, query: &str) -> Option<Security> {
        if let Ok(symbol) = Symbol::parse(query) {
            if let Some(security) = self.directory.get(&symbol) {
                return Some(security);
            }
        }

        let mut matches = self.matcher().match_text(query);
        matches.sort_by(|a, b| a.kind.cmp(&b.kind).then(b.score.total_cmp(&a.score)));
        matches
            .into_iter()
            .next()
            .and_then(|m| self.directory.get(&m.symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::SqliteSentimentStore;
    use crate::pipeline::directory::DEFAULT_SEED;
    use crate::pipeline::error::MarketDataError;
    use crate::pipeline::market_data::SymbolValidation;
    use crate::pipeline::types::PriceSnapshot;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    /// Knows AMD and RELIANCE.NS, rejects everything else
    struct FakeMarketData {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketData for FakeMarketData {
        async fn validate_symbol(&self, text: &str) -> Result<SymbolValidation, MarketDataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(match text.to_ascii_uppercase().as_str() {
                "AMD" | "ADVANCED MICRO DEVICES" => {
                    SymbolValidation::valid(Symbol::parse("AMD").unwrap(), "Advanced Micro Devices, Inc.")
                }
                "RELIANCE" => SymbolValidation::valid(Symbol::parse("RELIANCE.NS").unwrap(), "Reliance Industries"),
                _ => SymbolValidation::invalid(),
            })
        }

        async fn latest_quote(&self, _symbol: &Symbol) -> Result<Option<PriceSnapshot>, MarketDataError> {
            Ok(None)
        }
    }

    async fn create_resolver() -> (NamedTempFile, Arc<FakeMarketData>, StockResolver) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = Arc::new(SqliteSentimentStore::open(temp_file.path().to_str().unwrap()).unwrap());
        let directory = Arc::new(StockDirectory::load(store).await.unwrap());
        directory.seed(DEFAULT_SEED).await.unwrap();
        let market = Arc::new(FakeMarketData {
            calls: AtomicUsize::new(0),
        });
        let resolver = StockResolver::new(directory, market.clone(), Region::Us, 0.92);
        (temp_file, market, resolver)
    }

    fn symbols(list: Vec<Symbol>) -> Vec<String> {
        list.into_iter().map(String::from).collect()
    }

    #[tokio::test]
    async fn test_ticker_tokens() {
        let (_temp, _market, resolver) = create_resolver().await;

        assert_eq!(symbols(resolver.resolve_article("Shares of $tsla slid")), vec!["TSLA"]);
        assert_eq!(symbols(resolver.resolve_article("Analysts upgrade (NVDA), MSFT.")), vec!["MSFT", "NVDA"]);
        // Lowercase bare word is not a ticker
        assert!(resolver.resolve_article("the msft team").is_empty());
    }

    #[tokio::test]
    async fn test_possessive_ticker_links() {
        let (_temp, _market, resolver) = create_resolver().await;

        assert_eq!(symbols(resolver.resolve_article("AAPL's margins widen")), vec!["AAPL"]);
        assert_eq!(symbols(resolver.resolve_article("Investors cheer NVDA\u{2019}s guidance")), vec!["NVDA"]);
        assert_eq!(symbols(resolver.resolve_article("$msft's cloud unit")), vec!["MSFT"]);
    }

    #[tokio::test]
    async fn test_alias_substring_on_word_boundary() {
        let (_temp, _market, resolver) = create_resolver().await;

        assert_eq!(symbols(resolver.resolve_article("Google unveils new chip")), vec!["GOOGL"]);
        assert_eq!(symbols(resolver.resolve_article("Amazon.com Inc. beats estimates")), vec!["AMZN"]);
        // "Pineapple" must not hit Apple
        assert!(resolver.resolve_article("Pineapple prices rise").is_empty());
    }

    #[tokio::test]
    async fn test_fuzzy_only_when_nothing_exact() {
        let (_temp, _market, resolver) = create_resolver().await;

        // Misspelling caught by similarity
        assert_eq!(symbols(resolver.resolve_article("Microsft shares climb")), vec!["MSFT"]);
        // Exact hit present, so the near-miss is ignored
        assert_eq!(symbols(resolver.resolve_article("Tesla and Microsft")), vec!["TSLA"]);
    }

    #[tokio::test]
    async fn test_multiple_securities_in_one_article() {
        let (_temp, _market, resolver) = create_resolver().await;
        let found = resolver.resolve_article("Apple and Netflix rally while $AMZN lags");
        assert_eq!(symbols(found), vec!["AAPL", "AMZN", "NFLX"]);
    }

    #[tokio::test]
    async fn test_search_existing_company_name() {
        let (_temp, market, resolver) = create_resolver().await;

        let outcome = resolver.search("Apple").await.unwrap();
        assert_eq!(
            outcome,
            SearchOutcome::Found {
                symbol: Symbol::parse("AAPL").unwrap(),
                company_name: "Apple Inc.".to_string(),
                is_new: false,
            }
        );
        assert_eq!(resolver.search("aapl").await.unwrap(), outcome);
        assert_eq!(market.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_search_unvalidatable_does_not_mutate() {
        let (_temp, _market, resolver) = create_resolver().await;
        let before = resolver.directory().snapshot();

        assert_eq!(resolver.search("qzxv blorf").await.unwrap(), SearchOutcome::NotFound);
        assert_eq!(resolver.directory().snapshot(), before);
    }

    #[tokio::test]
    async fn test_search_new_symbol_is_new_once() {
        let (_temp, _market, resolver) = create_resolver().await;
        let before = resolver.directory().len();

        match resolver.search("AMD").await.unwrap() {
            SearchOutcome::Found { symbol, is_new, .. } => {
                assert_eq!(symbol.as_str(), "AMD");
                assert!(is_new);
            }
            other => panic!("expected Found, got {:?}", other),
        }
        match resolver.search("AMD").await.unwrap() {
            SearchOutcome::Found { is_new, .. } => assert!(!is_new),
            other => panic!("expected Found, got {:?}", other),
        }
        assert_eq!(resolver.directory().len(), before + 1);
    }

    #[tokio::test]
    async fn test_search_outside_region_not_found() {
        let (_temp, _market, resolver) = create_resolver().await;
        let before = resolver.directory().len();
        assert_eq!(resolver.search("RELIANCE").await.unwrap(), SearchOutcome::NotFound);
        assert_eq!(resolver.directory().len(), before);
    }

    #[tokio::test]
    async fn test_company_name_search_adds_alias() {
        let (_temp, _market, resolver) = create_resolver().await;
        resolver.search("Advanced Micro Devices").await.unwrap();

        // Article text with the searched name now links to AMD
        assert_eq!(
            symbols(resolver.resolve_article("Advanced Micro Devices launches GPU")),
            vec!["AMD"]
        );
    }

    #[tokio::test]
    async fn test_suggestions_exact_before_partial() {
        let (_temp, _market, resolver) = create_resolver().await;

        let results = resolver.suggestions("meta", 5);
        assert_eq!(results[0].symbol.as_str(), "META");
        assert_eq!(results[0].match_type, SuggestionMatch::Exact);

        let partial = resolver.suggestions("soft", 5);
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].match_type, SuggestionMatch::Partial);

        assert_eq!(resolver.suggestions("a", 2).len(), 2);
    }
}
