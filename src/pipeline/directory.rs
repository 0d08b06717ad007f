//! Process-wide directory of known securities
//!
//! Reads go to an in-memory snapshot behind an `RwLock`. Writes (new
//! securities, new aliases) are serialized through one async mutex and hit
//! the store first, so the cache never holds something the database lacks.

use super::db::SentimentStore;
use super::error::StoreError;
use super::symbol::Symbol;
use super::types::Security;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Seed set inserted on first start: (symbol, company name, aliases)
pub const DEFAULT_SEED: &[(&str, &str, &[&str])] = &[
    ("AAPL", "Apple Inc.", &["Apple"]),
    ("GOOGL", "Alphabet Inc.", &["Alphabet", "Google"]),
    ("MSFT", "Microsoft Corporation", &["Microsoft"]),
    ("AMZN", "Amazon.com Inc.", &["Amazon"]),
    ("TSLA", "Tesla Inc.", &["Tesla"]),
    ("META", "Meta Platforms Inc.", &["Meta", "Facebook"]),
    ("NFLX", "Netflix Inc.", &["Netflix"]),
    ("NVDA", "NVIDIA Corporation", &["Nvidia"]),
];

pub struct StockDirectory {
    store: Arc<dyn SentimentStore>,
    securities: RwLock<HashMap<Symbol, Security>>,
    writer: Mutex<()>,
}

impl StockDirectory {
    /// Load every stored security into memory
    pub async fn load(store: Arc<dyn SentimentStore>) -> Result<Self, StoreError> {
        let securities = store
            .load_securities()
            .await?
            .into_iter()
            .map(|s| (s.symbol.clone(), s))
            .collect::<HashMap<_, _>>();
        log::info!("📇 Stock directory loaded ({} securities)", securities.len());
        Ok(Self {
            store,
            securities: RwLock::new(securities),
            writer: Mutex::new(()),
        })
    }

    /// Insert the seed set; existing rows are left alone
    pub async fn seed(&self, seed: &[(&str, &str, &[&str])]) -> Result<usize, StoreError> {
        let mut created = 0;
        for (raw_symbol, company_name, aliases) in seed {
            let symbol = match Symbol::parse(raw_symbol) {
                Ok(symbol) => symbol,
                Err(e) => {
                    log::warn!("⚠️  Skipping seed entry '{}': {}", raw_symbol, e);
                    continue;
                }
            };
            let (_, is_new) = self.get_or_create(&symbol, company_name).await?;
            for alias in aliases.iter() {
                self.add_alias(&symbol, alias).await?;
            }
            if is_new {
                created += 1;
            }
        }
        Ok(created)
    }

    pub fn get(&self, symbol: &Symbol) -> Option<Security> {
        self.read().get(symbol).cloned()
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.read().contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every security, ordered by symbol
    pub fn snapshot(&self) -> Vec<Security> {
        let mut all: Vec<Security> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    /// Atomic get-or-create against the store
    ///
    /// Returns the stored security and whether this call created it.
    pub async fn get_or_create(
        &self,
        symbol: &Symbol,
        company_name: &str,
    ) -> Result<(Security, bool), StoreError> {
        let _guard = self.writer.lock().await;
        let (security, is_new) = self.store.get_or_create_security(symbol, company_name).await?;
        self.write().insert(security.symbol.clone(), security.clone());
        if is_new {
            log::info!("➕ New security: {} ({})", security.symbol, security.company_name);
        }
        Ok((security, is_new))
    }

    /// Append an alias. Blank aliases and ones equal to the company name are ignored.
    pub async fn add_alias(&self, symbol: &Symbol, alias: &str) -> Result<(), StoreError> {
        let alias = alias.trim();
        if alias.is_empty() {
            return Ok(());
        }
        let _guard = self.writer.lock().await;
        let known = match self.read().get(symbol) {
            Some(security) => {
                security.company_name.eq_ignore_ascii_case(alias)
                    || security.aliases.iter().any(|a| a.eq_ignore_ascii_case(alias))
            }
            None => return Ok(()),
        };
        if known {
            return Ok(());
        }
        self.store.add_alias(symbol, alias).await?;
        if let Some(security) = self.write().get_mut(symbol) {
            security.aliases.insert(alias.to_string());
        }
        Ok(())
    }

    // Cache writes are single statements; a poisoned lock never holds a torn entry.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Symbol, Security>> {
        self.securities.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Symbol, Security>> {
        self.securities.write().unwrap_or_else(|e| e.into_inner())
    }
}
