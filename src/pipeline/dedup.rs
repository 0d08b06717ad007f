//! Article deduplication by content fingerprint
//!
//! The fingerprint is a SHA-256 over the normalized title and URL. An
//! in-memory index answers most lookups; fingerprints older than the
//! lookback window are evicted and the store is consulted instead. The
//! `articles.fingerprint` UNIQUE constraint is the final backstop.

use super::db::SentimentStore;
use super::error::StoreError;
use super::types::{Article, RawArticle};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Case-fold and collapse whitespace runs to a single space
pub fn normalize(input: &str) -> String {
    input
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase hex SHA-256 of `normalize(title) + "\n" + normalize(url)`
pub fn fingerprint(title: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(title).as_bytes());
    hasher.update(b"\n");
    hasher.update(normalize(url).as_bytes());
    hex::encode(hasher.finalize())
}

pub struct ArticleDeduplicator {
    store: Arc<dyn SentimentStore>,
    lookback: ChronoDuration,
    /// fingerprint -> first seen
    index: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl ArticleDeduplicator {
    pub fn new(store: Arc<dyn SentimentStore>, lookback: Duration) -> Self {
        let lookback = ChronoDuration::from_std(lookback).unwrap_or_else(|_| {
            log::warn!("⚠️  Dedup lookback {:?} out of range, using 7 days", lookback);
            ChronoDuration::days(7)
        });
        Self {
            store,
            lookback,
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the index with fingerprints the store saw inside the lookback window
    pub async fn warm(&self) -> Result<usize, StoreError> {
        let since = Utc::now() - self.lookback;
        let recent = self.store.recent_fingerprints(since).await?;
        let count = recent.len();
        let mut index = self.write_index();
        for (fp, seen_at) in recent {
            index.entry(fp).or_insert(seen_at);
        }
        log::info!("🧠 Dedup index warmed with {} fingerprints", count);
        Ok(count)
    }

    /// Accept the candidate if its fingerprint has not been seen
    ///
    /// The index check and insert happen under one write lock, so two
    /// concurrent callers with the same fingerprint cannot both be accepted.
    pub async fn accept(&self, raw: RawArticle) -> Result<Option<Article>, StoreError> {
        self.accept_at(raw, Utc::now()).await
    }

    pub async fn accept_at(
        &self,
        raw: RawArticle,
        now: DateTime<Utc>,
    ) -> Result<Option<Article>, StoreError> {
        let fp = fingerprint(&raw.title, &raw.url);

        if self.read_index().contains_key(&fp) {
            return Ok(None);
        }

        if self.store.article_exists_by_fingerprint(&fp).await? {
            self.write_index().entry(fp).or_insert(now);
            return Ok(None);
        }

        {
            let mut index = self.write_index();
            if index.contains_key(&fp) {
                return Ok(None);
            }
            index.insert(fp.clone(), now);
        }

        Ok(Some(Article::from_raw(raw, fp)))
    }

    /// Drop fingerprints of articles that were accepted but never persisted
    pub fn forget<'a, I>(&self, fingerprints: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut index = self.write_index();
        for fp in fingerprints {
            index.remove(fp);
        }
    }

    /// Evict fingerprints first seen before `now - lookback`
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.lookback;
        let mut index = self.write_index();
        let before = index.len();
        index.retain(|_, seen_at| *seen_at >= cutoff);
        let evicted = before - index.len();
        if evicted > 0 {
            log::debug!("🧹 Evicted {} fingerprints older than {}", evicted, cutoff);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.read_index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A poisoned index only ever held complete inserts; keep using it.
    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_index(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }
}
