//! Persistence gateway for articles, scores and aggregates
//!
//! `SentimentStore` is the seam the rest of the pipeline talks to; the SQLite
//! implementation keeps one `Connection` behind a mutex and runs in WAL mode.
//!
//! A cycle's writes go through `commit_batch`, which runs the article, link,
//! score and aggregate statements inside a single transaction. Either the
//! whole batch lands or none of it does, so the caller may retry it as a unit.

use super::aggregator::{Aggregator, Observation};
use super::error::StoreError;
use super::symbol::Symbol;
use super::types::{
    utc_from_secs, AggregatedSentiment, Article, ArticleSecurityLink, ModelScore, PriceSnapshot,
    Security, SentimentLabel, SentimentScore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Schema files, applied in order. Each uses `IF NOT EXISTS`.
const MIGRATIONS: &[(&str, &str)] = &[
    ("00_securities.sql", include_str!("../../sql/00_securities.sql")),
    ("01_articles.sql", include_str!("../../sql/01_articles.sql")),
    ("02_sentiment.sql", include_str!("../../sql/02_sentiment.sql")),
    ("03_prices.sql", include_str!("../../sql/03_prices.sql")),
];

/// Article accepted by dedup, linked and scored, waiting to be written
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub article: Article,
    pub symbols: Vec<Symbol>,
    /// Computed once per article, fanned out to every linked symbol
    pub scores: Vec<ModelScore>,
}

/// What a committed batch wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub articles_inserted: usize,
    /// Entries whose fingerprint was already stored
    pub articles_skipped: usize,
    pub links_inserted: usize,
    pub scores_inserted: usize,
    pub aggregates_upserted: usize,
}

/// Article joined with its scores for one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredArticle {
    pub article: Article,
    pub symbol: Symbol,
    pub scores: Vec<ModelScore>,
}

#[async_trait]
pub trait SentimentStore: Send + Sync {
    async fn article_exists_by_fingerprint(&self, fingerprint: &str) -> Result<bool, StoreError>;

    /// Fingerprints of articles published at or after `since`, for warming the dedup index
    async fn recent_fingerprints(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, StoreError>;

    /// Atomic upsert. The flag is `true` only for the call that inserted the row.
    async fn get_or_create_security(
        &self,
        symbol: &Symbol,
        company_name: &str,
    ) -> Result<(Security, bool), StoreError>;

    async fn add_alias(&self, symbol: &Symbol, alias: &str) -> Result<(), StoreError>;

    async fn load_securities(&self) -> Result<Vec<Security>, StoreError>;

    /// Write a cycle's articles, links and scores, then recompute every touched bucket
    ///
    /// Runs in one transaction.
    async fn commit_batch(
        &self,
        batch: &[BatchEntry],
        aggregator: &Aggregator,
    ) -> Result<BatchSummary, StoreError>;

    async fn aggregated_series(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        model_name: Option<&str>,
    ) -> Result<Vec<AggregatedSentiment>, StoreError>;

    /// Newest first
    async fn recent_articles(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScoredArticle>, StoreError>;

    /// Upsert quotes keyed on (symbol, quote time), in one transaction
    async fn save_prices(&self, snapshots: &[PriceSnapshot]) -> Result<usize, StoreError>;

    /// Quotes in `[from, to)`, oldest first
    async fn price_series(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PriceSnapshot>, StoreError>;
}

/// Apply the embedded schema and switch the database to WAL mode
pub fn run_schema_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::debug!("📊 Enabled WAL mode for SQLite database");

    for (file, sql) in MIGRATIONS {
        conn.execute_batch(sql).map_err(|e| StoreError::Migration {
            file: file.to_string(),
            message: e.to_string(),
        })?;
        log::debug!("   ├─ ✅ Applied: {}", file);
    }

    Ok(())
}

/// SQLite implementation of SentimentStore
#[derive(Clone)]
pub struct SqliteSentimentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSentimentStore {
    /// Open (or create) the database and apply the schema
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        let mut conn = Connection::open(db_path)?;
        run_schema_migrations(&mut conn)?;
        log::info!("✅ SQLite store ready: {}", db_path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Corrupt("connection mutex poisoned".to_string()))
    }
}

#[async_trait]
impl SentimentStore for SqliteSentimentStore {
    async fn article_exists_by_fingerprint(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT 1 FROM articles WHERE fingerprint = ?")?;
        Ok(stmt.exists([fingerprint])?)
    }

    async fn recent_fingerprints(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT fingerprint, collected_at FROM articles WHERE collected_at >= ?",
        )?;
        let rows = stmt
            .query_map([since.timestamp()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(fp, secs)| Ok((fp, timestamp(secs)?)))
            .collect()
    }

    async fn get_or_create_security(
        &self,
        symbol: &Symbol,
        company_name: &str,
    ) -> Result<(Security, bool), StoreError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO securities (symbol, company_name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(symbol) DO NOTHING",
            params![symbol.as_str(), company_name, Utc::now().timestamp()],
        )?;
        let security = read_security(&conn, symbol)?
            .ok_or_else(|| StoreError::Corrupt(format!("security {} vanished after upsert", symbol)))?;
        Ok((security, inserted == 1))
    }

    async fn add_alias(&self, symbol: &Symbol, alias: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO security_aliases (symbol, alias) VALUES (?, ?)",
            params![symbol.as_str(), alias],
        )?;
        Ok(())
    }

    async fn load_securities(&self) -> Result<Vec<Security>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT symbol, company_name FROM securities ORDER BY symbol")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut securities: BTreeMap<Symbol, Security> = BTreeMap::new();
        for (raw_symbol, company_name) in rows {
            let symbol = parse_symbol(&raw_symbol)?;
            securities.insert(symbol.clone(), Security::new(symbol, company_name));
        }

        let mut stmt = conn.prepare("SELECT symbol, alias FROM security_aliases")?;
        let aliases = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (raw_symbol, alias) in aliases {
            let symbol = parse_symbol(&raw_symbol)?;
            if let Some(security) = securities.get_mut(&symbol) {
                security.aliases.insert(alias);
            }
        }

        Ok(securities.into_values().collect())
    }

    async fn commit_batch(
        &self,
        batch: &[BatchEntry],
        aggregator: &Aggregator,
    ) -> Result<BatchSummary, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let width = aggregator.bucket_width();
        let mut summary = BatchSummary::default();
        let mut touched: BTreeSet<(Symbol, i64)> = BTreeSet::new();

        for entry in batch {
            let Some(article_id) = insert_article(&tx, &entry.article)? else {
                summary.articles_skipped += 1;
                continue;
            };
            summary.articles_inserted += 1;

            for symbol in &entry.symbols {
                insert_link(&tx, &ArticleSecurityLink { article_id, symbol: symbol.clone() })?;
                summary.links_inserted += 1;

                for score in &entry.scores {
                    insert_score(
                        &tx,
                        &SentimentScore {
                            article_id,
                            symbol: symbol.clone(),
                            model_name: score.model_name.clone(),
                            polarity: score.polarity,
                            label: score.label,
                            confidence: score.confidence,
                        },
                    )?;
                    summary.scores_inserted += 1;
                }

                touched.insert((symbol.clone(), width.bucket_start(entry.article.published_at)));
            }
        }

        let now = Utc::now().timestamp();
        for (symbol, bucket_start) in &touched {
            let observations = bucket_observations(&tx, symbol, width.range(*bucket_start))?;
            for row in aggregator.aggregate(&observations) {
                upsert_aggregate(&tx, &row, now)?;
                summary.aggregates_upserted += 1;
            }
        }

        tx.commit()?;
        Ok(summary)
    }

    async fn aggregated_series(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        model_name: Option<&str>,
    ) -> Result<Vec<AggregatedSentiment>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT bucket_start, model_name, mean_polarity, article_count,
                    positive_count, negative_count, neutral_count
             FROM aggregated_sentiment
             WHERE symbol = ?1 AND bucket_start >= ?2 AND bucket_start < ?3
               AND (?4 IS NULL OR model_name = ?4)
             ORDER BY bucket_start, model_name",
        )?;
        let rows = stmt
            .query_map(
                params![symbol.as_str(), from.timestamp(), to.timestamp(), model_name],
                |row| {
                    Ok(AggregatedSentiment {
                        symbol: symbol.clone(),
                        bucket_start: row.get(0)?,
                        model_name: row.get(1)?,
                        mean_polarity: row.get(2)?,
                        article_count: row.get(3)?,
                        positive_count: row.get(4)?,
                        negative_count: row.get(5)?,
                        neutral_count: row.get(6)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn recent_articles(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScoredArticle>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT a.id, a.source, a.url, a.published_at, a.title, a.body, a.fingerprint
             FROM articles a
             JOIN article_securities l ON l.article_id = a.id
             WHERE l.symbol = ? AND a.published_at >= ? AND a.published_at < ?
             ORDER BY a.published_at DESC, a.id DESC
             LIMIT ?",
        )?;
        let rows = stmt
            .query_map(
                params![symbol.as_str(), from.timestamp(), to.timestamp(), limit as i64],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut scores_stmt = conn.prepare_cached(
            "SELECT model_name, polarity, label, confidence FROM sentiment_scores
             WHERE article_id = ? AND symbol = ? ORDER BY model_name",
        )?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, source, url, published_at, title, body, fingerprint) in rows {
            let raw_scores = scores_stmt
                .query_map(params![id, symbol.as_str()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let scores = raw_scores
                .into_iter()
                .map(|(model_name, polarity, label, confidence)| {
                    Ok(ModelScore {
                        model_name,
                        polarity,
                        label: parse_label(&label)?,
                        confidence,
                    })
                })
                .collect::<Result<Vec<_>, StoreError>>()?;

            out.push(ScoredArticle {
                article: Article {
                    id: Some(id),
                    source,
                    url,
                    published_at: timestamp(published_at)?,
                    title,
                    body,
                    fingerprint,
                },
                symbol: symbol.clone(),
                scores,
            });
        }
        Ok(out)
    }

    async fn save_prices(&self, snapshots: &[PriceSnapshot]) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().timestamp();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO stock_prices
                    (symbol, quoted_at, price, volume, open_price, high_price, low_price, close_price, collected_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(symbol, quoted_at) DO UPDATE SET
                    price = excluded.price,
                    volume = excluded.volume,
                    open_price = excluded.open_price,
                    high_price = excluded.high_price,
                    low_price = excluded.low_price,
                    close_price = excluded.close_price,
                    collected_at = excluded.collected_at",
            )?;
            for snapshot in snapshots {
                stmt.execute(params![
                    snapshot.symbol.as_str(),
                    snapshot.timestamp.timestamp(),
                    snapshot.price,
                    snapshot.volume,
                    snapshot.open,
                    snapshot.high,
                    snapshot.low,
                    snapshot.close,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(snapshots.len())
    }

    async fn price_series(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PriceSnapshot>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT quoted_at, price, volume, open_price, high_price, low_price, close_price
             FROM stock_prices
             WHERE symbol = ? AND quoted_at >= ? AND quoted_at < ?
             ORDER BY quoted_at",
        )?;
        let rows = stmt
            .query_map(params![symbol.as_str(), from.timestamp(), to.timestamp()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                    row.get::<_, Option<f64>>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(quoted_at, price, volume, open, high, low, close)| {
                Ok(PriceSnapshot {
                    symbol: symbol.clone(),
                    timestamp: timestamp(quoted_at)?,
                    price,
                    volume,
                    open,
                    high,
                    low,
                    close,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()
    }
}

/// Insert an article unless its fingerprint is already stored
///
/// Returns the new row id, or `None` for a duplicate.
pub fn insert_article(tx: &Transaction<'_>, article: &Article) -> Result<Option<i64>, StoreError> {
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO articles
            (source, url, published_at, title, body, fingerprint, collected_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            article.source,
            article.url,
            article.published_at.timestamp(),
            article.title,
            article.body,
            article.fingerprint,
            Utc::now().timestamp(),
        ],
    )?;
    if inserted == 0 {
        return Ok(None);
    }
    Ok(Some(tx.last_insert_rowid()))
}

pub fn insert_link(tx: &Transaction<'_>, link: &ArticleSecurityLink) -> Result<(), StoreError> {
    tx.execute(
        "INSERT OR IGNORE INTO article_securities (article_id, symbol) VALUES (?, ?)",
        params![link.article_id, link.symbol.as_str()],
    )?;
    Ok(())
}

pub fn insert_score(tx: &Transaction<'_>, score: &SentimentScore) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO sentiment_scores (article_id, symbol, model_name, polarity, label, confidence)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(article_id, symbol, model_name) DO UPDATE SET
            polarity = excluded.polarity,
            label = excluded.label,
            confidence = excluded.confidence",
        params![
            score.article_id,
            score.symbol.as_str(),
            score.model_name,
            score.polarity.clamp(-1.0, 1.0),
            score.label.as_str(),
            score.confidence,
        ],
    )?;
    Ok(())
}

pub fn upsert_aggregate(
    tx: &Transaction<'_>,
    row: &AggregatedSentiment,
    updated_at: i64,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO aggregated_sentiment (
            symbol, bucket_start, model_name, mean_polarity, article_count,
            positive_count, negative_count, neutral_count, updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(symbol, bucket_start, model_name) DO UPDATE SET
            mean_polarity = excluded.mean_polarity,
            article_count = excluded.article_count,
            positive_count = excluded.positive_count,
            negative_count = excluded.negative_count,
            neutral_count = excluded.neutral_count,
            updated_at = excluded.updated_at",
        params![
            row.symbol.as_str(),
            row.bucket_start,
            row.model_name,
            row.mean_polarity,
            row.article_count,
            row.positive_count,
            row.negative_count,
            row.neutral_count,
            updated_at,
        ],
    )?;
    Ok(())
}

/// Every stored score for `symbol` whose article falls in `[start, end)`
fn bucket_observations(
    tx: &Transaction<'_>,
    symbol: &Symbol,
    (start, end): (i64, i64),
) -> Result<Vec<Observation>, StoreError> {
    let mut stmt = tx.prepare_cached(
        "SELECT s.article_id, s.model_name, s.polarity, s.label, a.published_at
         FROM sentiment_scores s
         JOIN articles a ON a.id = s.article_id
         WHERE s.symbol = ? AND a.published_at >= ? AND a.published_at < ?",
    )?;
    let rows = stmt
        .query_map(params![symbol.as_str(), start, end], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(article_id, model_name, polarity, label, published_at)| {
            Ok(Observation {
                article_id,
                symbol: symbol.clone(),
                model_name,
                published_at: timestamp(published_at)?,
                polarity,
                label: parse_label(&label)?,
            })
        })
        .collect()
}

fn read_security(conn: &Connection, symbol: &Symbol) -> Result<Option<Security>, StoreError> {
    let company_name: Option<String> = conn
        .query_row(
            "SELECT company_name FROM securities WHERE symbol = ?",
            [symbol.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    let Some(company_name) = company_name else {
        return Ok(None);
    };

    let mut stmt = conn.prepare_cached("SELECT alias FROM security_aliases WHERE symbol = ?")?;
    let aliases = stmt
        .query_map([symbol.as_str()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(Security::new(symbol.clone(), company_name).with_aliases(aliases)))
}

fn parse_symbol(raw: &str) -> Result<Symbol, StoreError> {
    Symbol::parse(raw).map_err(|e| StoreError::Corrupt(format!("symbol '{}': {}", raw, e)))
}

fn parse_label(raw: &str) -> Result<SentimentLabel, StoreError> {
    SentimentLabel::parse(raw).ok_or_else(|| StoreError::Corrupt(format!("label '{}'", raw)))
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, StoreError> {
    utc_from_secs(secs).ok_or_else(|| StoreError::Corrupt(format!("timestamp {}", secs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::BucketWidth;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    /// Helper to create a store backed by a temp file
    fn create_test_store() -> (NamedTempFile, SqliteSentimentStore) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = SqliteSentimentStore::open(temp_file.path().to_str().unwrap()).unwrap();
        (temp_file, store)
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn make_entry(fp: &str, minute: u32, symbols: &[&str], scores: &[(&str, f64)]) -> BatchEntry {
        BatchEntry {
            article: Article {
                id: None,
                source: "Reuters".to_string(),
                url: format!("https://example.com/{}", fp),
                published_at: Utc.with_ymd_and_hms(2024, 6, 3, 9, minute, 0).unwrap(),
                title: format!("Headline {}", fp),
                body: "Body".to_string(),
                fingerprint: fp.to_string(),
            },
            symbols: symbols.iter().map(|s| sym(s)).collect(),
            scores: scores
                .iter()
                .map(|(model, p)| ModelScore {
                    model_name: model.to_string(),
                    polarity: *p,
                    label: SentimentLabel::from_polarity(*p, 0.05),
                    confidence: None,
                })
                .collect(),
        }
    }

    fn table_counts(store: &SqliteSentimentStore) -> Vec<i64> {
        let conn = store.conn().unwrap();
        ["articles", "article_securities", "sentiment_scores", "aggregated_sentiment"]
            .iter()
            .map(|table| {
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                    .unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_no_partial_rows() {
        // Test: an error at the last step (aggregate upsert) rolls back the
        // articles, links and scores written earlier in the same batch
        let (_temp, store) = create_test_store();
        store.get_or_create_security(&sym("AAPL"), "Apple Inc.").await.unwrap();
        store.get_or_create_security(&sym("MSFT"), "Microsoft").await.unwrap();
        store
            .conn()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_aggregates BEFORE INSERT ON aggregated_sentiment
                 BEGIN SELECT RAISE(ABORT, 'aggregate write rejected'); END;",
            )
            .unwrap();

        let batch = vec![
            make_entry("fp-1", 5, &["AAPL"], &[("vader", 0.4), ("lexicon", 0.2)]),
            make_entry("fp-2", 10, &["AAPL", "MSFT"], &[("vader", -0.3)]),
        ];
        let aggregator = Aggregator::new(BucketWidth::HOURLY);

        let result = store.commit_batch(&batch, &aggregator).await;
        assert!(result.is_err());
        assert_eq!(table_counts(&store), vec![0, 0, 0, 0]);
        assert!(!store.article_exists_by_fingerprint("fp-1").await.unwrap());

        // The same batch lands in full once the fault is gone
        store
            .conn()
            .unwrap()
            .execute_batch("DROP TRIGGER reject_aggregates;")
            .unwrap();
        let summary = store.commit_batch(&batch, &aggregator).await.unwrap();
        assert_eq!(summary.articles_inserted, 2);
        assert_eq!(summary.links_inserted, 3);
        assert_eq!(summary.scores_inserted, 4);
        let counts = table_counts(&store);
        assert_eq!(&counts[..3], &[2, 3, 4]);
        assert!(counts[3] > 0);
    }

    #[tokio::test]
    async fn test_prices_upsert_by_quote_time() {
        // Test: the same quote minute collected twice stays one row with the latest values
        let (_temp, store) = create_test_store();
        let at = |minute| Utc.with_ymd_and_hms(2024, 6, 3, 14, minute, 0).unwrap();
        let quote = |minute, price| PriceSnapshot {
            symbol: sym("AAPL"),
            timestamp: at(minute),
            price,
            volume: Some(1_000),
            open: Some(price - 0.5),
            high: Some(price + 0.5),
            low: Some(price - 1.0),
            close: Some(price),
        };

        store.save_prices(&[quote(0, 190.0), quote(1, 190.4)]).await.unwrap();
        store.save_prices(&[quote(1, 190.6)]).await.unwrap();

        let series = store.price_series(&sym("AAPL"), at(0), at(30)).await.unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].timestamp, at(0));
        assert_eq!(series[1].price, 190.6);
        assert!(store.price_series(&sym("MSFT"), at(0), at(30)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_or_create_security_is_new_once() {
        let (_temp, store) = create_test_store();

        let (security, is_new) = store.get_or_create_security(&sym("NVDA"), "Nvidia").await.unwrap();
        assert!(is_new);
        assert_eq!(security.company_name, "Nvidia");

        let (again, is_new) = store
            .get_or_create_security(&sym("NVDA"), "Different Name")
            .await
            .unwrap();
        assert!(!is_new);
        assert_eq!(again.company_name, "Nvidia");
    }

    #[tokio::test]
    async fn test_aliases_round_trip_through_load() {
        let (_temp, store) = create_test_store();
        store.get_or_create_security(&sym("META"), "Meta Platforms").await.unwrap();
        store.add_alias(&sym("META"), "Facebook").await.unwrap();
        store.add_alias(&sym("META"), "Facebook").await.unwrap();

        let loaded = store.load_securities().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].aliases.contains("Facebook"));
        assert_eq!(loaded[0].aliases.len(), 1);
    }

    #[tokio::test]
    async fn test_commit_batch_writes_everything() {
        let (_temp, store) = create_test_store();
        store.get_or_create_security(&sym("AAPL"), "Apple").await.unwrap();
        store.get_or_create_security(&sym("MSFT"), "Microsoft").await.unwrap();
        let aggregator = Aggregator::new(BucketWidth::HOURLY);

        let batch = vec![
            make_entry("fp1", 5, &["AAPL", "MSFT"], &[("vader", 0.5), ("lexicon", 0.2)]),
            make_entry("fp2", 20, &["AAPL"], &[("vader", -0.1)]),
        ];
        let summary = store.commit_batch(&batch, &aggregator).await.unwrap();

        assert_eq!(summary.articles_inserted, 2);
        assert_eq!(summary.links_inserted, 3);
        assert_eq!(summary.scores_inserted, 5);
        assert!(store.article_exists_by_fingerprint("fp1").await.unwrap());

        let from = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 6, 4, 0, 0, 0).unwrap();
        let series = store.aggregated_series(&sym("AAPL"), from, to, Some("vader")).await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].article_count, 2);
        assert!((series[0].mean_polarity - 0.2).abs() < 1e-12);

        let articles = store.recent_articles(&sym("AAPL"), from, to, 10).await.unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].article.fingerprint, "fp2");
        assert_eq!(articles[1].scores.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_fingerprint_skipped() {
        // Test: Re-committing the same article never creates a second row
        let (_temp, store) = create_test_store();
        store.get_or_create_security(&sym("TSLA"), "Tesla").await.unwrap();
        let aggregator = Aggregator::new(BucketWidth::HOURLY);
        let batch = vec![make_entry("dup", 1, &["TSLA"], &[("vader", 0.4)])];

        store.commit_batch(&batch, &aggregator).await.unwrap();
        let second = store.commit_batch(&batch, &aggregator).await.unwrap();

        assert_eq!(second.articles_inserted, 0);
        assert_eq!(second.articles_skipped, 1);

        let from = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 6, 4, 0, 0, 0).unwrap();
        let series = store.aggregated_series(&sym("TSLA"), from, to, Some("vader")).await.unwrap();
        assert_eq!(series[0].article_count, 1);
    }

    #[tokio::test]
    async fn test_late_article_recomputes_bucket() {
        // Test: A late article for an existing bucket converges to the full mean
        let (_temp, store) = create_test_store();
        store.get_or_create_security(&sym("AMZN"), "Amazon").await.unwrap();
        let aggregator = Aggregator::new(BucketWidth::HOURLY);

        store
            .commit_batch(&[make_entry("a", 10, &["AMZN"], &[("vader", 0.8)])], &aggregator)
            .await
            .unwrap();
        store
            .commit_batch(&[make_entry("b", 50, &["AMZN"], &[("vader", 0.2)])], &aggregator)
            .await
            .unwrap();

        let from = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
        let series = store.aggregated_series(&sym("AMZN"), from, to, None).await.unwrap();
        let vader = series.iter().find(|r| r.model_name == "vader").unwrap();
        assert_eq!(vader.article_count, 2);
        assert!((vader.mean_polarity - 0.5).abs() < 1e-12);
        assert!(series.iter().any(|r| r.model_name == "ensemble"));
    }
}
