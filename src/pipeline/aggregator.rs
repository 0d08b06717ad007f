//! Time-bucketed sentiment aggregation
//!
//! `Aggregator::aggregate` is a pure function of its observations: the same
//! rows in any order give bit-identical output. Polarities are sorted before
//! summation so floating point rounding never depends on input order.
//!
//! Besides one row per real model, every (symbol, bucket) also gets an
//! `ensemble` row built from the per-article equal-weighted mean of whatever
//! models scored that article. Individual model rows are never rewritten to
//! produce it.

use super::symbol::Symbol;
use super::types::{AggregatedSentiment, BucketWidth, ModelScore, SentimentLabel};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Synthetic model name for the combined score
pub const ENSEMBLE_MODEL: &str = "ensemble";

/// Label threshold for the combined score
pub const ENSEMBLE_THRESHOLD: f64 = 0.1;

/// One stored score, positioned in time by its article
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub article_id: i64,
    pub symbol: Symbol,
    pub model_name: String,
    pub published_at: DateTime<Utc>,
    pub polarity: f64,
    pub label: SentimentLabel,
}

#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    bucket_width: BucketWidth,
}

impl Aggregator {
    pub fn new(bucket_width: BucketWidth) -> Self {
        Self { bucket_width }
    }

    pub fn bucket_width(&self) -> BucketWidth {
        self.bucket_width
    }

    /// Mean polarity and counts per (symbol, bucket, model), ensemble included
    ///
    /// Output is ordered by symbol, bucket start, then model name.
    pub fn aggregate(&self, observations: &[Observation]) -> Vec<AggregatedSentiment> {
        let mut per_model: BTreeMap<(Symbol, i64, String), Vec<(f64, SentimentLabel)>> = BTreeMap::new();
        let mut per_article: BTreeMap<(Symbol, i64, i64), Vec<f64>> = BTreeMap::new();

        for obs in observations {
            if obs.model_name == ENSEMBLE_MODEL {
                continue;
            }
            let bucket = self.bucket_width.bucket_start(obs.published_at);
            per_model
                .entry((obs.symbol.clone(), bucket, obs.model_name.clone()))
                .or_default()
                .push((obs.polarity, obs.label));
            per_article
                .entry((obs.symbol.clone(), bucket, obs.article_id))
                .or_default()
                .push(obs.polarity);
        }

        for ((symbol, bucket, _article_id), polarities) in per_article {
            let mean = stable_mean(polarities);
            let label = SentimentLabel::from_polarity(mean, ENSEMBLE_THRESHOLD);
            per_model
                .entry((symbol, bucket, ENSEMBLE_MODEL.to_string()))
                .or_default()
                .push((mean, label));
        }

        per_model
            .into_iter()
            .map(|((symbol, bucket_start, model_name), values)| {
                summarise(symbol, bucket_start, model_name, values)
            })
            .collect()
    }
}

/// Equal-weighted combination of whichever models scored one article
///
/// Returns `None` when no model produced a score.
pub fn ensemble_score(scores: &[ModelScore]) -> Option<ModelScore> {
    let polarities: Vec<f64> = scores
        .iter()
        .filter(|s| s.model_name != ENSEMBLE_MODEL)
        .map(|s| s.polarity)
        .collect();
    if polarities.is_empty() {
        return None;
    }
    let polarity = stable_mean(polarities);
    Some(ModelScore {
        model_name: ENSEMBLE_MODEL.to_string(),
        polarity,
        label: SentimentLabel::from_polarity(polarity, ENSEMBLE_THRESHOLD),
        confidence: None,
    })
}

fn stable_mean(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let sum: f64 = values.iter().sum();
    sum / values.len() as f64
}

fn summarise(
    symbol: Symbol,
    bucket_start: i64,
    model_name: String,
    values: Vec<(f64, SentimentLabel)>,
) -> AggregatedSentiment {
    let mut positive_count = 0;
    let mut negative_count = 0;
    let mut neutral_count = 0;
    for (_, label) in &values {
        match label {
            SentimentLabel::Positive => positive_count += 1,
            SentimentLabel::Negative => negative_count += 1,
            SentimentLabel::Neutral => neutral_count += 1,
        }
    }
    let article_count = values.len() as i64;
    let mean_polarity = stable_mean(values.into_iter().map(|(p, _)| p).collect());

    AggregatedSentiment {
        symbol,
        bucket_start,
        model_name,
        mean_polarity,
        article_count,
        positive_count,
        negative_count,
        neutral_count,
    }
}
