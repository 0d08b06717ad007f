//! VADER compound score

use super::super::types::{ModelScore, SentimentLabel};
use vader_sentiment::SentimentIntensityAnalyzer;

/// Compound score at or beyond ±0.05 is polar
pub const VADER_THRESHOLD: f64 = 0.05;

pub struct VaderModel {
    analyzer: SentimentIntensityAnalyzer<'static>,
}

impl VaderModel {
    pub const NAME: &'static str = "vader";

    pub fn new() -> Self {
        Self {
            analyzer: SentimentIntensityAnalyzer::new(),
        }
    }

    pub fn score(&self, text: &str) -> ModelScore {
        let compound = if text.trim().is_empty() {
            0.0
        } else {
            let scores = self.analyzer.polarity_scores(text);
            scores.get("compound").copied().unwrap_or(0.0)
        };
        let polarity = compound.clamp(-1.0, 1.0);

        ModelScore {
            model_name: Self::NAME.to_string(),
            polarity,
            label: SentimentLabel::from_polarity(polarity, VADER_THRESHOLD),
            confidence: None,
        }
    }
}

impl Default for VaderModel {
    fn default() -> Self {
        Self::new()
    }
}
