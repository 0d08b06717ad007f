//! Financial word lexicon
//!
//! Averages the polarity of every lexicon word found in the text. A negator
//! within the previous three words flips and halves a word's polarity; an
//! intensifier directly before it scales it.

use super::super::types::{ModelScore, SentimentLabel};
use std::collections::HashMap;

/// Strictly beyond ±0.1 is polar
pub const LEXICON_THRESHOLD: f64 = 0.1;

const NEGATION_WINDOW: usize = 3;

const WORDS: &[(&str, f64)] = &[
    // bullish
    ("beat", 0.5),
    ("beats", 0.5),
    ("bullish", 0.7),
    ("boost", 0.4),
    ("boosts", 0.4),
    ("buy", 0.3),
    ("climb", 0.4),
    ("climbs", 0.4),
    ("gain", 0.4),
    ("gains", 0.4),
    ("good", 0.5),
    ("great", 0.8),
    ("growth", 0.4),
    ("high", 0.2),
    ("jump", 0.5),
    ("jumps", 0.5),
    ("outperform", 0.6),
    ("positive", 0.5),
    ("profit", 0.4),
    ("profitable", 0.5),
    ("rally", 0.6),
    ("rallies", 0.6),
    ("record", 0.3),
    ("rise", 0.4),
    ("rises", 0.4),
    ("soar", 0.7),
    ("soars", 0.7),
    ("strong", 0.5),
    ("surge", 0.6),
    ("surges", 0.6),
    ("upgrade", 0.6),
    ("upgraded", 0.6),
    // bearish
    ("bad", -0.6),
    ("bankruptcy", -0.9),
    ("bearish", -0.7),
    ("crash", -0.8),
    ("crashes", -0.8),
    ("cut", -0.3),
    ("cuts", -0.3),
    ("decline", -0.4),
    ("declines", -0.4),
    ("default", -0.7),
    ("downgrade", -0.6),
    ("downgraded", -0.6),
    ("drop", -0.4),
    ("drops", -0.4),
    ("fall", -0.4),
    ("falls", -0.4),
    ("fraud", -0.9),
    ("lawsuit", -0.5),
    ("layoffs", -0.5),
    ("loss", -0.5),
    ("losses", -0.5),
    ("miss", -0.5),
    ("misses", -0.5),
    ("negative", -0.5),
    ("plunge", -0.8),
    ("plunges", -0.8),
    ("recall", -0.4),
    ("sell", -0.3),
    ("slump", -0.6),
    ("slumps", -0.6),
    ("tumble", -0.6),
    ("tumbles", -0.6),
    ("weak", -0.5),
    ("worst", -0.9),
];

const NEGATORS: &[&str] = &["not", "no", "never", "without", "isn't", "wasn't", "don't", "didn't", "won't", "can't"];

const INTENSIFIERS: &[(&str, f64)] = &[
    ("very", 1.3),
    ("extremely", 1.5),
    ("sharply", 1.4),
    ("significantly", 1.3),
    ("slightly", 0.5),
    ("somewhat", 0.7),
];

pub struct LexiconModel {
    words: HashMap<&'static str, f64>,
    intensifiers: HashMap<&'static str, f64>,
}

impl LexiconModel {
    pub const NAME: &'static str = "lexicon";

    pub fn new() -> Self {
        Self {
            words: WORDS.iter().copied().collect(),
            intensifiers: INTENSIFIERS.iter().copied().collect(),
        }
    }

    pub fn polarity(&self, text: &str) -> f64 {
        let tokens: Vec<String> = text
            .split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        let mut total = 0.0;
        let mut hits = 0usize;
        for (i, token) in tokens.iter().enumerate() {
            let Some(&base) = self.words.get(token.as_str()) else {
                continue;
            };
            let mut value = base;
            if i > 0 {
                if let Some(&factor) = self.intensifiers.get(tokens[i - 1].as_str()) {
                    value *= factor;
                }
            }
            let window_start = i.saturating_sub(NEGATION_WINDOW);
            if tokens[window_start..i].iter().any(|t| NEGATORS.contains(&t.as_str())) {
                value *= -0.5;
            }
            total += value;
            hits += 1;
        }

        if hits == 0 {
            return 0.0;
        }
        (total / hits as f64).clamp(-1.0, 1.0)
    }

    pub fn score(&self, text: &str) -> ModelScore {
        let polarity = self.polarity(text);
        let label = if polarity > LEXICON_THRESHOLD {
            SentimentLabel::Positive
        } else if polarity < -LEXICON_THRESHOLD {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        };
        ModelScore {
            model_name: Self::NAME.to_string(),
            polarity,
            label,
            confidence: None,
        }
    }
}

impl Default for LexiconModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_of_hits() {
        let model = LexiconModel::new();
        // surges 0.6, strong 0.5
        assert!((model.polarity("Stock surges on strong demand") - 0.55).abs() < 1e-9);
        assert_eq!(model.polarity("Company holds annual meeting"), 0.0);
    }

    #[test]
    fn test_negation_flips() {
        let model = LexiconModel::new();
        let score = model.score("Results were not good this quarter");
        assert!((score.polarity + 0.25).abs() < 1e-9);
        assert_eq!(score.label, SentimentLabel::Negative);
    }

    #[test]
    fn test_intensifier_scales_and_clamps() {
        let model = LexiconModel::new();
        assert!((model.polarity("shares fall sharply, very weak outlook") - (-0.4 - 0.65) / 2.0).abs() < 1e-9);
        assert!(model.polarity("extremely worst crash") >= -1.0);
    }

    #[test]
    fn test_threshold_is_strict() {
        let model = LexiconModel::new();
        // high 0.2, cut -0.3 => -0.05, neutral
        assert_eq!(model.score("high rates cut").label, SentimentLabel::Neutral);
    }
}
