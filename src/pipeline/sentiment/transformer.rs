//! FinBERT-style classifier served over HTTP
//!
//! The model itself runs out of process. This client posts text to an
//! inference endpoint (Hugging Face text-classification format) and turns
//! the returned class probabilities into a polarity:
//! `p(positive) - p(negative)`, label by argmax, confidence = max probability.

use super::super::config::TransformerEndpoint;
use super::super::error::ModelError;
use super::super::types::{ModelScore, SentimentLabel};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Inputs longer than this many characters are truncated
pub const MAX_INPUT_CHARS: usize = 512;

const WARMUP_TEXT: &str = "Quarterly results were in line with expectations.";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassProbability {
    pub label: String,
    pub score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Nested(Vec<Vec<ClassProbability>>),
    Flat(Vec<ClassProbability>),
}

impl InferenceResponse {
    fn into_classes(self) -> Vec<ClassProbability> {
        match self {
            InferenceResponse::Nested(mut outer) => {
                if outer.is_empty() {
                    Vec::new()
                } else {
                    outer.swap_remove(0)
                }
            }
            InferenceResponse::Flat(classes) => classes,
        }
    }
}

/// Transport to wherever the classifier runs
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Vec<ClassProbability>, ModelError>;
}

pub struct HttpInferenceClient {
    client: reqwest::Client,
    endpoint: TransformerEndpoint,
}

impl HttpInferenceClient {
    pub fn new(endpoint: TransformerEndpoint, timeout: Duration) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| unavailable(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn classify(&self, text: &str) -> Result<Vec<ClassProbability>, ModelError> {
        let mut request = self
            .client
            .post(&self.endpoint.url)
            .json(&serde_json::json!({ "inputs": text, "options": { "wait_for_model": true } }));
        if let Some(token) = &self.endpoint.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| inference(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 503 || status.as_u16() == 404 {
            return Err(unavailable(format!("endpoint returned HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(inference(format!("endpoint returned HTTP {}", status)));
        }

        let body: InferenceResponse = response.json().await.map_err(|e| inference(e.to_string()))?;
        Ok(body.into_classes())
    }
}

pub struct TransformerModel {
    client: Arc<dyn InferenceClient>,
}

impl TransformerModel {
    pub const NAME: &'static str = "finbert";

    /// Call the endpoint once; an unreachable or malformed endpoint is unavailable
    pub async fn load(client: Arc<dyn InferenceClient>) -> Result<Self, ModelError> {
        let warmup = client.classify(WARMUP_TEXT).await.map_err(|e| unavailable(e.to_string()))?;
        if to_score(&warmup).is_none() {
            return Err(unavailable("warm-up call returned no known labels".to_string()));
        }
        Ok(Self { client })
    }

    pub async fn score(&self, text: &str) -> Result<ModelScore, ModelError> {
        let truncated: String = text.chars().take(MAX_INPUT_CHARS).collect();
        let classes = self.client.classify(&truncated).await?;
        to_score(&classes).ok_or_else(|| inference("no known labels in response".to_string()))
    }
}

fn to_score(classes: &[ClassProbability]) -> Option<ModelScore> {
    let mut positive = None;
    let mut negative = None;
    let mut best: Option<(SentimentLabel, f64)> = None;

    for class in classes {
        let Some(label) = SentimentLabel::parse(&class.label.to_lowercase()) else {
            continue;
        };
        match label {
            SentimentLabel::Positive => positive = Some(class.score),
            SentimentLabel::Negative => negative = Some(class.score),
            SentimentLabel::Neutral => {}
        }
        if best.map_or(true, |(_, score)| class.score > score) {
            best = Some((label, class.score));
        }
    }

    let (label, confidence) = best?;
    let polarity = (positive.unwrap_or(0.0) - negative.unwrap_or(0.0)).clamp(-1.0, 1.0);
    Some(ModelScore {
        model_name: TransformerModel::NAME.to_string(),
        polarity,
        label,
        confidence: Some(confidence),
    })
}

fn unavailable(message: String) -> ModelError {
    ModelError::Unavailable {
        model: TransformerModel::NAME.to_string(),
        message,
    }
}

fn inference(message: String) -> ModelError {
    ModelError::Inference {
        model: TransformerModel::NAME.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedClient {
        body: &'static str,
    }

    #[async_trait]
    impl InferenceClient for CannedClient {
        async fn classify(&self, _text: &str) -> Result<Vec<ClassProbability>, ModelError> {
            let parsed: InferenceResponse = serde_json::from_str(self.body).map_err(|e| inference(e.to_string()))?;
            Ok(parsed.into_classes())
        }
    }

    #[tokio::test]
    async fn test_probabilities_to_polarity() {
        let client = Arc::new(CannedClient {
            body: r#"[[{"label":"positive","score":0.7},{"label":"negative","score":0.1},{"label":"neutral","score":0.2}]]"#,
        });
        let model = TransformerModel::load(client).await.unwrap();
        let score = model.score("Revenue beat guidance").await.unwrap();

        assert!((score.polarity - 0.6).abs() < 1e-9);
        assert_eq!(score.label, SentimentLabel::Positive);
        assert_eq!(score.confidence, Some(0.7));
    }

    #[tokio::test]
    async fn test_flat_response_and_uppercase_labels() {
        let client = Arc::new(CannedClient {
            body: r#"[{"label":"NEGATIVE","score":0.8},{"label":"POSITIVE","score":0.05}]"#,
        });
        let model = TransformerModel::load(client).await.unwrap();
        let score = model.score("Guidance slashed").await.unwrap();
        assert_eq!(score.label, SentimentLabel::Negative);
        assert!((score.polarity + 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_labels_fail_to_load() {
        let client = Arc::new(CannedClient {
            body: r#"[{"label":"LABEL_0","score":0.9}]"#,
        });
        assert!(matches!(
            TransformerModel::load(client).await,
            Err(ModelError::Unavailable { .. })
        ));
    }
}
