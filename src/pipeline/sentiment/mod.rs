//! Multi-model sentiment scoring
//!
//! The set of models is fixed when the scorer is built and never changes
//! afterwards. A model that cannot be loaded is left out of that set; the
//! remaining models still score every article.
//!
//! ## Models
//!
//! - `vader` - VADER compound score, general purpose
//! - `lexicon` - financial word list with negation
//! - `finbert` - transformer classifier behind an HTTP endpoint (optional)

pub mod lexicon;
pub mod transformer;
pub mod vader;

use super::config::{ModelKind, PipelineConfig};
use super::error::ModelError;
use super::types::ModelScore;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

pub use lexicon::LexiconModel;
pub use transformer::{HttpInferenceClient, InferenceClient, TransformerModel};
pub use vader::VaderModel;

/// Strip URLs and `@`/`#` markers, collapse whitespace
pub fn preprocess(text: &str) -> String {
    static URL: OnceLock<Regex> = OnceLock::new();
    static MARKERS: OnceLock<Regex> = OnceLock::new();
    static SPACE: OnceLock<Regex> = OnceLock::new();

    let url = URL.get_or_init(|| Regex::new(r"https?://\S+").expect("static regex"));
    let markers = MARKERS.get_or_init(|| Regex::new(r"[@#]").expect("static regex"));
    let space = SPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"));

    let text = url.replace_all(text, " ");
    let text = markers.replace_all(&text, "");
    space.replace_all(&text, " ").trim().to_string()
}

/// One loaded sentiment model
pub enum SentimentModel {
    Vader(VaderModel),
    Lexicon(LexiconModel),
    Transformer(TransformerModel),
}

impl SentimentModel {
    pub fn name(&self) -> &'static str {
        match self {
            SentimentModel::Vader(_) => VaderModel::NAME,
            SentimentModel::Lexicon(_) => LexiconModel::NAME,
            SentimentModel::Transformer(_) => TransformerModel::NAME,
        }
    }

    /// Load the model for `kind`
    pub async fn load(kind: ModelKind, config: &PipelineConfig) -> Result<Self, ModelError> {
        match kind {
            ModelKind::Vader => Ok(SentimentModel::Vader(VaderModel::new())),
            ModelKind::Lexicon => Ok(SentimentModel::Lexicon(LexiconModel::new())),
            ModelKind::Transformer => {
                let endpoint = config.transformer.clone().ok_or_else(|| ModelError::Unavailable {
                    model: TransformerModel::NAME.to_string(),
                    message: "FINBERT_ENDPOINT not set".to_string(),
                })?;
                let client = HttpInferenceClient::new(endpoint, config.feed_timeout * 3)?;
                let model = TransformerModel::load(Arc::new(client)).await?;
                Ok(SentimentModel::Transformer(model))
            }
        }
    }

    pub async fn score(&self, text: &str) -> Result<ModelScore, ModelError> {
        match self {
            SentimentModel::Vader(model) => Ok(model.score(text)),
            SentimentModel::Lexicon(model) => Ok(model.score(text)),
            SentimentModel::Transformer(model) => model.score(text).await,
        }
    }
}

/// Runs every enabled model once per article inside a bounded worker pool
pub struct SentimentScorer {
    models: Arc<Vec<SentimentModel>>,
    pool: Arc<Semaphore>,
}

impl SentimentScorer {
    pub fn new(models: Vec<SentimentModel>, pool_size: usize) -> Self {
        Self {
            models: Arc::new(models),
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    /// Load every configured model, leaving out the ones that fail
    pub async fn from_config(config: &PipelineConfig) -> Self {
        let mut models = Vec::new();
        for kind in &config.enabled_models {
            match SentimentModel::load(*kind, config).await {
                Ok(model) => {
                    log::info!("   ├─ ✅ Model loaded: {}", model.name());
                    models.push(model);
                }
                Err(e) => {
                    log::warn!("   ├─ ⚠️  Model {} omitted: {}", kind.name(), e);
                }
            }
        }
        log::info!("   └─ {} of {} sentiment models active", models.len(), config.enabled_models.len());
        Self::new(models, config.scoring_pool_size)
    }

    pub fn model_names(&self) -> Vec<&'static str> {
        self.models.iter().map(SentimentModel::name).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Score one text with every model; failed models are skipped
    pub async fn score_text(&self, text: &str) -> Vec<ModelScore> {
        score_with(&self.models, text).await
    }

    /// Score many texts concurrently, at most `pool_size` at a time
    ///
    /// Output order matches input order. Once `shutdown` flips to true no new
    /// articles are started; those already running finish and the rest come
    /// back as `None`. `Some(vec![])` means the article was scored and every
    /// model failed on it.
    pub async fn score_batch(
        &self,
        texts: Vec<String>,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Vec<Option<Vec<ModelScore>>> {
        let mut results = vec![None; texts.len()];
        let mut started = vec![false; texts.len()];
        let mut tasks = JoinSet::new();

        for (idx, text) in texts.into_iter().enumerate() {
            let permit = match self.pool.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                log::info!("⏹️  Shutdown requested, not scoring remaining articles");
                break;
            }
            started[idx] = true;
            let models = self.models.clone();
            tasks.spawn(async move {
                let _permit = permit;
                (idx, score_with(&models, &text).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, scores)) => results[idx] = Some(scores),
                Err(e) => log::error!("❌ Scoring task failed: {}", e),
            }
        }

        // A started article always counts as scored, even if its task died
        for (result, started) in results.iter_mut().zip(started) {
            if started && result.is_none() {
                *result = Some(Vec::new());
            }
        }
        results
    }
}

/// Each model runs in its own task so a panic loses only that model's score
async fn score_with(models: &Arc<Vec<SentimentModel>>, text: &str) -> Vec<ModelScore> {
    let cleaned: Arc<str> = Arc::from(preprocess(text));
    let mut scores = Vec::with_capacity(models.len());
    for idx in 0..models.len() {
        let name = models[idx].name();
        let task_models = models.clone();
        let task_text = cleaned.clone();
        let joined = tokio::spawn(async move { task_models[idx].score(&task_text).await }).await;
        match joined {
            Ok(Ok(score)) => scores.push(score),
            Ok(Err(e)) => log::warn!("⚠️  {} skipped for one article: {}", name, e),
            Err(e) => log::error!("❌ {} crashed on one article, score skipped: {}", name, e),
        }
    }
    scores
}
