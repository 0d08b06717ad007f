//! Error taxonomy for the collection pipeline
//!
//! Every failure maps onto one [`ErrorCategory`]. Only a persistence failure
//! that survives its retry is allowed to fail a cycle; everything else is
//! logged and absorbed.

use thiserror::Error;

/// Coarse failure classes used for reporting and retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Feed unreachable or timed out. Retried on the next cycle.
    TransientIo,
    /// Malformed feed or entry. Skipped.
    Parse,
    /// A sentiment model failed to load or failed on one article.
    ModelUnavailable,
    /// A batch write failed.
    PersistenceFailure,
    /// Nothing matched. Reported as "not found", never raised.
    ResolutionAmbiguous,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::TransientIo => "TRANSIENT_IO",
            ErrorCategory::Parse => "PARSE_ERROR",
            ErrorCategory::ModelUnavailable => "MODEL_UNAVAILABLE",
            ErrorCategory::PersistenceFailure => "PERSISTENCE_FAILURE",
            ErrorCategory::ResolutionAmbiguous => "RESOLUTION_AMBIGUOUS",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request to {url} failed: {message}")]
    TransientIo { url: String, message: String },
    #[error("timed out after {timeout_ms}ms fetching {url}")]
    Timeout { url: String, timeout_ms: u64 },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("could not parse feed {url}: {message}")]
    Parse { url: String, message: String },
}

impl FeedError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            FeedError::Parse { .. } => ErrorCategory::Parse,
            _ => ErrorCategory::TransientIo,
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model {model} unavailable: {message}")]
    Unavailable { model: String, message: String },
    #[error("model {model} failed on input: {message}")]
    Inference { model: String, message: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("migration {file} failed: {message}")]
    Migration { file: String, message: String },
    #[error("invalid stored value: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("market data request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("market data service returned HTTP {0}")]
    Status(u16),
    #[error("timed out after {timeout_ms}ms fetching a quote for {symbol}")]
    Timeout { symbol: String, timeout_ms: u64 },
}

impl MarketDataError {
    /// Market data is an external service; every failure is retried next cycle
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::TransientIo
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: &'static str, message: String },
    #[error("unknown sentiment model '{0}'")]
    UnknownModel(String),
    #[error("no feed endpoints configured")]
    NoFeeds,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with a letter, found '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },
}

/// Umbrella error for callers that drive the whole pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    MarketData(#[from] MarketDataError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::Feed(e) => e.category(),
            PipelineError::Model(_) => ErrorCategory::ModelUnavailable,
            PipelineError::Store(_) => ErrorCategory::PersistenceFailure,
            PipelineError::MarketData(e) => e.category(),
            PipelineError::Config(_) => ErrorCategory::Parse,
            PipelineError::Validation(_) => ErrorCategory::ResolutionAmbiguous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_error_categories() {
        let timeout = FeedError::Timeout {
            url: "https://example.com/rss".to_string(),
            timeout_ms: 100,
        };
        assert_eq!(timeout.category(), ErrorCategory::TransientIo);

        let parse = FeedError::Parse {
            url: "https://example.com/rss".to_string(),
            message: "unexpected eof".to_string(),
        };
        assert_eq!(parse.category(), ErrorCategory::Parse);
        assert_eq!(PipelineError::from(parse).category(), ErrorCategory::Parse);
    }

    #[test]
    fn test_store_error_is_persistence_failure() {
        let err = PipelineError::from(StoreError::Corrupt("bad label".to_string()));
        assert_eq!(err.category(), ErrorCategory::PersistenceFailure);
        assert_eq!(err.category().to_string(), "PERSISTENCE_FAILURE");
    }
}
