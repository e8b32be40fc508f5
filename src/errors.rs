/// Domain-specific error types for the pricer.
/// Numeric errors are row-scoped: the pipeline records them per contract
/// and keeps going. Nothing here is process-fatal on its own.
#[derive(Debug, thiserror::Error)]
pub enum PricerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid option kind: {0:?} (expected \"call\" or \"put\")")]
    InvalidOptionKind(String),

    #[error("numeric overflow: exp({log_price}) exceeds the price ceiling")]
    NumericOverflow { log_price: f64 },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("market data error: {0}")]
    MarketData(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for PricerError {
    fn from(e: reqwest::Error) -> Self {
        PricerError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for PricerError {
    fn from(e: serde_json::Error) -> Self {
        PricerError::Parse(e.to_string())
    }
}

impl From<rusqlite::Error> for PricerError {
    fn from(e: rusqlite::Error) -> Self {
        PricerError::Database(e.to_string())
    }
}

impl From<std::io::Error> for PricerError {
    fn from(e: std::io::Error) -> Self {
        PricerError::Artifact(e.to_string())
    }
}

pub type PricerResult<T> = Result<T, PricerError>;
