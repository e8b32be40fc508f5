use crate::errors::{PricerError, PricerResult};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub market_data_base_url: String,
    pub default_ticker: String,
    pub risk_free_rate: f64,
    pub model_weights_path: PathBuf,
    pub scaler_path: PathBuf,
    pub data_dir: PathBuf,
    /// Ceiling applied when exp(log_price) overflows
    pub max_ai_price: f64,
    pub server_port: u16,
}

impl AppConfig {
    pub fn from_env() -> PricerResult<Self> {
        dotenvy::dotenv().ok();

        let risk_free_rate = env_var_or("RISK_FREE_RATE", "0.05")
            .parse::<f64>()
            .map_err(|e| PricerError::Config(format!("RISK_FREE_RATE: {e}")))?;

        let max_ai_price = env_var_or("MAX_AI_PRICE", "1000000")
            .parse::<f64>()
            .map_err(|e| PricerError::Config(format!("MAX_AI_PRICE: {e}")))?;
        if !(max_ai_price.is_finite() && max_ai_price > 0.0) {
            return Err(PricerError::Config(format!(
                "MAX_AI_PRICE must be positive and finite, got {max_ai_price}"
            )));
        }

        let server_port = env_var_or("SERVER_PORT", "3001")
            .parse::<u16>()
            .map_err(|e| PricerError::Config(format!("SERVER_PORT: {e}")))?;

        Ok(Self {
            market_data_base_url: env_var_or(
                "MARKET_DATA_BASE_URL",
                "https://query1.finance.yahoo.com/v7/finance",
            ),
            default_ticker: env_var_or("DEFAULT_TICKER", "AAPL").to_uppercase(),
            risk_free_rate,
            model_weights_path: PathBuf::from(env_var_or(
                "MODEL_WEIGHTS_PATH",
                "models/best_model.json",
            )),
            scaler_path: PathBuf::from(env_var_or("SCALER_PATH", "models/scaler.json")),
            data_dir: PathBuf::from(env_var_or("DATA_DIR", "data")),
            max_ai_price,
            server_port,
        })
    }
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
