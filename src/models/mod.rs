pub mod black_scholes;
pub mod features;
pub mod implied_vol;
pub mod pipeline;
pub mod regressor;

use crate::errors::{PricerError, PricerResult};
use crate::models::features::StandardizedFeatureVector;
use std::str::FromStr;

/// European option kind. Parsed strictly from "call" / "put".
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Call,
    Put,
}

impl OptionKind {
    /// Encoding used in the trained feature vector: 0.0 = call, 1.0 = put.
    #[inline]
    pub fn indicator(self) -> f64 {
        match self {
            Self::Call => 0.0,
            Self::Put => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Put => "put",
        }
    }
}

impl FromStr for OptionKind {
    type Err = PricerError;

    fn from_str(s: &str) -> PricerResult<Self> {
        match s {
            "call" => Ok(Self::Call),
            "put" => Ok(Self::Put),
            other => Err(PricerError::InvalidOptionKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for OptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that maps a batch of standardized features to log-prices.
/// Implementations must be pure after construction: Send + Sync, no interior
/// mutability, one output per input row in the same order.
pub trait LogPriceModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn predict_log_prices(&self, batch: &[StandardizedFeatureVector]) -> PricerResult<Vec<f64>>;
}
