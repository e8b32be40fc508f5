use crate::config::AppConfig;
use crate::errors::{PricerError, PricerResult};
use crate::models::features::{build_feature, FeatureVector, Scaler};
use crate::models::implied_vol::implied_volatility;
use crate::models::regressor::PriceRegressor;
use crate::models::{LogPriceModel, OptionKind};

/// Trading days are not used: the solver takes calendar days / 365.
pub const DAYS_PER_YEAR: f64 = 365.0;

/// One option-chain row as quoted by the market. Any of the numeric fields
/// may be missing in a live snapshot.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OptionQuote {
    pub strike: Option<f64>,
    pub market_price: Option<f64>,
    pub market_iv: Option<f64>,
    pub kind: OptionKind,
}

impl OptionQuote {
    /// (strike, market_price, market_iv) when the row is complete.
    #[inline]
    pub fn complete(&self) -> Option<(f64, f64, f64)> {
        Some((self.strike?, self.market_price?, self.market_iv?))
    }
}

/// Scalars shared by every row of one smile.
#[derive(Debug, Clone, Copy)]
pub struct SmileContext {
    pub spot: f64,
    pub days_to_expiry: u32,
    pub rate: f64,
}

/// One point of the market-vs-model smile. NaN means "undefined" and
/// serializes as JSON null so the plot shows a gap.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SmileRow {
    pub strike: f64,
    pub market_iv: f64,
    pub ai_price: f64,
    pub ai_iv: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
}

/// Trained scaler + network. Built once at startup, shared read-only.
pub struct InferenceAssets {
    pub scaler: Scaler,
    pub model: Box<dyn LogPriceModel>,
}

impl InferenceAssets {
    pub fn new(scaler: Scaler, model: Box<dyn LogPriceModel>) -> Self {
        Self { scaler, model }
    }

    pub fn load(config: &AppConfig) -> PricerResult<Self> {
        let scaler = Scaler::load(&config.scaler_path)?;
        let model = PriceRegressor::load(&config.model_weights_path)?;
        Ok(Self::new(scaler, Box::new(model)))
    }
}

/// exp(log_price), refusing results that are not finite, exceed `max_price`
/// or underflow to zero.
#[inline]
pub fn price_from_log(log_price: f64, max_price: f64) -> PricerResult<f64> {
    if log_price.is_nan() {
        return Err(PricerError::InvalidInput("model emitted NaN log-price".into()));
    }
    let price = log_price.exp();
    if !price.is_finite() || price > max_price {
        return Err(PricerError::NumericOverflow { log_price });
    }
    if price <= 0.0 {
        return Err(PricerError::InvalidInput(format!("log-price {log_price} underflows to zero")));
    }
    Ok(price)
}

/// Model smile for one expiry.
///
/// Incomplete quotes are dropped; the remaining rows keep their input order.
/// Features for the whole batch are standardized and pushed through the model
/// in one call, then each predicted price is inverted back to a volatility.
/// Row-level failures are recorded in `SmileRow::issue` and never abort the
/// batch. Only a model failure (wrong output length, etc.) is returned as Err.
pub fn predict_smile(
    quotes: &[OptionQuote],
    ctx: SmileContext,
    assets: &InferenceAssets,
    max_price: f64,
) -> PricerResult<Vec<SmileRow>> {
    let complete: Vec<(f64, f64, OptionKind)> = quotes
        .iter()
        .filter_map(|q| q.complete().map(|(k, _, iv)| (k, iv, q.kind)))
        .collect();

    let dropped = quotes.len() - complete.len();
    if dropped > 0 {
        tracing::debug!(dropped, kept = complete.len(), "dropped incomplete quotes");
    }

    let mut rows: Vec<SmileRow> = complete
        .iter()
        .map(|&(strike, market_iv, _)| SmileRow {
            strike,
            market_iv,
            ai_price: f64::NAN,
            ai_iv: f64::NAN,
            issue: None,
        })
        .collect();

    // Rows with unusable features sit out of the forward pass
    let mut features: Vec<FeatureVector> = Vec::with_capacity(rows.len());
    let mut feature_rows: Vec<usize> = Vec::with_capacity(rows.len());
    for (i, &(strike, _, kind)) in complete.iter().enumerate() {
        match build_feature(ctx.spot, strike, ctx.days_to_expiry, ctx.rate, kind) {
            Ok(f) => {
                features.push(f);
                feature_rows.push(i);
            }
            Err(e) => rows[i].issue = Some(e.to_string()),
        }
    }

    if features.is_empty() {
        return Ok(rows);
    }

    let standardized = assets.scaler.standardize_batch(&features);
    let log_prices = assets.model.predict_log_prices(&standardized)?;
    if log_prices.len() != standardized.len() {
        return Err(PricerError::ShapeMismatch(format!(
            "{} returned {} predictions for {} rows",
            assets.model.name(),
            log_prices.len(),
            standardized.len()
        )));
    }

    let t = ctx.days_to_expiry as f64 / DAYS_PER_YEAR;

    for (&i, &log_price) in feature_rows.iter().zip(&log_prices) {
        let (strike, _, kind) = complete[i];
        let row = &mut rows[i];

        row.ai_price = match price_from_log(log_price, max_price) {
            Ok(p) => p,
            Err(e @ PricerError::NumericOverflow { .. }) => {
                tracing::warn!(strike, log_price, max_price, "model price overflow, clamping");
                row.issue = Some(e.to_string());
                max_price
            }
            Err(e) => {
                row.issue = Some(e.to_string());
                continue;
            }
        };

        match implied_volatility(row.ai_price, ctx.spot, strike, t, ctx.rate, kind) {
            Ok(iv) => row.ai_iv = iv,
            Err(e) => {
                tracing::debug!(strike, error = %e, "implied volatility failed");
                row.issue.get_or_insert_with(|| e.to_string());
            }
        }
    }

    Ok(rows)
}
