use crate::errors::{PricerError, PricerResult};
use crate::models::black_scholes::require_positive;
use crate::models::OptionKind;
use std::path::Path;

/// Width of the model input. Fixed by the trained network.
pub const FEATURE_COUNT: usize = 6;

/// Raw model input, in the order the network was trained on:
/// [spot, strike, days_to_expiry, rate, kind_indicator, moneyness]
///
/// Days stay as raw days here; the solver works in years. Do not reorder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

/// Feature vector after the fitted scaler. Only `Scaler` builds these.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardizedFeatureVector([f64; FEATURE_COUNT]);

impl StandardizedFeatureVector {
    #[inline]
    pub fn as_array(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }
}

pub fn build_feature(
    spot: f64,
    strike: f64,
    days_to_expiry: u32,
    rate: f64,
    kind: OptionKind,
) -> PricerResult<FeatureVector> {
    require_positive("strike", strike)?;
    if !spot.is_finite() || !rate.is_finite() {
        return Err(PricerError::InvalidInput(format!(
            "spot and rate must be finite, got spot={spot} rate={rate}"
        )));
    }
    let moneyness = spot / strike;
    Ok(FeatureVector([
        spot,
        strike,
        days_to_expiry as f64,
        rate,
        kind.indicator(),
        moneyness,
    ]))
}

/// Per-dimension standardization fitted at training time: (x - mean) / scale.
/// Loaded once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Scaler {
    mean: [f64; FEATURE_COUNT],
    scale: [f64; FEATURE_COUNT],
}

#[derive(serde::Deserialize)]
struct ScalerArtifact {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl Scaler {
    pub fn new(mean: &[f64], scale: &[f64]) -> PricerResult<Self> {
        if mean.len() != FEATURE_COUNT || scale.len() != FEATURE_COUNT {
            return Err(PricerError::ShapeMismatch(format!(
                "scaler must have {FEATURE_COUNT} dimensions, got mean={} scale={}",
                mean.len(),
                scale.len()
            )));
        }
        if let Some(bad) = scale.iter().find(|s| !s.is_finite() || **s == 0.0) {
            return Err(PricerError::Artifact(format!("scaler has unusable scale {bad}")));
        }
        if let Some(bad) = mean.iter().find(|m| !m.is_finite()) {
            return Err(PricerError::Artifact(format!("scaler has non-finite mean {bad}")));
        }

        let mut m = [0.0; FEATURE_COUNT];
        let mut s = [0.0; FEATURE_COUNT];
        m.copy_from_slice(mean);
        s.copy_from_slice(scale);
        Ok(Self { mean: m, scale: s })
    }

    /// Pass-through scaler (mean 0, scale 1).
    pub fn identity() -> Self {
        Self {
            mean: [0.0; FEATURE_COUNT],
            scale: [1.0; FEATURE_COUNT],
        }
    }

    /// Parse the JSON artifact `{ "mean": [...], "scale": [...] }`.
    pub fn from_json(json: &str) -> PricerResult<Self> {
        let artifact: ScalerArtifact = serde_json::from_str(json)
            .map_err(|e| PricerError::Artifact(format!("scaler: {e}")))?;
        Self::new(&artifact.mean, &artifact.scale)
    }

    pub fn load(path: &Path) -> PricerResult<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| PricerError::Artifact(format!("read {}: {e}", path.display())))?;
        let scaler = Self::from_json(&json)?;
        tracing::info!(path = %path.display(), "scaler loaded");
        Ok(scaler)
    }

    #[inline]
    pub fn standardize(&self, v: &FeatureVector) -> StandardizedFeatureVector {
        let mut out = [0.0; FEATURE_COUNT];
        for (i, o) in out.iter_mut().enumerate() {
            *o = (v.0[i] - self.mean[i]) / self.scale[i];
        }
        StandardizedFeatureVector(out)
    }

    pub fn standardize_batch(&self, batch: &[FeatureVector]) -> Vec<StandardizedFeatureVector> {
        batch.iter().map(|v| self.standardize(v)).collect()
    }
}
