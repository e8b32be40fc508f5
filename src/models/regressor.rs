use crate::errors::{PricerError, PricerResult};
use crate::models::features::{StandardizedFeatureVector, FEATURE_COUNT};
use crate::models::LogPriceModel;
use std::collections::BTreeMap;
use std::path::Path;

/// Layer widths of the trained network. Must match the weights artifact.
pub const HIDDEN_1: usize = 256;
pub const HIDDEN_2: usize = 128;
pub const HIDDEN_3: usize = 64;

/// PyTorch BatchNorm1d default.
pub const BATCH_NORM_EPS: f64 = 1e-5;

/// One tensor of an exported `state_dict`. Scalars show up for
/// `num_batches_tracked` and are ignored.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Tensor {
    Scalar(f64),
    Vector(Vec<f64>),
    Matrix(Vec<Vec<f64>>),
}

/// `state_dict` keyed by PyTorch parameter names (`layers.0.weight`, ...).
pub type StateDict = BTreeMap<String, Tensor>;

/// Fully connected layer, weight stored row-major as [outputs][inputs].
#[derive(Debug, Clone)]
struct Dense {
    inputs: usize,
    outputs: usize,
    weight: Vec<f64>,
    bias: Vec<f64>,
}

impl Dense {
    fn from_state(
        dict: &StateDict,
        index: usize,
        inputs: usize,
        outputs: usize,
    ) -> PricerResult<Self> {
        Ok(Self {
            inputs,
            outputs,
            weight: take_matrix(dict, &format!("layers.{index}.weight"), outputs, inputs)?,
            bias: take_vector(dict, &format!("layers.{index}.bias"), outputs)?,
        })
    }

    /// x is a flat [rows][inputs] batch; returns [rows][outputs].
    fn forward(&self, x: &[f64], rows: usize) -> Vec<f64> {
        let mut out = Vec::with_capacity(rows * self.outputs);
        for r in 0..rows {
            let row = &x[r * self.inputs..(r + 1) * self.inputs];
            for o in 0..self.outputs {
                let w = &self.weight[o * self.inputs..(o + 1) * self.inputs];
                let dot: f64 = w.iter().zip(row).map(|(a, b)| a * b).sum();
                out.push(dot + self.bias[o]);
            }
        }
        out
    }
}

/// Batch normalization frozen to its training-time running statistics and
/// folded into a per-channel affine map: y = x * scale + shift.
/// Batch statistics are never consulted, so a batch of one is as safe as
/// a batch of thousands.
#[derive(Debug, Clone)]
struct FrozenBatchNorm {
    scale: Vec<f64>,
    shift: Vec<f64>,
}

impl FrozenBatchNorm {
    fn from_state(dict: &StateDict, index: usize, width: usize) -> PricerResult<Self> {
        let gamma = take_vector(dict, &format!("layers.{index}.weight"), width)?;
        let beta = take_vector(dict, &format!("layers.{index}.bias"), width)?;
        let mean = take_vector(dict, &format!("layers.{index}.running_mean"), width)?;
        let var = take_vector(dict, &format!("layers.{index}.running_var"), width)?;

        if let Some(v) = var.iter().find(|v| **v < 0.0) {
            return Err(PricerError::Artifact(format!(
                "layers.{index}.running_var has negative entry {v}"
            )));
        }

        let scale: Vec<f64> = gamma
            .iter()
            .zip(&var)
            .map(|(g, v)| g / (v + BATCH_NORM_EPS).sqrt())
            .collect();
        let shift = beta
            .iter()
            .zip(&mean)
            .zip(&scale)
            .map(|((b, m), s)| b - m * s)
            .collect();
        Ok(Self { scale, shift })
    }

    fn apply(&self, x: &mut [f64]) {
        let width = self.scale.len();
        for row in x.chunks_mut(width) {
            for (i, v) in row.iter_mut().enumerate() {
                *v = *v * self.scale[i] + self.shift[i];
            }
        }
    }
}

#[inline]
fn relu(x: &mut [f64]) {
    for v in x.iter_mut() {
        *v = v.max(0.0);
    }
}

/// Feed-forward log-price regressor, evaluation mode only.
///
/// 6 -> Linear(256) -> BN -> ReLU -> Dropout -> Linear(128) -> BN -> ReLU
///   -> Dropout -> Linear(64) -> ReLU -> Linear(1)
///
/// Dropout is the identity at inference and has no parameters, so it does
/// not appear here. Sequential indices follow the trained module: linears at
/// 0, 4, 8, 10 and batch norms at 1, 5.
#[derive(Debug, Clone)]
pub struct PriceRegressor {
    fc1: Dense,
    bn1: FrozenBatchNorm,
    fc2: Dense,
    bn2: FrozenBatchNorm,
    fc3: Dense,
    out: Dense,
}

impl PriceRegressor {
    pub fn from_state_dict(dict: &StateDict) -> PricerResult<Self> {
        Ok(Self {
            fc1: Dense::from_state(dict, 0, FEATURE_COUNT, HIDDEN_1)?,
            bn1: FrozenBatchNorm::from_state(dict, 1, HIDDEN_1)?,
            fc2: Dense::from_state(dict, 4, HIDDEN_1, HIDDEN_2)?,
            bn2: FrozenBatchNorm::from_state(dict, 5, HIDDEN_2)?,
            fc3: Dense::from_state(dict, 8, HIDDEN_2, HIDDEN_3)?,
            out: Dense::from_state(dict, 10, HIDDEN_3, 1)?,
        })
    }

    pub fn from_json(json: &str) -> PricerResult<Self> {
        let dict: StateDict = serde_json::from_str(json)
            .map_err(|e| PricerError::Artifact(format!("model weights: {e}")))?;
        Self::from_state_dict(&dict)
    }

    pub fn load(path: &Path) -> PricerResult<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| PricerError::Artifact(format!("read {}: {e}", path.display())))?;
        let model = Self::from_json(&json)?;
        tracing::info!(path = %path.display(), "model weights loaded");
        Ok(model)
    }

    /// Forward pass over the whole batch, layer by layer.
    pub fn forward(&self, batch: &[StandardizedFeatureVector]) -> Vec<f64> {
        let rows = batch.len();
        if rows == 0 {
            return Vec::new();
        }
        let x: Vec<f64> = batch.iter().flat_map(|v| v.as_array().iter().copied()).collect();

        let mut h = self.fc1.forward(&x, rows);
        self.bn1.apply(&mut h);
        relu(&mut h);

        let mut h = self.fc2.forward(&h, rows);
        self.bn2.apply(&mut h);
        relu(&mut h);

        let mut h = self.fc3.forward(&h, rows);
        relu(&mut h);

        self.out.forward(&h, rows)
    }
}

impl LogPriceModel for PriceRegressor {
    fn name(&self) -> &'static str {
        "OptionPricer-MLP"
    }

    fn predict_log_prices(&self, batch: &[StandardizedFeatureVector]) -> PricerResult<Vec<f64>> {
        Ok(self.forward(batch))
    }
}

fn lookup<'a>(dict: &'a StateDict, key: &str) -> PricerResult<&'a Tensor> {
    dict.get(key)
        .ok_or_else(|| PricerError::Artifact(format!("missing tensor {key}")))
}

fn take_vector(dict: &StateDict, key: &str, len: usize) -> PricerResult<Vec<f64>> {
    match lookup(dict, key)? {
        Tensor::Vector(v) if v.len() == len => check_finite(key, v.clone()),
        Tensor::Vector(v) => Err(PricerError::ShapeMismatch(format!(
            "{key}: expected [{len}], got [{}]",
            v.len()
        ))),
        _ => Err(PricerError::ShapeMismatch(format!("{key}: expected a vector of {len}"))),
    }
}

fn take_matrix(dict: &StateDict, key: &str, rows: usize, cols: usize) -> PricerResult<Vec<f64>> {
    match lookup(dict, key)? {
        Tensor::Matrix(m) if m.len() == rows && m.iter().all(|r| r.len() == cols) => {
            check_finite(key, m.iter().flatten().copied().collect())
        }
        Tensor::Matrix(m) => Err(PricerError::ShapeMismatch(format!(
            "{key}: expected [{rows}, {cols}], got [{}, {}]",
            m.len(),
            m.first().map(|r| r.len()).unwrap_or(0)
        ))),
        _ => Err(PricerError::ShapeMismatch(format!(
            "{key}: expected a [{rows}, {cols}] matrix"
        ))),
    }
}

fn check_finite(key: &str, values: Vec<f64>) -> PricerResult<Vec<f64>> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(values)
    } else {
        Err(PricerError::Artifact(format!("{key} contains non-finite values")))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::features::{FeatureVector, Scaler};

    fn put_linear(
        dict: &mut StateDict,
        index: usize,
        inputs: usize,
        outputs: usize,
        w: impl Fn(usize, usize) -> f64,
        bias: f64,
    ) {
        let weight: Vec<Vec<f64>> = (0..outputs)
            .map(|o| (0..inputs).map(|i| w(o, i)).collect())
            .collect();
        dict.insert(format!("layers.{index}.weight"), Tensor::Matrix(weight));
        dict.insert(format!("layers.{index}.bias"), Tensor::Vector(vec![bias; outputs]));
    }

    fn put_batch_norm(
        dict: &mut StateDict,
        index: usize,
        width: usize,
        gamma: f64,
        beta: f64,
        mean: f64,
        var: f64,
    ) {
        dict.insert(format!("layers.{index}.weight"), Tensor::Vector(vec![gamma; width]));
        dict.insert(format!("layers.{index}.bias"), Tensor::Vector(vec![beta; width]));
        dict.insert(format!("layers.{index}.running_mean"), Tensor::Vector(vec![mean; width]));
        dict.insert(format!("layers.{index}.running_var"), Tensor::Vector(vec![var; width]));
        dict.insert(format!("layers.{index}.num_batches_tracked"), Tensor::Scalar(1000.0));
    }

    /// Network computing relu((x0 - 1) / 2 * 3 + 0.5) + 0.5, up to the BN epsilon.
    pub(crate) fn traceable_state_dict() -> StateDict {
        let mut dict = StateDict::new();
        let first_input = |_: usize, i: usize| if i == 0 { 1.0 } else { 0.0 };
        put_linear(&mut dict, 0, FEATURE_COUNT, HIDDEN_1, first_input, 0.0);
        put_batch_norm(&mut dict, 1, HIDDEN_1, 3.0, 0.5, 1.0, 4.0);
        put_linear(&mut dict, 4, HIDDEN_1, HIDDEN_2, |_, _| 1.0 / HIDDEN_1 as f64, 0.0);
        put_batch_norm(&mut dict, 5, HIDDEN_2, 1.0, 0.0, 0.0, 1.0);
        put_linear(&mut dict, 8, HIDDEN_2, HIDDEN_3, |_, _| 1.0 / HIDDEN_2 as f64, 0.0);
        put_linear(&mut dict, 10, HIDDEN_3, 1, |_, _| 1.0 / HIDDEN_3 as f64, 0.5);
        dict
    }

    /// Network that ignores its input and always emits `log_price`.
    pub(crate) fn constant_state_dict(log_price: f64) -> StateDict {
        let mut dict = StateDict::new();
        put_linear(&mut dict, 0, FEATURE_COUNT, HIDDEN_1, |_, _| 0.0, 0.0);
        put_batch_norm(&mut dict, 1, HIDDEN_1, 1.0, 0.0, 0.0, 1.0);
        put_linear(&mut dict, 4, HIDDEN_1, HIDDEN_2, |_, _| 0.0, 0.0);
        put_batch_norm(&mut dict, 5, HIDDEN_2, 1.0, 0.0, 0.0, 1.0);
        put_linear(&mut dict, 8, HIDDEN_2, HIDDEN_3, |_, _| 0.0, 0.0);
        put_linear(&mut dict, 10, HIDDEN_3, 1, |_, _| 0.0, log_price);
        dict
    }

    fn inputs(x0s: &[f64]) -> Vec<StandardizedFeatureVector> {
        let scaler = Scaler::identity();
        x0s.iter()
            .map(|&x0| scaler.standardize(&FeatureVector([x0, 0.0, 0.0, 0.0, 0.0, 0.0])))
            .collect()
    }

    fn expected(x0: f64) -> f64 {
        ((x0 - 1.0) / 2.0 * 3.0 + 0.5).max(0.0) + 0.5
    }

    #[test]
    fn test_forward_matches_hand_computation() {
        let model = PriceRegressor::from_state_dict(&traceable_state_dict()).unwrap();
        let xs = [3.0, 0.0, -2.0, 1.5];
        let out = model.forward(&inputs(&xs));
        assert_eq!(out.len(), xs.len());
        for (x, y) in xs.iter().zip(&out) {
            assert!((y - expected(*x)).abs() < 1e-4, "x0={x}: got {y}, want {}", expected(*x));
        }
    }

    #[test]
    fn test_single_row_matches_batched_row() {
        // Frozen running stats: a row's output cannot depend on its batch mates
        let model = PriceRegressor::from_state_dict(&traceable_state_dict()).unwrap();
        let batch = model.forward(&inputs(&[3.0, 10.0, -4.0]));
        let alone = model.forward(&inputs(&[3.0]));
        assert_eq!(alone.len(), 1);
        assert_eq!(alone[0], batch[0], "batch-of-one must equal the batched row");
    }

    #[test]
    fn test_empty_batch() {
        let model = PriceRegressor::from_state_dict(&constant_state_dict(1.0)).unwrap();
        assert!(model.predict_log_prices(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_json_round_trip_of_state_dict() {
        let json = serde_json::to_string(&constant_state_dict(2.0)).unwrap();
        let model = PriceRegressor::from_json(&json).unwrap();
        let out = model.predict_log_prices(&inputs(&[5.0, -5.0])).unwrap();
        assert!(out.iter().all(|y| (y - 2.0).abs() < 1e-12), "out={out:?}");
    }

    #[test]
    fn test_misshapen_layer_rejected() {
        let mut dict = constant_state_dict(0.0);
        dict.insert(
            "layers.4.weight".into(),
            Tensor::Matrix(vec![vec![0.0; HIDDEN_1]; HIDDEN_2 - 1]),
        );
        let res = PriceRegressor::from_state_dict(&dict);
        assert!(matches!(res, Err(PricerError::ShapeMismatch(_))), "{res:?}");
    }

    #[test]
    fn test_missing_running_stats_rejected() {
        let mut dict = constant_state_dict(0.0);
        dict.remove("layers.5.running_var");
        let res = PriceRegressor::from_state_dict(&dict);
        assert!(matches!(res, Err(PricerError::Artifact(_))), "{res:?}");
    }
}
