use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, Result};

/// Per-sample normalisation over the features of a layer, with a trainable
/// gain and offset.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LayerNorm {
    pub gain: Array1<f32>,
    pub bias: Array1<f32>,
    pub epsilon: f32,
    #[serde(skip)]
    normalized: Option<Array2<f32>>,
    #[serde(skip)]
    inv_std: Option<Array1<f32>>,
}

impl LayerNorm {
    pub fn new(size: usize) -> Self {
        LayerNorm {
            gain: Array1::ones(size),
            bias: Array1::zeros(size),
            epsilon: 1e-5,
            normalized: None,
            inv_std: None,
        }
    }

    fn normalize(&self, inputs: ArrayView2<f32>) -> (Array2<f32>, Array1<f32>) {
        let features = inputs.ncols().max(1) as f32;
        let mean = inputs.sum_axis(Axis(1)) / features;
        let centered = &inputs - &mean.view().insert_axis(Axis(1));
        let var = centered.mapv(|v| v * v).sum_axis(Axis(1)) / features;
        let inv_std = var.mapv(|v| 1.0 / (v + self.epsilon).sqrt());
        let normalized = centered * &inv_std.view().insert_axis(Axis(1));
        (normalized, inv_std)
    }

    /// Normalise without touching the backward cache.
    pub fn predict(&self, inputs: ArrayView2<f32>) -> Array2<f32> {
        let (normalized, _) = self.normalize(inputs);
        normalized * &self.gain + &self.bias
    }

    /// Normalise and remember what the backward pass needs.
    pub fn forward_batch(&mut self, inputs: ArrayView2<f32>) -> Array2<f32> {
        let (normalized, inv_std) = self.normalize(inputs);
        let outputs = &normalized * &self.gain + &self.bias;
        self.normalized = Some(normalized);
        self.inv_std = Some(inv_std);
        outputs
    }

    /// Returns `(input_error, gain_gradients, bias_gradients)`.
    pub fn backward_batch(&self, output_errors: ArrayView2<f32>) -> Result<(Array2<f32>, Array1<f32>, Array1<f32>)> {
        let (normalized, inv_std) = match (&self.normalized, &self.inv_std) {
            (Some(n), Some(s)) => (n, s),
            _ => {
                return Err(PolicyError::TrainingError(
                    "layer norm backward called before forward_batch".to_string(),
                ))
            }
        };

        let gain_gradients = (&output_errors * normalized).sum_axis(Axis(0));
        let bias_gradients = output_errors.sum_axis(Axis(0));

        // dx = inv_std / N * (N * dxhat - sum(dxhat) - xhat * sum(dxhat * xhat))
        let features = normalized.ncols().max(1) as f32;
        let dxhat = &output_errors * &self.gain;
        let sum_dxhat = dxhat.sum_axis(Axis(1)).insert_axis(Axis(1));
        let sum_dxhat_xhat = (&dxhat * normalized).sum_axis(Axis(1)).insert_axis(Axis(1));
        let input_errors = (dxhat * features - &sum_dxhat - normalized * &sum_dxhat_xhat)
            * &(inv_std / features).insert_axis(Axis(1));

        Ok((input_errors, gain_gradients, bias_gradients))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_rows_are_normalised() {
        let mut norm = LayerNorm::new(4);
        let out = norm.forward_batch(array![[1.0, 2.0, 3.0, 4.0], [10.0, 10.0, 10.0, 14.0]].view());
        for row in out.rows() {
            let mean = row.sum() / 4.0;
            let var = row.mapv(|v| (v - mean) * (v - mean)).sum() / 4.0;
            assert!(mean.abs() < 1e-5);
            assert!((var - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let x = array![[0.3, -1.2, 2.0], [1.5, 0.1, -0.4]];
        let upstream = array![[0.5, -1.0, 0.25], [1.0, 2.0, -0.5]];
        let mut norm = LayerNorm::new(3);
        norm.gain = array![1.5, 0.5, -1.0];
        norm.forward_batch(x.view());
        let (dx, _, _) = norm.backward_batch(upstream.view()).unwrap();

        let eps = 1e-2;
        for r in 0..2 {
            for c in 0..3 {
                let mut plus = x.clone();
                plus[[r, c]] += eps;
                let mut minus = x.clone();
                minus[[r, c]] -= eps;
                let f = |m: &Array2<f32>| (norm.predict(m.view()) * &upstream).sum();
                let numeric = (f(&plus) - f(&minus)) / (2.0 * eps);
                assert!((numeric - dx[[r, c]]).abs() < 1e-2, "({}, {}): {} vs {}", r, c, numeric, dx[[r, c]]);
            }
        }
    }

    #[test]
    fn test_backward_requires_forward() {
        let norm = LayerNorm::new(2);
        assert!(norm.backward_batch(array![[1.0, 1.0]].view()).is_err());
    }
}
