use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Activation applied after the (optionally normalised) affine part of a hidden layer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    #[default]
    Tanh,
    Sigmoid,
    Linear,
    LeakyRelu { alpha: f32 },
    Elu { alpha: f32 },
}

impl Activation {
    /// Apply the activation function to a batch in-place.
    pub fn apply_batch(&self, inputs: &mut Array2<f32>) {
        match self {
            Activation::Relu => {
                inputs.mapv_inplace(|v| v.max(0.0));
            }
            Activation::Tanh => {
                inputs.mapv_inplace(|v| v.tanh());
            }
            Activation::Sigmoid => {
                inputs.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp()));
            }
            Activation::Linear => {}
            Activation::LeakyRelu { alpha } => {
                let a = *alpha;
                inputs.mapv_inplace(|v| if v > 0.0 { v } else { a * v });
            }
            Activation::Elu { alpha } => {
                let a = *alpha;
                inputs.mapv_inplace(|v| if v > 0.0 { v } else { a * (v.exp() - 1.0) });
            }
        }
    }

    /// Derivative of the activation evaluated at the pre-activation values.
    pub fn derivative_batch(&self, pre_activation: ArrayView2<f32>) -> Array2<f32> {
        match self {
            Activation::Relu => pre_activation.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Tanh => pre_activation.mapv(|v| {
                let t = v.tanh();
                1.0 - t * t
            }),
            Activation::Sigmoid => pre_activation.mapv(|v| {
                let s = 1.0 / (1.0 + (-v).exp());
                s * (1.0 - s)
            }),
            Activation::Linear => Array2::ones(pre_activation.dim()),
            Activation::LeakyRelu { alpha } => {
                let a = *alpha;
                pre_activation.mapv(|v| if v > 0.0 { 1.0 } else { a })
            }
            Activation::Elu { alpha } => {
                let a = *alpha;
                pre_activation.mapv(|v| if v > 0.0 { 1.0 } else { a * v.exp() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_tanh_derivative_at_zero() {
        let d = Activation::Tanh.derivative_batch(array![[0.0, 10.0]].view());
        assert!((d[[0, 0]] - 1.0).abs() < 1e-6);
        assert!(d[[0, 1]] < 1e-6);
    }

    #[test]
    fn test_serde_names() {
        let act: Activation = serde_json::from_str("\"relu\"").unwrap();
        assert_eq!(act, Activation::Relu);
        let act: Activation = serde_json::from_str("{\"leaky_relu\":{\"alpha\":0.1}}").unwrap();
        assert_eq!(act, Activation::LeakyRelu { alpha: 0.1 });
    }
}
