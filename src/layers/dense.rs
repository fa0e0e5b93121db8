use ndarray::{Array1, Array2, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::initialization::WeightInit;
use super::layer_norm::LayerNorm;
use crate::activations::Activation;
use crate::error::{PolicyError, Result};

/// Gradients of one dense layer, shaped like its parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerGradients {
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
    /// `(gain, bias)` gradients when the layer is normalised
    pub norm: Option<(Array1<f32>, Array1<f32>)>,
}

impl LayerGradients {
    pub fn zeros_like(layer: &DenseLayer) -> Self {
        LayerGradients {
            weights: Array2::zeros(layer.weights.dim()),
            biases: Array1::zeros(layer.biases.dim()),
            norm: layer
                .norm
                .as_ref()
                .map(|n| (Array1::zeros(n.gain.dim()), Array1::zeros(n.bias.dim()))),
        }
    }

    pub fn arrays(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut out = vec![self.weights.view().into_dyn(), self.biases.view().into_dyn()];
        if let Some((gain, bias)) = &self.norm {
            out.push(gain.view().into_dyn());
            out.push(bias.view().into_dyn());
        }
        out
    }

    pub fn arrays_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut out = vec![self.weights.view_mut().into_dyn(), self.biases.view_mut().into_dyn()];
        if let Some((gain, bias)) = &mut self.norm {
            out.push(gain.view_mut().into_dyn());
            out.push(bias.view_mut().into_dyn());
        }
        out
    }
}

/// A fully connected layer: `activation(norm(x W + b))`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DenseLayer {
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
    pub activation: Activation,
    pub norm: Option<LayerNorm>,
    #[serde(skip)]
    pre_activation_output: Option<Array2<f32>>,
    #[serde(skip)]
    inputs: Option<Array2<f32>>,
}

impl DenseLayer {
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        layer_norm: bool,
        init: WeightInit,
        rng: &mut R,
    ) -> Self {
        DenseLayer {
            weights: init.initialize_weights((input_size, output_size), rng),
            biases: init.initialize_biases(output_size),
            activation,
            norm: layer_norm.then(|| LayerNorm::new(output_size)),
            pre_activation_output: None,
            inputs: None,
        }
    }

    pub fn with_weights(mut self, weights: Array2<f32>) -> Result<Self> {
        if weights.dim() != self.weights.dim() {
            return Err(PolicyError::dimension_mismatch(
                format!("{:?}", self.weights.dim()),
                format!("{:?}", weights.dim()),
            ));
        }
        self.weights = weights;
        Ok(self)
    }

    pub fn input_size(&self) -> usize {
        self.weights.nrows()
    }

    pub fn output_size(&self) -> usize {
        self.weights.ncols()
    }

    fn check_input(&self, inputs: &ArrayView2<f32>) -> Result<()> {
        if inputs.ncols() != self.input_size() {
            return Err(PolicyError::width_mismatch("layer input", self.input_size(), inputs.ncols()));
        }
        Ok(())
    }

    /// Forward pass without caching, for action selection.
    pub fn predict(&self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_input(&inputs)?;
        let mut outputs = inputs.dot(&self.weights) + &self.biases;
        if let Some(norm) = &self.norm {
            outputs = norm.predict(outputs.view());
        }
        self.activation.apply_batch(&mut outputs);
        Ok(outputs)
    }

    /// Forward pass that stores what `backward_batch` needs.
    pub fn forward_batch(&mut self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_input(&inputs)?;
        self.inputs = Some(inputs.to_owned());
        let mut outputs = inputs.dot(&self.weights) + &self.biases;
        if let Some(norm) = &mut self.norm {
            outputs = norm.forward_batch(outputs.view());
        }
        self.pre_activation_output = Some(outputs.clone());
        self.activation.apply_batch(&mut outputs);
        Ok(outputs)
    }

    /// Backpropagate `output_errors` (dLoss/dOutput). Returns the error with
    /// respect to the layer input and the parameter gradients.
    pub fn backward_batch(&self, output_errors: ArrayView2<f32>) -> Result<(Array2<f32>, LayerGradients)> {
        let (pre_activation_output, inputs) = match (&self.pre_activation_output, &self.inputs) {
            (Some(p), Some(i)) => (p, i),
            _ => {
                return Err(PolicyError::TrainingError(
                    "backward_batch called before forward_batch".to_string(),
                ))
            }
        };
        if output_errors.dim() != pre_activation_output.dim() {
            return Err(PolicyError::dimension_mismatch(
                format!("{:?}", pre_activation_output.dim()),
                format!("{:?}", output_errors.dim()),
            ));
        }

        let mut adjusted_error = &output_errors * &self.activation.derivative_batch(pre_activation_output.view());
        let norm = match &self.norm {
            Some(norm) => {
                let (input_error, gain, bias) = norm.backward_batch(adjusted_error.view())?;
                adjusted_error = input_error;
                Some((gain, bias))
            }
            None => None,
        };

        let gradients = LayerGradients {
            weights: inputs.t().dot(&adjusted_error),
            biases: adjusted_error.sum_axis(Axis(0)),
            norm,
        };
        let input_error = adjusted_error.dot(&self.weights.t());
        Ok((input_error, gradients))
    }

    pub fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut out = vec![self.weights.view().into_dyn(), self.biases.view().into_dyn()];
        if let Some(norm) = &self.norm {
            out.push(norm.gain.view().into_dyn());
            out.push(norm.bias.view().into_dyn());
        }
        out
    }

    pub fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut out = vec![self.weights.view_mut().into_dyn(), self.biases.view_mut().into_dyn()];
        if let Some(norm) = &mut self.norm {
            out.push(norm.gain.view_mut().into_dyn());
            out.push(norm.bias.view_mut().into_dyn());
        }
        out
    }
}
