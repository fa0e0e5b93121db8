use ndarray::{Array2, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activations::Activation;
use crate::error::{PolicyError, Result};
use crate::layers::{DenseLayer, LayerGradients, WeightInit};
use crate::optimizer::{Optimizer, OptimizerWrapper};

/// Optimizer slots reserved per layer: weights, biases, norm gain, norm bias.
pub const SLOTS_PER_LAYER: usize = 4;

/// A multi-layer perceptron with explicit forward and backward passes.
///
/// Hidden layers use the configured activation (and optional layer
/// normalisation); the output layer is always linear and never normalised.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NeuralNetwork {
    pub layers: Vec<DenseLayer>,
}

impl NeuralNetwork {
    /// Build a network `input -> hidden... -> output` with orthogonal
    /// initialisation: gain `sqrt(2)` for hidden layers, `output_gain` for the
    /// output layer.
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        hidden_sizes: &[usize],
        output_size: usize,
        activation: Activation,
        layer_norm: bool,
        output_gain: f32,
        rng: &mut R,
    ) -> Self {
        let mut sizes = vec![input_size];
        sizes.extend_from_slice(hidden_sizes);
        sizes.push(output_size);

        let last = sizes.len() - 2;
        let layers = sizes
            .windows(2)
            .enumerate()
            .map(|(i, window)| {
                if i == last {
                    DenseLayer::new(
                        window[0],
                        window[1],
                        Activation::Linear,
                        false,
                        WeightInit::Orthogonal { gain: output_gain },
                        &mut *rng,
                    )
                } else {
                    DenseLayer::new(
                        window[0],
                        window[1],
                        activation,
                        layer_norm,
                        WeightInit::Orthogonal { gain: std::f32::consts::SQRT_2 },
                        &mut *rng,
                    )
                }
            })
            .collect();

        NeuralNetwork { layers }
    }

    pub fn with_layers(layers: Vec<DenseLayer>) -> Result<Self> {
        for pair in layers.windows(2) {
            if pair[0].output_size() != pair[1].input_size() {
                return Err(PolicyError::dimension_mismatch(
                    pair[0].output_size().to_string(),
                    pair[1].input_size().to_string(),
                ));
            }
        }
        if layers.is_empty() {
            return Err(PolicyError::invalid_parameter("layers", "network needs at least one layer"));
        }
        Ok(NeuralNetwork { layers })
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map(|l| l.input_size()).unwrap_or(0)
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map(|l| l.output_size()).unwrap_or(0)
    }

    /// Forward pass that leaves the network untouched.
    pub fn predict(&self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut current = inputs.to_owned();
        for layer in &self.layers {
            current = layer.predict(current.view())?;
        }
        Ok(current)
    }

    /// Forward pass for training; every layer caches its inputs.
    pub fn forward_batch(&mut self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut current = inputs.to_owned();
        for layer in &mut self.layers {
            current = layer.forward_batch(current.view())?;
        }
        Ok(current)
    }

    /// Backpropagate dLoss/dOutput through all layers, returning one
    /// `LayerGradients` per layer in forward order.
    pub fn backward_batch(&self, output_errors: ArrayView2<f32>) -> Result<Vec<LayerGradients>> {
        let mut gradients = Vec::with_capacity(self.layers.len());
        let mut current_error = output_errors.to_owned();
        for layer in self.layers.iter().rev() {
            let (input_error, layer_gradients) = layer.backward_batch(current_error.view())?;
            gradients.push(layer_gradients);
            current_error = input_error;
        }
        gradients.reverse();
        Ok(gradients)
    }

    pub fn zero_gradients(&self) -> Vec<LayerGradients> {
        self.layers.iter().map(LayerGradients::zeros_like).collect()
    }

    /// Apply one optimizer update. Layer `i` uses slots
    /// `first_slot + SLOTS_PER_LAYER * i ..`; returns the first unused slot.
    pub fn apply_gradients(
        &mut self,
        optimizer: &mut OptimizerWrapper,
        gradients: &[LayerGradients],
        learning_rate: f32,
        first_slot: usize,
    ) -> Result<usize> {
        if gradients.len() != self.layers.len() {
            return Err(PolicyError::dimension_mismatch(
                format!("{} layer gradients", self.layers.len()),
                format!("{}", gradients.len()),
            ));
        }
        for (i, (layer, grads)) in self.layers.iter_mut().zip(gradients).enumerate() {
            let slot = first_slot + SLOTS_PER_LAYER * i;
            optimizer.update_weights(slot, &mut layer.weights, &grads.weights, learning_rate)?;
            optimizer.update_biases(slot + 1, &mut layer.biases, &grads.biases, learning_rate)?;
            if let (Some(norm), Some((gain, bias))) = (&mut layer.norm, &grads.norm) {
                optimizer.update_biases(slot + 2, &mut norm.gain, gain, learning_rate)?;
                optimizer.update_biases(slot + 3, &mut norm.bias, bias, learning_rate)?;
            }
        }
        Ok(first_slot + SLOTS_PER_LAYER * self.layers.len())
    }

    pub fn num_parameters(&self) -> usize {
        self.layers
            .iter()
            .flat_map(|l| l.parameters())
            .map(|a| a.len())
            .sum()
    }

    /// Append every parameter to `out` in a fixed order.
    pub fn write_flat(&self, out: &mut Vec<f32>) {
        for layer in &self.layers {
            for array in layer.parameters() {
                out.extend(array.iter().copied());
            }
        }
    }

    /// Overwrite every parameter from `src`, in `write_flat` order.
    pub fn read_flat<'a, I: Iterator<Item = &'a f32>>(&mut self, src: &mut I) -> Result<()> {
        for layer in &mut self.layers {
            for mut array in layer.parameters_mut() {
                for value in array.iter_mut() {
                    *value = *src.next().ok_or_else(|| {
                        PolicyError::TrainingError("flat parameter buffer too short".to_string())
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Parameter shapes, used to validate checkpoints.
    pub fn shapes(&self) -> Vec<Vec<usize>> {
        self.layers
            .iter()
            .flat_map(|l| l.parameters())
            .map(|a| a.shape().to_vec())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::SGD;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn network(layer_norm: bool) -> NeuralNetwork {
        let mut rng = StdRng::seed_from_u64(42);
        NeuralNetwork::new(3, &[8, 8], 2, Activation::Tanh, layer_norm, 1.0, &mut rng)
    }

    #[test]
    fn test_output_layer_is_linear_and_unnormalised() {
        let net = network(true);
        assert_eq!(net.layers.len(), 3);
        let out = net.layers.last().unwrap();
        assert_eq!(out.activation, Activation::Linear);
        assert!(out.norm.is_none());
        assert!(net.layers[0].norm.is_some());
    }

    #[test]
    fn test_flat_round_trip_preserves_parameters() {
        let net = network(true);
        let mut flat = Vec::new();
        net.write_flat(&mut flat);
        assert_eq!(flat.len(), net.num_parameters());

        let mut other = network(true);
        for layer in &mut other.layers {
            layer.weights.fill(0.0);
        }
        other.read_flat(&mut flat.iter()).unwrap();
        let x = array![[0.5, -0.5, 1.0]];
        assert_eq!(net.predict(x.view()).unwrap(), other.predict(x.view()).unwrap());
    }

    #[test]
    fn test_sgd_step_reduces_squared_error() {
        let mut net = network(false);
        let mut optimizer = OptimizerWrapper::SGD(SGD::new());
        let x = array![[0.2, 0.4, -0.3], [1.0, -1.0, 0.5]];
        let target = array![[1.0, -1.0], [0.5, 0.5]];

        let loss = |n: &NeuralNetwork| {
            let d = n.predict(x.view()).unwrap() - &target;
            d.mapv(|v| v * v).sum() * 0.5
        };
        let before = loss(&net);
        for _ in 0..20 {
            let out = net.forward_batch(x.view()).unwrap();
            let grads = net.backward_batch((&out - &target).view()).unwrap();
            net.apply_gradients(&mut optimizer, &grads, 0.05, 0).unwrap();
        }
        assert!(loss(&net) < before);
    }

    #[test]
    fn test_backward_before_forward_is_an_error() {
        let net = network(false);
        assert!(net.backward_batch(array![[1.0, 1.0]].view()).is_err());
    }
}
