pub mod gradient_clipper;

use std::collections::BTreeMap;

use ndarray::{Array, Array1, Array2, ArrayD, Dimension, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, Result};

pub use gradient_clipper::GradientClipper;

/// Parameter update rule.
///
/// Every trainable array is addressed by a stable `slot` so stateful
/// optimizers keep one set of moments per array.
pub trait Optimizer {
    /// Called once before the updates belonging to one gradient step.
    fn begin_step(&mut self) {}

    fn update_weights(&mut self, slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) -> Result<()>;

    fn update_biases(&mut self, slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) -> Result<()>;
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum OptimizerWrapper {
    SGD(SGD),
    Adam(Adam),
}

impl Optimizer for OptimizerWrapper {
    fn begin_step(&mut self) {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.begin_step(),
            OptimizerWrapper::Adam(optimizer) => optimizer.begin_step(),
        }
    }

    fn update_weights(&mut self, slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) -> Result<()> {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.update_weights(slot, weights, gradients, learning_rate),
            OptimizerWrapper::Adam(optimizer) => optimizer.update_weights(slot, weights, gradients, learning_rate),
        }
    }

    fn update_biases(&mut self, slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) -> Result<()> {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.update_biases(slot, biases, gradients, learning_rate),
            OptimizerWrapper::Adam(optimizer) => optimizer.update_biases(slot, biases, gradients, learning_rate),
        }
    }
}

fn check_shapes<D: Dimension>(params: &Array<f32, D>, gradients: &Array<f32, D>) -> Result<()> {
    if params.shape() != gradients.shape() {
        return Err(PolicyError::dimension_mismatch(
            format!("{:?}", params.shape()),
            format!("{:?}", gradients.shape()),
        ));
    }
    Ok(())
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SGD;

impl SGD {
    pub fn new() -> SGD {
        SGD
    }

    fn step<D: Dimension>(params: &mut Array<f32, D>, gradients: &Array<f32, D>, learning_rate: f32) -> Result<()> {
        check_shapes(params, gradients)?;
        params.zip_mut_with(gradients, |w, &g| *w -= learning_rate * g);
        Ok(())
    }
}

impl Optimizer for SGD {
    fn update_weights(&mut self, _slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) -> Result<()> {
        Self::step(weights, gradients, learning_rate)
    }

    fn update_biases(&mut self, _slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) -> Result<()> {
        Self::step(biases, gradients, learning_rate)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct Moments {
    m: ArrayD<f32>,
    v: ArrayD<f32>,
}

/// Adam with bias correction. Moments are created lazily per slot.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Adam {
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// Number of `begin_step` calls so far
    pub t: usize,
    moments: BTreeMap<usize, Moments>,
}

impl Adam {
    pub fn new(beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Adam {
            beta1,
            beta2,
            epsilon,
            t: 0,
            moments: BTreeMap::new(),
        }
    }

    fn step<D: Dimension>(&mut self, slot: usize, params: &mut Array<f32, D>, gradients: &Array<f32, D>, learning_rate: f32) -> Result<()> {
        check_shapes(params, gradients)?;
        // Tolerate callers that never call begin_step.
        let t = self.t.max(1) as i32;
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);

        let moments = self.moments.entry(slot).or_insert_with(|| Moments {
            m: ArrayD::zeros(gradients.shape()),
            v: ArrayD::zeros(gradients.shape()),
        });
        if moments.m.shape() != gradients.shape() {
            return Err(PolicyError::dimension_mismatch(
                format!("optimizer slot {} with shape {:?}", slot, moments.m.shape()),
                format!("{:?}", gradients.shape()),
            ));
        }

        let bias1 = 1.0 - beta1.powi(t);
        let bias2 = 1.0 - beta2.powi(t);
        Zip::from(params.view_mut().into_dyn())
            .and(gradients.view().into_dyn())
            .and(&mut moments.m)
            .and(&mut moments.v)
            .for_each(|p, &g, m, v| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *p -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
            });
        Ok(())
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.9, 0.999, 1e-8)
    }
}

impl Optimizer for Adam {
    fn begin_step(&mut self) {
        self.t += 1;
    }

    fn update_weights(&mut self, slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) -> Result<()> {
        self.step(slot, weights, gradients, learning_rate)
    }

    fn update_biases(&mut self, slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) -> Result<()> {
        self.step(slot, biases, gradients, learning_rate)
    }
}
