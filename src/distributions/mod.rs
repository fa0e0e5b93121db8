//! # Action distributions
//!
//! The policy head turns actor outputs into a probability distribution over
//! actions. Each distribution provides the quantities the PPO loss needs
//! (`neglogp`, `entropy`) together with their analytic derivatives, so the
//! loss gradient can be pushed back into the actor network.
//!
//! - [`Categorical`] for discrete action spaces (actor outputs are logits)
//! - [`DiagGaussian`] for box action spaces (actor outputs are means, the
//!   log standard deviation is a separate trainable vector)

pub mod categorical;
pub mod diag_gaussian;

use ndarray::{concatenate, Array1, Array2, ArrayView1, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, Result};
use crate::spaces::Space;

pub use categorical::Categorical;
pub use diag_gaussian::DiagGaussian;

/// A batch of actions, one per row/sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ActionBatch {
    Discrete(Vec<usize>),
    Continuous(Array2<f32>),
}

impl ActionBatch {
    pub fn len(&self) -> usize {
        match self {
            ActionBatch::Discrete(a) => a.len(),
            ActionBatch::Continuous(a) => a.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gather the given rows
    pub fn select(&self, indices: &[usize]) -> ActionBatch {
        match self {
            ActionBatch::Discrete(a) => ActionBatch::Discrete(indices.iter().map(|&i| a[i]).collect()),
            ActionBatch::Continuous(a) => ActionBatch::Continuous(a.select(Axis(0), indices)),
        }
    }

    /// Stack batches of the same kind row-wise
    pub fn concat(batches: &[ActionBatch]) -> Result<ActionBatch> {
        match batches.first() {
            None => Err(PolicyError::EmptyBuffer("no action batches to concatenate".to_string())),
            Some(ActionBatch::Discrete(_)) => {
                let mut out = Vec::new();
                for batch in batches {
                    match batch {
                        ActionBatch::Discrete(a) => out.extend_from_slice(a),
                        ActionBatch::Continuous(_) => return Err(mixed_kinds()),
                    }
                }
                Ok(ActionBatch::Discrete(out))
            }
            Some(ActionBatch::Continuous(_)) => {
                let mut views = Vec::with_capacity(batches.len());
                for batch in batches {
                    match batch {
                        ActionBatch::Continuous(a) => views.push(a.view()),
                        ActionBatch::Discrete(_) => return Err(mixed_kinds()),
                    }
                }
                concatenate(Axis(0), &views)
                    .map(ActionBatch::Continuous)
                    .map_err(|e| PolicyError::dimension_mismatch("equal action widths".to_string(), e.to_string()))
            }
        }
    }

    /// Row `i` as a one-sample batch
    pub fn row(&self, i: usize) -> ActionBatch {
        self.select(&[i])
    }
}

fn mixed_kinds() -> PolicyError {
    PolicyError::invalid_parameter("actions", "cannot mix discrete and continuous actions")
}

/// Gradient of a scalar objective with respect to the actor outputs (and
/// the Gaussian `log_std`, when there is one).
#[derive(Clone, Debug)]
pub struct HeadGradients {
    pub outputs: Array2<f32>,
    pub log_std: Option<Array1<f32>>,
}

pub trait ProbabilityDistribution {
    fn batch_size(&self) -> usize;

    /// Negative log-probability of each action
    fn neglogp(&self, actions: &ActionBatch) -> Result<Array1<f32>>;

    /// Entropy of each sample's distribution
    fn entropy(&self) -> Array1<f32>;

    /// Most likely action
    fn mode(&self) -> ActionBatch;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ActionBatch;

    /// Gradient of `sum_i d_neglogp[i] * neglogp_i + d_entropy[i] * entropy_i`
    fn backward(
        &self,
        actions: &ActionBatch,
        d_neglogp: ArrayView1<f32>,
        d_entropy: ArrayView1<f32>,
    ) -> Result<HeadGradients>;
}

/// Which distribution an action space needs.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum PdType {
    Categorical { n: usize },
    DiagGaussian { dim: usize },
}

impl PdType {
    pub fn from_space(ac_space: &Space) -> Self {
        match ac_space {
            Space::Discrete { n } => PdType::Categorical { n: *n },
            Space::Box { low, .. } => PdType::DiagGaussian { dim: low.len() },
        }
    }

    /// Width of the actor output layer
    pub fn param_size(&self) -> usize {
        match self {
            PdType::Categorical { n } => *n,
            PdType::DiagGaussian { dim } => *dim,
        }
    }

    pub fn make_pd(&self, outputs: Array2<f32>, log_std: Option<&Array1<f32>>) -> Result<ActionDistribution> {
        if outputs.ncols() != self.param_size() {
            return Err(PolicyError::width_mismatch("actor output", self.param_size(), outputs.ncols()));
        }
        match (self, log_std) {
            (PdType::Categorical { .. }, _) => Ok(ActionDistribution::Categorical(Categorical::from_logits(outputs))),
            (PdType::DiagGaussian { .. }, Some(log_std)) => {
                Ok(ActionDistribution::DiagGaussian(DiagGaussian::new(outputs, log_std.clone())?))
            }
            (PdType::DiagGaussian { .. }, None) => Err(PolicyError::invalid_parameter(
                "log_std",
                "gaussian policy needs a log standard deviation",
            )),
        }
    }
}

/// Enum dispatch over the supported distributions.
#[derive(Clone, Debug)]
pub enum ActionDistribution {
    Categorical(Categorical),
    DiagGaussian(DiagGaussian),
}

impl ProbabilityDistribution for ActionDistribution {
    fn batch_size(&self) -> usize {
        match self {
            ActionDistribution::Categorical(pd) => pd.batch_size(),
            ActionDistribution::DiagGaussian(pd) => pd.batch_size(),
        }
    }

    fn neglogp(&self, actions: &ActionBatch) -> Result<Array1<f32>> {
        match self {
            ActionDistribution::Categorical(pd) => pd.neglogp(actions),
            ActionDistribution::DiagGaussian(pd) => pd.neglogp(actions),
        }
    }

    fn entropy(&self) -> Array1<f32> {
        match self {
            ActionDistribution::Categorical(pd) => pd.entropy(),
            ActionDistribution::DiagGaussian(pd) => pd.entropy(),
        }
    }

    fn mode(&self) -> ActionBatch {
        match self {
            ActionDistribution::Categorical(pd) => pd.mode(),
            ActionDistribution::DiagGaussian(pd) => pd.mode(),
        }
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ActionBatch {
        match self {
            ActionDistribution::Categorical(pd) => pd.sample(rng),
            ActionDistribution::DiagGaussian(pd) => pd.sample(rng),
        }
    }

    fn backward(
        &self,
        actions: &ActionBatch,
        d_neglogp: ArrayView1<f32>,
        d_entropy: ArrayView1<f32>,
    ) -> Result<HeadGradients> {
        match self {
            ActionDistribution::Categorical(pd) => pd.backward(actions, d_neglogp, d_entropy),
            ActionDistribution::DiagGaussian(pd) => pd.backward(actions, d_neglogp, d_entropy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_select_and_concat() {
        let a = ActionBatch::Continuous(array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        assert_eq!(a.select(&[2, 0]), ActionBatch::Continuous(array![[5.0, 6.0], [1.0, 2.0]]));

        let joined = ActionBatch::concat(&[ActionBatch::Discrete(vec![1]), ActionBatch::Discrete(vec![0, 2])]).unwrap();
        assert_eq!(joined, ActionBatch::Discrete(vec![1, 0, 2]));
        assert!(ActionBatch::concat(&[ActionBatch::Discrete(vec![1]), a]).is_err());
    }

    #[test]
    fn test_pdtype_from_space() {
        assert_eq!(PdType::from_space(&Space::discrete(4)), PdType::Categorical { n: 4 });
        let pd = PdType::from_space(&Space::uniform_box(2, -1.0, 1.0));
        assert_eq!(pd.param_size(), 2);
        assert!(pd.make_pd(Array2::zeros((1, 2)), None).is_err());
        assert!(pd.make_pd(Array2::zeros((1, 3)), Some(&Array1::zeros(2))).is_err());
    }
}
