use ndarray::{Array1, Array2, ArrayView1, Axis};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::StandardNormal;

use super::{ActionBatch, HeadGradients, ProbabilityDistribution};
use crate::error::{PolicyError, Result};

const HALF_LN_2PI: f32 = 0.918_938_5;

/// Gaussian with diagonal covariance: a mean per sample and a
/// state-independent `log_std` shared by the batch.
#[derive(Clone, Debug)]
pub struct DiagGaussian {
    mean: Array2<f32>,
    log_std: Array1<f32>,
    std: Array1<f32>,
}

impl DiagGaussian {
    pub fn new(mean: Array2<f32>, log_std: Array1<f32>) -> Result<Self> {
        if mean.ncols() != log_std.len() {
            return Err(PolicyError::width_mismatch("gaussian mean", log_std.len(), mean.ncols()));
        }
        let std = log_std.mapv(f32::exp);
        Ok(DiagGaussian { mean, log_std, std })
    }

    pub fn mean(&self) -> &Array2<f32> {
        &self.mean
    }

    fn continuous<'a>(&self, actions: &'a ActionBatch) -> Result<&'a Array2<f32>> {
        match actions {
            ActionBatch::Continuous(a) if a.dim() == self.mean.dim() => Ok(a),
            ActionBatch::Continuous(a) => Err(PolicyError::dimension_mismatch(
                format!("{:?}", self.mean.dim()),
                format!("{:?}", a.dim()),
            )),
            ActionBatch::Discrete(_) => Err(PolicyError::invalid_parameter(
                "actions",
                "gaussian distribution needs continuous actions",
            )),
        }
    }

    /// `(x - mean) / std`
    fn standardized(&self, actions: &Array2<f32>) -> Array2<f32> {
        (actions - &self.mean) / &self.std
    }
}

impl ProbabilityDistribution for DiagGaussian {
    fn batch_size(&self) -> usize {
        self.mean.nrows()
    }

    fn neglogp(&self, actions: &ActionBatch) -> Result<Array1<f32>> {
        let z = self.standardized(self.continuous(actions)?);
        let dim = self.log_std.len() as f32;
        let constant = HALF_LN_2PI * dim + self.log_std.sum();
        Ok(z.mapv(|v| 0.5 * v * v).sum_axis(Axis(1)) + constant)
    }

    fn entropy(&self) -> Array1<f32> {
        let per_sample = self.log_std.iter().map(|&s| s + HALF_LN_2PI + 0.5).sum::<f32>();
        Array1::from_elem(self.mean.nrows(), per_sample)
    }

    fn mode(&self) -> ActionBatch {
        ActionBatch::Continuous(self.mean.clone())
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ActionBatch {
        let noise: Array2<f32> = Array2::random_using(self.mean.dim(), StandardNormal, rng);
        ActionBatch::Continuous(&self.mean + &(noise * &self.std))
    }

    /// d neglogp / d mean = -z / std, d neglogp / d log_std = 1 - z^2,
    /// d entropy / d log_std = 1.
    fn backward(
        &self,
        actions: &ActionBatch,
        d_neglogp: ArrayView1<f32>,
        d_entropy: ArrayView1<f32>,
    ) -> Result<HeadGradients> {
        let z = self.standardized(self.continuous(actions)?);
        let dn = d_neglogp.insert_axis(Axis(1));

        let d_mean = -(&z / &self.std) * &dn;
        let d_log_std = (z.mapv(|v| 1.0 - v * v) * &dn).sum_axis(Axis(0)) + d_entropy.sum();

        Ok(HeadGradients {
            outputs: d_mean,
            log_std: Some(d_log_std),
        })
    }
}
