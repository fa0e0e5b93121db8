use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::Rng;

use super::{ActionBatch, HeadGradients, ProbabilityDistribution};
use crate::error::{PolicyError, Result};

/// Categorical distribution over `n` actions, parameterised by logits.
#[derive(Clone, Debug)]
pub struct Categorical {
    probs: Array2<f32>,
    log_probs: Array2<f32>,
}

impl Categorical {
    pub fn from_logits(logits: Array2<f32>) -> Self {
        let mut log_probs = logits;
        for mut row in log_probs.rows_mut() {
            let max_logit = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            let log_sum_exp = row.iter().map(|&x| (x - max_logit).exp()).sum::<f32>().ln() + max_logit;
            row.mapv_inplace(|x| x - log_sum_exp);
        }
        let probs = log_probs.mapv(f32::exp);
        Categorical { probs, log_probs }
    }

    pub fn probs(&self) -> &Array2<f32> {
        &self.probs
    }

    pub fn num_actions(&self) -> usize {
        self.probs.ncols()
    }

    fn discrete<'a>(&self, actions: &'a ActionBatch) -> Result<&'a [usize]> {
        match actions {
            ActionBatch::Discrete(a) if a.len() == self.probs.nrows() => {
                for &action in a {
                    if action >= self.num_actions() {
                        return Err(PolicyError::InvalidAction {
                            action,
                            max_actions: self.num_actions(),
                        });
                    }
                }
                Ok(a)
            }
            ActionBatch::Discrete(a) => Err(PolicyError::dimension_mismatch(
                format!("{} actions", self.probs.nrows()),
                format!("{}", a.len()),
            )),
            ActionBatch::Continuous(_) => Err(PolicyError::invalid_parameter(
                "actions",
                "categorical distribution needs discrete actions",
            )),
        }
    }
}

impl ProbabilityDistribution for Categorical {
    fn batch_size(&self) -> usize {
        self.probs.nrows()
    }

    fn neglogp(&self, actions: &ActionBatch) -> Result<Array1<f32>> {
        let actions = self.discrete(actions)?;
        Ok(Array1::from_iter(
            actions.iter().enumerate().map(|(i, &a)| -self.log_probs[[i, a]]),
        ))
    }

    fn entropy(&self) -> Array1<f32> {
        (&self.probs * &self.log_probs).sum_axis(Axis(1)).mapv(|v| -v)
    }

    fn mode(&self) -> ActionBatch {
        ActionBatch::Discrete(
            self.probs
                .rows()
                .into_iter()
                .map(|row| {
                    row.iter()
                        .enumerate()
                        .fold((0, f32::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
                        .0
                })
                .collect(),
        )
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ActionBatch {
        ActionBatch::Discrete(
            self.probs
                .rows()
                .into_iter()
                .map(|row| {
                    let rand_val: f32 = rng.gen();
                    let mut cumsum = 0.0;
                    for (i, &p) in row.iter().enumerate() {
                        cumsum += p;
                        if rand_val < cumsum {
                            return i;
                        }
                    }
                    row.len() - 1
                })
                .collect(),
        )
    }

    /// d neglogp / d logits = p - onehot(a);
    /// d entropy / d logit_j = -p_j (log p_j + H).
    fn backward(
        &self,
        actions: &ActionBatch,
        d_neglogp: ArrayView1<f32>,
        d_entropy: ArrayView1<f32>,
    ) -> Result<HeadGradients> {
        let actions = self.discrete(actions)?;
        let entropy = self.entropy();
        let mut d_logits = Array2::zeros(self.probs.dim());

        for (i, mut row) in d_logits.rows_mut().into_iter().enumerate() {
            let (dn, de, h) = (d_neglogp[i], d_entropy[i], entropy[i]);
            for (j, d) in row.iter_mut().enumerate() {
                let p = self.probs[[i, j]];
                let onehot = if j == actions[i] { 1.0 } else { 0.0 };
                *d = dn * (p - onehot) - de * p * (self.log_probs[[i, j]] + h);
            }
        }

        Ok(HeadGradients {
            outputs: d_logits,
            log_std: None,
        })
    }
}
