//! PPO loss construction.
//!
//! Total loss = policy gradient loss - entropy * entropy coefficient
//!              + value coefficient * value loss
//!
//! Besides the scalar statistics, [`ppo_loss`] returns the derivative of the
//! total loss with respect to each sample's `neglogpac`, `entropy` and value
//! prediction. The distribution and the networks take it from there.

use ndarray::{Array1, ArrayView1};

use super::stats::TrainStats;
use crate::error::{PolicyError, Result};

/// Per-sample inputs of the loss.
#[derive(Clone, Copy, Debug)]
pub struct LossInputs<'a> {
    /// -log pi(a|s) under the current policy
    pub neglogpac: ArrayView1<'a, f32>,
    /// Entropy of the current policy at each sample
    pub entropy: ArrayView1<'a, f32>,
    /// Current value predictions
    pub vpred: ArrayView1<'a, f32>,
    /// -log pi_old(a|s) recorded when acting
    pub old_neglogpac: ArrayView1<'a, f32>,
    /// Value predictions recorded when acting
    pub old_vpred: ArrayView1<'a, f32>,
    /// Normalised advantages
    pub advantages: ArrayView1<'a, f32>,
    /// Discounted returns, the value targets
    pub returns: ArrayView1<'a, f32>,
}

/// Scalars of the loss.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LossCoefficients {
    /// Half width of the ratio and value clip intervals
    pub clip_range: f32,
    /// Entropy bonus weight
    pub ent_coef: f32,
    /// Value loss weight
    pub vf_coef: f32,
    /// Huber instead of squared error for the value loss
    pub use_huber: bool,
}

#[derive(Clone, Debug)]
pub struct LossOutput {
    pub stats: TrainStats,
    pub total_loss: f32,
    pub d_neglogpac: Array1<f32>,
    pub d_entropy: Array1<f32>,
    pub d_vpred: Array1<f32>,
}

/// Squared error, or twice the Huber loss (delta = 1), and its derivative.
fn value_error(diff: f32, use_huber: bool) -> (f32, f32) {
    if use_huber && diff.abs() > 1.0 {
        (2.0 * diff.abs() - 1.0, 2.0 * diff.signum())
    } else {
        (diff * diff, 2.0 * diff)
    }
}

pub fn ppo_loss(inputs: &LossInputs<'_>, coefs: &LossCoefficients) -> Result<LossOutput> {
    let n = inputs.neglogpac.len();
    if n == 0 {
        return Err(PolicyError::EmptyBuffer("PPO loss over an empty batch".to_string()));
    }
    let lengths = [
        inputs.entropy.len(),
        inputs.vpred.len(),
        inputs.old_neglogpac.len(),
        inputs.old_vpred.len(),
        inputs.advantages.len(),
        inputs.returns.len(),
    ];
    if let Some(&bad) = lengths.iter().find(|&&len| len != n) {
        return Err(PolicyError::dimension_mismatch(format!("{} samples", n), format!("{}", bad)));
    }

    let clip = coefs.clip_range;
    let inv_n = 1.0 / n as f32;

    let mut pg_loss = 0.0;
    let mut vf_loss = 0.0;
    let mut approxkl = 0.0;
    let mut clipped = 0usize;
    let mut d_neglogpac = Array1::zeros(n);
    let mut d_vpred = Array1::zeros(n);

    for i in 0..n {
        let adv = inputs.advantages[i];
        let neglogp = inputs.neglogpac[i];
        let old_neglogp = inputs.old_neglogpac[i];

        // ratio = pi / pi_old
        let ratio = (old_neglogp - neglogp).exp();
        let clipped_ratio = ratio.clamp(1.0 - clip, 1.0 + clip);
        let pg_losses = -adv * ratio;
        let pg_losses2 = -adv * clipped_ratio;
        // d ratio / d neglogp = -ratio; max() routes the gradient to its
        // first argument on ties, clip passes it inside the closed interval.
        if pg_losses >= pg_losses2 {
            pg_loss += pg_losses;
            d_neglogpac[i] = adv * ratio * inv_n;
        } else {
            pg_loss += pg_losses2;
            if ratio >= 1.0 - clip && ratio <= 1.0 + clip {
                d_neglogpac[i] = adv * ratio * inv_n;
            }
        }

        let delta = neglogp - old_neglogp;
        approxkl += delta * delta;
        if (ratio - 1.0).abs() > clip {
            clipped += 1;
        }

        // Clip the value to reduce variability during critic training
        let vpred = inputs.vpred[i];
        let old_vpred = inputs.old_vpred[i];
        let ret = inputs.returns[i];
        let v_step = vpred - old_vpred;
        let vpredclipped = old_vpred + v_step.clamp(-clip, clip);
        let (vf_losses1, d_vf1) = value_error(vpred - ret, coefs.use_huber);
        let (vf_losses2, d_vf2) = value_error(vpredclipped - ret, coefs.use_huber);
        if vf_losses1 >= vf_losses2 {
            vf_loss += vf_losses1;
            d_vpred[i] = 0.5 * d_vf1 * inv_n * coefs.vf_coef;
        } else {
            vf_loss += vf_losses2;
            if v_step >= -clip && v_step <= clip {
                d_vpred[i] = 0.5 * d_vf2 * inv_n * coefs.vf_coef;
            }
        }
    }

    let pg_loss = pg_loss * inv_n;
    let vf_loss = 0.5 * vf_loss * inv_n;
    let entropy = inputs.entropy.sum() * inv_n;
    let approxkl = 0.5 * approxkl * inv_n;
    let clipfrac = clipped as f32 * inv_n;
    let total_loss = pg_loss - entropy * coefs.ent_coef + vf_loss * coefs.vf_coef;

    if !total_loss.is_finite() {
        return Err(PolicyError::NumericalError(format!(
            "non-finite PPO loss (policy {}, value {}, entropy {})",
            pg_loss, vf_loss, entropy
        )));
    }

    Ok(LossOutput {
        stats: TrainStats {
            policy_loss: pg_loss,
            value_loss: vf_loss,
            policy_entropy: entropy,
            approxkl,
            clipfrac,
        },
        total_loss,
        d_neglogpac,
        d_entropy: Array1::from_elem(n, -coefs.ent_coef * inv_n),
        d_vpred,
    })
}
