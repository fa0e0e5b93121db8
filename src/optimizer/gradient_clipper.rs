use ndarray::ArrayViewMutD;
use serde::{Deserialize, Serialize};

/// Gradient clipping methods
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum GradientClipper {
    /// Rescale all arrays together when their joint norm exceeds `max_norm`
    ClipByGlobalNorm { max_norm: f32 },

    /// No clipping
    None,
}

impl GradientClipper {
    /// From an optional maximum global norm, the usual PPO setting.
    pub fn from_max_norm(max_grad_norm: Option<f32>) -> Self {
        match max_grad_norm {
            Some(max_norm) => GradientClipper::ClipByGlobalNorm { max_norm },
            None => GradientClipper::None,
        }
    }

    /// Clip in place and return the global norm measured before clipping.
    pub fn clip(&self, gradients: &mut [ArrayViewMutD<'_, f32>]) -> f32 {
        let global_norm = Self::compute_global_norm(gradients);

        match self {
            GradientClipper::ClipByGlobalNorm { max_norm } => {
                // g * max_norm / max(global_norm, max_norm)
                if global_norm > *max_norm {
                    let scale = max_norm / global_norm;
                    for grad in gradients.iter_mut() {
                        grad.mapv_inplace(|g| g * scale);
                    }
                }
            }

            GradientClipper::None => {}
        }

        global_norm
    }

    /// Euclidean norm over every entry of every array
    pub fn compute_global_norm(gradients: &[ArrayViewMutD<'_, f32>]) -> f32 {
        gradients
            .iter()
            .map(|g| g.iter().map(|&x| x * x).sum::<f32>())
            .sum::<f32>()
            .sqrt()
    }
}
